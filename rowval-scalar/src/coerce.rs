//! Conversion of evaluated values into column-typed scalars, plus default
//! values and nested null handling.

use arrow::datatypes::{DataType, Field};
use rowval_result::{Error, Result};

use crate::Scalar;
use crate::date::parse_date32;
use crate::decimal::{format_decimal, parse_decimal128, rescale};

/// Depth cap for nested value traversal; adversarial nesting must not be
/// able to exhaust the stack.
const MAX_VALUE_NESTING: usize = 128;

/// Verify that a column type is one this pipeline can read and build.
pub fn ensure_supported_type(data_type: &DataType) -> Result<()> {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::Float32
        | DataType::Float64
        | DataType::Boolean
        | DataType::Utf8
        | DataType::Date32
        | DataType::Decimal128(_, _) => Ok(()),
        DataType::List(element) => ensure_supported_type(element.data_type()),
        DataType::Struct(fields) => {
            for field in fields {
                ensure_supported_type(field.data_type())?;
            }
            Ok(())
        }
        other => Err(Error::Unsupported(format!(
            "unsupported column type {other:?}"
        ))),
    }
}

/// The value a column takes for `DEFAULT` cells and defaulted nulls.
pub fn default_scalar(field: &Field) -> Result<Scalar> {
    Ok(match field.data_type() {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => Scalar::Int64(0),
        DataType::Float32 | DataType::Float64 => Scalar::Float64(0.0),
        DataType::Boolean => Scalar::Boolean(false),
        DataType::Utf8 => Scalar::Utf8(String::new()),
        DataType::Date32 => Scalar::Date32(0),
        DataType::Decimal128(precision, scale) => Scalar::Decimal128 {
            value: 0,
            precision: *precision,
            scale: *scale,
        },
        DataType::List(_) => Scalar::List(Vec::new()),
        DataType::Struct(fields) => {
            let mut items = Vec::with_capacity(fields.len());
            for field in fields {
                items.push(default_scalar(field)?);
            }
            Scalar::Struct(items)
        }
        other => {
            return Err(Error::Unsupported(format!(
                "no default value for column type {other:?}"
            )));
        }
    })
}

fn int_in_range(value: i64, min: i64, max: i64, type_name: &str) -> Result<Scalar> {
    if value < min || value > max {
        return Err(Error::NumericRange(format!(
            "{value} is out of range for {type_name}"
        )));
    }
    Ok(Scalar::Int64(value))
}

fn to_int(value: Scalar, min: i64, max: i64, type_name: &str) -> Result<Scalar> {
    match value {
        Scalar::Int64(v) => int_in_range(v, min, max, type_name),
        Scalar::Float64(v) => int_in_range(v as i64, min, max, type_name),
        Scalar::Decimal128 { value, scale, .. } => {
            let factor = 10i128.pow(u32::try_from(scale.max(0)).unwrap_or(0));
            let truncated = value / factor.max(1);
            let v = i64::try_from(truncated).map_err(|_| {
                Error::NumericRange(format!("decimal value does not fit {type_name}"))
            })?;
            int_in_range(v, min, max, type_name)
        }
        other => Err(Error::TypeMismatch(format!(
            "cannot store a {} value in a {type_name} column",
            other.kind_name()
        ))),
    }
}

/// Convert an evaluated value into the shape expected by the target column.
///
/// `Null` always passes through; whether null is legal for the column is the
/// caller's decision.
pub fn coerce_scalar(value: Scalar, field: &Field) -> Result<Scalar> {
    if value.is_null() {
        return Ok(Scalar::Null);
    }
    match field.data_type() {
        DataType::Int8 => to_int(value, i64::from(i8::MIN), i64::from(i8::MAX), "INT8"),
        DataType::Int16 => to_int(value, i64::from(i16::MIN), i64::from(i16::MAX), "INT16"),
        DataType::Int32 => to_int(value, i64::from(i32::MIN), i64::from(i32::MAX), "INT32"),
        DataType::Int64 => to_int(value, i64::MIN, i64::MAX, "INT64"),
        DataType::Float32 | DataType::Float64 => match value {
            Scalar::Int64(v) => Ok(Scalar::Float64(v as f64)),
            Scalar::Float64(v) => Ok(Scalar::Float64(v)),
            Scalar::Decimal128 { value, scale, .. } => {
                let factor = 10f64.powi(i32::from(scale));
                Ok(Scalar::Float64(value as f64 / factor))
            }
            other => Err(Error::TypeMismatch(format!(
                "cannot store a {} value in a float column",
                other.kind_name()
            ))),
        },
        DataType::Boolean => match value {
            Scalar::Boolean(v) => Ok(Scalar::Boolean(v)),
            other => Err(Error::TypeMismatch(format!(
                "cannot store a {} value in a BOOLEAN column",
                other.kind_name()
            ))),
        },
        DataType::Utf8 => match value {
            Scalar::Utf8(s) => Ok(Scalar::Utf8(s)),
            Scalar::Int64(v) => Ok(Scalar::Utf8(v.to_string())),
            Scalar::Float64(v) => Ok(Scalar::Utf8(v.to_string())),
            Scalar::Decimal128 { value, scale, .. } => {
                Ok(Scalar::Utf8(format_decimal(value, scale)))
            }
            other => Err(Error::TypeMismatch(format!(
                "cannot store a {} value in a VARCHAR column",
                other.kind_name()
            ))),
        },
        DataType::Date32 => match value {
            Scalar::Date32(v) => Ok(Scalar::Date32(v)),
            Scalar::Utf8(s) => Ok(Scalar::Date32(parse_date32(&s)?)),
            Scalar::Int64(v) => {
                let days = i32::try_from(v).map_err(|_| {
                    Error::NumericRange(format!("{v} is out of range for DATE"))
                })?;
                Ok(Scalar::Date32(days))
            }
            other => Err(Error::TypeMismatch(format!(
                "cannot store a {} value in a DATE column",
                other.kind_name()
            ))),
        },
        DataType::Decimal128(precision, scale) => {
            let raw = match value {
                Scalar::Decimal128 { value, scale: from_scale, .. } => {
                    rescale(value, from_scale, *precision, *scale)?
                }
                Scalar::Int64(v) => rescale(i128::from(v), 0, *precision, *scale)?,
                Scalar::Float64(v) => {
                    let factor = 10f64.powi(i32::from(*scale));
                    let scaled = (v * factor).round();
                    if !scaled.is_finite() || scaled.abs() >= i128::MAX as f64 {
                        return Err(Error::NumericRange(format!(
                            "{v} is out of range for DECIMAL({precision}, {scale})"
                        )));
                    }
                    rescale(scaled as i128, *scale, *precision, *scale)?
                }
                Scalar::Utf8(s) => parse_decimal128(&s, *precision, *scale)?,
                other => {
                    return Err(Error::TypeMismatch(format!(
                        "cannot store a {} value in a DECIMAL column",
                        other.kind_name()
                    )));
                }
            };
            Ok(Scalar::Decimal128 { value: raw, precision: *precision, scale: *scale })
        }
        DataType::List(element) => match value {
            Scalar::List(items) => {
                let mut coerced = Vec::with_capacity(items.len());
                for item in items {
                    let item = coerce_scalar(item, element)?;
                    if item.is_null() && !element.is_nullable() {
                        return Err(Error::TypeMismatch(
                            "NULL value in a non-nullable array element".into(),
                        ));
                    }
                    coerced.push(item);
                }
                Ok(Scalar::List(coerced))
            }
            other => Err(Error::TypeMismatch(format!(
                "cannot store a {} value in an array column",
                other.kind_name()
            ))),
        },
        DataType::Struct(fields) => match value {
            Scalar::Struct(items) => {
                if items.len() != fields.len() {
                    return Err(Error::TypeMismatch(format!(
                        "bad size of tuple: expected {} elements, got {}",
                        fields.len(),
                        items.len()
                    )));
                }
                let mut coerced = Vec::with_capacity(items.len());
                for (item, field) in items.into_iter().zip(fields.iter()) {
                    let item = coerce_scalar(item, field)?;
                    if item.is_null() && !field.is_nullable() {
                        return Err(Error::TypeMismatch(format!(
                            "NULL value in non-nullable tuple element '{}'",
                            field.name()
                        )));
                    }
                    coerced.push(item);
                }
                Ok(Scalar::Struct(coerced))
            }
            other => Err(Error::TypeMismatch(format!(
                "cannot store a {} value in a tuple column",
                other.kind_name()
            ))),
        },
        other => Err(Error::Unsupported(format!(
            "unsupported column type {other:?}"
        ))),
    }
}

/// Rewrite `NULL` leaves inside nested values into the element type's default
/// wherever the element is non-nullable. Applied before coercion when the
/// configuration asks for null-as-default semantics.
pub fn replace_null_fields_with_defaults(value: &mut Scalar, field: &Field) -> Result<()> {
    replace_nulls_inner(value, field, MAX_VALUE_NESTING)
}

fn replace_nulls_inner(value: &mut Scalar, field: &Field, depth: usize) -> Result<()> {
    if depth == 0 {
        return Err(Error::Unsupported("value nesting exceeds the depth limit".into()));
    }
    match (field.data_type(), value) {
        (DataType::Struct(fields), Scalar::Struct(items)) => {
            if items.len() != fields.len() {
                return Err(Error::TypeMismatch(format!(
                    "bad size of tuple: expected {} elements, got {}",
                    fields.len(),
                    items.len()
                )));
            }
            for (item, element) in items.iter_mut().zip(fields.iter()) {
                if item.is_null() && !element.is_nullable() {
                    *item = default_scalar(element)?;
                }
                replace_nulls_inner(item, element, depth - 1)?;
            }
            Ok(())
        }
        (DataType::List(element), Scalar::List(items)) => {
            if element.is_nullable() {
                return Ok(());
            }
            for item in items.iter_mut() {
                if item.is_null() {
                    *item = default_scalar(element)?;
                }
                replace_nulls_inner(item, element, depth - 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Fields;
    use std::sync::Arc;

    #[test]
    fn widens_and_narrows_integers() {
        let field = Field::new("v", DataType::Int8, false);
        assert_eq!(coerce_scalar(Scalar::Int64(5), &field).unwrap(), Scalar::Int64(5));
        assert!(matches!(
            coerce_scalar(Scalar::Int64(300), &field),
            Err(Error::NumericRange(_))
        ));
    }

    #[test]
    fn float_to_int_truncates() {
        let field = Field::new("v", DataType::Int64, false);
        assert_eq!(coerce_scalar(Scalar::Float64(1.9), &field).unwrap(), Scalar::Int64(1));
    }

    #[test]
    fn strings_reject_tuples() {
        let field = Field::new("v", DataType::Utf8, false);
        assert!(matches!(
            coerce_scalar(Scalar::Struct(vec![]), &field),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn decimal_rescales_from_integers() {
        let field = Field::new("v", DataType::Decimal128(10, 2), false);
        assert_eq!(
            coerce_scalar(Scalar::Int64(3), &field).unwrap(),
            Scalar::Decimal128 { value: 300, precision: 10, scale: 2 }
        );
    }

    #[test]
    fn tuple_arity_mismatch_is_type_mismatch() {
        let fields: Fields = vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
        ]
        .into();
        let field = Field::new("v", DataType::Struct(fields), false);
        let err = coerce_scalar(Scalar::Struct(vec![Scalar::Int64(1)]), &field).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn nested_nulls_become_defaults() {
        let fields: Fields = vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
        ]
        .into();
        let field = Field::new("v", DataType::Struct(fields), false);
        let mut value = Scalar::Struct(vec![Scalar::Null, Scalar::Null]);
        replace_null_fields_with_defaults(&mut value, &field).unwrap();
        // Non-nullable element defaults, nullable element keeps its null.
        assert_eq!(value, Scalar::Struct(vec![Scalar::Int64(0), Scalar::Null]));
    }

    #[test]
    fn nullable_list_elements_keep_nulls() {
        let element = Arc::new(Field::new("item", DataType::Int64, true));
        let field = Field::new("v", DataType::List(element), false);
        let mut value = Scalar::List(vec![Scalar::Null]);
        replace_null_fields_with_defaults(&mut value, &field).unwrap();
        assert_eq!(value, Scalar::List(vec![Scalar::Null]));
    }
}
