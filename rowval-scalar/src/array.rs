//! Arrow column construction from accumulated scalars.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder, Float64Builder,
    Int8Builder, Int16Builder, Int32Builder, Int64Builder, ListArray, StringBuilder, StructArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{DataType, Field};
use rowval_result::{Error, Result};

use crate::Scalar;
use crate::coerce::default_scalar;

fn mismatch(field: &Field, value: &Scalar) -> Error {
    Error::Internal(format!(
        "column '{}' of type {:?} received a {} scalar",
        field.name(),
        field.data_type(),
        value.kind_name()
    ))
}

macro_rules! build_int {
    ($builder:ty, $native:ty, $field:expr, $values:expr) => {{
        let mut builder = <$builder>::with_capacity($values.len());
        for value in $values {
            match value {
                Scalar::Null => builder.append_null(),
                Scalar::Int64(v) => builder.append_value(<$native>::try_from(*v).map_err(|_| {
                    Error::NumericRange(format!("{v} does not fit column '{}'", $field.name()))
                })?),
                other => return Err(mismatch($field, other)),
            }
        }
        Ok(Arc::new(builder.finish()) as ArrayRef)
    }};
}

/// Build one Arrow array for a column from its scalar buffer.
///
/// Values are expected to already match the column type (the reader coerces
/// before buffering); a class mismatch here is an internal invariant failure,
/// not bad user input.
pub fn build_array(field: &Field, values: &[Scalar]) -> Result<ArrayRef> {
    match field.data_type() {
        DataType::Int8 => build_int!(Int8Builder, i8, field, values),
        DataType::Int16 => build_int!(Int16Builder, i16, field, values),
        DataType::Int32 => build_int!(Int32Builder, i32, field, values),
        DataType::Int64 => build_int!(Int64Builder, i64, field, values),
        DataType::Float32 => {
            let mut builder = Float32Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Scalar::Null => builder.append_null(),
                    Scalar::Float64(v) => builder.append_value(*v as f32),
                    other => return Err(mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Scalar::Null => builder.append_null(),
                    Scalar::Float64(v) => builder.append_value(*v),
                    other => return Err(mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for value in values {
                match value {
                    Scalar::Null => builder.append_null(),
                    Scalar::Boolean(v) => builder.append_value(*v),
                    other => return Err(mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Utf8 => {
            let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for value in values {
                match value {
                    Scalar::Null => builder.append_null(),
                    Scalar::Utf8(s) => builder.append_value(s),
                    other => return Err(mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Date32 => {
            let mut builder = Date32Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Scalar::Null => builder.append_null(),
                    Scalar::Date32(v) => builder.append_value(*v),
                    other => return Err(mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Decimal128(precision, scale) => {
            let mut builder = Decimal128Builder::with_capacity(values.len())
                .with_precision_and_scale(*precision, *scale)?;
            for value in values {
                match value {
                    Scalar::Null => builder.append_null(),
                    Scalar::Decimal128 { value: raw, scale: s, .. } if s == scale => {
                        builder.append_value(*raw)
                    }
                    other => return Err(mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::List(element) => {
            let mut lengths = Vec::with_capacity(values.len());
            let mut valid = Vec::with_capacity(values.len());
            let mut flat = Vec::new();
            for value in values {
                match value {
                    Scalar::Null => {
                        lengths.push(0);
                        valid.push(false);
                    }
                    Scalar::List(items) => {
                        lengths.push(items.len());
                        valid.push(true);
                        flat.extend(items.iter().cloned());
                    }
                    other => return Err(mismatch(field, other)),
                }
            }
            let child = build_array(element, &flat)?;
            let array = ListArray::try_new(
                Arc::clone(element),
                OffsetBuffer::from_lengths(lengths),
                child,
                Some(NullBuffer::from(valid)),
            )?;
            Ok(Arc::new(array))
        }
        DataType::Struct(fields) => {
            let mut valid = Vec::with_capacity(values.len());
            let mut per_child: Vec<Vec<Scalar>> =
                fields.iter().map(|_| Vec::with_capacity(values.len())).collect();
            for value in values {
                match value {
                    Scalar::Null => {
                        valid.push(false);
                        for (child, f) in per_child.iter_mut().zip(fields.iter()) {
                            child.push(default_scalar(f)?);
                        }
                    }
                    Scalar::Struct(items) if items.len() == fields.len() => {
                        valid.push(true);
                        for (child, item) in per_child.iter_mut().zip(items.iter()) {
                            child.push(item.clone());
                        }
                    }
                    other => return Err(mismatch(field, other)),
                }
            }
            let mut arrays = Vec::with_capacity(fields.len());
            for (f, child) in fields.iter().zip(per_child.iter()) {
                arrays.push(build_array(f, child)?);
            }
            let array = StructArray::try_new(fields.clone(), arrays, Some(NullBuffer::from(valid)))?;
            Ok(Arc::new(array))
        }
        other => Err(Error::Unsupported(format!(
            "unsupported column type {other:?}"
        ))),
    }
}
