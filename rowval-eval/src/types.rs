//! Mapping from SQL CAST target types to Arrow column types.
//!
//! The mapping intentionally favors broad families instead of mirroring
//! every dialect-specific variant; extend it here so it stays in one place.

use arrow::datatypes::DataType;
use rowval_result::{Error, Result};
use sqlparser::ast::{DataType as SqlDataType, ExactNumberInfo};

use rowval_scalar::decimal::MAX_DECIMAL_PRECISION;

pub fn sql_type_to_arrow(data_type: &SqlDataType) -> Result<DataType> {
    use SqlDataType::*;

    let mapped = match data_type {
        TinyInt(_) => DataType::Int8,
        SmallInt(_) | Int2(_) => DataType::Int16,
        Int(_) | Integer(_) | Int4(_) | MediumInt(_) => DataType::Int32,
        BigInt(_) | Int8(_) => DataType::Int64,
        Float(_) | Real => DataType::Float32,
        Double(_) | DoublePrecision | Float8 => DataType::Float64,
        Boolean => DataType::Boolean,
        Character(_) | Char(_) | CharacterVarying(_) | CharVarying(_) | Varchar(_) | Text
        | String(_) => DataType::Utf8,
        Date => DataType::Date32,
        Decimal(info) | Numeric(info) | Dec(info) => {
            let (precision, scale) = decimal_parts(info)?;
            DataType::Decimal128(precision, scale)
        }
        other => {
            return Err(Error::Unsupported(format!(
                "unsupported CAST target type '{other}'"
            )));
        }
    };
    Ok(mapped)
}

fn decimal_parts(info: &ExactNumberInfo) -> Result<(u8, i8)> {
    let (precision, scale) = match info {
        ExactNumberInfo::None => (u64::from(MAX_DECIMAL_PRECISION), 0),
        ExactNumberInfo::Precision(p) => (*p, 0),
        ExactNumberInfo::PrecisionAndScale(p, s) => (*p, *s),
    };
    let precision = u8::try_from(precision)
        .ok()
        .filter(|p| *p > 0 && *p <= MAX_DECIMAL_PRECISION)
        .ok_or_else(|| {
            Error::Unsupported(format!("unsupported decimal precision {precision}"))
        })?;
    let scale = i8::try_from(scale)
        .ok()
        .filter(|s| *s >= 0 && u8::try_from(*s).unwrap_or(u8::MAX) <= precision)
        .ok_or_else(|| Error::Unsupported(format!("unsupported decimal scale {scale}")))?;
    Ok((precision, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_families_map_to_widths() {
        assert_eq!(sql_type_to_arrow(&SqlDataType::TinyInt(None)).unwrap(), DataType::Int8);
        assert_eq!(sql_type_to_arrow(&SqlDataType::BigInt(None)).unwrap(), DataType::Int64);
    }

    #[test]
    fn decimal_keeps_precision_and_scale() {
        let ty = sql_type_to_arrow(&SqlDataType::Decimal(ExactNumberInfo::PrecisionAndScale(10, 2)))
            .unwrap();
        assert_eq!(ty, DataType::Decimal128(10, 2));
    }

    #[test]
    fn exotic_types_are_rejected() {
        assert!(matches!(
            sql_type_to_arrow(&SqlDataType::Uuid),
            Err(Error::Unsupported(_))
        ));
    }
}
