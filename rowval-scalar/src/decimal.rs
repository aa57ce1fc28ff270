//! Decimal128 text parsing and rescaling.
//!
//! Values are carried as a raw `i128` plus a scale, matching Arrow's
//! `Decimal128` semantics. Overflow is never a recoverable parse failure:
//! every bound violation here reports [`Error::NumericRange`].

use rowval_result::{Error, Result};

/// Maximum precision of an Arrow `Decimal128` column.
pub const MAX_DECIMAL_PRECISION: u8 = 38;

fn pow10(exp: u32) -> Result<i128> {
    10i128
        .checked_pow(exp)
        .ok_or_else(|| Error::NumericRange(format!("10^{exp} exceeds decimal range")))
}

fn check_precision(value: i128, precision: u8) -> Result<i128> {
    let bound = pow10(u32::from(precision))?;
    if value <= -bound || value >= bound {
        return Err(Error::NumericRange(format!(
            "decimal value {value} exceeds precision {precision}"
        )));
    }
    Ok(value)
}

/// Parse decimal text (`-12.345`) into a raw value with the given precision
/// and scale.
///
/// Malformed text is a syntax failure; a value that parses but does not fit
/// is a numeric range failure.
pub fn parse_decimal128(text: &str, precision: u8, scale: i8) -> Result<i128> {
    if scale < 0 || u8::try_from(scale).map_or(true, |s| s > precision) {
        return Err(Error::NumericRange(format!(
            "decimal scale {scale} is invalid for precision {precision}"
        )));
    }

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::Syntax(format!("cannot parse '{text}' as decimal")));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Syntax(format!("cannot parse '{text}' as decimal")));
    }
    if frac_part.len() > usize::from(u8::try_from(scale).unwrap_or(0)) {
        return Err(Error::NumericRange(format!(
            "decimal '{text}' has more than {scale} fractional digits"
        )));
    }

    let mut value: i128 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i128::from(b - b'0')))
            .ok_or_else(|| Error::NumericRange(format!("decimal '{text}' overflows")))?;
    }
    let pad = u32::from(u8::try_from(scale).unwrap_or(0)) - u32::try_from(frac_part.len()).unwrap_or(0);
    value = value
        .checked_mul(pow10(pad)?)
        .ok_or_else(|| Error::NumericRange(format!("decimal '{text}' overflows")))?;
    if negative {
        value = -value;
    }
    check_precision(value, precision)
}

/// Change the scale of a raw decimal value, verifying the new precision.
/// Lowering the scale must be exact.
pub fn rescale(value: i128, from_scale: i8, precision: u8, to_scale: i8) -> Result<i128> {
    let rescaled = if to_scale >= from_scale {
        let factor = pow10(u32::try_from(to_scale - from_scale).unwrap_or(0))?;
        value
            .checked_mul(factor)
            .ok_or_else(|| Error::NumericRange("decimal rescale overflows".into()))?
    } else {
        let factor = pow10(u32::try_from(from_scale - to_scale).unwrap_or(0))?;
        if value % factor != 0 {
            return Err(Error::NumericRange(format!(
                "cannot rescale decimal from scale {from_scale} to {to_scale} without losing precision"
            )));
        }
        value / factor
    };
    check_precision(rescaled, precision)
}

/// Render a raw decimal value as text, mostly for error messages.
pub fn format_decimal(value: i128, scale: i8) -> String {
    if scale <= 0 {
        return value.to_string();
    }
    let scale = u32::try_from(scale).unwrap_or(0);
    let factor = 10i128.pow(scale);
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let int = abs / factor.unsigned_abs();
    let frac = abs % factor.unsigned_abs();
    format!("{sign}{int}.{frac:0width$}", width = scale as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_pads_fraction() {
        assert_eq!(parse_decimal128("12.3", 10, 2).unwrap(), 1230);
        assert_eq!(parse_decimal128("-0.05", 10, 2).unwrap(), -5);
        assert_eq!(parse_decimal128("7", 10, 2).unwrap(), 700);
    }

    #[test]
    fn overflow_is_a_range_failure() {
        let err = parse_decimal128("12345.6", 4, 1).unwrap_err();
        assert!(matches!(err, Error::NumericRange(_)));
        let err = parse_decimal128("1.234", 10, 2).unwrap_err();
        assert!(matches!(err, Error::NumericRange(_)));
    }

    #[test]
    fn garbage_is_a_syntax_failure() {
        assert!(matches!(parse_decimal128("12a", 10, 2), Err(Error::Syntax(_))));
    }

    #[test]
    fn rescale_checks_exactness() {
        assert_eq!(rescale(1230, 2, 10, 1).unwrap(), 123);
        assert!(matches!(rescale(1234, 2, 10, 1), Err(Error::NumericRange(_))));
        assert_eq!(rescale(5, 0, 10, 3).unwrap(), 5000);
    }

    #[test]
    fn formats_with_scale() {
        assert_eq!(format_decimal(1230, 2), "12.30");
        assert_eq!(format_decimal(-5, 2), "-0.05");
    }
}
