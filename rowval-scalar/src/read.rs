//! Fast streaming reader for quoted literal text.
//!
//! This is the cheap path of the ingestion pipeline: it consumes one literal
//! directly from the byte stream with no tokenizing and no expression
//! grammar. Anything it cannot read raises [`Error::Syntax`], which the
//! caller treats as "escalate to expression parsing" after rolling the
//! buffer back; the reader itself never rewinds.
//!
//! Note the deliberate asymmetries with the expression grammar: a leading
//! `+` sign is rejected here (the grammar handles it), and numeric overflow
//! of a decimal column is a fatal range failure rather than a syntax one.

use arrow::datatypes::{DataType, Field};
use rowval_result::{Error, Result};

use crate::Scalar;
use crate::date::parse_date32;
use crate::decimal::parse_decimal128;

/// Minimal byte cursor contract the reader needs. The buffering layer that
/// owns checkpoints implements this; tests use an in-memory slice.
pub trait ByteSource {
    /// Look at the next byte without consuming it.
    fn peek_byte(&mut self) -> Result<Option<u8>>;
    /// Consume and return the next byte.
    fn next_byte(&mut self) -> Result<Option<u8>>;
}

impl ByteSource for &[u8] {
    fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.first().copied())
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let slice = *self;
        match slice.split_first() {
            Some((b, rest)) => {
                *self = rest;
                Ok(Some(*b))
            }
            None => Ok(None),
        }
    }
}

/// Read one literal of the field's type from the stream.
///
/// `NULL` (any case) is accepted for every type and returned as
/// [`Scalar::Null`]; nullability enforcement is the caller's concern for the
/// top level and a syntax failure for nested elements (so the expression
/// path gets a chance to apply defaults).
pub fn read_quoted_scalar<S: ByteSource>(src: &mut S, field: &Field) -> Result<Scalar> {
    if matches!(src.peek_byte()?, Some(b'N' | b'n')) {
        expect_keyword_ci(src, "NULL")?;
        return Ok(Scalar::Null);
    }

    match field.data_type() {
        DataType::Int8 => read_int(src, i64::from(i8::MIN), i64::from(i8::MAX), "INT8"),
        DataType::Int16 => read_int(src, i64::from(i16::MIN), i64::from(i16::MAX), "INT16"),
        DataType::Int32 => read_int(src, i64::from(i32::MIN), i64::from(i32::MAX), "INT32"),
        DataType::Int64 => read_int(src, i64::MIN, i64::MAX, "INT64"),
        DataType::Float32 | DataType::Float64 => read_float(src),
        DataType::Boolean => read_bool(src),
        DataType::Utf8 => Ok(Scalar::Utf8(read_quoted_string(src)?)),
        DataType::Date32 => {
            let text = read_quoted_string(src)?;
            Ok(Scalar::Date32(parse_date32(&text)?))
        }
        DataType::Decimal128(precision, scale) => {
            let text = read_number_text(src)?;
            Ok(Scalar::Decimal128 {
                value: parse_decimal128(&text, *precision, *scale)?,
                precision: *precision,
                scale: *scale,
            })
        }
        DataType::List(element) => read_list(src, element),
        DataType::Struct(fields) => read_struct(src, fields),
        other => Err(Error::Unsupported(format!(
            "no literal reader for column type {other:?}"
        ))),
    }
}

fn skip_whitespace<S: ByteSource>(src: &mut S) -> Result<()> {
    while matches!(src.peek_byte()?, Some(b' ' | b'\t' | b'\r' | b'\n')) {
        src.next_byte()?;
    }
    Ok(())
}

fn expect_keyword_ci<S: ByteSource>(src: &mut S, keyword: &str) -> Result<()> {
    for expected in keyword.bytes() {
        match src.next_byte()? {
            Some(b) if b.eq_ignore_ascii_case(&expected) => {}
            _ => return Err(Error::Syntax(format!("expected keyword '{keyword}'"))),
        }
    }
    // Word boundary: `NULLIF` must not read as `NULL`.
    if let Some(b) = src.peek_byte()? {
        if b.is_ascii_alphanumeric() || b == b'_' {
            return Err(Error::Syntax(format!("expected keyword '{keyword}'")));
        }
    }
    Ok(())
}

/// Collect the text of one number: optional `-`, digits, fraction, exponent.
/// A leading `+` is not part of the literal grammar here.
fn read_number_text<S: ByteSource>(src: &mut S) -> Result<String> {
    let mut text = String::new();
    if matches!(src.peek_byte()?, Some(b'+')) {
        return Err(Error::Syntax("unexpected '+' before number".into()));
    }
    if matches!(src.peek_byte()?, Some(b'-')) {
        src.next_byte()?;
        text.push('-');
    }
    let mut digits = 0usize;
    while let Some(b @ b'0'..=b'9') = src.peek_byte()? {
        src.next_byte()?;
        text.push(b as char);
        digits += 1;
    }
    if matches!(src.peek_byte()?, Some(b'.')) {
        src.next_byte()?;
        text.push('.');
        while let Some(b @ b'0'..=b'9') = src.peek_byte()? {
            src.next_byte()?;
            text.push(b as char);
            digits += 1;
        }
    }
    if digits == 0 {
        return Err(Error::Syntax("expected a number".into()));
    }
    if matches!(src.peek_byte()?, Some(b'e' | b'E')) {
        src.next_byte()?;
        text.push('e');
        if let Some(sign @ (b'+' | b'-')) = src.peek_byte()? {
            src.next_byte()?;
            text.push(sign as char);
        }
        let mut exp_digits = 0usize;
        while let Some(b @ b'0'..=b'9') = src.peek_byte()? {
            src.next_byte()?;
            text.push(b as char);
            exp_digits += 1;
        }
        if exp_digits == 0 {
            return Err(Error::Syntax("expected exponent digits".into()));
        }
    }
    Ok(text)
}

fn read_int<S: ByteSource>(src: &mut S, min: i64, max: i64, type_name: &str) -> Result<Scalar> {
    let text = read_number_text(src)?;
    if text.contains(['.', 'e']) {
        return Err(Error::Syntax(format!("'{text}' is not an integer")));
    }
    let value = text
        .parse::<i64>()
        .map_err(|_| Error::Syntax(format!("cannot parse '{text}' as an integer")))?;
    if value < min || value > max {
        return Err(Error::Syntax(format!("{value} is out of range for {type_name}")));
    }
    Ok(Scalar::Int64(value))
}

fn read_float<S: ByteSource>(src: &mut S) -> Result<Scalar> {
    let text = read_number_text(src)?;
    let value = text
        .parse::<f64>()
        .map_err(|_| Error::Syntax(format!("cannot parse '{text}' as a float")))?;
    Ok(Scalar::Float64(value))
}

fn read_bool<S: ByteSource>(src: &mut S) -> Result<Scalar> {
    match src.peek_byte()? {
        Some(b't' | b'T') => {
            expect_keyword_ci(src, "true")?;
            Ok(Scalar::Boolean(true))
        }
        Some(b'f' | b'F') => {
            expect_keyword_ci(src, "false")?;
            Ok(Scalar::Boolean(false))
        }
        _ => Err(Error::Syntax("expected 'true' or 'false'".into())),
    }
}

/// Read a single-quoted string. Backslash escapes and doubled quotes are
/// both accepted; unknown escapes keep the escaped byte.
fn read_quoted_string<S: ByteSource>(src: &mut S) -> Result<String> {
    match src.next_byte()? {
        Some(b'\'') => {}
        _ => return Err(Error::Syntax("expected a quoted string".into())),
    }
    let mut bytes = Vec::new();
    loop {
        match src.next_byte()? {
            None => return Err(Error::Syntax("unterminated quoted string".into())),
            Some(b'\\') => {
                let escaped = src
                    .next_byte()?
                    .ok_or_else(|| Error::Syntax("unterminated quoted string".into()))?;
                bytes.push(match escaped {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'r' => b'\r',
                    b'0' => 0,
                    other => other,
                });
            }
            Some(b'\'') => {
                if matches!(src.peek_byte()?, Some(b'\'')) {
                    src.next_byte()?;
                    bytes.push(b'\'');
                } else {
                    break;
                }
            }
            Some(b) => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|_| Error::Syntax("string literal is not valid UTF-8".into()))
}

fn read_nested_element<S: ByteSource>(src: &mut S, field: &Field) -> Result<Scalar> {
    let value = read_quoted_scalar(src, field)?;
    if value.is_null() && !field.is_nullable() {
        return Err(Error::Syntax(format!(
            "NULL inside a non-nullable {:?} element",
            field.data_type()
        )));
    }
    Ok(value)
}

fn read_list<S: ByteSource>(src: &mut S, element: &Field) -> Result<Scalar> {
    match src.next_byte()? {
        Some(b'[') => {}
        _ => return Err(Error::Syntax("expected '['".into())),
    }
    let mut items = Vec::new();
    skip_whitespace(src)?;
    if matches!(src.peek_byte()?, Some(b']')) {
        src.next_byte()?;
        return Ok(Scalar::List(items));
    }
    loop {
        skip_whitespace(src)?;
        items.push(read_nested_element(src, element)?);
        skip_whitespace(src)?;
        match src.next_byte()? {
            Some(b',') => {}
            Some(b']') => break,
            _ => return Err(Error::Syntax("expected ',' or ']' in array literal".into())),
        }
    }
    Ok(Scalar::List(items))
}

fn read_struct<S: ByteSource>(src: &mut S, fields: &arrow::datatypes::Fields) -> Result<Scalar> {
    match src.next_byte()? {
        Some(b'(') => {}
        _ => return Err(Error::Syntax("expected '('".into())),
    }
    let mut items = Vec::with_capacity(fields.len());
    for (idx, field) in fields.iter().enumerate() {
        skip_whitespace(src)?;
        if idx > 0 {
            match src.next_byte()? {
                Some(b',') => skip_whitespace(src)?,
                _ => {
                    return Err(Error::Syntax(format!(
                        "expected {} elements in tuple literal",
                        fields.len()
                    )));
                }
            }
        }
        items.push(read_nested_element(src, field)?);
    }
    skip_whitespace(src)?;
    match src.next_byte()? {
        Some(b')') => Ok(Scalar::Struct(items)),
        _ => Err(Error::Syntax(format!(
            "expected {} elements in tuple literal",
            fields.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Fields;
    use std::sync::Arc;

    fn read(field: &Field, text: &str) -> Result<Scalar> {
        let mut src: &[u8] = text.as_bytes();
        read_quoted_scalar(&mut src, field)
    }

    #[test]
    fn reads_plain_integers() {
        let field = Field::new("v", DataType::Int64, false);
        assert_eq!(read(&field, "42").unwrap(), Scalar::Int64(42));
        assert_eq!(read(&field, "-7").unwrap(), Scalar::Int64(-7));
    }

    #[test]
    fn leading_plus_is_rejected() {
        let field = Field::new("v", DataType::Int64, false);
        assert!(matches!(read(&field, "+42"), Err(Error::Syntax(_))));
    }

    #[test]
    fn narrow_integers_are_range_checked() {
        let field = Field::new("v", DataType::Int8, false);
        assert_eq!(read(&field, "127").unwrap(), Scalar::Int64(127));
        assert!(matches!(read(&field, "128"), Err(Error::Syntax(_))));
    }

    #[test]
    fn reads_strings_with_escapes_and_doubled_quotes() {
        let field = Field::new("v", DataType::Utf8, false);
        assert_eq!(read(&field, r"'a\nb'").unwrap(), Scalar::Utf8("a\nb".into()));
        assert_eq!(read(&field, r"'it\'s'").unwrap(), Scalar::Utf8("it's".into()));
        assert_eq!(read(&field, "'it''s'").unwrap(), Scalar::Utf8("it's".into()));
    }

    #[test]
    fn null_keyword_is_case_insensitive() {
        let field = Field::new("v", DataType::Int64, true);
        assert_eq!(read(&field, "null").unwrap(), Scalar::Null);
        assert_eq!(read(&field, "NULL").unwrap(), Scalar::Null);
        assert!(read(&field, "nullish").is_err());
    }

    #[test]
    fn decimal_overflow_is_fatal_range() {
        let field = Field::new("v", DataType::Decimal128(4, 1), false);
        assert_eq!(
            read(&field, "123.4").unwrap(),
            Scalar::Decimal128 { value: 1234, precision: 4, scale: 1 }
        );
        assert!(matches!(read(&field, "12345.6"), Err(Error::NumericRange(_))));
    }

    #[test]
    fn reads_nested_lists() {
        let field = Field::new(
            "v",
            DataType::List(Arc::new(Field::new("item", DataType::Int64, true))),
            false,
        );
        assert_eq!(
            read(&field, "[1, 2, NULL]").unwrap(),
            Scalar::List(vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Null])
        );
        assert_eq!(read(&field, "[]").unwrap(), Scalar::List(vec![]));
    }

    #[test]
    fn null_in_non_nullable_element_is_syntax() {
        let field = Field::new(
            "v",
            DataType::List(Arc::new(Field::new("item", DataType::Int64, false))),
            false,
        );
        assert!(matches!(read(&field, "[1, NULL]"), Err(Error::Syntax(_))));
    }

    #[test]
    fn reads_tuples_with_arity_check() {
        let fields: Fields = vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, false),
        ]
        .into();
        let field = Field::new("v", DataType::Struct(fields), false);
        assert_eq!(
            read(&field, "(5, 'x')").unwrap(),
            Scalar::Struct(vec![Scalar::Int64(5), Scalar::Utf8("x".into())])
        );
        assert!(matches!(read(&field, "(5)"), Err(Error::Syntax(_))));
        assert!(matches!(read(&field, "(5, 'x', 6)"), Err(Error::Syntax(_))));
    }

    #[test]
    fn dates_parse_from_quoted_text() {
        let field = Field::new("v", DataType::Date32, false);
        assert_eq!(read(&field, "'1970-01-02'").unwrap(), Scalar::Date32(1));
    }
}
