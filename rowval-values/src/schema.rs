//! Schema inference for tuples with no known target schema.
//!
//! A deliberately small scanner, independent of the strategy and template
//! machinery: every cell must be a plain quoted literal, and each row yields
//! one inferred type per cell from the literal's textual shape. Unifying the
//! per-row vectors is the caller's job; [`unify_types`] implements the
//! pairwise rule.

use std::io::Read;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields};
use rowval_result::{Error, Result};

use crate::buffer::CheckpointBuffer;

const SCHEMA_PREVIEW_CHARS: usize = 64;

pub struct ValuesSchemaReader<R> {
    buf: CheckpointBuffer<R>,
    started: bool,
    end_of_data: bool,
}

impl<R: Read> ValuesSchemaReader<R> {
    pub fn new(source: R) -> Self {
        ValuesSchemaReader {
            buf: CheckpointBuffer::new(source, SCHEMA_PREVIEW_CHARS),
            started: false,
            end_of_data: false,
        }
    }

    /// Read one row and infer a type per cell; `None` once the input ends.
    pub fn read_row_types(&mut self) -> Result<Option<Vec<DataType>>> {
        if !self.started {
            self.buf.skip_bom()?;
            self.started = true;
        }

        self.buf.skip_whitespace()?;
        if self.buf.eof()? || self.end_of_data {
            return Ok(None);
        }

        self.buf.assert_char(b'(')?;
        self.buf.skip_whitespace()?;
        let mut types = Vec::new();
        while !self.buf.eof()? && self.buf.peek()? != Some(b')') {
            if !types.is_empty() {
                self.buf.assert_char(b',')?;
                self.buf.skip_whitespace()?;
            }
            let text = self.read_cell_text()?;
            types.push(infer_literal_type(text.trim())?);
            self.buf.skip_whitespace()?;
        }
        self.buf.assert_char(b')')?;

        self.buf.skip_whitespace()?;
        if self.buf.peek()? == Some(b',') {
            self.buf.advance();
        }
        if self.buf.peek()? == Some(b';') {
            self.buf.advance();
            self.end_of_data = true;
        }
        Ok(Some(types))
    }

    /// Raw text of one cell: everything up to the next top-level `,` or `)`,
    /// with quote, escape, and bracket awareness.
    fn read_cell_text(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        let mut depth = 0i64;
        let mut quoted = false;
        loop {
            let Some(b) = self.buf.peek()? else {
                return Err(Error::Syntax("unexpected end of input inside a row".into()));
            };
            match b {
                b'\\' => {
                    bytes.push(b);
                    self.buf.advance();
                    if let Some(next) = self.buf.bump()? {
                        bytes.push(next);
                    }
                    continue;
                }
                b'\'' => quoted = !quoted,
                b'(' | b'[' if !quoted => depth += 1,
                b']' if !quoted => depth -= 1,
                b')' if !quoted => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                b',' if !quoted && depth == 0 => break,
                _ => {}
            }
            bytes.push(b);
            self.buf.advance();
        }
        String::from_utf8(bytes).map_err(|_| Error::Syntax("cell is not valid UTF-8".into()))
    }
}

/// Infer a type from one literal's textual shape.
fn infer_literal_type(text: &str) -> Result<DataType> {
    if text.eq_ignore_ascii_case("null") {
        return Ok(DataType::Null);
    }
    if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
        return Ok(DataType::Boolean);
    }
    if let Some(inner) = text.strip_prefix('\'') {
        let inner = inner.strip_suffix('\'').unwrap_or(inner);
        if rowval_scalar::date::parse_date32(inner).is_ok() {
            return Ok(DataType::Date32);
        }
        return Ok(DataType::Utf8);
    }
    if let Some(inner) = text.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(|| {
            Error::Syntax(format!("unbalanced array literal '{text}'"))
        })?;
        let mut element = DataType::Null;
        for part in split_top_level(inner) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            element = unify_types(&element, &infer_literal_type(part)?);
        }
        return Ok(DataType::List(Arc::new(Field::new("item", element, true))));
    }
    if let Some(inner) = text.strip_prefix('(') {
        let inner = inner.strip_suffix(')').ok_or_else(|| {
            Error::Syntax(format!("unbalanced tuple literal '{text}'"))
        })?;
        let mut fields = Vec::new();
        for (idx, part) in split_top_level(inner).iter().enumerate() {
            fields.push(Field::new(
                format!("f{idx}"),
                infer_literal_type(part.trim())?,
                true,
            ));
        }
        return Ok(DataType::Struct(Fields::from(fields)));
    }
    let numeric_shape = text
        .strip_prefix('-')
        .unwrap_or(text)
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if numeric_shape && text.bytes().any(|b| b.is_ascii_digit()) {
        if text.contains(['.', 'e', 'E']) {
            return Ok(DataType::Float64);
        }
        return Ok(DataType::Int64);
    }
    Err(Error::Syntax(format!("cannot infer a type from '{text}'")))
}

/// Split a literal list on commas that sit outside quotes and brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let bytes = text.as_bytes();
    let mut depth = 0i64;
    let mut quoted = false;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\'' => quoted = !quoted,
            b'(' | b'[' if !quoted => depth += 1,
            b')' | b']' if !quoted => depth -= 1,
            b',' if !quoted && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start <= text.len() && !text[start..].trim().is_empty() {
        parts.push(&text[start..]);
    }
    parts
}

/// Combine the inferred types of two rows for one column.
pub fn unify_types(left: &DataType, right: &DataType) -> DataType {
    match (left, right) {
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (l, r) if l == r => l.clone(),
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => {
            DataType::Float64
        }
        (DataType::List(l), DataType::List(r)) => DataType::List(Arc::new(Field::new(
            "item",
            unify_types(l.data_type(), r.data_type()),
            true,
        ))),
        (DataType::Struct(l), DataType::Struct(r)) if l.len() == r.len() => {
            let fields: Vec<Field> = l
                .iter()
                .zip(r.iter())
                .enumerate()
                .map(|(idx, (a, b))| {
                    Field::new(format!("f{idx}"), unify_types(a.data_type(), b.data_type()), true)
                })
                .collect();
            DataType::Struct(Fields::from(fields))
        }
        _ => DataType::Utf8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(text: &str) -> ValuesSchemaReader<&[u8]> {
        ValuesSchemaReader::new(text.as_bytes())
    }

    #[test]
    fn infers_primitive_shapes() {
        let mut r = reader("(1, 'a', 1.5, true, NULL, '2024-02-01')");
        let types = r.read_row_types().unwrap().unwrap();
        assert_eq!(
            types,
            vec![
                DataType::Int64,
                DataType::Utf8,
                DataType::Float64,
                DataType::Boolean,
                DataType::Null,
                DataType::Date32,
            ]
        );
        assert!(r.read_row_types().unwrap().is_none());
    }

    #[test]
    fn walks_multiple_rows_until_terminator() {
        let mut r = reader("(1), (2.5);");
        assert_eq!(r.read_row_types().unwrap().unwrap(), vec![DataType::Int64]);
        assert_eq!(r.read_row_types().unwrap().unwrap(), vec![DataType::Float64]);
        assert!(r.read_row_types().unwrap().is_none());
    }

    #[test]
    fn infers_nested_shapes() {
        let mut r = reader("([1, 2], (1, 'x'))");
        let types = r.read_row_types().unwrap().unwrap();
        assert_eq!(
            types[0],
            DataType::List(Arc::new(Field::new("item", DataType::Int64, true)))
        );
        match &types[1] {
            DataType::Struct(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].data_type(), &DataType::Int64);
                assert_eq!(fields[1].data_type(), &DataType::Utf8);
            }
            other => panic!("expected a struct, got {other:?}"),
        }
    }

    #[test]
    fn unification_widens_and_falls_back() {
        assert_eq!(unify_types(&DataType::Null, &DataType::Int64), DataType::Int64);
        assert_eq!(unify_types(&DataType::Int64, &DataType::Float64), DataType::Float64);
        assert_eq!(unify_types(&DataType::Int64, &DataType::Utf8), DataType::Utf8);
    }

    #[test]
    fn junk_cells_are_syntax_failures() {
        let mut r = reader("(wat)");
        assert!(matches!(r.read_row_types(), Err(Error::Syntax(_))));
    }
}
