//! Row-boundary scanning without tokenization.
//!
//! Walks raw bytes tracking quote state and parenthesis balance. The same
//! scan serves two callers: the tokenizer bridge uses it to find the end of
//! the current row (balance 1, no minimum), and an external splitter can use
//! it to carve a stream into independently parseable row groups (balance 0,
//! minimum group size).

use std::io::Read;

use rowval_result::Result;

use crate::buffer::CheckpointBuffer;

/// Advance the cursor to the next row boundary.
///
/// Scanning continues while the parenthesis balance (relative to the
/// caller's baseline) is non-zero or fewer than `min_bytes` bytes were
/// consumed. A backslash escapes the following byte unconditionally; quotes
/// toggle string state; parentheses only count outside strings. A trailing
/// inter-row comma is consumed. Returns false when the cursor already sits
/// at end of input or the statement terminator.
pub fn skip_to_next_row<R: Read>(
    buf: &mut CheckpointBuffer<R>,
    min_bytes: u64,
    mut balance: i64,
) -> Result<bool> {
    buf.skip_whitespace()?;
    if buf.eof()? || buf.peek()? == Some(b';') {
        return Ok(false);
    }
    let mut quoted = false;

    let start = buf.current_offset();
    loop {
        if balance == 0 && buf.current_offset() - start >= min_bytes {
            break;
        }
        match buf.bump()? {
            None => break,
            Some(b'\\') => {
                buf.bump()?;
            }
            Some(b'\'') => quoted = !quoted,
            Some(b')') if !quoted => balance -= 1,
            Some(b'(') if !quoted => balance += 1,
            _ => {}
        }
    }

    if buf.peek()? == Some(b',') {
        buf.advance();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(text: &str) -> CheckpointBuffer<&[u8]> {
        CheckpointBuffer::new(text.as_bytes(), 32)
    }

    #[test]
    fn finds_the_end_of_the_current_row() {
        // Cursor inside the row, after '('.
        let mut buf = buffer("1, 'a)b', (2, 3)), (4)");
        assert!(skip_to_next_row(&mut buf, 0, 1).unwrap());
        // Stopped after the row's closing paren and the inter-row comma.
        assert_eq!(buf.current_offset(), 18);
        assert_eq!(buf.peek().unwrap(), Some(b' '));
    }

    #[test]
    fn quotes_and_escapes_hide_parens() {
        let mut buf = buffer(r"'\')', 2), (next)");
        assert!(skip_to_next_row(&mut buf, 0, 1).unwrap());
        assert_eq!(buf.current_offset(), 10);
        assert_eq!(buf.peek().unwrap(), Some(b' '));
    }

    #[test]
    fn group_splitting_respects_min_bytes() {
        let mut buf = buffer("(1),(2),(3),(4)");
        assert!(skip_to_next_row(&mut buf, 5, 0).unwrap());
        // Scans whole rows until at least five bytes are consumed.
        let offset = buf.current_offset();
        assert!(offset >= 5);
        // The cursor always lands between rows.
        assert_eq!(buf.peek().unwrap(), Some(b'('));
    }

    #[test]
    fn terminator_stops_the_scan() {
        let mut buf = buffer(";");
        assert!(!skip_to_next_row(&mut buf, 1, 0).unwrap());
    }
}
