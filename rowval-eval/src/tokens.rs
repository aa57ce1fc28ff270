//! Tokenization helpers with byte-accurate positions.
//!
//! The tokenizer reports spans as line/column locations. The rest of the
//! pipeline works in byte offsets over the row's text, so [`SpanIndex`]
//! translates between the two. Offsets make token-stream reuse a plain
//! window comparison; no pointers into buffer memory ever cross a call
//! boundary.

use rowval_result::{Error, Result};
use sqlparser::tokenizer::{Location, TokenWithSpan, Tokenizer};

use crate::DIALECT;

/// Tokenize expression text with location-carrying tokens (whitespace
/// included, so token coverage of the text is contiguous).
pub fn tokenize_expr_text(text: &str) -> Result<Vec<TokenWithSpan>> {
    let mut tokenizer = Tokenizer::new(&DIALECT, text);
    tokenizer
        .tokenize_with_location()
        .map_err(|e| Error::Syntax(format!("cannot tokenize expression: {e}")))
}

/// Translates 1-based line/column locations into byte offsets of a text.
pub struct SpanIndex {
    line_starts: Vec<usize>,
}

impl SpanIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        SpanIndex { line_starts }
    }

    /// Byte offset of a location within `text` (the same text the index was
    /// built from). Columns count characters, hence the char walk.
    pub fn byte_offset(&self, text: &str, loc: Location) -> usize {
        if loc.line == 0 {
            return 0;
        }
        let line_idx = usize::try_from(loc.line - 1).unwrap_or(0);
        let start = self.line_starts.get(line_idx).copied().unwrap_or(text.len());
        let end = self
            .line_starts
            .get(line_idx + 1)
            .copied()
            .unwrap_or(text.len());
        let col = usize::try_from(loc.column.saturating_sub(1)).unwrap_or(0);
        match text[start..end].char_indices().nth(col) {
            Some((off, _)) => start + off,
            None => end,
        }
    }
}
