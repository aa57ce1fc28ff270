//! Per-row token cache.
//!
//! Tokenizing requires contiguous text, and the same row may be visited by
//! several columns. The cache owns a copy of the row's remaining text plus
//! its tokens with absolute byte offsets, so deciding whether an existing
//! token stream is still usable for the current cursor position is a plain
//! offset-window check. A stream is discarded whenever the cursor does not
//! sit on a token boundary (or inside whitespace) of the cached range.

use rowval_eval::{SpanIndex, tokenize_expr_text};
use rowval_result::Result;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan};

pub(crate) struct RowTokens {
    start: u64,
    end: u64,
    text: String,
    tokens: Vec<TokenWithSpan>,
    starts: Vec<u64>,
    ends: Vec<u64>,
    index: SpanIndex,
}

impl RowTokens {
    /// Tokenize `text`, which begins at absolute stream offset `start`.
    pub fn tokenize(start: u64, text: String) -> Result<Self> {
        let tokens = tokenize_expr_text(&text)?;
        let index = SpanIndex::new(&text);
        let mut starts = Vec::with_capacity(tokens.len());
        for token in &tokens {
            starts.push(start + index.byte_offset(&text, token.span.start) as u64);
        }
        // Tokens cover the text contiguously (whitespace included), so each
        // token ends where the next one starts.
        let end = start + text.len() as u64;
        let mut ends: Vec<u64> = starts.iter().skip(1).copied().collect();
        ends.push(end);
        Ok(RowTokens { start, end, text, tokens, starts, ends, index })
    }

    pub fn is_live_for(&self, pos: u64) -> bool {
        self.start <= pos && pos <= self.end
    }

    /// Index of the first significant token at or after `pos`, or `None`
    /// when the stream is exhausted or the cursor sits inside a significant
    /// token (stale stream; retokenize).
    pub fn first_index_at(&self, pos: u64) -> Option<usize> {
        for (i, token) in self.tokens.iter().enumerate() {
            if self.ends[i] <= pos {
                continue;
            }
            if matches!(token.token, Token::Whitespace(_)) {
                continue;
            }
            if self.starts[i] < pos {
                return None;
            }
            return Some(i);
        }
        None
    }

    pub fn tokens(&self) -> &[TokenWithSpan] {
        &self.tokens
    }

    /// Owned tail of the stream for handing to the expression parser.
    pub fn tail(&self, from: usize) -> Vec<TokenWithSpan> {
        self.tokens[from..].to_vec()
    }

    pub fn abs_start(&self, index: usize) -> u64 {
        self.starts[index]
    }

    pub fn abs_end(&self, index: usize) -> u64 {
        self.ends[index]
    }

    /// Absolute byte offset of a span location within this row's text.
    pub fn byte_of(&self, loc: Location) -> u64 {
        self.start + self.index.byte_offset(&self.text, loc) as u64
    }
}
