//! Forward-only byte cursor with a single rollback checkpoint.
//!
//! The cursor reads a chunked source incrementally, but everything from the
//! active checkpoint onward is retained in one owned window, so any range
//! past the checkpoint can be handed out as a contiguous slice (tokenizing
//! needs that). Positions are absolute stream offsets: rolling back or
//! reusing a token range is an offset comparison, never pointer arithmetic,
//! and refilling the window cannot invalidate anyone's position.

use std::io::{ErrorKind, Read};

use rowval_result::{Error, Result};
use rowval_scalar::ByteSource;

const READ_CHUNK_BYTES: usize = 8 * 1024;
const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub struct CheckpointBuffer<R> {
    source: R,
    window: Vec<u8>,
    window_start: u64,
    pos: u64,
    checkpoint: Option<u64>,
    source_eof: bool,
    preview_chars: usize,
}

impl<R: Read> CheckpointBuffer<R> {
    pub fn new(source: R, preview_chars: usize) -> Self {
        CheckpointBuffer {
            source,
            window: Vec::new(),
            window_start: 0,
            pos: 0,
            checkpoint: None,
            source_eof: false,
            preview_chars,
        }
    }

    fn buffered_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    /// Pull one more chunk from the source. Returns false once the source is
    /// exhausted. Consumed bytes before the checkpoint (or the cursor, when
    /// no checkpoint is active) are dropped first.
    fn fill(&mut self) -> Result<bool> {
        if self.source_eof {
            return Ok(false);
        }
        let keep_from = self.checkpoint.unwrap_or(self.pos);
        if keep_from > self.window_start {
            let drop = (keep_from - self.window_start) as usize;
            self.window.drain(..drop);
            self.window_start = keep_from;
        }
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.source_eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.window.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Look at the byte under the cursor, refilling as needed.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        while self.pos == self.buffered_end() {
            if !self.fill()? {
                return Ok(None);
            }
        }
        Ok(Some(self.window[(self.pos - self.window_start) as usize]))
    }

    /// Move past the byte under the cursor. Only valid right after a
    /// successful [`peek`](Self::peek).
    pub fn advance(&mut self) {
        debug_assert!(self.pos < self.buffered_end());
        self.pos += 1;
    }

    /// Consume and return the next byte.
    pub fn bump(&mut self) -> Result<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.advance();
        }
        Ok(byte)
    }

    pub fn eof(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_none())
    }

    /// Absolute offset of the cursor within the stream.
    pub fn current_offset(&self) -> u64 {
        self.pos
    }

    /// True while already-fetched bytes remain unconsumed.
    pub fn has_buffered_data(&self) -> bool {
        self.pos < self.buffered_end()
    }

    pub fn skip_whitespace(&mut self) -> Result<()> {
        while matches!(self.peek()?, Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance();
        }
        Ok(())
    }

    /// Consume `expected` if it is the next byte.
    pub fn check_char(&mut self, expected: u8) -> Result<bool> {
        if self.peek()? == Some(expected) {
            self.advance();
            return Ok(true);
        }
        Ok(false)
    }

    pub fn assert_char(&mut self, expected: u8) -> Result<()> {
        if !self.check_char(expected)? {
            return Err(Error::Syntax(format!(
                "expected '{}' before: '{}'",
                expected as char,
                self.preview()?
            )));
        }
        Ok(())
    }

    /// Consume a whole keyword case-insensitively. The next byte after the
    /// keyword must not continue a word, so `DEFAULTS` never reads as
    /// `DEFAULT`.
    pub fn check_keyword_ci(&mut self, keyword: &[u8]) -> Result<bool> {
        while self.buffered_end() - self.pos < keyword.len() as u64 + 1 {
            if !self.fill()? {
                break;
            }
        }
        let start = (self.pos - self.window_start) as usize;
        let available = &self.window[start..];
        if available.len() < keyword.len() {
            return Ok(false);
        }
        if !available[..keyword.len()].eq_ignore_ascii_case(keyword) {
            return Ok(false);
        }
        if let Some(&next) = available.get(keyword.len()) {
            if next.is_ascii_alphanumeric() || next == b'_' {
                return Ok(false);
            }
        }
        self.pos += keyword.len() as u64;
        Ok(true)
    }

    /// Skip a UTF-8 byte-order mark at the current position, if present.
    pub fn skip_bom(&mut self) -> Result<()> {
        while self.buffered_end() - self.pos < BOM.len() as u64 {
            if !self.fill()? {
                return Ok(());
            }
        }
        let start = (self.pos - self.window_start) as usize;
        if self.window[start..].starts_with(BOM) {
            self.pos += BOM.len() as u64;
        }
        Ok(())
    }

    /// Mark the current position. At most one checkpoint may be active.
    pub fn set_checkpoint(&mut self) -> Result<()> {
        if self.checkpoint.is_some() {
            return Err(Error::Internal("a checkpoint is already active".into()));
        }
        self.checkpoint = Some(self.pos);
        Ok(())
    }

    /// Return the cursor to the checkpoint. The checkpoint stays active, so
    /// a caller can roll back more than once before committing.
    pub fn rollback_to_checkpoint(&mut self) -> Result<()> {
        let mark = self
            .checkpoint
            .ok_or_else(|| Error::Internal("no active checkpoint to roll back to".into()))?;
        self.pos = mark;
        Ok(())
    }

    pub fn commit_checkpoint(&mut self) -> Result<()> {
        if self.checkpoint.take().is_none() {
            return Err(Error::Internal("no active checkpoint to commit".into()));
        }
        Ok(())
    }

    /// Drop the checkpoint without caring whether one is active. Used when a
    /// reader resets after an aborted chunk.
    pub fn clear_checkpoint(&mut self) {
        self.checkpoint = None;
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// Make sure every byte up to `end` sits in the window, pulling from the
    /// source as needed.
    pub fn fill_to(&mut self, end: u64) -> Result<()> {
        while self.buffered_end() < end {
            if !self.fill()? {
                return Err(Error::Internal(format!(
                    "cannot buffer up to offset {end}: input ended at {}",
                    self.buffered_end()
                )));
            }
        }
        Ok(())
    }

    /// A contiguous view of `[start, end)`. Both bounds must already be
    /// buffered — see [`fill_to`](Self::fill_to) — which also holds for any
    /// range the cursor has walked since the active checkpoint was set.
    pub fn contiguous_slice(&self, start: u64, end: u64) -> Result<&[u8]> {
        if start < self.window_start || end > self.buffered_end() || start > end {
            return Err(Error::Internal(format!(
                "byte range {start}..{end} is outside the buffered window"
            )));
        }
        let lo = (start - self.window_start) as usize;
        let hi = (end - self.window_start) as usize;
        Ok(&self.window[lo..hi])
    }

    /// Jump the cursor forward to an offset that has already been scanned.
    pub fn seek_forward_to(&mut self, offset: u64) -> Result<()> {
        if offset < self.pos || offset > self.buffered_end() {
            return Err(Error::Internal(format!(
                "cannot seek to offset {offset} from {}",
                self.pos
            )));
        }
        self.pos = offset;
        Ok(())
    }

    /// A bounded, lossily decoded look at the upcoming bytes, for error
    /// messages.
    pub fn preview(&mut self) -> Result<String> {
        while (self.buffered_end() - self.pos) < self.preview_chars as u64 {
            if !self.fill()? {
                break;
            }
        }
        let start = (self.pos - self.window_start) as usize;
        let end = (start + self.preview_chars).min(self.window.len());
        Ok(String::from_utf8_lossy(&self.window[start..end]).into_owned())
    }
}

impl<R: Read> ByteSource for CheckpointBuffer<R> {
    fn peek_byte(&mut self) -> Result<Option<u8>> {
        self.peek()
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        self.bump()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out the input a few bytes at a time to exercise refills.
    struct Trickle {
        data: Vec<u8>,
        at: usize,
        step: usize,
    }

    impl Trickle {
        fn new(data: &[u8], step: usize) -> Self {
            Trickle { data: data.to_vec(), at: 0, step }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(self.data.len() - self.at).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.at..self.at + n]);
            self.at += n;
            Ok(n)
        }
    }

    #[test]
    fn reads_across_source_chunks() {
        let mut buf = CheckpointBuffer::new(Trickle::new(b"hello world", 3), 32);
        let mut out = Vec::new();
        while let Some(b) = buf.bump().unwrap() {
            out.push(b);
        }
        assert_eq!(out, b"hello world");
        assert!(buf.eof().unwrap());
    }

    #[test]
    fn rollback_reproduces_bytes_exactly() {
        let mut buf = CheckpointBuffer::new(Trickle::new(b"abcdefghij", 2), 32);
        assert_eq!(buf.bump().unwrap(), Some(b'a'));
        buf.set_checkpoint().unwrap();
        assert_eq!(buf.bump().unwrap(), Some(b'b'));
        assert_eq!(buf.bump().unwrap(), Some(b'c'));
        buf.rollback_to_checkpoint().unwrap();
        assert_eq!(buf.bump().unwrap(), Some(b'b'));
        // Rollback twice; the checkpoint stays active until committed.
        buf.rollback_to_checkpoint().unwrap();
        assert_eq!(buf.bump().unwrap(), Some(b'b'));
        buf.commit_checkpoint().unwrap();
        assert!(buf.commit_checkpoint().is_err());
    }

    #[test]
    fn only_one_checkpoint_may_be_active() {
        let mut buf = CheckpointBuffer::new(Trickle::new(b"xy", 1), 32);
        buf.set_checkpoint().unwrap();
        assert!(matches!(buf.set_checkpoint(), Err(Error::Internal(_))));
    }

    #[test]
    fn contiguous_slice_spans_refills() {
        let mut buf = CheckpointBuffer::new(Trickle::new(b"0123456789", 2), 32);
        buf.set_checkpoint().unwrap();
        for _ in 0..8 {
            buf.bump().unwrap();
        }
        assert_eq!(buf.contiguous_slice(0, 8).unwrap(), b"01234567");
        buf.rollback_to_checkpoint().unwrap();
        assert_eq!(buf.current_offset(), 0);
    }

    #[test]
    fn keyword_check_respects_word_boundaries() {
        let mut buf = CheckpointBuffer::new(Trickle::new(b"DEFAULTS", 3), 32);
        assert!(!buf.check_keyword_ci(b"DEFAULT").unwrap());
        assert_eq!(buf.current_offset(), 0);

        let mut buf = CheckpointBuffer::new(Trickle::new(b"default,", 3), 32);
        assert!(buf.check_keyword_ci(b"DEFAULT").unwrap());
        assert_eq!(buf.peek().unwrap(), Some(b','));
    }

    #[test]
    fn bom_is_skipped_once() {
        let mut buf = CheckpointBuffer::new(Trickle::new(b"\xEF\xBB\xBF(1)", 2), 32);
        buf.skip_bom().unwrap();
        assert_eq!(buf.peek().unwrap(), Some(b'('));
    }
}
