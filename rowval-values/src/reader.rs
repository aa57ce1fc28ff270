//! The row reader: per-column strategy dispatch, checkpoint discipline, and
//! chunk assembly.

use std::io::Read;
use std::sync::Arc;

use arrow::datatypes::{Field, SchemaRef};
use arrow::record_batch::RecordBatch;
use rowval_eval::{ExprReader, evaluate, is_literal_expr};
use rowval_result::{Error, Result};
use rowval_scalar::{
    Scalar, coerce_scalar, default_scalar, ensure_supported_type, read_quoted_scalar,
    replace_null_fields_with_defaults,
};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan};

use crate::buffer::CheckpointBuffer;
use crate::missing::MissingValues;
use crate::scan::skip_to_next_row;
use crate::template::{ExpressionTemplate, TemplateCache, TemplateKey, TemplateState, skeleton_parts};
use crate::tokens::RowTokens;
use crate::{Chunk, FormatOptions, ReadOptions};

/// Using a template from the cache costs about half of evaluating one
/// expression; constructing a fresh one costs about one and a half times as
/// much. The weighted attempt budget below is measured in single-evaluation
/// units.
const TEMPLATE_CONSTRUCTION_COST: f64 = 1.5;
const CACHED_TEMPLATE_COST: f64 = 0.5;
const MAX_TEMPLATE_DEDUCTION_ATTEMPTS: f64 = 100.0;

/// How one column is currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Fast literal reader straight off the byte stream.
    Streaming,
    /// Token matching against a deduced template, evaluated in batch.
    BatchTemplate,
    /// Full parse and constant evaluation for every cell.
    SingleExpressionEvaluation,
}

struct ColumnState {
    strategy: Strategy,
    template: Option<TemplateState>,
    attempts: u64,
    attempts_cached: u64,
    rows_via_template: u64,
}

impl ColumnState {
    fn new() -> Self {
        ColumnState {
            strategy: Strategy::Streaming,
            template: None,
            attempts: 0,
            attempts_cached: 0,
            rows_via_template: 0,
        }
    }
}

/// Reads `(...), (...);` statements from a byte source into [`Chunk`]s.
pub struct ValuesReader<R> {
    buf: CheckpointBuffer<R>,
    schema: SchemaRef,
    options: FormatOptions,
    read_options: ReadOptions,
    cache: TemplateCache,
    states: Vec<ColumnState>,
    columns: Vec<Vec<Scalar>>,
    missing: MissingValues,
    row_tokens: Option<RowTokens>,
    num_columns: usize,
    total_rows: u64,
    started: bool,
    got_error: bool,
    last_chunk_bytes: u64,
}

impl<R: Read> ValuesReader<R> {
    pub fn new(
        source: R,
        schema: SchemaRef,
        options: FormatOptions,
        read_options: ReadOptions,
        cache: TemplateCache,
    ) -> Result<Self> {
        if schema.fields().is_empty() {
            return Err(Error::Unsupported("schema must have at least one column".into()));
        }
        for field in schema.fields() {
            ensure_supported_type(field.data_type())?;
        }
        let num_columns = schema.fields().len();
        Ok(ValuesReader {
            buf: CheckpointBuffer::new(source, options.syntax_error_context_chars),
            schema,
            options,
            read_options,
            cache,
            states: (0..num_columns).map(|_| ColumnState::new()).collect(),
            columns: vec![Vec::new(); num_columns],
            missing: MissingValues::new(num_columns),
            row_tokens: None,
            num_columns,
            total_rows: 0,
            started: false,
            got_error: false,
            last_chunk_bytes: 0,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Rows consumed from the stream so far, across all chunks.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Bytes consumed by the most recent chunk.
    pub fn last_chunk_bytes(&self) -> u64 {
        self.last_chunk_bytes
    }

    /// Current parsing strategy of one column; diagnostics only.
    pub fn column_strategy(&self, column: usize) -> Strategy {
        self.states[column].strategy
    }

    /// Read the next batch of rows. `None` means the stream is exhausted
    /// (and its tail has been validated).
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        match self.read_chunk_inner() {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.got_error = true;
                Err(e)
            }
        }
    }

    /// Reset per-stream state so the reader can parse another independent
    /// message, typically after [`set_source`](Self::set_source). After an
    /// error every strategy drops back to streaming and templates are
    /// discarded; the deduction counters survive resets either way, since a
    /// stream's next message usually has the same shape.
    pub fn reset_parser(&mut self) {
        if self.got_error {
            for state in &mut self.states {
                state.template = None;
                state.strategy = Strategy::Streaming;
            }
            self.got_error = false;
        }
        for state in &mut self.states {
            if let Some(template) = state.template.as_mut() {
                template.rows.clear();
            }
        }
        self.buf.clear_checkpoint();
        self.row_tokens = None;
        self.total_rows = 0;
        self.started = false;
        for column in &mut self.columns {
            column.clear();
        }
        self.missing.clear();
    }

    /// Replace the byte source, e.g. between messages of one connection.
    pub fn set_source(&mut self, source: R) {
        self.buf = CheckpointBuffer::new(source, self.options.syntax_error_context_chars);
    }

    fn read_chunk_inner(&mut self) -> Result<Option<Chunk>> {
        if !self.started {
            self.buf.skip_bom()?;
            self.started = true;
        }
        for column in &mut self.columns {
            column.clear();
        }
        self.missing.clear();
        let chunk_start = self.buf.current_offset();

        let mut rows_in_chunk = 0usize;
        while rows_in_chunk < self.read_options.max_rows_per_chunk {
            self.buf.skip_whitespace()?;
            if self.buf.eof()? || self.buf.peek()? == Some(b';') {
                break;
            }
            let row_result = if self.read_options.count_only {
                skip_to_next_row(&mut self.buf, 1, 0).map(|_| ())
            } else {
                self.read_row(rows_in_chunk)
            };
            row_result.map_err(|e| e.at_row(self.total_rows))?;
            self.total_rows += 1;
            rows_in_chunk += 1;
        }
        self.last_chunk_bytes = self.buf.current_offset() - chunk_start;

        if self.read_options.count_only {
            if rows_in_chunk == 0 {
                self.read_suffix()?;
                return Ok(None);
            }
            return Ok(Some(Chunk {
                num_rows: rows_in_chunk,
                batch: None,
                missing: MissingValues::new(self.num_columns),
            }));
        }

        // Materialize rows still buffered in templates before the chunk is
        // handed out.
        for (idx, (state, column)) in self
            .states
            .iter_mut()
            .zip(self.columns.iter_mut())
            .enumerate()
        {
            if let Some(template) = state.template.as_mut() {
                if template.rows_count() > 0 {
                    template.evaluate_all(
                        self.schema.field(idx),
                        self.options.null_as_default,
                        column,
                        &mut self.missing,
                        idx,
                    )?;
                    template.rows.clear();
                }
            }
        }

        if rows_in_chunk == 0 {
            self.read_suffix()?;
            return Ok(None);
        }

        let mut arrays = Vec::with_capacity(self.num_columns);
        for (field, values) in self.schema.fields().iter().zip(self.columns.iter()) {
            arrays.push(rowval_scalar::build_array(field, values)?);
        }
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), arrays)?;
        let missing = std::mem::replace(&mut self.missing, MissingValues::new(self.num_columns));
        Ok(Some(Chunk { num_rows: rows_in_chunk, batch: Some(batch), missing }))
    }

    fn read_row(&mut self, row_idx: usize) -> Result<()> {
        self.row_tokens = None;
        self.buf.assert_char(b'(')?;

        for idx in 0..self.num_columns {
            self.buf.skip_whitespace()?;
            self.buf.set_checkpoint()?;
            let strategy = self.states[idx].strategy;
            let read = match strategy {
                Strategy::Streaming => self.read_value_or_fallback(idx),
                Strategy::BatchTemplate => self.parse_with_template(idx),
                Strategy::SingleExpressionEvaluation => self.parse_expression(idx),
            }?;
            self.buf.commit_checkpoint()?;
            if !read {
                self.missing.set(idx, row_idx);
            }
            // `read` does not rule out a later missing mark: template rows
            // settle their bits during batch evaluation.
        }

        self.buf.skip_whitespace()?;
        if self.buf.peek()? == Some(b',') {
            self.buf.advance();
        }
        Ok(())
    }

    fn field(&self, idx: usize) -> Arc<Field> {
        Arc::clone(&self.schema.fields()[idx])
    }

    fn check_delimiter_after_value(&mut self, idx: usize) -> Result<bool> {
        self.buf.skip_whitespace()?;
        if idx + 1 != self.num_columns {
            return self.buf.check_char(b',');
        }
        // Optional trailing comma before the row closes.
        if self.buf.check_char(b',')? {
            self.buf.skip_whitespace()?;
        }
        self.buf.check_char(b')')
    }

    fn assert_delimiter_after_value(&mut self, idx: usize) -> Result<()> {
        if !self.check_delimiter_after_value(idx)? {
            let expected = if idx + 1 == self.num_columns { ')' } else { ',' };
            return Err(Error::Syntax(format!(
                "expected '{}' before: '{}'",
                expected,
                self.buf.preview()?
            )));
        }
        Ok(())
    }

    /// Streaming strategy: fast literal read, falling back to expression
    /// parsing on any syntax-class failure. Range failures propagate.
    fn read_value_or_fallback(&mut self, idx: usize) -> Result<bool> {
        match self.try_read_value(idx) {
            Ok(read) => Ok(read),
            Err(Error::Syntax(_)) => {
                self.buf.rollback_to_checkpoint()?;
                self.parse_expression(idx)
            }
            Err(other) => Err(other),
        }
    }

    fn try_read_value(&mut self, idx: usize) -> Result<bool> {
        let field = self.field(idx);

        if self.buf.check_keyword_ci(b"DEFAULT")? {
            self.assert_delimiter_after_value(idx)?;
            self.columns[idx].push(default_scalar(&field)?);
            return Ok(false);
        }

        let value = read_quoted_scalar(&mut self.buf, &field)?;
        if value.is_null() && !field.is_nullable() {
            if self.options.null_as_default {
                self.assert_delimiter_after_value(idx)?;
                self.columns[idx].push(default_scalar(&field)?);
                return Ok(false);
            }
            // Recoverable here: the expression fallback reports the final
            // type-mismatch failure with full context.
            return Err(Error::Syntax(format!(
                "NULL into a non-nullable column of type {:?}",
                field.data_type()
            )));
        }
        self.assert_delimiter_after_value(idx)?;
        self.columns[idx].push(value);
        Ok(true)
    }

    /// Lazily (re)tokenize the rest of the current row. An existing token
    /// stream is reused whenever the cursor still falls on one of its token
    /// boundaries.
    fn ensure_row_tokens(&mut self, idx: usize) -> Result<()> {
        let pos = self.buf.current_offset();
        if let Some(tokens) = &self.row_tokens {
            if tokens.is_live_for(pos) && tokens.first_index_at(pos).is_some() {
                return Ok(());
            }
        }

        skip_to_next_row(&mut self.buf, 0, 1)?;
        let end = self.buf.current_offset();
        self.buf.fill_to(end)?;
        let bytes = self.buf.contiguous_slice(pos, end)?.to_vec();
        self.buf.rollback_to_checkpoint()?;

        let field = self.field(idx);
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::Syntax("row contains invalid UTF-8".into()))?;
        let tokens = match RowTokens::tokenize(pos, text) {
            Ok(tokens) => tokens,
            Err(_) => return Err(self.cannot_parse_expression(&field)?),
        };
        if tokens.first_index_at(pos).is_none() {
            return Err(self.cannot_parse_expression(&field)?);
        }
        self.row_tokens = Some(tokens);
        Ok(())
    }

    fn cannot_parse_expression(&mut self, field: &Field) -> Result<Error> {
        Ok(Error::Syntax(format!(
            "cannot parse expression of type {:?} here: '{}'",
            field.data_type(),
            self.buf.preview()?
        )))
    }

    /// Template strategy: match the current cell against the column's
    /// template; on a shape break, materialize everything buffered so far
    /// and reparse this cell from scratch.
    fn parse_with_template(&mut self, idx: usize) -> Result<bool> {
        self.ensure_row_tokens(idx)?;
        let pos = self.buf.current_offset();

        let matched = {
            let tokens = self
                .row_tokens
                .as_ref()
                .ok_or_else(|| Error::Internal("row tokens are missing".into()))?;
            tokens.first_index_at(pos).and_then(|start| {
                let state = self.states[idx].template.as_ref()?;
                state
                    .template
                    .match_row(tokens, start)
                    .map(|(slots, next)| (slots, tokens.abs_end(next - 1)))
            })
        };

        if let Some((slots, end)) = matched {
            self.buf.seek_forward_to(end)?;
            let state = &mut self.states[idx];
            let template = state
                .template
                .as_mut()
                .ok_or_else(|| Error::Internal("template state is missing".into()))?;
            template.rows.push(slots);
            state.rows_via_template += 1;
            return Ok(true);
        }

        // The cell does not fit the deduced shape anymore. Evaluate the
        // rows buffered under this template, drop it, and reparse the cell.
        tracing::debug!(column = idx, "expression template mismatch; materializing buffered rows");
        let state = self.states[idx]
            .template
            .take()
            .ok_or_else(|| Error::Internal("template state is missing".into()))?;
        self.states[idx].strategy = Strategy::SingleExpressionEvaluation;
        let field = self.field(idx);
        state.evaluate_all(
            &field,
            self.options.null_as_default,
            &mut self.columns[idx],
            &mut self.missing,
            idx,
        )?;
        self.buf.rollback_to_checkpoint()?;
        self.parse_expression(idx)
    }

    /// Consume the token that must follow a cell's expression. For the last
    /// column a trailing comma before the closing parenthesis is allowed.
    /// Returns the start of the first delimiter token and the end of the
    /// last one.
    fn consume_cell_delimiter(
        reader: &mut ExprReader,
        last_column: bool,
    ) -> Option<(Location, Location)> {
        let first = reader.next_token();
        if !last_column {
            return (first.token == Token::Comma).then_some((first.span.start, first.span.end));
        }
        match first.token {
            Token::RParen => Some((first.span.start, first.span.end)),
            Token::Comma => {
                let second = reader.next_token();
                (second.token == Token::RParen).then_some((first.span.start, second.span.end))
            }
            _ => None,
        }
    }

    /// Full fallback: parse the cell as an expression, try to recover the
    /// streaming path for stray literals, deduce a template when the
    /// heuristic allows it, and otherwise evaluate the expression one-off.
    fn parse_expression(&mut self, idx: usize) -> Result<bool> {
        let field = self.field(idx);

        // DEFAULT never goes through the expression grammar, whatever
        // strategy the column is on. Buffered template rows were already
        // materialized before the cursor came back to the cell start.
        if self.buf.check_keyword_ci(b"DEFAULT")? {
            self.assert_delimiter_after_value(idx)?;
            self.columns[idx].push(default_scalar(&field)?);
            return Ok(false);
        }

        self.ensure_row_tokens(idx)?;
        let pos = self.buf.current_offset();
        let last_column = idx + 1 == self.num_columns;

        let (tail, start_idx) = {
            let tokens = self
                .row_tokens
                .as_ref()
                .ok_or_else(|| Error::Internal("row tokens are missing".into()))?;
            match tokens.first_index_at(pos) {
                Some(i) => (tokens.tail(i), i),
                None => return Err(self.cannot_parse_expression(&field)?),
            }
        };

        let mut expr_reader = ExprReader::new(tail, self.options.max_parser_depth);
        let ast = match expr_reader.parse_expr() {
            Ok(ast) => ast,
            Err(_) => return Err(self.cannot_parse_expression(&field)?),
        };
        let Some((delim_start_loc, delim_end_loc)) =
            Self::consume_cell_delimiter(&mut expr_reader, last_column)
        else {
            return Err(self.cannot_parse_expression(&field)?);
        };
        let (delim_start, end_off) = {
            let tokens = self
                .row_tokens
                .as_ref()
                .ok_or_else(|| Error::Internal("row tokens are missing".into()))?;
            (tokens.byte_of(delim_start_loc), tokens.byte_of(delim_end_loc))
        };

        // A cell that parses as a bare literal may only have tripped over a
        // surface difference (say, a unary plus). Give the streaming reader
        // one shot at the same bytes so a single odd row does not keep the
        // whole column on the slow path.
        if self.states[idx].strategy != Strategy::Streaming && is_literal_expr(&ast) {
            match self.try_read_value(idx) {
                Ok(read) => {
                    tracing::trace!(column = idx, "column switches back to streaming literals");
                    self.states[idx].strategy = Strategy::Streaming;
                    return Ok(read);
                }
                Err(Error::Syntax(_)) => self.buf.rollback_to_checkpoint()?,
                Err(other) => return Err(other),
            }
        }

        self.states[idx].strategy = Strategy::SingleExpressionEvaluation;

        // Templates batch-evaluate their rows later, so they are just as
        // much "interpreting" as the one-off fallback; with interpretation
        // disabled this cell must fail instead.
        if self.options.interpret_expressions && self.should_deduce_new_template(idx) {
            if self.states[idx].template.is_some() {
                return Err(Error::Internal(format!(
                    "template for column {idx} already exists and was not evaluated yet"
                )));
            }
            let deduced = {
                let tokens = self
                    .row_tokens
                    .as_ref()
                    .ok_or_else(|| Error::Internal("row tokens are missing".into()))?;
                let mut expr_tokens: Vec<TokenWithSpan> = Vec::new();
                let mut i = start_idx;
                while i < tokens.tokens().len() && tokens.abs_start(i) < delim_start {
                    expr_tokens.push(tokens.tokens()[i].clone());
                    i += 1;
                }
                let delimiter = if last_column { b')' } else { b',' };
                let key = TemplateKey::new(
                    &field,
                    !field.is_nullable() && self.options.null_as_default,
                    skeleton_parts(&expr_tokens),
                    delimiter,
                );
                self.cache.get_or_deduce(key, || {
                    ExpressionTemplate::deduce(&expr_tokens, &ast, delimiter)
                })?
            };

            if let Some((template, found_in_cache)) = deduced {
                if found_in_cache {
                    self.states[idx].attempts_cached += 1;
                } else {
                    self.states[idx].attempts += 1;
                }

                self.buf.rollback_to_checkpoint()?;
                let seed_pos = self.buf.current_offset();
                let matched = {
                    let tokens = self
                        .row_tokens
                        .as_ref()
                        .ok_or_else(|| Error::Internal("row tokens are missing".into()))?;
                    tokens.first_index_at(seed_pos).and_then(|start| {
                        template
                            .match_row(tokens, start)
                            .map(|(slots, next)| (slots, tokens.abs_end(next - 1)))
                    })
                };
                if let Some((slots, end)) = matched {
                    self.buf.seek_forward_to(end)?;
                    tracing::debug!(column = idx, "parsing column with a deduced expression template");
                    let mut state = TemplateState::new(template);
                    state.rows.push(slots);
                    let column_state = &mut self.states[idx];
                    column_state.template = Some(state);
                    column_state.rows_via_template += 1;
                    column_state.strategy = Strategy::BatchTemplate;
                    return Ok(true);
                }
                tracing::debug!(column = idx, "deduced template does not match its seed row; discarding");
            }
        }

        if !self.options.interpret_expressions {
            return Err(Error::Unsupported("interpreting expressions is disabled".into()));
        }

        self.buf.seek_forward_to(end_off)?;
        let mut value = evaluate(&ast, &[])?;
        if self.options.null_as_default {
            replace_null_fields_with_defaults(&mut value, &field)?;
        }
        let value = coerce_scalar(value, &field)?;
        if value.is_null() && !field.is_nullable() {
            if self.options.null_as_default {
                self.columns[idx].push(default_scalar(&field)?);
                return Ok(false);
            }
            self.buf.rollback_to_checkpoint()?;
            return Err(Error::TypeMismatch(format!(
                "cannot insert NULL value into a column of type {:?} at: '{}'",
                field.data_type(),
                self.buf.preview()?
            )));
        }
        self.columns[idx].push(value);
        Ok(true)
    }

    /// Decide whether deducing (another) template for this column is likely
    /// to pay off.
    fn should_deduce_new_template(&mut self, idx: usize) -> bool {
        if !self.options.deduce_templates_of_expressions {
            return false;
        }
        let state = &mut self.states[idx];
        let attempts_weighted = TEMPLATE_CONSTRUCTION_COST * state.attempts as f64
            + CACHED_TEMPLATE_COST * state.attempts_cached as f64;
        if attempts_weighted < MAX_TEMPLATE_DEDUCTION_ATTEMPTS {
            return true;
        }
        if state.rows_via_template as f64 / attempts_weighted > 1.0 {
            // Templates have been paying for themselves; start a fresh
            // measurement window.
            state.attempts = 0;
            state.attempts_cached = 0;
            state.rows_via_template = 0;
            return true;
        }
        false
    }

    /// Validate the stream tail once no more rows are available.
    fn read_suffix(&mut self) -> Result<()> {
        if self.buf.peek()? == Some(b';') {
            self.buf.advance();
            self.buf.skip_whitespace()?;
            if !self.buf.eof()? {
                return Err(Error::TruncatedInput("cannot read data after semicolon".into()));
            }
            return Ok(());
        }
        if self.buf.has_buffered_data() || !self.buf.eof()? {
            return Err(Error::TruncatedInput("unread data left in the buffer".into()));
        }
        Ok(())
    }
}
