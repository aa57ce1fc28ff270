//! Streaming parser for `VALUES`-style row-literal text.
//!
//! Input of the form `(1, 'a'), (2, 'b');` is parsed into Arrow record
//! batches. Each column independently picks the cheapest strategy that still
//! works for the data it has seen: a streaming literal reader, a cached
//! structural expression template that batches many structurally identical
//! cells through one parsed shape, or a one-off parse-and-evaluate fallback.
//! A checkpointed byte cursor makes every strategy switch lossless, and a
//! failure in any row aborts the chunk without corrupting rows already
//! accepted.
//!
//! One reader instance is strictly sequential. Parallel ingestion is done by
//! splitting the raw bytes into balanced row groups with
//! [`skip_to_next_row`] and giving each group its own reader; the only state
//! shared between readers is the [`TemplateCache`] handle.

pub mod buffer;
pub mod missing;
pub mod reader;
pub mod scan;
pub mod schema;
pub mod template;
mod tokens;

pub use buffer::CheckpointBuffer;
pub use missing::MissingValues;
pub use reader::{Strategy, ValuesReader};
pub use scan::skip_to_next_row;
pub use schema::{ValuesSchemaReader, unify_types};
pub use template::TemplateCache;

use arrow::record_batch::RecordBatch;

/// Parsing behavior knobs, mirroring what the surrounding system exposes as
/// per-request settings.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Treat an unexpected `NULL` as the column's default where the column
    /// is non-nullable (top-level and inside nested values).
    pub null_as_default: bool,
    /// Allow deducing reusable expression templates. When off, every
    /// expression cell is evaluated one-off.
    pub deduce_templates_of_expressions: bool,
    /// Allow the parse-and-evaluate fallback at all. When off, any cell the
    /// streaming reader cannot handle is a hard failure.
    pub interpret_expressions: bool,
    /// Recursion bound handed to the expression parser.
    pub max_parser_depth: usize,
    /// Accepted for interface parity with the surrounding system; the
    /// expression parser used here bounds recursion only.
    pub max_parser_backtracks: usize,
    /// How many characters of offending input a syntax error may quote.
    pub syntax_error_context_chars: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            null_as_default: false,
            deduce_templates_of_expressions: true,
            interpret_expressions: true,
            max_parser_depth: 50,
            max_parser_backtracks: 1_000_000,
            syntax_error_context_chars: 160,
        }
    }
}

/// Chunking behavior of one reader.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Upper bound on rows per produced chunk.
    pub max_rows_per_chunk: usize,
    /// Count rows using the balance scan without materializing any values.
    pub count_only: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_rows_per_chunk: 65536,
            count_only: false,
        }
    }
}

/// One finalized batch of rows.
///
/// In count-only mode `batch` is `None` and only `num_rows` is meaningful.
/// The missing bitmap marks cells that produced no value of their own
/// (`DEFAULT` keyword, defaulted nulls); the batch still carries the
/// column's default in those positions.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub num_rows: usize,
    pub batch: Option<RecordBatch>,
    pub missing: MissingValues,
}
