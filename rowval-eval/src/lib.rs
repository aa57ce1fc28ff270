//! Expression-side collaborators for the rowval ingestion pipeline.
//!
//! Everything that touches the SQL expression grammar lives here: turning a
//! row's text into a token stream with stable byte offsets, parsing one cell
//! as an expression under a recursion bound, folding a constant expression
//! into a [`rowval_scalar::Scalar`], and rewriting literal leaves into
//! numbered slots so structurally identical expressions can share one parse.

use sqlparser::dialect::GenericDialect;

pub mod eval;
pub mod parse;
pub mod tokens;
pub mod types;

pub use eval::{evaluate, is_literal_expr, parse_number_scalar, slotify};
pub use parse::ExprReader;
pub use tokens::{SpanIndex, tokenize_expr_text};
pub use types::sql_type_to_arrow;

pub(crate) static DIALECT: GenericDialect = GenericDialect {};
