//! Error types and result definitions shared by the rowval crates.
//!
//! The whole workspace uses a single error enum ([`Error`]) and the
//! [`Result<T>`] alias so failures can propagate across crate boundaries with
//! the `?` operator. The variants map onto the failure classes the ingestion
//! pipeline distinguishes:
//!
//! - **Syntax** ([`Error::Syntax`]): malformed literal or expression text.
//!   This is the only class a faster parsing strategy may recover from by
//!   escalating to a slower one.
//! - **Type mismatch** ([`Error::TypeMismatch`]): illegal null into a
//!   non-nullable column, wrong arity in nested values. Always fatal for the
//!   current chunk.
//! - **Numeric range** ([`Error::NumericRange`]): decimal or integer overflow.
//!   Never retried through a slower strategy.
//! - **Unsupported** ([`Error::Unsupported`]): a feature the configuration
//!   disabled or the evaluator does not implement.
//! - **Truncated input** ([`Error::TruncatedInput`]): leftover bytes after the
//!   statement terminator.
//! - **Internal** ([`Error::Internal`]): violated invariants; a bug.

pub mod error;

pub use error::Error;

/// Result type alias used across all rowval crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;
