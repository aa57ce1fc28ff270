//! Scalar value model shared by the rowval parsing pipeline.
//!
//! A [`Scalar`] is a literal value that has been read from text but not yet
//! committed to a concrete Arrow column. Keeping values in this intermediate
//! form lets the reader accumulate a whole chunk before deciding how each
//! column buffer is built, and lets expression evaluation stay independent of
//! the output layout.

pub mod array;
pub mod coerce;
pub mod date;
pub mod decimal;
pub mod read;

pub use array::build_array;
pub use coerce::{coerce_scalar, default_scalar, ensure_supported_type, replace_null_fields_with_defaults};
pub use read::{ByteSource, read_quoted_scalar};

/// A literal value with deferred column typing.
///
/// Integer-like values are carried as `Int64` regardless of the final column
/// width; narrowing happens when the column buffer is built. Nested values
/// use positional element lists matching the Arrow field order.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    Utf8(String),
    Date32(i32),
    Decimal128 { value: i128, precision: u8, scale: i8 },
    List(Vec<Scalar>),
    Struct(Vec<Scalar>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Short class name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Null => "NULL",
            Scalar::Int64(_) => "integer",
            Scalar::Float64(_) => "float",
            Scalar::Boolean(_) => "boolean",
            Scalar::Utf8(_) => "string",
            Scalar::Date32(_) => "date",
            Scalar::Decimal128 { .. } => "decimal",
            Scalar::List(_) => "array",
            Scalar::Struct(_) => "tuple",
        }
    }
}
