//! Domain type errors.

use thiserror::Error;

/// Errors raised while decoding domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
