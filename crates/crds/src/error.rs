//! CRD helper errors

use thiserror::Error;

/// Errors raised by the helpers that operate on CRD values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrdError {
    /// A label selector could not be evaluated
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    /// A config patch could not be applied
    #[error("invalid config patch: {0}")]
    InvalidPatch(String),

    /// An enumerated string value was not recognised
    #[error("unknown {kind} {value:?}")]
    UnknownValue {
        /// What was being parsed
        kind: &'static str,
        /// The rejected input
        value: String,
    },
}
