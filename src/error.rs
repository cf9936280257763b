//! Invocation-level failures of a scan.

use thiserror::Error;

/// Fatal errors that end a scan with an `error` event.
///
/// Per-code resolution failures are not errors; they only reduce the
/// sample count of their prefix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Origin postal code '{0}' must have exactly 8 digits")]
    InvalidOrigin(String),

    #[error("Postal code prefix '{0}' must have exactly 5 digits")]
    InvalidPrefix(String),

    #[error("Start prefix {start} is greater than end prefix {end}")]
    InvertedRange { start: String, end: String },

    #[error("Origin postal code {0} could not be located")]
    OriginNotFound(String),
}
