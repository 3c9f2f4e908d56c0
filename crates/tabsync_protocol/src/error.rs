//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A table ETag could not be parsed from its textual form.
    #[error("invalid table etag {text:?}: {reason}")]
    InvalidTableETag {
        /// The offending text.
        text: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A numeric state code did not map to a known state.
    #[error("unknown {kind} code: {code}")]
    UnknownStateCode {
        /// Which state family was being decoded.
        kind: &'static str,
        /// The unknown code.
        code: u8,
    },
}
