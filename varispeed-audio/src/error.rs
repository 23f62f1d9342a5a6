//! Error types for stream configuration
//!
//! Only configuration can fail recoverably: the engine may reject a format
//! at `configure` time. Everything else that can go wrong here is a caller
//! contract violation (non-monotonic query times, partial frames) and is
//! surfaced as an immediate panic rather than an `Err`.

use crate::format::StreamFormat;
use thiserror::Error;

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors produced while setting up a speed-changing stream
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The resampling engine rejected the input format
    #[error("unsupported stream format: {format}")]
    UnsupportedFormat {
        /// The rejected format
        format: StreamFormat,
    },
}
