//! Error types for aria.

use thiserror::Error;

/// Result type alias using aria's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for aria.
#[derive(Error, Debug)]
pub enum Error {
    /// The container format or codec is unknown or cannot be handled.
    /// Fatal to the `open()` call that raised it; never retried.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The output or input device is unavailable or rejected the
    /// requested configuration.
    #[error("Device error: {0}")]
    Device(String),

    /// A malformed or undecodable stream was discovered while reading.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A control call that requires an open handle was made on a
    /// closed one.
    #[error("Audio is not open")]
    NotOpen,

    /// IO failure while reading the underlying resource.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
