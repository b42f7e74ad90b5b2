//! Error types for the Parley client

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Parley client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No usable audio input device, or the device refused to open
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture requested while a recording is already in progress
    #[error("already capturing")]
    AlreadyCapturing,

    /// Turn submitted while another turn is still active
    #[error("turn already active")]
    AlreadyActiveTurn,

    /// Recording stopped with no usable audio
    #[error("empty clip: {0}")]
    EmptyClip(String),

    /// Audio upload failed in transit
    #[error("upload error: {0}")]
    Upload(String),

    /// Backend service returned a failure
    #[error("service error: {0}")]
    Service(String),

    /// Backend response was missing or malformed
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
