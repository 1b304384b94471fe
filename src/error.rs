//! Error types for Pulse gateway

use thiserror::Error;

/// Result type alias for Pulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Pulse gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Request validation error (missing or malformed client input)
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller exceeded the configured request rate
    #[error("rate limit exceeded")]
    RateLimited,

    /// Upstream generative service failure or malformed reply
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Malformed image payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

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
