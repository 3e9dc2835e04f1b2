//! Error types for voice-chat.

use thiserror::Error;

/// Result type alias for voice-chat operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No credential for the chat API
    #[error("no API key configured (set chat.api_key or ${0})")]
    MissingApiKey(String),

    /// Chat API answered with a non-success status
    #[error("chat API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Chat API answered with something we could not read
    #[error("malformed chat response: {0}")]
    MalformedResponse(String),

    /// Speech-to-text error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
