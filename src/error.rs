//! Error types for Talkback

use thiserror::Error;

/// Result type alias for Talkback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Talkback
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid or unsupported locale tag
    #[error("invalid language tag: {0}")]
    Language(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone or recognition service denied or missing
    #[error("recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// Recognition engine misuse or failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Remote response service failure
    #[error("response error: {0}")]
    Response(String),

    /// Best-effort release of an audio device failed
    #[error("device cleanup failed: {0}")]
    DeviceCleanup(String),

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
