//! Read-only state handed to the presentation layer, and the intents it sends back

use std::fmt;

use serde::Serialize;

use super::{Language, SessionId, Volume};
use crate::chat::ChatMessage;

/// Condition the presentation layer should surface to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Notice {
    /// Microphone or recognition service refused; the talk control stays inactive
    RecognitionUnavailable(String),
    /// The requested language is not offered
    UnsupportedLanguage(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecognitionUnavailable(reason) => {
                write!(f, "voice recognition unavailable: {reason}")
            }
            Self::UnsupportedLanguage(tag) => write!(f, "language not supported: {tag}"),
        }
    }
}

/// Live session state, published on every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub is_active: bool,
    pub voice_enabled: bool,
    pub selected_language: Language,
    pub volume: Volume,
    pub last_transcript: Option<String>,
    pub last_response: Option<String>,
    pub notice: Option<Notice>,
    /// Increases by one on every published change
    pub revision: u64,
}

impl SessionStatus {
    #[must_use]
    pub const fn new(language: Language, voice_enabled: bool, volume: Volume) -> Self {
        Self {
            is_active: false,
            voice_enabled,
            selected_language: language,
            volume,
            last_transcript: None,
            last_response: None,
            notice: None,
            revision: 0,
        }
    }
}

/// Point-in-time snapshot of everything the presentation layer renders
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub status: SessionStatus,
    /// Chronological
    pub chat: Vec<ChatMessage>,
    pub audio_quality: f32,
}

impl SessionView {
    /// Chat in display order, most recent first
    pub fn newest_first(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat.iter().rev()
    }
}

/// User intent forwarded by the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    PressStart,
    PressEnd,
    ToggleVoice,
    SelectLanguage(String),
    SetVolume(f64),
}
