//! Talkback - Hold-to-talk voice client for conversational AI backends
//!
//! This library provides the core of a voice conversation client:
//! - Continuous speech recognition as an explicit state machine
//! - Live microphone quality sampling for UI feedback
//! - Spoken replies with at most one utterance audible at a time
//! - A single-shot client for the remote response service
//! - An append-only chat log
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Presentation (terminal, ...)           │
//! │        intents ▼                  ▲ SessionStatus   │
//! └────────────────────┬──────────────┴─────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionController                   │
//! │  RecognitionEngine │ QualitySampler │ Synthesis     │
//! │  ChatLog           │ ResponseClient                 │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Microphone │ STT / TTS APIs │ Response service    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod response;
pub mod session;
pub mod voice;

pub use chat::{ChatLog, ChatMessage, Role};
pub use config::Config;
pub use error::{Error, Result};
pub use response::{FALLBACK_MESSAGE, HttpResponseGenerator, Reply, ResponseClient, ResponseGenerator};
pub use session::{
    Capabilities, Intent, Language, Notice, SessionController, SessionId, SessionSettings,
    SessionStatus, SessionView, Volume,
};
