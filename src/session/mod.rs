//! Voice interaction sessions
//!
//! A [`SessionController`] owns one recognition engine, quality sampler,
//! synthesis player and chat log, and is the only way the presentation layer
//! changes any of them.

mod controller;
mod language;
mod state;
mod view;

pub use controller::{Capabilities, SessionController, SessionSettings};
pub use language::{DEFAULT_LANGUAGE, Language};
pub use state::{Session, SessionId, Volume};
pub use view::{Intent, Notice, SessionStatus, SessionView};
