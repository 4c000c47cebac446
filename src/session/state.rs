//! Session identity and user-adjustable settings

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Language;

/// Opaque identifier generated once per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output volume in percent, always within 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volume(u8);

impl Volume {
    pub const MAX: Self = Self(100);
    pub const MUTE: Self = Self(0);

    /// Build a volume from any percentage, clamping out-of-range values
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_percent(percent: f64) -> Self {
        if percent.is_nan() {
            return Self::MUTE;
        }
        Self(percent.round().clamp(0.0, 100.0) as u8)
    }

    #[must_use]
    pub const fn percent(self) -> u8 {
        self.0
    }

    /// Linear gain in [0, 1] for sample scaling
    #[must_use]
    pub fn gain(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::MAX
    }
}

/// Lifetime-bound context of one voice interaction
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    /// Locale used for recognition and synthesis
    pub language: Language,
    /// Whether replies are spoken aloud
    pub voice_enabled: bool,
    /// Synthesis volume
    pub volume: Volume,
}

impl Session {
    /// Start a session with a freshly generated id
    #[must_use]
    pub fn new(language: Language, voice_enabled: bool, volume: Volume) -> Self {
        Self {
            id: SessionId::generate(),
            language,
            voice_enabled,
            volume,
        }
    }

    /// The immutable session id
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }
}
