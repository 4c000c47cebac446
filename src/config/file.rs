//! TOML configuration file loading
//!
//! Supports `~/.config/talkback/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TalkbackConfigFile {
    /// Remote response service
    #[serde(default)]
    pub service: ServiceFileConfig,

    /// Session defaults
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Speech providers
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Analyzer and segmentation tuning
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Response service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServiceFileConfig {
    /// Base URL; `/api/generate-response` is appended
    pub base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Session defaults
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Initial locale tag (e.g. "es-ES")
    pub language: Option<String>,

    /// Locales offered for selection (empty = any valid tag)
    pub languages: Option<Vec<String>>,

    /// Speak replies aloud
    pub voice_enabled: Option<bool>,

    /// Output volume, 0-100
    pub volume: Option<f64>,
}

/// Speech provider configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Per-request timeout for STT and TTS calls, in seconds
    pub timeout_secs: Option<u64>,
}

/// Audio analysis and utterance segmentation
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub fft_size: Option<usize>,
    pub smoothing: Option<f32>,
    pub min_decibels: Option<f32>,
    pub max_decibels: Option<f32>,
    /// Mean bin magnitude (0-255) treated as full quality
    pub reference_ceiling: Option<f32>,
    /// Sampling frames per second
    pub frame_rate: Option<u32>,
    pub energy_threshold: Option<f32>,
    pub min_speech_ms: Option<u64>,
    pub silence_ms: Option<u64>,
    /// End capture after this long without speech (0 = never)
    pub idle_timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TalkbackConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TalkbackConfigFile {
    config_file_path().map_or_else(TalkbackConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path, falling back to defaults
pub fn load_config_from(path: &Path) -> TalkbackConfigFile {
    if !path.exists() {
        return TalkbackConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TalkbackConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TalkbackConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/talkback/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("talkback").join("config.toml"))
}
