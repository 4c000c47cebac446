//! Configuration management for Talkback

pub mod file;

use std::time::Duration;

use crate::session::{DEFAULT_LANGUAGE, Language, SessionSettings, Volume};
use crate::voice::{
    AnalyzerConfig, SegmenterConfig, SpeechToText, SttProvider, TextToSpeech, TtsProvider,
};
use crate::{Error, Result};

/// Talkback configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote response service
    pub service: ServiceConfig,

    /// Initial session settings
    pub session: SessionConfig,

    /// Speech providers
    pub voice: VoiceConfig,

    /// Analyzer and segmentation tuning
    pub audio: AudioConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Response service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the response service
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

/// Initial session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Language recognition and synthesis start in
    pub language: Language,

    /// Languages offered for selection; empty allows any valid tag
    pub languages: Vec<Language>,

    /// Speak replies aloud
    pub voice_enabled: bool,

    /// Output volume
    pub volume: Volume,
}

/// Speech provider configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    pub stt_model: String,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,

    /// Per-request timeout for transcription and synthesis
    pub timeout: Duration,
}

/// Audio analysis and segmentation
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub analyzer: AnalyzerConfig,

    /// Sampling frames per second for headless front ends
    pub frame_rate: u32,

    pub segmenter: SegmenterConfig,

    /// Capture ends by itself after this long without speech
    pub idle_timeout: Option<Duration>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper STT, TTS)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl ApiKeys {
    fn for_stt(&self, provider: SttProvider) -> Option<&str> {
        match provider {
            SttProvider::Whisper => self.openai.as_deref(),
            SttProvider::Deepgram => self.deepgram.as_deref(),
        }
        .filter(|key| !key.is_empty())
    }

    fn for_tts(&self, provider: TtsProvider) -> Option<&str> {
        match provider {
            TtsProvider::OpenAI => self.openai.as_deref(),
            TtsProvider::ElevenLabs => self.elevenlabs.as_deref(),
        }
        .filter(|key| !key.is_empty())
    }
}

const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FRAME_RATE: u32 = 60;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_VOICE_TIMEOUT_SECS: u64 = 30;

/// Analysis window bounds, as for a browser analyser node
const FFT_SIZE_RANGE: std::ops::RangeInclusive<usize> = 32..=32768;

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a language tag or provider name is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Layer `env` over a parsed config file over defaults
    ///
    /// # Errors
    ///
    /// Returns error if a language tag or provider name is invalid
    pub fn resolve(
        fc: file::TalkbackConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let service = ServiceConfig {
            base_url: env("TALKBACK_BASE_URL")
                .or(fc.service.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(fc.service.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };

        // Session defaults (env > toml > default)
        let language = env("TALKBACK_LANGUAGE")
            .or(fc.session.language)
            .map_or_else(|| Language::parse(DEFAULT_LANGUAGE), |tag| Language::parse(&tag))?;

        let languages = fc
            .session
            .languages
            .unwrap_or_default()
            .iter()
            .map(|tag| Language::parse(tag))
            .collect::<Result<Vec<_>>>()?;

        if !languages.is_empty() && !languages.contains(&language) {
            return Err(Error::Config(format!(
                "language {language} is not among the offered languages"
            )));
        }

        let voice_enabled = env("TALKBACK_VOICE_ENABLED")
            .and_then(|v| parse_bool(&v))
            .or(fc.session.voice_enabled)
            .unwrap_or(true);

        let volume = env("TALKBACK_VOLUME")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .or(fc.session.volume)
            .map_or(Volume::MAX, Volume::from_percent);

        let session = SessionConfig {
            language,
            languages,
            voice_enabled,
            volume,
        };

        // Providers
        let stt_provider = fc
            .voice
            .stt_provider
            .as_deref()
            .map_or(Ok(SttProvider::Whisper), SttProvider::parse)?;
        let tts_provider = fc
            .voice
            .tts_provider
            .as_deref()
            .map_or(Ok(TtsProvider::OpenAI), TtsProvider::parse)?;

        let default_voice = match tts_provider {
            TtsProvider::OpenAI => "alloy",
            // "Rachel"
            TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        };
        let default_stt_model = match stt_provider {
            SttProvider::Whisper => "whisper-1",
            SttProvider::Deepgram => "nova-2",
        };

        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("TALKBACK_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| default_stt_model.to_string()),
            tts_provider,
            tts_model: env("TALKBACK_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            tts_voice: env("TALKBACK_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| default_voice.to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0),
            timeout: Duration::from_secs(
                fc.voice
                    .timeout_secs
                    .unwrap_or(DEFAULT_VOICE_TIMEOUT_SECS)
                    .max(1),
            ),
        };

        let analyzer_defaults = AnalyzerConfig::default();
        let segmenter_defaults = SegmenterConfig::default();
        let audio_file = fc.audio;

        let fft_size = match audio_file.fft_size {
            None => analyzer_defaults.fft_size,
            Some(size) => size
                .checked_next_power_of_two()
                .filter(|size| FFT_SIZE_RANGE.contains(size))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "audio.fft_size must be between {} and {}, got {size}",
                        FFT_SIZE_RANGE.start(),
                        FFT_SIZE_RANGE.end()
                    ))
                })?,
        };

        let audio = AudioConfig {
            analyzer: AnalyzerConfig {
                fft_size,
                smoothing: audio_file
                    .smoothing
                    .map_or(analyzer_defaults.smoothing, |s| s.clamp(0.0, 0.99)),
                min_decibels: audio_file
                    .min_decibels
                    .unwrap_or(analyzer_defaults.min_decibels),
                max_decibels: audio_file
                    .max_decibels
                    .unwrap_or(analyzer_defaults.max_decibels),
                reference_ceiling: audio_file
                    .reference_ceiling
                    .unwrap_or(analyzer_defaults.reference_ceiling),
            },
            frame_rate: audio_file.frame_rate.unwrap_or(DEFAULT_FRAME_RATE).max(1),
            segmenter: SegmenterConfig {
                energy_threshold: audio_file
                    .energy_threshold
                    .unwrap_or(segmenter_defaults.energy_threshold),
                min_speech: audio_file
                    .min_speech_ms
                    .map_or(segmenter_defaults.min_speech, Duration::from_millis),
                silence: audio_file
                    .silence_ms
                    .map_or(segmenter_defaults.silence, Duration::from_millis),
                max_utterance: segmenter_defaults.max_utterance,
            },
            idle_timeout: match audio_file
                .idle_timeout_secs
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
            {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        if audio.analyzer.min_decibels >= audio.analyzer.max_decibels {
            return Err(Error::Config(
                "audio.min_decibels must be below audio.max_decibels".to_string(),
            ));
        }

        Ok(Self {
            service,
            session,
            voice,
            audio,
            api_keys,
        })
    }

    /// Settings a new session starts from
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            language: self.session.language.clone(),
            languages: self.session.languages.clone(),
            voice_enabled: self.session.voice_enabled,
            volume: self.session.volume,
            analyzer: self.audio.analyzer,
        }
    }

    /// Speech-to-text client, if the provider's key is configured
    #[must_use]
    pub fn speech_to_text(&self) -> Option<SpeechToText> {
        let key = self.api_keys.for_stt(self.voice.stt_provider)?;
        SpeechToText::new(
            self.voice.stt_provider,
            key.to_string(),
            self.voice.stt_model.clone(),
            self.voice.timeout,
        )
        .inspect_err(|e| tracing::warn!(error = %e, "speech-to-text client unavailable"))
        .ok()
    }

    /// Text-to-speech client, if the provider's key is configured
    #[must_use]
    pub fn text_to_speech(&self) -> Option<TextToSpeech> {
        let key = self.api_keys.for_tts(self.voice.tts_provider)?;
        TextToSpeech::new(
            self.voice.tts_provider,
            key.to_string(),
            self.voice.tts_voice.clone(),
            self.voice.tts_speed,
            self.voice.tts_model.clone(),
            self.voice.timeout,
        )
        .inspect_err(|e| tracing::warn!(error = %e, "text-to-speech client unavailable"))
        .ok()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
