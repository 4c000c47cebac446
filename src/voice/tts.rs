//! Cloud synthesis of reply text into MP3 audio

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::session::Language;
use crate::{Error, Result};

const OPENAI_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Synthesis service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    /// Parse a provider name from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unknown providers
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }

    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_multilingual_v2",
        }
    }
}

impl fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => f.write_str("openai"),
            Self::ElevenLabs => f.write_str("elevenlabs"),
        }
    }
}

#[derive(Serialize)]
struct OpenAiSpeech<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

#[derive(Serialize)]
struct ElevenLabsSpeech<'a> {
    text: &'a str,
    model_id: &'a str,
    language_code: &'a str,
}

/// Client for one synthesis provider
#[derive(Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// `voice` is a voice name for `OpenAI` and a voice id for `ElevenLabs`,
    /// which ignores `speed`. Speed is clamped to 0.25..=4.0. Requests that
    /// take longer than `timeout` fail with `Error::Http`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key is empty, or `Error::Http` if
    /// the HTTP client cannot be built
    pub fn new(
        provider: TtsProvider,
        api_key: String,
        voice: String,
        speed: f32,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!("{provider} API key required for TTS")));
        }

        let endpoint = match provider {
            TtsProvider::OpenAI => OPENAI_URL,
            TtsProvider::ElevenLabs => ELEVENLABS_URL,
        };

        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.to_string(),
            api_key,
            voice,
            speed: speed.clamp(0.25, 4.0),
            model,
            provider,
        })
    }

    /// Send requests to a provider-compatible server instead
    ///
    /// For `ElevenLabs` the voice id is appended to this base.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Render `text`, written in `language`, to MP3 bytes
    ///
    /// `OpenAI` infers the language from the text; `ElevenLabs` is told.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` on transport failure or `Error::Tts` on a
    /// non-success status
    pub async fn synthesize(&self, text: &str, language: &Language) -> Result<Vec<u8>> {
        tracing::debug!(provider = %self.provider, %language, chars = text.len(), "synthesizing");

        let request = match self.provider {
            TtsProvider::OpenAI => self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&OpenAiSpeech {
                    model: &self.model,
                    input: text,
                    voice: &self.voice,
                    speed: self.speed,
                    response_format: "mp3",
                }),
            TtsProvider::ElevenLabs => self
                .client
                .post(format!("{}/{}", self.endpoint, self.voice))
                .header("xi-api-key", &self.api_key)
                .header(reqwest::header::ACCEPT, "audio/mpeg")
                .json(&ElevenLabsSpeech {
                    text,
                    model_id: &self.model,
                    language_code: language.primary(),
                }),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("{} returned {status}: {body}", self.provider)));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
