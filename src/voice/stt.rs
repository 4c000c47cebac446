//! Cloud transcription of recorded utterances

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::session::Language;
use crate::{Error, Result};

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    #[serde(default)]
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    /// Best alternative of the first channel; empty when nothing was heard
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|channel| channel.alternatives.into_iter().next())
            .map(|alternative| alternative.transcript)
            .unwrap_or_default()
    }
}

/// Transcription service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    Whisper,
    Deepgram,
}

impl SttProvider {
    /// Parse a provider name from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unknown providers
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl fmt::Display for SttProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whisper => f.write_str("whisper"),
            Self::Deepgram => f.write_str("deepgram"),
        }
    }
}

/// Client for one transcription provider
#[derive(Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Requests that take longer than `timeout` fail with `Error::Http`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key is empty, or `Error::Http` if
    /// the HTTP client cannot be built
    pub fn new(
        provider: SttProvider,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!("{provider} API key required")));
        }

        let endpoint = match provider {
            SttProvider::Whisper => WHISPER_URL,
            SttProvider::Deepgram => DEEPGRAM_URL,
        };

        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.to_string(),
            api_key,
            model,
            provider,
        })
    }

    /// Send requests to a provider-compatible server instead
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe one WAV-encoded utterance spoken in `language`
    ///
    /// Returns the trimmed transcript, empty if the provider heard nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` on transport failure, `Error::Stt` on a
    /// non-success status, or `Error::Serialization` on an unexpected body
    pub async fn transcribe(&self, wav: &[u8], language: &Language) -> Result<String> {
        let request = match self.provider {
            SttProvider::Whisper => self.whisper_request(wav, language)?,
            SttProvider::Deepgram => self.deepgram_request(wav, language),
        };

        let started = Instant::now();
        let response = request.send().await.inspect_err(|e| {
            tracing::warn!(provider = %self.provider, error = %e, "transcription request failed");
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(provider = %self.provider, %status, %body, "transcription rejected");
            return Err(Error::Stt(format!("{} returned {status}: {body}", self.provider)));
        }

        let body = response.bytes().await?;
        let transcript = match self.provider {
            SttProvider::Whisper => serde_json::from_slice::<WhisperResponse>(&body)?.text,
            SttProvider::Deepgram => {
                serde_json::from_slice::<DeepgramResponse>(&body)?.into_transcript()
            }
        };
        let transcript = transcript.trim().to_string();

        tracing::debug!(
            provider = %self.provider,
            %language,
            audio_bytes = wav.len(),
            chars = transcript.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "transcription complete"
        );
        Ok(transcript)
    }

    /// Whisper takes a multipart upload and an ISO-639-1 language hint
    fn whisper_request(&self, wav: &[u8], language: &Language) -> Result<reqwest::RequestBuilder> {
        let file = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", language.primary().to_string());

        Ok(self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form))
    }

    /// Deepgram takes the raw body and accepts full locale tags
    fn deepgram_request(&self, wav: &[u8], language: &Language) -> reqwest::RequestBuilder {
        self.client
            .post(&self.endpoint)
            .query(&[
                ("model", self.model.as_str()),
                ("language", language.as_str()),
                ("punctuate", "true"),
            ])
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav.to_vec())
    }
}
