//! Request/response round trip to the remote reply service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::SessionId;
use crate::{Error, Result};

/// Text appended (and spoken) whenever a reply cannot be produced
pub const FALLBACK_MESSAGE: &str = "Could not generate a response.";

/// Path of the generation endpoint relative to the service base URL
const GENERATE_PATH: &str = "/api/generate-response";

/// Something that turns a transcript into reply text
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Produce a reply for one transcript
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or malformed body
    async fn generate(&self, transcript: &str, session_id: &SessionId) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    transcript: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// `POST {base_url}/api/generate-response` over HTTP
pub struct HttpResponseGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpResponseGenerator {
    /// Create a generator for the given service base URL
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("response service base URL required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}{GENERATE_PATH}"),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn generate(&self, transcript: &str, session_id: &SessionId) -> Result<String> {
        let request = GenerateRequest {
            transcript,
            session_id: session_id.as_str(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Response(format!("service error {status}: {body}")));
        }

        let body = response.bytes().await?;
        let parsed: GenerateResponse = serde_json::from_slice(&body)?;
        Ok(parsed.response)
    }
}

/// Outcome of one generation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The service answered
    Generated(String),
    /// The attempt failed
    Fallback,
}

impl Reply {
    /// Text to show and speak
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Generated(text) => text,
            Self::Fallback => FALLBACK_MESSAGE,
        }
    }

    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

/// Single-shot client that never surfaces raw errors
///
/// Each call makes exactly one attempt; failures become [`Reply::Fallback`].
#[derive(Clone)]
pub struct ResponseClient {
    generator: Arc<dyn ResponseGenerator>,
}

impl ResponseClient {
    #[must_use]
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self { generator }
    }

    /// Ask the service for a reply to `transcript`
    pub async fn generate_response(&self, transcript: &str, session_id: &SessionId) -> Reply {
        match self.generator.generate(transcript, session_id).await {
            Ok(text) => {
                tracing::debug!(session = %session_id, chars = text.len(), "reply received");
                Reply::Generated(text)
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "error generating response");
                Reply::Fallback
            }
        }
    }
}
