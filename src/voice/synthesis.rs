//! Spoken playback of assistant replies
//!
//! At most one utterance is audible: every new utterance cancels whatever
//! is queued or playing first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::playback::{AudioPlayback, PlaybackEnd, apply_gain, decode_mp3};
use super::tts::TextToSpeech;
use crate::session::{Language, Volume};
use crate::{Error, Result};

/// One utterance handed to a speech output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub language: Language,
    pub volume: Volume,
}

/// How an utterance ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// A platform text-to-speech output
pub trait SpeechOutput: Send + Sync {
    /// Queue an utterance; the receiver resolves when it ends
    fn speak(&self, request: SynthesisRequest) -> oneshot::Receiver<UtteranceOutcome>;

    /// Cancel every queued or playing utterance
    fn cancel_all(&self);
}

/// Speaks assistant replies when voice output is enabled
pub struct SpeechSynthesisPlayer {
    output: Arc<dyn SpeechOutput>,
    enabled: bool,
    volume: Volume,
}

impl SpeechSynthesisPlayer {
    #[must_use]
    pub fn new(output: Arc<dyn SpeechOutput>, enabled: bool, volume: Volume) -> Self {
        Self {
            output,
            enabled,
            volume,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn volume(&self) -> Volume {
        self.volume
    }

    /// Speak `text` in `language`, replacing anything already audible
    ///
    /// Returns whether an utterance was issued. Nothing happens while
    /// disabled or for blank text. Must be called within a Tokio runtime.
    pub fn speak(&self, text: &str, language: &Language) -> bool {
        if !self.enabled || text.trim().is_empty() {
            return false;
        }

        self.output.cancel_all();

        let outcome = self.output.speak(SynthesisRequest {
            text: text.to_string(),
            language: language.clone(),
            volume: self.volume,
        });

        tokio::spawn(async move {
            match outcome.await {
                Ok(UtteranceOutcome::Completed) => tracing::debug!("utterance completed"),
                Ok(UtteranceOutcome::Cancelled) => tracing::debug!("utterance cancelled"),
                Ok(UtteranceOutcome::Failed(error)) => {
                    tracing::warn!(%error, "speech synthesis failed");
                }
                Err(_) => tracing::trace!("speech output dropped utterance"),
            }
        });

        true
    }

    /// Enable or disable spoken replies; disabling silences playback at once
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.output.cancel_all();
        }
    }

    /// Volume for subsequent utterances
    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    /// Silence anything queued or playing
    pub fn cancel(&self) {
        self.output.cancel_all();
    }
}

struct ActiveUtterance {
    cancel: CancellationToken,
    stop_playback: Arc<AtomicBool>,
}

impl ActiveUtterance {
    fn stop(&self) {
        self.cancel.cancel();
        self.stop_playback.store(true, Ordering::Release);
    }
}

/// Cloud TTS rendered through the default output device
///
/// Without a TTS client every utterance fails immediately.
pub struct HttpSpeechOutput {
    tts: Option<TextToSpeech>,
    current: Mutex<Option<ActiveUtterance>>,
}

impl HttpSpeechOutput {
    #[must_use]
    pub fn new(tts: Option<TextToSpeech>) -> Self {
        Self {
            tts,
            current: Mutex::new(None),
        }
    }

    fn replace_current(&self, next: Option<ActiveUtterance>) {
        match self.current.lock() {
            Ok(mut current) => {
                if let Some(previous) = current.take() {
                    previous.stop();
                }
                *current = next;
            }
            Err(_) => tracing::error!("speech output state poisoned"),
        }
    }
}

impl SpeechOutput for HttpSpeechOutput {
    fn speak(&self, request: SynthesisRequest) -> oneshot::Receiver<UtteranceOutcome> {
        let (tx, rx) = oneshot::channel();

        let Some(tts) = self.tts.clone() else {
            let _ = tx.send(UtteranceOutcome::Failed(
                "no text-to-speech API key configured".to_string(),
            ));
            return rx;
        };

        let cancel = CancellationToken::new();
        let stop_playback = Arc::new(AtomicBool::new(false));

        self.replace_current(Some(ActiveUtterance {
            cancel: cancel.clone(),
            stop_playback: Arc::clone(&stop_playback),
        }));

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => UtteranceOutcome::Cancelled,
                result = render(tts, request, stop_playback) => match result {
                    Ok(PlaybackEnd::Finished) => UtteranceOutcome::Completed,
                    Ok(PlaybackEnd::Cancelled) => UtteranceOutcome::Cancelled,
                    Err(e) => UtteranceOutcome::Failed(e.to_string()),
                },
            };
            let _ = tx.send(outcome);
        });

        rx
    }

    fn cancel_all(&self) {
        self.replace_current(None);
    }
}

/// Synthesize, decode and play one utterance
async fn render(
    tts: TextToSpeech,
    request: SynthesisRequest,
    stop_playback: Arc<AtomicBool>,
) -> Result<PlaybackEnd> {
    let audio = tts.synthesize(&request.text, &request.language).await?;
    let mut decoded = decode_mp3(&audio)?;

    if request.volume == Volume::MUTE {
        tracing::debug!("muted, skipping playback");
        return Ok(PlaybackEnd::Finished);
    }
    apply_gain(&mut decoded.samples, request.volume.gain());

    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new(decoded.sample_rate)?;
        playback.play_blocking(decoded.samples, &stop_playback)
    })
    .await
    .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}
