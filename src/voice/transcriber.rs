//! Continuous recognition backed by a cloud STT service
//!
//! The microphone is polled in short chunks, split into utterances by the
//! energy segmenter, and each utterance is transcribed in the session
//! language. Only finalized text is emitted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::{MicrophoneSource, MicrophoneStream, release, samples_to_wav};
use super::recognition::{RecognitionHandle, RecognizerErrorKind, RecognizerEvent, SpeechRecognizer};
use super::segmenter::{SegmenterConfig, UtteranceSegmenter};
use super::stt::SpeechToText;
use crate::session::Language;
use crate::{Error, Result};

/// How often captured audio is drained into the segmenter
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Recognizer that segments microphone audio and transcribes utterances
pub struct TranscribingRecognizer {
    microphone: Arc<dyn MicrophoneSource>,
    stt: Option<SpeechToText>,
    segmenter: SegmenterConfig,
    idle_timeout: Option<Duration>,
}

impl TranscribingRecognizer {
    /// Create a recognizer. Without an STT client every `start` fails as
    /// unavailable.
    #[must_use]
    pub fn new(
        microphone: Arc<dyn MicrophoneSource>,
        stt: Option<SpeechToText>,
        segmenter: SegmenterConfig,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            microphone,
            stt,
            segmenter,
            idle_timeout,
        }
    }
}

impl SpeechRecognizer for TranscribingRecognizer {
    fn create(&self, language: &Language) -> Result<Box<dyn RecognitionHandle>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Box::new(TranscribingHandle {
            microphone: Arc::clone(&self.microphone),
            stt: self.stt.clone(),
            language: language.clone(),
            segmenter: self.segmenter,
            idle_timeout: self.idle_timeout,
            events_tx,
            events_rx: Some(events_rx),
            run: None,
        }))
    }
}

struct CaptureRun {
    stop: CancellationToken,
    abort: CancellationToken,
    task: JoinHandle<()>,
}

struct TranscribingHandle {
    microphone: Arc<dyn MicrophoneSource>,
    stt: Option<SpeechToText>,
    language: Language,
    segmenter: SegmenterConfig,
    idle_timeout: Option<Duration>,
    events_tx: mpsc::UnboundedSender<RecognizerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<RecognizerEvent>>,
    run: Option<CaptureRun>,
}

#[async_trait]
impl RecognitionHandle for TranscribingHandle {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RecognizerEvent>> {
        self.events_rx.take()
    }

    async fn start(&mut self) -> Result<()> {
        if self.run.as_ref().is_some_and(|run| !run.task.is_finished()) {
            return Ok(());
        }

        let Some(stt) = self.stt.clone() else {
            return Err(Error::RecognitionUnavailable(
                "no speech-to-text API key configured".to_string(),
            ));
        };

        let stream = self
            .microphone
            .open()
            .await
            .map_err(|e| Error::RecognitionUnavailable(e.to_string()))?;

        let stop = CancellationToken::new();
        let abort = CancellationToken::new();
        let capture = Capture {
            stt,
            language: self.language.clone(),
            events: self.events_tx.clone(),
            abort: abort.clone(),
        };

        let task = tokio::spawn(capture.run(stream, self.segmenter, self.idle_timeout, stop.clone()));

        self.run = Some(CaptureRun { stop, abort, task });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(run) = &self.run {
            run.stop.cancel();
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(run) = self.run.take() {
            run.abort.cancel();
        }
    }
}

impl Drop for TranscribingHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

enum Exit {
    Aborted,
    Stopped,
    DeviceLost,
    NoSpeech,
}

struct Capture {
    stt: SpeechToText,
    language: Language,
    events: mpsc::UnboundedSender<RecognizerEvent>,
    abort: CancellationToken,
}

impl Capture {
    async fn run(
        self,
        mut stream: Box<dyn MicrophoneStream>,
        config: SegmenterConfig,
        idle_timeout: Option<Duration>,
        stop: CancellationToken,
    ) {
        let sample_rate = stream.sample_rate();
        let mut segmenter = UtteranceSegmenter::new(config, sample_rate);
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let mut last_speech = Instant::now();

        tracing::debug!(language = %self.language, sample_rate, "capture loop started");

        let exit = loop {
            tokio::select! {
                biased;
                () = self.abort.cancelled() => break Exit::Aborted,
                () = stop.cancelled() => break Exit::Stopped,
                _ = poll.tick() => {}
            }

            if let Some(failure) = stream.failure() {
                tracing::error!(error = %failure, "microphone lost");
                self.emit(RecognizerEvent::Error(RecognizerErrorKind::AudioCapture));
                break Exit::DeviceLost;
            }

            let samples = stream.take();
            if let Some(utterance) = segmenter.push(&samples)
                && !self.transcribe(&utterance, sample_rate).await
            {
                break Exit::Aborted;
            }

            if segmenter.is_speaking() {
                last_speech = Instant::now();
            } else if idle_timeout.is_some_and(|limit| last_speech.elapsed() >= limit) {
                tracing::info!("no speech detected, ending capture");
                self.emit(RecognizerEvent::Error(RecognizerErrorKind::NoSpeech));
                break Exit::NoSpeech;
            }
        };

        if let Exit::Stopped = exit {
            // Speech spoken right before release still counts
            let tail = stream.take();
            let mut pending = Vec::new();
            if let Some(utterance) = segmenter.push(&tail) {
                pending.push(utterance);
            }
            if let Some(utterance) = segmenter.flush() {
                pending.push(utterance);
            }
            for utterance in pending {
                if !self.transcribe(&utterance, sample_rate).await {
                    break;
                }
            }
        }

        release(stream).await;

        if matches!(exit, Exit::Aborted) || self.abort.is_cancelled() {
            tracing::debug!("capture aborted");
        } else {
            self.emit(RecognizerEvent::End);
        }
    }

    /// Transcribe one utterance; returns false if aborted meanwhile
    async fn transcribe(&self, utterance: &[f32], sample_rate: u32) -> bool {
        let wav = match samples_to_wav(utterance, sample_rate) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return true;
            }
        };

        let result = tokio::select! {
            biased;
            () = self.abort.cancelled() => return false,
            result = self.stt.transcribe(&wav, &self.language) => result,
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.emit(RecognizerEvent::final_text(text));
            }
            Ok(_) => tracing::debug!("empty transcription"),
            Err(Error::Http(e)) => {
                tracing::warn!(error = %e, "transcription request failed");
                self.emit(RecognizerEvent::Error(RecognizerErrorKind::Network));
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.emit(RecognizerEvent::Error(RecognizerErrorKind::Other(e.to_string())));
            }
        }
        true
    }

    fn emit(&self, event: RecognizerEvent) {
        let _ = self.events.send(event);
    }
}
