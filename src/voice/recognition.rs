//! Continuous speech recognition as an explicit state machine
//!
//! A [`SpeechRecognizer`] builds one [`RecognitionHandle`] per language. The
//! engine owns that handle plus a [`Subscription`] forwarding its events into
//! a single sink. Every event is tagged with the generation of the handle that
//! produced it, so anything still queued from a torn-down handle is dropped.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::Language;
use crate::{Error, Result};

/// Observable recognition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionState {
    Idle,
    Listening,
    /// Stop requested, waiting for the device to acknowledge
    Stopping,
}

/// Error reported by a recognition backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerErrorKind {
    /// Permission to capture was denied
    NotAllowed,
    /// The recognition service refused or is missing
    ServiceUnavailable,
    NoSpeech,
    Network,
    Aborted,
    AudioCapture,
    Other(String),
}

impl RecognizerErrorKind {
    /// Errors that force the engine back to idle without retrying
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceUnavailable)
    }
}

impl fmt::Display for RecognizerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAllowed => f.write_str("not-allowed"),
            Self::ServiceUnavailable => f.write_str("service-not-allowed"),
            Self::NoSpeech => f.write_str("no-speech"),
            Self::Network => f.write_str("network"),
            Self::Aborted => f.write_str("aborted"),
            Self::AudioCapture => f.write_str("audio-capture"),
            Self::Other(detail) => write!(f, "other: {detail}"),
        }
    }
}

/// Raw event from a recognition backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Recognized text; interim results have `is_final == false`
    Result { transcript: String, is_final: bool },
    /// Capture ended, requested or not
    End,
    Error(RecognizerErrorKind),
}

impl RecognizerEvent {
    /// A finalized utterance
    pub fn final_text(transcript: impl Into<String>) -> Self {
        Self::Result {
            transcript: transcript.into(),
            is_final: true,
        }
    }

    /// A provisional hypothesis
    pub fn interim_text(transcript: impl Into<String>) -> Self {
        Self::Result {
            transcript: transcript.into(),
            is_final: false,
        }
    }
}

/// Builds capture handles bound to a language
pub trait SpeechRecognizer: Send + Sync {
    /// Create a handle for `language`; capture does not begin until `start`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be constructed
    fn create(&self, language: &Language) -> Result<Box<dyn RecognitionHandle>>;
}

/// One continuous capture bound to a language
#[async_trait]
pub trait RecognitionHandle: Send {
    /// The event stream; yields `Some` exactly once
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RecognizerEvent>>;

    /// Begin capturing; suspends until the device is granted
    ///
    /// # Errors
    ///
    /// Returns error if the device or service refuses
    async fn start(&mut self) -> Result<()>;

    /// Ask capture to finish; acknowledged later by an `End` event
    ///
    /// # Errors
    ///
    /// Returns error if the stop request could not be delivered
    fn stop(&mut self) -> Result<()>;

    /// End capture immediately. No `End` event is owed afterwards.
    fn abort(&mut self);
}

/// Recognizer event stamped with the handle generation that produced it
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    generation: u64,
    event: RecognizerEvent,
}

impl TaggedEvent {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn event(&self) -> &RecognizerEvent {
        &self.event
    }
}

/// What the engine reports to its owner after processing an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// One finalized utterance
    Recognized(String),
    /// Capture reached idle; `requested` is false when the engine stopped by itself
    Ended { requested: bool },
    /// Permission or service refused mid-session
    Unavailable(RecognizerErrorKind),
}

/// Owned attachment of a handle's events to the engine sink
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    fn forward(
        mut events: mpsc::UnboundedReceiver<RecognizerEvent>,
        sink: mpsc::UnboundedSender<TaggedEvent>,
        generation: u64,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if sink.send(TaggedEvent { generation, event }).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { cancel }
    }

    /// Detach; no further events are forwarded
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Recognition lifecycle over {Idle, Listening, Stopping}
pub struct RecognitionEngine {
    recognizer: Arc<dyn SpeechRecognizer>,
    language: Language,
    sink: mpsc::UnboundedSender<TaggedEvent>,
    handle: Option<Box<dyn RecognitionHandle>>,
    subscription: Option<Subscription>,
    generation: u64,
    state: RecognitionState,
}

impl RecognitionEngine {
    /// Create an idle engine. Events from its handles are delivered to `sink`
    /// and must be fed back through [`Self::handle_event`].
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        language: Language,
        sink: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        Self {
            recognizer,
            language,
            sink,
            handle: None,
            subscription: None,
            generation: 0,
            state: RecognitionState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RecognitionState {
        self.state
    }

    #[must_use]
    pub const fn language(&self) -> &Language {
        &self.language
    }

    /// Rebind capture to `language`
    ///
    /// Tears down the current handle synchronously before building the new
    /// one. A pending stop is completed by the teardown.
    ///
    /// # Errors
    ///
    /// Returns `Error::Recognition` while listening, or the backend error if
    /// the new handle cannot be built (it is then retried on `start`)
    pub fn configure(&mut self, language: Language) -> Result<()> {
        if self.state == RecognitionState::Listening {
            return Err(Error::Recognition(
                "cannot reconfigure while listening".to_string(),
            ));
        }

        self.teardown();
        self.language = language;
        self.build()
    }

    /// Idle → Listening. No-op when already listening.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecognitionUnavailable` if capture cannot begin; the
    /// engine stays idle
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            RecognitionState::Listening => {
                tracing::debug!("recognition already listening");
                return Ok(());
            }
            RecognitionState::Stopping => {
                tracing::debug!("restarting recognition while previous capture drains");
                self.teardown();
            }
            RecognitionState::Idle => {}
        }

        if self.handle.is_none() {
            self.build()
                .map_err(|e| Error::RecognitionUnavailable(e.to_string()))?;
        }

        let Some(handle) = self.handle.as_mut() else {
            return Err(Error::RecognitionUnavailable(
                "no capture handle".to_string(),
            ));
        };

        if let Err(e) = handle.start().await {
            tracing::warn!(error = %e, language = %self.language, "recognition failed to start");
            return Err(match e {
                Error::RecognitionUnavailable(_) => e,
                other => Error::RecognitionUnavailable(other.to_string()),
            });
        }

        self.state = RecognitionState::Listening;
        tracing::info!(language = %self.language, "recognition started");
        Ok(())
    }

    /// Listening → Stopping. No-op from any other state.
    ///
    /// If the backend rejects the stop request, capture is torn down and the
    /// engine goes straight to idle; its late events are dropped.
    pub fn stop(&mut self) {
        if self.state != RecognitionState::Listening {
            tracing::trace!(state = ?self.state, "stop ignored");
            return;
        }

        self.state = RecognitionState::Stopping;

        if let Some(handle) = self.handle.as_mut()
            && let Err(e) = handle.stop()
        {
            tracing::warn!(error = %e, "recognition stop failed, aborting capture");
            self.teardown();
        }

        tracing::debug!(state = ?self.state, "recognition stopping");
    }

    /// Drop the capture handle immediately and return to idle
    pub fn abort(&mut self) {
        self.teardown();
    }

    /// Apply one backend event and report what the owner must react to
    pub fn handle_event(&mut self, tagged: TaggedEvent) -> Option<EngineEvent> {
        if tagged.generation != self.generation || self.handle.is_none() {
            tracing::trace!(
                generation = tagged.generation,
                current = self.generation,
                "dropping event from torn-down capture"
            );
            return None;
        }

        match tagged.event {
            RecognizerEvent::Result {
                is_final: false, ..
            } => None,
            RecognizerEvent::Result {
                transcript,
                is_final: true,
            } => {
                if self.state == RecognitionState::Idle {
                    tracing::debug!("dropping result received while idle");
                    return None;
                }
                let text = transcript.trim();
                if text.is_empty() {
                    return None;
                }
                tracing::debug!(transcript = %text, "utterance recognized");
                Some(EngineEvent::Recognized(text.to_string()))
            }
            RecognizerEvent::End => {
                let previous = std::mem::replace(&mut self.state, RecognitionState::Idle);
                match previous {
                    RecognitionState::Idle => None,
                    RecognitionState::Listening => {
                        tracing::info!("recognition ended by engine");
                        Some(EngineEvent::Ended { requested: false })
                    }
                    RecognitionState::Stopping => {
                        tracing::debug!("recognition stop acknowledged");
                        Some(EngineEvent::Ended { requested: true })
                    }
                }
            }
            RecognizerEvent::Error(kind) if kind.is_fatal() => {
                tracing::error!(error = %kind, "voice recognition error");
                if let Some(handle) = self.handle.as_mut() {
                    handle.abort();
                }
                self.state = RecognitionState::Idle;
                Some(EngineEvent::Unavailable(kind))
            }
            RecognizerEvent::Error(kind) => {
                tracing::warn!(error = %kind, state = ?self.state, "voice recognition error");
                None
            }
        }
    }

    fn build(&mut self) -> Result<()> {
        let mut handle = self.recognizer.create(&self.language)?;

        if let Some(events) = handle.take_events() {
            self.subscription = Some(Subscription::forward(
                events,
                self.sink.clone(),
                self.generation,
            ));
        }
        self.handle = Some(handle);

        tracing::debug!(
            language = %self.language,
            generation = self.generation,
            "recognition configured"
        );
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if let Some(mut handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
        self.state = RecognitionState::Idle;
    }
}

impl Drop for RecognitionEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Backend {
        created: AtomicUsize,
        starts: AtomicUsize,
        aborts: AtomicUsize,
        deny: AtomicBool,
        fail_stop: AtomicBool,
        languages: Mutex<Vec<String>>,
    }

    struct CountingRecognizer(Arc<Backend>);

    struct CountingHandle {
        backend: Arc<Backend>,
        events: Option<mpsc::UnboundedReceiver<RecognizerEvent>>,
    }

    impl SpeechRecognizer for CountingRecognizer {
        fn create(&self, language: &Language) -> Result<Box<dyn RecognitionHandle>> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            self.0
                .languages
                .lock()
                .unwrap()
                .push(language.to_string());
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(CountingHandle {
                backend: Arc::clone(&self.0),
                events: Some(rx),
            }))
        }
    }

    #[async_trait]
    impl RecognitionHandle for CountingHandle {
        fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RecognizerEvent>> {
            self.events.take()
        }

        async fn start(&mut self) -> Result<()> {
            if self.backend.deny.load(Ordering::SeqCst) {
                return Err(Error::RecognitionUnavailable("not-allowed".to_string()));
            }
            self.backend.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            if self.backend.fail_stop.load(Ordering::SeqCst) {
                return Err(Error::Recognition("invalid state".to_string()));
            }
            Ok(())
        }

        fn abort(&mut self) {
            self.backend.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn engine() -> (RecognitionEngine, Arc<Backend>) {
        let backend = Arc::new(Backend::default());
        let (sink, _rx) = mpsc::unbounded_channel();
        let engine = RecognitionEngine::new(
            Arc::new(CountingRecognizer(Arc::clone(&backend))),
            Language::default(),
            sink,
        );
        (engine, backend)
    }

    fn event(engine: &RecognitionEngine, event: RecognizerEvent) -> TaggedEvent {
        TaggedEvent {
            generation: engine.generation,
            event,
        }
    }

    #[tokio::test]
    async fn test_start_stop_ack_cycle() {
        let (mut engine, _) = engine();
        assert_eq!(engine.state(), RecognitionState::Idle);

        engine.start().await.unwrap();
        assert_eq!(engine.state(), RecognitionState::Listening);

        engine.stop();
        assert_eq!(engine.state(), RecognitionState::Stopping);

        let end = event(&engine, RecognizerEvent::End);
        assert_eq!(engine.handle_event(end), Some(EngineEvent::Ended { requested: true }));
        assert_eq!(engine.state(), RecognitionState::Idle);
    }

    #[tokio::test]
    async fn test_start_while_listening_is_noop() {
        let (mut engine, backend) = engine();
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut engine, _) = engine();
        engine.stop();
        assert_eq!(engine.state(), RecognitionState::Idle);

        engine.start().await.unwrap();
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), RecognitionState::Stopping);
    }

    #[tokio::test]
    async fn test_denied_start_stays_idle() {
        let (mut engine, backend) = engine();
        backend.deny.store(true, Ordering::SeqCst);

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, Error::RecognitionUnavailable(_)));
        assert_eq!(engine.state(), RecognitionState::Idle);
    }

    #[tokio::test]
    async fn test_unrequested_end_reports_engine_stop() {
        let (mut engine, _) = engine();
        engine.start().await.unwrap();

        let end = event(&engine, RecognizerEvent::End);
        assert_eq!(engine.handle_event(end), Some(EngineEvent::Ended { requested: false }));
        assert_eq!(engine.state(), RecognitionState::Idle);
    }

    #[tokio::test]
    async fn test_only_final_results_are_emitted() {
        let (mut engine, _) = engine();
        engine.start().await.unwrap();

        let interim = event(&engine, RecognizerEvent::interim_text("ho"));
        assert_eq!(engine.handle_event(interim), None);

        let blank = event(&engine, RecognizerEvent::final_text("   "));
        assert_eq!(engine.handle_event(blank), None);

        let done = event(&engine, RecognizerEvent::final_text(" hola "));
        assert_eq!(
            engine.handle_event(done),
            Some(EngineEvent::Recognized("hola".to_string()))
        );
        assert_eq!(engine.state(), RecognitionState::Listening);
    }

    #[tokio::test]
    async fn test_fatal_error_forces_idle() {
        let (mut engine, backend) = engine();
        engine.start().await.unwrap();

        let denied = event(&engine, RecognizerEvent::Error(RecognizerErrorKind::NotAllowed));
        assert_eq!(
            engine.handle_event(denied),
            Some(EngineEvent::Unavailable(RecognizerErrorKind::NotAllowed))
        );
        assert_eq!(engine.state(), RecognitionState::Idle);
        assert_eq!(backend.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_fatal_error_keeps_state() {
        let (mut engine, _) = engine();
        engine.start().await.unwrap();

        let silence = event(&engine, RecognizerEvent::Error(RecognizerErrorKind::NoSpeech));
        assert_eq!(engine.handle_event(silence), None);
        assert_eq!(engine.state(), RecognitionState::Listening);
    }

    #[tokio::test]
    async fn test_configure_refused_while_listening() {
        let (mut engine, _) = engine();
        engine.start().await.unwrap();

        let err = engine.configure(Language::parse("en-US").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Recognition(_)));
        assert_eq!(engine.language().as_str(), "es-ES");
    }

    #[tokio::test]
    async fn test_configure_after_stop_rebuilds_and_drops_stale_events() {
        let (mut engine, backend) = engine();
        engine.start().await.unwrap();
        let stale = event(&engine, RecognizerEvent::final_text("old"));

        engine.stop();
        engine.configure(Language::parse("en-us").unwrap()).unwrap();

        assert_eq!(engine.state(), RecognitionState::Idle);
        assert_eq!(engine.language().as_str(), "en-US");
        assert_eq!(backend.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(
            *backend.languages.lock().unwrap(),
            vec!["es-ES".to_string(), "en-US".to_string()]
        );
        assert_eq!(engine.handle_event(stale), None);
    }

    #[tokio::test]
    async fn test_start_while_stopping_replaces_draining_capture() {
        let (mut engine, backend) = engine();
        engine.start().await.unwrap();
        engine.stop();
        assert_eq!(engine.state(), RecognitionState::Stopping);
        let late_text = event(&engine, RecognizerEvent::final_text("tarde"));
        let late_end = event(&engine, RecognizerEvent::End);

        engine.start().await.unwrap();

        assert_eq!(engine.state(), RecognitionState::Listening);
        assert_eq!(backend.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 2);

        // The old capture's acknowledgement must not end the new one
        assert_eq!(engine.handle_event(late_text), None);
        assert_eq!(engine.handle_event(late_end), None);
        assert_eq!(engine.state(), RecognitionState::Listening);
    }

    #[tokio::test]
    async fn test_rejected_stop_aborts_to_idle() {
        let (mut engine, backend) = engine();
        engine.start().await.unwrap();
        let late = event(&engine, RecognizerEvent::End);
        backend.fail_stop.store(true, Ordering::SeqCst);

        engine.stop();

        assert_eq!(engine.state(), RecognitionState::Idle);
        assert_eq!(backend.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.handle_event(late), None);

        // The next start builds a fresh handle
        backend.fail_stop.store(false, Ordering::SeqCst);
        engine.start().await.unwrap();
        assert_eq!(engine.state(), RecognitionState::Listening);
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }
}
