//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, recognizer, speech output and
//! response service, so sessions run without audio hardware or network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use talkback::voice::{
    MicrophoneSource, MicrophoneStream, RecognitionHandle, RecognizerEvent, SpeechOutput,
    SpeechRecognizer, SynthesisRequest, UtteranceOutcome, VsyncFrames,
};
use talkback::{
    Capabilities, Error, Language, ResponseGenerator, Result, SessionController, SessionId,
    SessionSettings,
};

/// Poll `check` until it holds, panicking after two seconds
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecognizerShared {
    deny: bool,
    fail_stop: bool,
    languages: Vec<String>,
    handles: Vec<mpsc::UnboundedSender<RecognizerEvent>>,
    starts: usize,
    stops: usize,
    aborts: usize,
}

/// Recognizer driven by the test: events are pushed with [`FakeRecognizer::emit`]
#[derive(Clone, Default)]
pub struct FakeRecognizer {
    shared: Arc<Mutex<RecognizerShared>>,
}

impl FakeRecognizer {
    /// Refuse every subsequent `start` as if permission were denied
    pub fn deny(&self, deny: bool) {
        self.shared.lock().unwrap().deny = deny;
    }

    /// Reject every subsequent `stop` as if the engine were in a bad state
    pub fn fail_stop(&self, fail: bool) {
        self.shared.lock().unwrap().fail_stop = fail;
    }

    /// Send an event from the most recently created handle
    pub fn emit(&self, event: RecognizerEvent) {
        let shared = self.shared.lock().unwrap();
        let handle = shared.handles.last().expect("no recognition handle created");
        let _ = handle.send(event);
    }

    /// Send an event from the handle created `index`-th
    pub fn emit_on(&self, index: usize, event: RecognizerEvent) {
        let shared = self.shared.lock().unwrap();
        let _ = shared.handles[index].send(event);
    }

    pub fn say(&self, text: &str) {
        self.emit(RecognizerEvent::final_text(text));
    }

    pub fn end(&self) {
        self.emit(RecognizerEvent::End);
    }

    /// Languages handles were created for, in order
    pub fn languages(&self) -> Vec<String> {
        self.shared.lock().unwrap().languages.clone()
    }

    pub fn starts(&self) -> usize {
        self.shared.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.shared.lock().unwrap().stops
    }

    pub fn aborts(&self) -> usize {
        self.shared.lock().unwrap().aborts
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn create(&self, language: &Language) -> Result<Box<dyn RecognitionHandle>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock().unwrap();
        shared.languages.push(language.to_string());
        shared.handles.push(tx.clone());

        Ok(Box::new(FakeHandle {
            shared: Arc::clone(&self.shared),
            tx,
            rx: Some(rx),
        }))
    }
}

struct FakeHandle {
    shared: Arc<Mutex<RecognizerShared>>,
    tx: mpsc::UnboundedSender<RecognizerEvent>,
    rx: Option<mpsc::UnboundedReceiver<RecognizerEvent>>,
}

#[async_trait]
impl RecognitionHandle for FakeHandle {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RecognizerEvent>> {
        self.rx.take()
    }

    async fn start(&mut self) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.deny {
            return Err(Error::RecognitionUnavailable("permission denied".to_string()));
        }
        shared.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.stops += 1;
        if shared.fail_stop {
            return Err(Error::Recognition("recognition has not started".to_string()));
        }
        drop(shared);
        // The device acknowledges asynchronously
        let _ = self.tx.send(RecognizerEvent::End);
        Ok(())
    }

    fn abort(&mut self) {
        self.shared.lock().unwrap().aborts += 1;
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Microphone producing a steady tone, counting acquisitions
#[derive(Default)]
pub struct FakeMicrophone {
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub fail_open: AtomicBool,
    /// Samples handed out by `take`, queued by the test
    pub pending: Arc<Mutex<Vec<f32>>>,
    /// Device failure reported by every open stream
    pub failure: Arc<Mutex<Option<String>>>,
}

impl FakeMicrophone {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn push_samples(&self, samples: &[f32]) {
        self.pending.lock().unwrap().extend_from_slice(samples);
    }

    pub fn fail_device(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl MicrophoneSource for FakeMicrophone {
    async fn open(&self) -> Result<Box<dyn MicrophoneStream>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Audio("no input device available".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            closes: Arc::clone(&self.closes),
            pending: Arc::clone(&self.pending),
            failure: Arc::clone(&self.failure),
            closed: false,
        }))
    }
}

struct FakeStream {
    closes: Arc<AtomicUsize>,
    pending: Arc<Mutex<Vec<f32>>>,
    failure: Arc<Mutex<Option<String>>>,
    closed: bool,
}

impl MicrophoneStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn recent(&self, len: usize) -> Vec<f32> {
        #[allow(clippy::cast_precision_loss)]
        (0..len).map(|i| 0.5 * (i as f32 * 0.2).sin()).collect()
    }

    fn take(&mut self) -> Vec<f32> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap().clone()
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Speech output
// ---------------------------------------------------------------------------

/// Speech output that records every call
#[derive(Default)]
pub struct RecordingSpeech {
    log: Mutex<Vec<String>>,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl RecordingSpeech {
    /// `cancel` and `speak:<text>` entries in call order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.text).collect()
    }

    pub fn cancels(&self) -> usize {
        self.log().iter().filter(|entry| *entry == "cancel").count()
    }
}

impl SpeechOutput for RecordingSpeech {
    fn speak(&self, request: SynthesisRequest) -> oneshot::Receiver<UtteranceOutcome> {
        self.log.lock().unwrap().push(format!("speak:{}", request.text));
        self.requests.lock().unwrap().push(request);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(UtteranceOutcome::Completed);
        rx
    }

    fn cancel_all(&self) {
        self.log.lock().unwrap().push("cancel".to_string());
    }
}

// ---------------------------------------------------------------------------
// Response service
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Gate {
    tx: Option<oneshot::Sender<Result<String>>>,
    rx: Option<oneshot::Receiver<Result<String>>>,
}

impl Gate {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

/// Response service whose replies are released by the test, per transcript
#[derive(Default)]
pub struct GatedResponder {
    gates: Mutex<HashMap<String, Gate>>,
    calls: Mutex<Vec<(String, SessionId)>>,
}

impl GatedResponder {
    /// Let the request for `transcript` complete with `reply`
    ///
    /// May be called before the request is made.
    pub fn release(&self, transcript: &str, reply: Result<String>) {
        let tx = self
            .gates
            .lock()
            .unwrap()
            .entry(transcript.to_string())
            .or_insert_with(Gate::new)
            .tx
            .take()
            .expect("gate released twice");
        let _ = tx.send(reply);
    }

    pub fn reply(&self, transcript: &str, text: &str) {
        self.release(transcript, Ok(text.to_string()));
    }

    pub fn fail(&self, transcript: &str) {
        self.release(
            transcript,
            Err(Error::Response("service error 500".to_string())),
        );
    }

    /// Transcripts requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }
}

#[async_trait]
impl ResponseGenerator for GatedResponder {
    async fn generate(&self, transcript: &str, session_id: &SessionId) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((transcript.to_string(), session_id.clone()));

        let rx = self
            .gates
            .lock()
            .unwrap()
            .entry(transcript.to_string())
            .or_insert_with(Gate::new)
            .rx
            .take()
            .expect("transcript requested twice");

        rx.await
            .unwrap_or_else(|_| Err(Error::Response("gate dropped".to_string())))
    }
}

// ---------------------------------------------------------------------------
// Session harness
// ---------------------------------------------------------------------------

/// A controller wired to fakes, plus handles to drive and inspect them
pub struct Harness {
    pub controller: SessionController,
    pub recognizer: FakeRecognizer,
    pub microphone: Arc<FakeMicrophone>,
    pub frames: VsyncFrames,
    pub speech: Arc<RecordingSpeech>,
    pub responder: Arc<GatedResponder>,
}

impl Harness {
    pub fn new(settings: SessionSettings) -> Self {
        let recognizer = FakeRecognizer::default();
        let microphone = Arc::new(FakeMicrophone::default());
        let frames = VsyncFrames::new();
        let speech = Arc::new(RecordingSpeech::default());
        let responder = Arc::new(GatedResponder::default());

        let capabilities = Capabilities {
            recognizer: Arc::new(recognizer.clone()),
            microphone: Arc::clone(&microphone) as Arc<dyn MicrophoneSource>,
            frames: Arc::new(frames.clone()),
            speech: Arc::clone(&speech) as Arc<dyn SpeechOutput>,
            responder: Arc::clone(&responder) as Arc<dyn ResponseGenerator>,
        };

        Self {
            controller: SessionController::new(settings, capabilities),
            recognizer,
            microphone,
            frames,
            speech,
            responder,
        }
    }

    /// Chat contents in chronological order
    pub async fn chat(&self) -> Vec<String> {
        self.controller
            .snapshot()
            .await
            .chat
            .iter()
            .map(|m| m.content().to_string())
            .collect()
    }

    pub async fn wait_for_chat_len(&self, len: usize) {
        let controller = &self.controller;
        wait_for(&format!("{len} chat messages"), || async move {
            controller.snapshot().await.chat.len() >= len
        })
        .await;
    }

    pub async fn wait_for_calls(&self, count: usize) {
        let responder = &self.responder;
        wait_for(&format!("{count} response requests"), || async move {
            responder.calls().len() >= count
        })
        .await;
    }
}
