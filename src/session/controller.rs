//! Session orchestration
//!
//! Recognition events and reply delivery run on two background tasks:
//!
//! ```text
//! recognizer ──TaggedEvent──► recognition pump ──► chat (user) ──┐
//!                                                                │ request future
//!                                     reply pump ◄───────────────┘
//!                                   (FuturesOrdered)
//!                                          │
//!                                          ▼
//!                               chat (assistant) ──► synthesis
//! ```
//!
//! Replies are delivered in the order their requests were issued, whatever
//! order the network completes them in.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;

use super::{Intent, Language, Notice, Session, SessionId, SessionStatus, SessionView, Volume};
use crate::Result;
use crate::chat::{ChatLog, Role};
use crate::config::Config;
use crate::response::{HttpResponseGenerator, Reply, ResponseClient, ResponseGenerator};
use crate::voice::{
    AnalyzerConfig, AudioQualitySampler, CpalMicrophone, EngineEvent, FrameSource,
    HttpSpeechOutput, MicrophoneSource, RecognitionEngine, RecognitionState, RefreshClock,
    SharedMicrophone, SpeechOutput, SpeechRecognizer, SpeechSynthesisPlayer, TaggedEvent,
    TranscribingRecognizer,
};

/// Starting values for a new session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub language: Language,
    /// Languages the user may switch to; empty allows any valid tag
    pub languages: Vec<Language>,
    pub voice_enabled: bool,
    pub volume: Volume,
    pub analyzer: AnalyzerConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            language: Language::default(),
            languages: Vec::new(),
            voice_enabled: true,
            volume: Volume::MAX,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

/// Platform services injected into a controller
#[derive(Clone)]
pub struct Capabilities {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub frames: Arc<dyn FrameSource>,
    pub speech: Arc<dyn SpeechOutput>,
    pub responder: Arc<dyn ResponseGenerator>,
}

impl Capabilities {
    /// Default audio devices, cloud STT/TTS and the HTTP response service
    ///
    /// Missing STT or TTS keys are not fatal: recognition then reports
    /// itself unavailable and synthesis fails per utterance. Recognition and
    /// quality sampling read one shared device acquisition.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn system(config: &Config) -> Result<Self> {
        let microphone: Arc<dyn MicrophoneSource> =
            Arc::new(SharedMicrophone::new(Arc::new(CpalMicrophone::new())));

        let stt = config.speech_to_text();
        if stt.is_none() {
            tracing::warn!(
                provider = ?config.voice.stt_provider,
                "no speech-to-text API key, voice input unavailable"
            );
        }

        let tts = config.text_to_speech();
        if tts.is_none() {
            tracing::warn!(
                provider = ?config.voice.tts_provider,
                "no text-to-speech API key, replies will not be spoken"
            );
        }

        let recognizer = TranscribingRecognizer::new(
            Arc::clone(&microphone),
            stt,
            config.audio.segmenter,
            config.audio.idle_timeout,
        );

        let responder =
            HttpResponseGenerator::new(&config.service.base_url, config.service.timeout)?;

        Ok(Self {
            recognizer: Arc::new(recognizer),
            microphone,
            frames: Arc::new(RefreshClock::new(config.audio.frame_rate)),
            speech: Arc::new(HttpSpeechOutput::new(tts)),
            responder: Arc::new(responder),
        })
    }
}

type PendingReply = BoxFuture<'static, Reply>;

/// Components that follow the listening lifecycle together
struct Capture {
    engine: RecognitionEngine,
    sampler: AudioQualitySampler,
}

struct Inner {
    session: RwLock<Session>,
    languages: Vec<Language>,
    capture: Mutex<Capture>,
    player: Mutex<SpeechSynthesisPlayer>,
    chat: Mutex<ChatLog>,
    responses: ResponseClient,
    replies: mpsc::UnboundedSender<PendingReply>,
    active: watch::Sender<bool>,
    status: watch::Sender<SessionStatus>,
    quality: watch::Receiver<f32>,
}

/// Orchestrates one voice interaction session
///
/// All intents are safe to issue in any order and any number of times.
/// Dropping the controller tears down capture and background tasks.
pub struct SessionController {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionController {
    /// Create a session and bind recognition to its language
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(settings: SessionSettings, capabilities: Capabilities) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        let session = Session::new(
            settings.language.clone(),
            settings.voice_enabled,
            settings.volume,
        );

        let mut engine = RecognitionEngine::new(
            capabilities.recognizer,
            settings.language.clone(),
            events_tx,
        );
        if let Err(e) = engine.configure(settings.language.clone()) {
            tracing::warn!(error = %e, "recognition not configured, will retry on start");
        }

        let sampler = AudioQualitySampler::new(
            capabilities.microphone,
            capabilities.frames,
            settings.analyzer,
        );
        let quality = sampler.subscribe();

        let player = SpeechSynthesisPlayer::new(
            capabilities.speech,
            settings.voice_enabled,
            settings.volume,
        );

        let (active, _) = watch::channel(false);
        let (status, _) = watch::channel(SessionStatus::new(
            settings.language,
            settings.voice_enabled,
            settings.volume,
        ));

        tracing::info!(
            session = %session.id(),
            language = %session.language,
            voice_enabled = session.voice_enabled,
            "session created"
        );

        let inner = Arc::new(Inner {
            session: RwLock::new(session),
            languages: settings.languages,
            capture: Mutex::new(Capture { engine, sampler }),
            player: Mutex::new(player),
            chat: Mutex::new(ChatLog::new()),
            responses: ResponseClient::new(capabilities.responder),
            replies: replies_tx,
            active,
            status,
            quality,
        });

        let tasks = vec![
            tokio::spawn(pump_recognition(Arc::clone(&inner), events_rx)),
            tokio::spawn(pump_replies(Arc::clone(&inner), replies_rx)),
        ];

        Self { inner, tasks }
    }

    /// Apply a user intent
    pub async fn dispatch(&self, intent: Intent) {
        tracing::debug!(?intent, "intent");
        match intent {
            Intent::PressStart => self.press_start().await,
            Intent::PressEnd => self.press_end().await,
            Intent::ToggleVoice => self.toggle_voice().await,
            Intent::SelectLanguage(tag) => self.select_language(&tag).await,
            Intent::SetVolume(volume) => self.set_volume(volume).await,
        }
    }

    /// Begin listening
    ///
    /// Sampling starts and the session turns active only once recognition
    /// has actually started. A refusal leaves the session inactive and
    /// raises a notice.
    pub async fn press_start(&self) {
        let mut capture = self.inner.capture.lock().await;
        if capture.engine.state() == RecognitionState::Listening {
            tracing::trace!("already listening");
            return;
        }

        if let Err(e) = capture.engine.start().await {
            tracing::warn!(error = %e, "voice recognition unavailable");
            self.inner.set_active(false);
            self.inner.publish(|status| {
                status.notice = Some(Notice::RecognitionUnavailable(e.to_string()));
            });
            return;
        }

        self.inner.set_active(true);

        let listening = self.inner.active.subscribe();
        if let Err(e) = capture.sampler.start(listening).await {
            tracing::warn!(error = %e, "audio quality sampling unavailable");
        }
    }

    /// Stop listening
    pub async fn press_end(&self) {
        let mut capture = self.inner.capture.lock().await;
        self.inner.deactivate(&mut capture).await;
    }

    /// Flip spoken replies on or off; turning off silences playback
    pub async fn toggle_voice(&self) {
        let enabled = {
            let mut session = self.inner.session.write().await;
            session.voice_enabled = !session.voice_enabled;
            session.voice_enabled
        };

        self.inner.player.lock().await.set_enabled(enabled);
        self.inner.publish(|status| status.voice_enabled = enabled);
        tracing::info!(enabled, "voice output toggled");
    }

    /// Switch recognition and synthesis to another language
    ///
    /// Listening always stops first. Tags that fail to parse or are not
    /// offered leave everything unchanged and raise a notice.
    pub async fn select_language(&self, tag: &str) {
        let language = match Language::parse(tag) {
            Ok(language) if self.inner.is_offered(&language) => language,
            _ => {
                tracing::warn!(tag, "unsupported language");
                self.inner.publish(|status| {
                    status.notice = Some(Notice::UnsupportedLanguage(tag.to_string()));
                });
                return;
            }
        };

        let mut capture = self.inner.capture.lock().await;
        self.inner.deactivate(&mut capture).await;

        if let Err(e) = capture.engine.configure(language.clone()) {
            tracing::warn!(error = %e, %language, "recognition not reconfigured, will retry on start");
        }
        drop(capture);

        tracing::info!(%language, "language changed");
        self.inner.session.write().await.language = language.clone();
        self.inner.publish(|status| {
            status.selected_language = language;
            status.notice = None;
        });
    }

    /// Set output volume in percent; out-of-range values are clamped
    pub async fn set_volume(&self, percent: f64) {
        let volume = Volume::from_percent(percent);
        self.inner.session.write().await.volume = volume;
        self.inner.player.lock().await.set_volume(volume);
        self.inner.publish(|status| status.volume = volume);
    }

    /// Observe status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Observe the live audio quality in [0, 1]
    #[must_use]
    pub fn audio_quality(&self) -> watch::Receiver<f32> {
        self.inner.quality.clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub async fn session_id(&self) -> SessionId {
        self.inner.session.read().await.id().clone()
    }

    pub async fn recognition_state(&self) -> RecognitionState {
        self.inner.capture.lock().await.engine.state()
    }

    /// Everything the presentation layer renders, at this instant
    pub async fn snapshot(&self) -> SessionView {
        let session_id = self.session_id().await;
        let chat = self.inner.chat.lock().await.messages().to_vec();

        SessionView {
            session_id,
            status: self.status(),
            chat,
            audio_quality: *self.inner.quality.borrow(),
        }
    }

    /// Stop capture and playback and end background processing
    ///
    /// Replies still in flight are discarded.
    pub async fn shutdown(&mut self) {
        {
            let mut capture = self.inner.capture.lock().await;
            self.inner.deactivate(&mut capture).await;
            capture.engine.abort();
        }
        self.inner.player.lock().await.cancel();

        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("session shut down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Inner {
    fn publish(&self, update: impl FnOnce(&mut SessionStatus)) {
        self.status.send_modify(|status| {
            update(status);
            status.revision += 1;
        });
    }

    fn set_active(&self, active: bool) {
        if self.active.send_replace(active) == active {
            return;
        }
        self.publish(|status| {
            status.is_active = active;
            if active {
                status.notice = None;
            }
        });
    }

    fn is_offered(&self, language: &Language) -> bool {
        self.languages.is_empty() || self.languages.contains(language)
    }

    /// Attempt a stop, then unconditionally go inactive and stop sampling
    async fn deactivate(&self, capture: &mut Capture) {
        capture.engine.stop();
        self.set_active(false);
        capture.sampler.stop().await;
    }

    async fn on_recognized(&self, transcript: String) {
        let session_id = self.session.read().await.id().clone();

        self.chat.lock().await.append(Role::User, transcript.clone());
        self.publish(|status| status.last_transcript = Some(transcript.clone()));
        tracing::info!(session = %session_id, %transcript, "utterance recognized");

        let responses = self.responses.clone();
        let request: PendingReply = Box::pin(async move {
            responses.generate_response(&transcript, &session_id).await
        });

        if self.replies.send(request).is_err() {
            tracing::error!("reply queue closed, dropping request");
        }
    }

    async fn deliver(&self, reply: Reply) {
        let text = reply.text().to_string();

        self.chat.lock().await.append(Role::Assistant, text.clone());
        self.publish(|status| status.last_response = Some(text.clone()));

        let language = self.session.read().await.language.clone();
        let spoken = self.player.lock().await.speak(&text, &language);
        tracing::debug!(fallback = reply.is_fallback(), spoken, "reply delivered");
    }
}

/// Feed recognizer events through the engine and react to what it reports
async fn pump_recognition(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<TaggedEvent>) {
    while let Some(tagged) = events.recv().await {
        let mut capture = inner.capture.lock().await;
        let outcome = capture.engine.handle_event(tagged);

        match outcome {
            Some(EngineEvent::Recognized(text)) => {
                drop(capture);
                inner.on_recognized(text).await;
            }
            Some(EngineEvent::Ended { requested: false }) => {
                inner.deactivate(&mut capture).await;
            }
            Some(EngineEvent::Unavailable(kind)) => {
                inner.deactivate(&mut capture).await;
                inner.publish(|status| {
                    status.notice = Some(Notice::RecognitionUnavailable(kind.to_string()));
                });
            }
            Some(EngineEvent::Ended { requested: true }) | None => {}
        }
    }
}

/// Deliver replies in request order as they complete
async fn pump_replies(inner: Arc<Inner>, mut requests: mpsc::UnboundedReceiver<PendingReply>) {
    let mut in_flight = FuturesOrdered::new();

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => in_flight.push_back(request),
                None => break,
            },
            Some(reply) = in_flight.next(), if !in_flight.is_empty() => {
                inner.deliver(reply).await;
            }
        }
    }

    while let Some(reply) = in_flight.next().await {
        inner.deliver(reply).await;
    }
}
