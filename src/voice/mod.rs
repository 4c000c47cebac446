//! Voice processing module
//!
//! Handles microphone capture, continuous recognition, signal quality
//! sampling, and spoken playback of replies. STT and TTS go to cloud
//! providers over HTTP.

mod analyzer;
mod capture;
mod frames;
mod playback;
mod recognition;
mod sampler;
mod segmenter;
mod shared;
mod stt;
mod synthesis;
mod transcriber;
mod tts;

pub use analyzer::{AnalyzerConfig, SpectrumAnalyzer};
pub use capture::{CpalMicrophone, MicrophoneSource, MicrophoneStream, SAMPLE_RATE, samples_to_wav};
pub use frames::{FrameClock, FrameSource, RefreshClock, VsyncFrames};
pub use playback::{AudioPlayback, DecodedAudio, PlaybackEnd, apply_gain, decode_mp3};
pub use recognition::{
    EngineEvent, RecognitionEngine, RecognitionHandle, RecognitionState, RecognizerErrorKind,
    RecognizerEvent, SpeechRecognizer, Subscription, TaggedEvent,
};
pub use sampler::AudioQualitySampler;
pub use segmenter::{SegmenterConfig, SegmenterState, UtteranceSegmenter, calculate_energy};
pub use shared::SharedMicrophone;
pub use stt::{SpeechToText, SttProvider};
pub use synthesis::{
    HttpSpeechOutput, SpeechOutput, SpeechSynthesisPlayer, SynthesisRequest, UtteranceOutcome,
};
pub use transcriber::TranscribingRecognizer;
pub use tts::{TextToSpeech, TtsProvider};
