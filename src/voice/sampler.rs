//! Live microphone quality sampling

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::analyzer::{AnalyzerConfig, SpectrumAnalyzer};
use super::capture::{MicrophoneSource, MicrophoneStream, release};
use super::frames::{FrameClock, FrameSource};
use crate::Result;

struct SamplingRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Estimates microphone signal strength once per frame while listening
///
/// The loop checks the listening flag on every frame and exits on its own
/// once it turns false, so a late or failed `stop` never leaves it running.
pub struct AudioQualitySampler {
    microphone: Arc<dyn MicrophoneSource>,
    frames: Arc<dyn FrameSource>,
    config: AnalyzerConfig,
    quality: Arc<watch::Sender<f32>>,
    run: Option<SamplingRun>,
}

impl AudioQualitySampler {
    #[must_use]
    pub fn new(
        microphone: Arc<dyn MicrophoneSource>,
        frames: Arc<dyn FrameSource>,
        config: AnalyzerConfig,
    ) -> Self {
        let (quality, _) = watch::channel(0.0);
        Self {
            microphone,
            frames,
            config,
            quality: Arc::new(quality),
            run: None,
        }
    }

    /// Observe the latest quality value in [0, 1]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.quality.subscribe()
    }

    /// Latest quality value in [0, 1]
    #[must_use]
    pub fn current(&self) -> f32 {
        *self.quality.borrow()
    }

    /// Whether a sampling loop currently holds the microphone
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.task.is_finished())
    }

    /// Acquire the microphone and begin sampling until `listening` turns false
    ///
    /// Calling this while a loop is running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be acquired
    pub async fn start(&mut self, listening: watch::Receiver<bool>) -> Result<()> {
        if self.is_running() {
            tracing::debug!("audio quality sampling already running");
            return Ok(());
        }

        // A loop that exited on its own still has to be reaped
        self.stop().await;

        let stream = self.microphone.open().await?;
        let analyzer = SpectrumAnalyzer::new(self.config);
        let clock = self.frames.frames();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_sampling(
            stream,
            analyzer,
            clock,
            listening,
            Arc::clone(&self.quality),
            cancel.clone(),
        ));

        self.run = Some(SamplingRun { cancel, task });
        tracing::debug!("audio quality sampling started");
        Ok(())
    }

    /// Stop sampling, release the microphone and reset quality to 0
    ///
    /// Idempotent; safe when never started. Release failures are logged.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
            if let Err(e) = run.task.await {
                tracing::warn!(error = %e, "audio quality sampling task failed");
            }
        }
        self.quality.send_replace(0.0);
    }
}

async fn run_sampling(
    stream: Box<dyn MicrophoneStream>,
    mut analyzer: SpectrumAnalyzer,
    mut clock: Box<dyn FrameClock>,
    listening: watch::Receiver<bool>,
    quality: Arc<watch::Sender<f32>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            more = clock.next_frame() => {
                if !more {
                    break;
                }
            }
        }

        if !*listening.borrow() {
            tracing::trace!("no longer listening, sampling loop exiting");
            break;
        }

        let samples = stream.recent(analyzer.fft_size());
        quality.send_replace(analyzer.quality(&samples));
    }

    quality.send_replace(0.0);
    release(stream).await;
}
