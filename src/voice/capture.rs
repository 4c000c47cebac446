//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Preferred sample rate for capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How many of the most recent samples stay available for analysis
const RECENT_CAPACITY: usize = 8192;

/// Untaken samples kept for `take`; older ones are dropped past this
pub(crate) const PENDING_CAPACITY: usize = SAMPLE_RATE as usize * 60;

/// Grants exclusive microphone streams
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Acquire the microphone; suspends until the device is granted
    ///
    /// # Errors
    ///
    /// Returns error if no device is available or access is denied
    async fn open(&self) -> Result<Box<dyn MicrophoneStream>>;
}

/// A live microphone acquisition
pub trait MicrophoneStream: Send {
    /// Actual capture rate of the samples
    fn sample_rate(&self) -> u32;

    /// Up to `len` of the most recent mono samples, oldest first
    fn recent(&self, len: usize) -> Vec<f32>;

    /// Samples captured since the previous call
    fn take(&mut self) -> Vec<f32>;

    /// Device-level failure reported since opening, if any
    fn failure(&self) -> Option<String>;

    /// Release the device. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceCleanup` if the device could not be released cleanly
    fn close(&mut self) -> Result<()>;
}

#[derive(Default)]
struct SampleBuffer {
    pending: VecDeque<f32>,
    recent: VecDeque<f32>,
    dropped: usize,
    failure: Option<String>,
}

impl SampleBuffer {
    fn push(&mut self, sample: f32) {
        if self.pending.len() == PENDING_CAPACITY {
            self.pending.pop_front();
            self.dropped += 1;
        }
        self.pending.push_back(sample);
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(sample);
    }

    fn take(&mut self) -> Vec<f32> {
        if self.dropped > 0 {
            tracing::warn!(dropped = self.dropped, "capture overran its pending buffer");
            self.dropped = 0;
        }
        self.pending.drain(..).collect()
    }
}

/// The default input device via cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn MicrophoneStream>> {
        let buffer = Arc::new(Mutex::new(SampleBuffer::default()));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // cpal streams aren't Send, so the stream lives on its own thread
        let thread_buffer = Arc::clone(&buffer);
        let thread = std::thread::Builder::new()
            .name("talkback-mic".to_string())
            .spawn(move || {
                let (stream, sample_rate) = match open_input_stream(thread_buffer) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));
                // Blocks until close() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.await {
            Ok(Ok(sample_rate)) => {
                tracing::debug!(sample_rate, "audio capture started");
                Ok(Box::new(CpalStream {
                    buffer,
                    sample_rate,
                    stop: Some(stop_tx),
                    thread: Some(thread),
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(Error::Audio("capture thread exited before opening".to_string())),
        }
    }
}

/// Build and start an input stream on the current thread
fn open_input_stream(buffer: Arc<Mutex<SampleBuffer>>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

    // Fallback: whatever the device prefers, downmixed to mono
    let supported = match preferred {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };

    let format = supported.sample_format();
    let config = supported.config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?format,
        "audio capture initialized"
    );

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, buffer)?,
        other => {
            return Err(Error::Audio(format!("unsupported sample format {other:?}")));
        }
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<SampleBuffer>>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let error_buffer = Arc::clone(&buffer);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    for frame in data.chunks(channels) {
                        #[allow(clippy::cast_precision_loss)]
                        let mono = frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>()
                            / frame.len() as f32;
                        buf.push(mono);
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                if let Ok(mut buf) = error_buffer.lock() {
                    buf.failure = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

struct CpalStream {
    buffer: Arc<Mutex<SampleBuffer>>,
    sample_rate: u32,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn recent(&self, len: usize) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| {
                let skip = buf.recent.len().saturating_sub(len);
                buf.recent.iter().skip(skip).copied().collect()
            })
            .unwrap_or_default()
    }

    fn take(&mut self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| buf.take())
            .unwrap_or_default()
    }

    fn failure(&self) -> Option<String> {
        self.buffer.lock().ok().and_then(|buf| buf.failure.clone())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Error::DeviceCleanup("capture thread panicked".to_string()))?;
            tracing::debug!("audio capture stopped");
        }
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "microphone release failed");
        }
    }
}

/// Close `stream` on the blocking pool, since closing may join a device thread
pub(crate) async fn release(mut stream: Box<dyn MicrophoneStream>) {
    match tokio::task::spawn_blocking(move || stream.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to release microphone"),
        Err(e) => tracing::warn!(error = %e, "microphone release task failed"),
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
