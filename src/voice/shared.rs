//! One microphone acquisition shared by several readers

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;

use super::capture::{MicrophoneSource, MicrophoneStream, PENDING_CAPACITY};
use crate::Result;

/// Hands out readers of a single device acquisition
///
/// The first `open` acquires the device and later ones join it; the device
/// is released when the last reader closes. Every reader sees the same
/// recent window. A reader's first `take` subscribes it to captured
/// samples, so readers that only look at the recent window buffer nothing.
pub struct SharedMicrophone {
    inner: Arc<dyn MicrophoneSource>,
    hub: tokio::sync::Mutex<Weak<Hub>>,
}

impl SharedMicrophone {
    #[must_use]
    pub fn new(inner: Arc<dyn MicrophoneSource>) -> Self {
        Self {
            inner,
            hub: tokio::sync::Mutex::new(Weak::new()),
        }
    }
}

#[async_trait]
impl MicrophoneSource for SharedMicrophone {
    async fn open(&self) -> Result<Box<dyn MicrophoneStream>> {
        // Held across the device open so concurrent callers join one acquisition
        let mut slot = self.hub.lock().await;

        if let Some(hub) = slot.upgrade()
            && let Some(id) = hub.join()
        {
            tracing::debug!(reader = id, "joined shared microphone");
            return Ok(Box::new(SharedStream::new(hub, id)));
        }

        let stream = self.inner.open().await?;
        let (hub, id) = Hub::with_reader(stream);
        *slot = Arc::downgrade(&hub);
        tracing::debug!(sample_rate = hub.sample_rate, "shared microphone acquired");
        Ok(Box::new(SharedStream::new(hub, id)))
    }
}

struct Hub {
    sample_rate: u32,
    state: Mutex<HubState>,
}

struct HubState {
    /// `None` once the last reader has released the device
    stream: Option<Box<dyn MicrophoneStream>>,
    /// Untaken samples per reader; `None` until the reader first takes
    readers: HashMap<u64, Option<VecDeque<f32>>>,
    next_id: u64,
}

impl Hub {
    fn with_reader(stream: Box<dyn MicrophoneStream>) -> (Arc<Self>, u64) {
        let hub = Self {
            sample_rate: stream.sample_rate(),
            state: Mutex::new(HubState {
                stream: Some(stream),
                readers: HashMap::from([(0, None)]),
                next_id: 1,
            }),
        };
        (Arc::new(hub), 0)
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register another reader, unless the device is already released
    fn join(&self) -> Option<u64> {
        let mut state = self.state();
        if state.stream.is_none() {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.readers.insert(id, None);
        Some(id)
    }

    fn recent(&self, len: usize) -> Vec<f32> {
        self.state()
            .stream
            .as_ref()
            .map(|stream| stream.recent(len))
            .unwrap_or_default()
    }

    fn failure(&self) -> Option<String> {
        self.state().stream.as_ref()?.failure()
    }

    fn take(&self, id: u64) -> Vec<f32> {
        let mut guard = self.state();
        let state = &mut *guard;

        let fresh = match state.stream.as_mut() {
            Some(stream) => stream.take(),
            None => Vec::new(),
        };
        for buffer in state.readers.values_mut().flatten() {
            extend_capped(buffer, &fresh);
        }

        let Some(slot) = state.readers.get_mut(&id) else {
            return Vec::new();
        };
        if let Some(buffer) = slot.as_mut() {
            return buffer.drain(..).collect();
        }
        *slot = Some(VecDeque::new());
        fresh
    }

    /// Unregister a reader; hands back the device if it was the last one
    fn leave(&self, id: u64) -> Option<Box<dyn MicrophoneStream>> {
        let mut state = self.state();
        state.readers.remove(&id);
        if state.readers.is_empty() {
            state.stream.take()
        } else {
            None
        }
    }
}

fn extend_capped(buffer: &mut VecDeque<f32>, samples: &[f32]) {
    buffer.extend(samples);
    let excess = buffer.len().saturating_sub(PENDING_CAPACITY);
    buffer.drain(..excess);
}

struct SharedStream {
    hub: Arc<Hub>,
    id: u64,
    closed: bool,
}

impl SharedStream {
    const fn new(hub: Arc<Hub>, id: u64) -> Self {
        Self {
            hub,
            id,
            closed: false,
        }
    }
}

impl MicrophoneStream for SharedStream {
    fn sample_rate(&self) -> u32 {
        self.hub.sample_rate
    }

    fn recent(&self, len: usize) -> Vec<f32> {
        self.hub.recent(len)
    }

    fn take(&mut self) -> Vec<f32> {
        self.hub.take(self.id)
    }

    fn failure(&self) -> Option<String> {
        self.hub.failure()
    }

    fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        if let Some(mut stream) = self.hub.leave(self.id) {
            stream.close()?;
            tracing::debug!("shared microphone released");
        }
        Ok(())
    }
}

impl Drop for SharedStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "microphone release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::Error;

    #[derive(Default)]
    struct Device {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        fail_open: AtomicBool,
        captured: Arc<Mutex<Vec<f32>>>,
    }

    impl Device {
        fn capture(&self, samples: &[f32]) {
            self.captured.lock().unwrap().extend_from_slice(samples);
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    struct DeviceStream {
        closes: Arc<AtomicUsize>,
        captured: Arc<Mutex<Vec<f32>>>,
    }

    #[async_trait]
    impl MicrophoneSource for Device {
        async fn open(&self) -> Result<Box<dyn MicrophoneStream>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(Error::Audio("permission denied".to_string()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(DeviceStream {
                closes: Arc::clone(&self.closes),
                captured: Arc::clone(&self.captured),
            }))
        }
    }

    impl MicrophoneStream for DeviceStream {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn recent(&self, len: usize) -> Vec<f32> {
            vec![0.25; len]
        }

        fn take(&mut self) -> Vec<f32> {
            std::mem::take(&mut *self.captured.lock().unwrap())
        }

        fn failure(&self) -> Option<String> {
            None
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn shared() -> (SharedMicrophone, Arc<Device>) {
        let device = Arc::new(Device::default());
        let shared = SharedMicrophone::new(Arc::clone(&device) as Arc<dyn MicrophoneSource>);
        (shared, device)
    }

    #[tokio::test]
    async fn test_readers_share_one_acquisition() {
        let (shared, device) = shared();

        let mut sampler = shared.open().await.unwrap();
        let mut recognizer = shared.open().await.unwrap();
        assert_eq!(device.opens(), 1);
        assert_eq!(sampler.sample_rate(), 16000);
        assert_eq!(recognizer.recent(4), vec![0.25; 4]);

        sampler.close().unwrap();
        assert_eq!(device.closes(), 0);
        recognizer.close().unwrap();
        recognizer.close().unwrap();
        assert_eq!(device.closes(), 1);

        // Released device is acquired afresh
        let _again = shared.open().await.unwrap();
        assert_eq!(device.opens(), 2);
    }

    #[tokio::test]
    async fn test_dropped_reader_releases() {
        let (shared, device) = shared();

        drop(shared.open().await.unwrap());
        assert_eq!(device.closes(), 1);
    }

    #[tokio::test]
    async fn test_every_taking_reader_sees_all_samples() {
        let (shared, device) = shared();
        let mut first = shared.open().await.unwrap();
        let mut second = shared.open().await.unwrap();
        assert!(first.take().is_empty());
        assert!(second.take().is_empty());

        device.capture(&[1.0, 2.0, 3.0]);
        assert_eq!(first.take(), vec![1.0, 2.0, 3.0]);
        device.capture(&[4.0]);
        assert_eq!(second.take(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(first.take(), vec![4.0]);
        assert!(second.take().is_empty());
    }

    #[tokio::test]
    async fn test_window_only_reader_buffers_nothing() {
        let (shared, device) = shared();
        let window = shared.open().await.unwrap();
        let mut taker = shared.open().await.unwrap();

        for _ in 0..10 {
            device.capture(&[0.5; 1600]);
            assert_eq!(taker.take().len(), 1600);
            assert_eq!(window.recent(8).len(), 8);
        }

        let hub = shared.hub.lock().await.upgrade().unwrap();
        let state = hub.state();
        assert_eq!(state.readers.len(), 2);
        assert_eq!(state.readers.values().flatten().count(), 1);
        assert!(state.readers.values().flatten().all(VecDeque::is_empty));
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let (shared, device) = shared();
        device.fail_open.store(true, Ordering::SeqCst);
        assert!(shared.open().await.is_err());

        device.fail_open.store(false, Ordering::SeqCst);
        let _stream = shared.open().await.unwrap();
        assert_eq!(device.opens(), 1);
    }

    #[test]
    fn test_reader_backlog_is_capped() {
        let mut buffer = VecDeque::new();
        extend_capped(&mut buffer, &vec![0.0; PENDING_CAPACITY]);
        extend_capped(&mut buffer, &[1.0, 2.0]);

        assert_eq!(buffer.len(), PENDING_CAPACITY);
        assert_eq!(buffer.back().copied(), Some(2.0));
    }
}
