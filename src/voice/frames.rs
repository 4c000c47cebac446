//! Frame cadence for display-synchronized sampling
//!
//! The sampler does one unit of work per rendered frame. A renderer that
//! knows its refresh signal drives [`VsyncFrames`]; headless front ends use
//! [`RefreshClock`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

/// Hands out frame clocks, one per sampling run
pub trait FrameSource: Send + Sync {
    fn frames(&self) -> Box<dyn FrameClock>;
}

/// A sequence of frame boundaries
#[async_trait]
pub trait FrameClock: Send {
    /// Wait for the next frame. Returns `false` once the source is gone.
    async fn next_frame(&mut self) -> bool;
}

/// Fixed refresh rate clock that skips missed frames instead of bursting
#[derive(Debug, Clone, Copy)]
pub struct RefreshClock {
    period: Duration,
}

impl RefreshClock {
    /// Clock at `fps` frames per second (at least 1)
    #[must_use]
    pub fn new(fps: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / fps.max(1),
        }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl FrameSource for RefreshClock {
    fn frames(&self) -> Box<dyn FrameClock> {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Box::new(IntervalFrames { interval })
    }
}

struct IntervalFrames {
    interval: Interval,
}

#[async_trait]
impl FrameClock for IntervalFrames {
    async fn next_frame(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Frames signalled by the renderer
///
/// Frames that arrive while a sampler is still busy coalesce into one.
#[derive(Clone)]
pub struct VsyncFrames {
    tx: Arc<watch::Sender<u64>>,
}

impl VsyncFrames {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Signal that a frame was presented
    pub fn tick(&self) {
        self.tx.send_modify(|frame| *frame = frame.wrapping_add(1));
    }
}

impl Default for VsyncFrames {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for VsyncFrames {
    fn frames(&self) -> Box<dyn FrameClock> {
        Box::new(SignalledFrames {
            rx: self.tx.subscribe(),
        })
    }
}

struct SignalledFrames {
    rx: watch::Receiver<u64>,
}

#[async_trait]
impl FrameClock for SignalledFrames {
    async fn next_frame(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
