use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;

use crate::SegmentId;

/// A composited frame ready for display.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub segment: SegmentId,
    pub timestamp_us: i64,
    pub image: RgbaImage,
}

/// Display surface of the engine.
pub trait Presenter: Send {
    fn present(&mut self, frame: PresentedFrame);
    fn clear(&mut self);
}

#[derive(Debug, Clone)]
pub enum PreviewEvent {
    Frame(PresentedFrame),
    Cleared,
}

/// Forwards presented frames over a channel. Sends to a dropped receiver are
/// ignored.
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: Sender<PreviewEvent>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, Receiver<PreviewEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Presenter for ChannelPresenter {
    fn present(&mut self, frame: PresentedFrame) {
        let _ = self.tx.send(PreviewEvent::Frame(frame));
    }

    fn clear(&mut self) {
        let _ = self.tx.send(PreviewEvent::Cleared);
    }
}

/// Throttle between renderable chunks.
pub trait Pacer: Send {
    fn wait(&mut self, interval: Duration);
}

/// Sleeps so consecutive waits are `interval` apart on the wall clock.
#[derive(Debug, Default)]
pub struct RealtimePacer {
    last: Option<Instant>,
}

impl RealtimePacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pacer for RealtimePacer {
    fn wait(&mut self, interval: Duration) {
        let now = Instant::now();
        let deadline = self.last.map_or(now + interval, |last| last + interval);
        if deadline > now {
            thread::sleep(deadline - now);
            self.last = Some(deadline);
        } else {
            self.last = Some(now);
        }
    }
}

/// Runs as fast as decoding allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPacer;

impl Pacer for NoPacer {
    fn wait(&mut self, _interval: Duration) {}
}
