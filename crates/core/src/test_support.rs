//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::{
    config::{PlaybackConfig, ResumePolicy},
    engine::{ChannelPresenter, Pacer, PlaybackEngine, PresentedFrame, PreviewEvent},
    media::{raw, DemuxedMedia},
    timeline::Timeline,
    SegmentId,
};

/// Duration of one synthetic frame at 30 fps.
pub(crate) const FRAME_US: i64 = 33_333;
pub(crate) const CLIP_SIZE: u32 = 4;

pub(crate) fn clip_bytes(frames: usize, gop: usize) -> Vec<u8> {
    raw::synthetic_clip(frames, CLIP_SIZE, CLIP_SIZE, gop).expect("synthetic clip")
}

pub(crate) fn clip(frames: usize, gop: usize) -> DemuxedMedia {
    raw::demux(&clip_bytes(frames, gop)).expect("demux synthetic clip")
}

/// Counts throttle waits without sleeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingPacer {
    waits: Arc<AtomicUsize>,
}

impl CountingPacer {
    pub(crate) fn count(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl Pacer for CountingPacer {
    fn wait(&mut self, _interval: Duration) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn playback_config(policy: ResumePolicy, queue: usize) -> PlaybackConfig {
    PlaybackConfig {
        canvas_width: CLIP_SIZE,
        canvas_height: CLIP_SIZE,
        frame_queue_capacity: queue,
        resume_policy: policy,
        ..PlaybackConfig::default()
    }
}

pub(crate) struct EngineHarness {
    pub(crate) timeline: Timeline,
    pub(crate) engine: PlaybackEngine,
    events: Receiver<PreviewEvent>,
    pacer: CountingPacer,
}

impl EngineHarness {
    pub(crate) fn new(policy: ResumePolicy, decoder_delay: usize) -> Self {
        Self::with_queue(policy, decoder_delay, 8)
    }

    pub(crate) fn with_queue(policy: ResumePolicy, decoder_delay: usize, queue: usize) -> Self {
        let (presenter, events) = ChannelPresenter::new();
        let pacer = CountingPacer::default();
        let mut timeline = Timeline::new();
        let mut engine = PlaybackEngine::new(
            &playback_config(policy, queue),
            Arc::new(raw::RawBackend::with_decoder_delay(decoder_delay)),
            Box::new(presenter),
            Box::new(pacer.clone()),
        );
        engine.observe(&mut timeline);
        Self {
            timeline,
            engine,
            events,
            pacer,
        }
    }

    pub(crate) fn clip(&self, frames: usize, gop: usize) -> DemuxedMedia {
        clip(frames, gop)
    }

    /// Adds a synthetic clip and lets the engine observe the change.
    pub(crate) fn add_clip(&mut self, frames: usize, gop: usize) -> SegmentId {
        let id = self.timeline.add_media(clip(frames, gop));
        self.engine.apply_timeline_events(&self.timeline);
        id
    }

    /// Frames presented since the last call.
    pub(crate) fn frames(&self) -> Vec<PresentedFrame> {
        self.events
            .try_iter()
            .filter_map(|event| match event {
                PreviewEvent::Frame(frame) => Some(frame),
                PreviewEvent::Cleared => None,
            })
            .collect()
    }

    pub(crate) fn presented(&self) -> Vec<(SegmentId, i64)> {
        self.frames()
            .into_iter()
            .map(|frame| (frame.segment, frame.timestamp_us))
            .collect()
    }

    /// Whether the surface was cleared since the last call.
    pub(crate) fn cleared(&self) -> bool {
        self.events
            .try_iter()
            .any(|event| matches!(event, PreviewEvent::Cleared))
    }

    pub(crate) fn pacer_waits(&self) -> usize {
        self.pacer.count()
    }
}
