//! Cooperative playback engine.
//!
//! The engine plays the visible segments of a [`Timeline`] one after another.
//! It never runs on its own: every call to [`PlaybackEngine::step`] submits at
//! most one chunk to a decoder, presents whatever frames come out and returns.
//! The boundary between two steps is the only place where state changes
//! (pause, preview, timeline edits) are observed.
//!
//! Progress inside a segment is recorded in its [`Trace`] when playback stops
//! early, so the next pass can resume from the nearest key chunk instead of
//! chunk 0.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::{
    chunks::ChunkIndex,
    config::{PlaybackConfig, ResumePolicy},
    media::{DecodedFrame, MediaBackend, VideoDecoder},
    scene::SceneCompositor,
    timeline::{Timeline, TimelineEvent},
    ClipCraftError, Result, SegmentId,
};

mod output;
mod queue;
mod trace;

pub use output::{
    ChannelPresenter, NoPacer, Pacer, PresentedFrame, Presenter, PreviewEvent, RealtimePacer,
};
pub use queue::{FrameQueue, QueuedFrame};
pub use trace::{Trace, TraceStatus, TraceTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Pending,
    Playing,
    Pausing,
    ShowPreview,
}

/// What a single [`PlaybackEngine::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do until the state changes.
    Idle,
    /// One chunk of the segment was decoded.
    Advanced(SegmentId),
    /// Playback stopped and the segment's progress was saved.
    Parked(SegmentId),
    SegmentFinished(SegmentId),
    /// A decode error stopped the segment. See [`PlaybackEngine::take_diagnostics`].
    Halted(SegmentId),
}

/// A decode failure observed during playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub segment: SegmentId,
    pub chunk: usize,
    pub message: String,
}

/// Decoding state of the segment currently being played.
struct ActivePass {
    segment: SegmentId,
    chunks: Arc<ChunkIndex>,
    decoder: Box<dyn VideoDecoder>,
    /// Next chunk to submit.
    next_chunk: usize,
    /// Most recent key chunk submitted.
    last_key: usize,
    /// First chunk whose frame may be presented.
    render_from: usize,
    min_timestamp_us: Option<i64>,
    /// Timestamp of the last frame presented for this segment.
    presented_until_us: Option<i64>,
}

impl ActivePass {
    fn accepts(&self, timestamp_us: i64) -> bool {
        self.min_timestamp_us.map_or(true, |min| timestamp_us >= min)
            && self
                .presented_until_us
                .map_or(true, |last| timestamp_us > last)
    }
}

pub struct PlaybackEngine {
    backend: Arc<dyn MediaBackend>,
    presenter: Box<dyn Presenter>,
    pacer: Box<dyn Pacer>,
    compositor: SceneCompositor,
    policy: ResumePolicy,
    frame_interval: Duration,
    status: EngineStatus,
    last_status: EngineStatus,
    selected: Option<SegmentId>,
    halted: Option<SegmentId>,
    traces: TraceTable,
    queue: FrameQueue,
    decoders: HashMap<SegmentId, Box<dyn VideoDecoder>>,
    pass: Option<ActivePass>,
    events: Option<Receiver<TimelineEvent>>,
    diagnostics: Vec<Diagnostic>,
}

impl PlaybackEngine {
    pub fn new(
        config: &PlaybackConfig,
        backend: Arc<dyn MediaBackend>,
        presenter: Box<dyn Presenter>,
        pacer: Box<dyn Pacer>,
    ) -> Self {
        Self {
            backend,
            presenter,
            pacer,
            compositor: SceneCompositor::new(config.canvas_width, config.canvas_height),
            policy: config.resume_policy,
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1))),
            status: EngineStatus::Pending,
            last_status: EngineStatus::Pending,
            selected: None,
            halted: None,
            traces: TraceTable::new(),
            queue: FrameQueue::new(config.frame_queue_capacity),
            decoders: HashMap::new(),
            pass: None,
            events: None,
            diagnostics: Vec::new(),
        }
    }

    /// Subscribes to `timeline` so its edits are applied at the next step.
    pub fn observe(&mut self, timeline: &mut Timeline) {
        self.events = Some(timeline.subscribe());
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn last_status(&self) -> EngineStatus {
        self.last_status
    }

    pub fn selected(&self) -> Option<SegmentId> {
        self.selected
    }

    pub fn trace(&self, timeline: &Timeline, segment: SegmentId) -> Option<Trace> {
        let video = timeline.video_segment(segment)?;
        Some(self.traces.trace(segment, video.total_chunks()))
    }

    pub fn last_frame(&self) -> Option<&QueuedFrame> {
        self.queue.last()
    }

    /// Whether another step can make progress without a state change.
    pub fn is_active(&self) -> bool {
        if self.pass.is_some() {
            return true;
        }
        self.status == EngineStatus::Playing
            && self.selected.is_some()
            && self.halted != self.selected
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Starts playback. A halted segment is attempted again even when the
    /// engine is still `Playing`.
    pub fn start(&mut self) {
        if let Some(segment) = self.halted.take() {
            tracing::debug!(segment = %segment, "retrying halted segment");
        }
        if self.status == EngineStatus::Playing {
            return;
        }
        self.transition(EngineStatus::Playing);
        tracing::debug!(selected = ?self.selected, "playback started");
    }

    pub fn pause(&mut self) {
        if self.status == EngineStatus::Pausing {
            return;
        }
        self.transition(EngineStatus::Pausing);
        tracing::debug!("playback paused");
    }

    /// Selects `video` and presents the single frame closest to
    /// `timestamp_ms`. A following [`start`](Self::start) resumes from there.
    pub fn show_preview(
        &mut self,
        timeline: &Timeline,
        video: SegmentId,
        timestamp_ms: f64,
    ) -> Result<()> {
        self.apply_timeline_events(timeline);
        if let Some(pass) = self.pass.take() {
            self.park(timeline, pass);
        }
        let segment = timeline
            .video_segment(video)
            .ok_or(ClipCraftError::UnknownSegment(video))?;

        self.transition(EngineStatus::ShowPreview);
        self.selected = Some(video);
        self.halted = None;

        let chunks = Arc::clone(&segment.chunks);
        let target_us = (timestamp_ms * 1_000.0).round() as i64;
        let Some(target) = chunks.nearest_by_timestamp(target_us) else {
            return Ok(());
        };
        let key = chunks.key_at_or_before(target);
        let target_timestamp = chunks.get(target).map_or(0, |chunk| chunk.timestamp_us);

        let mut decoder = match self.decoders.remove(&video) {
            Some(decoder) => decoder,
            None => self.backend.video_decoder(&segment.track)?,
        };
        decoder.reset();

        let mut shown = None;
        for (offset, chunk) in chunks.slice(key, target + 1).iter().enumerate() {
            if let Err(err) = decoder.decode(chunk) {
                return Err(self.report(video, key + offset, &err));
            }
            take_matching(decoder.as_mut(), target_timestamp, &mut shown);
        }
        if let Err(err) = decoder.flush() {
            return Err(self.report(video, target, &err));
        }
        take_matching(decoder.as_mut(), target_timestamp, &mut shown);

        self.traces.set_sliced(video, chunks.len(), key, target);
        tracing::debug!(segment = %video, key, target, timestamp_us = target_timestamp, "preview seek");
        if let Some(frame) = shown {
            self.present(timeline, QueuedFrame { segment: video, frame });
        }
        Ok(())
    }

    /// Runs one scheduling step.
    pub fn step(&mut self, timeline: &Timeline) -> StepOutcome {
        self.apply_timeline_events(timeline);

        if self.status != EngineStatus::Playing {
            return match self.pass.take() {
                Some(pass) => {
                    let segment = pass.segment;
                    self.park(timeline, pass);
                    StepOutcome::Parked(segment)
                }
                None => StepOutcome::Idle,
            };
        }

        let pass = match self.pass.take() {
            Some(pass) => pass,
            None => {
                let Some(segment) = self.selected else {
                    return StepOutcome::Idle;
                };
                if self.halted == Some(segment) {
                    return StepOutcome::Idle;
                }
                match self.begin_pass(timeline, segment) {
                    Ok(Some(pass)) => pass,
                    Ok(None) => {
                        self.traces.reset(segment);
                        self.continue_playback(timeline, segment);
                        return StepOutcome::SegmentFinished(segment);
                    }
                    Err(err) => {
                        self.report(segment, 0, &err);
                        self.halted = Some(segment);
                        return StepOutcome::Halted(segment);
                    }
                }
            }
        };
        self.advance(timeline, pass)
    }

    /// Steps until playback stops, the order is exhausted or a segment halts.
    pub fn run_until_idle(&mut self, timeline: &Timeline) -> StepOutcome {
        loop {
            match self.step(timeline) {
                StepOutcome::Advanced(_)
                | StepOutcome::Parked(_)
                | StepOutcome::SegmentFinished(_) => continue,
                outcome => return outcome,
            }
        }
    }

    /// Drains pending timeline events. Order changes roll playback back to
    /// the first frame; image and filter edits repaint the last frame.
    pub fn apply_timeline_events(&mut self, timeline: &Timeline) {
        let Some(events) = &self.events else {
            return;
        };
        let events: Vec<TimelineEvent> = events.try_iter().collect();
        if events.is_empty() {
            return;
        }
        if events.iter().any(TimelineEvent::is_structural) {
            self.roll_back(timeline);
            return;
        }

        let shown = self.queue.last().map(|frame| frame.segment);
        let touched = events.iter().any(|event| match event {
            TimelineEvent::ImageAdded { video, .. }
            | TimelineEvent::ImagePositionChanged { video, .. }
            | TimelineEvent::FilterChanged { video, .. } => Some(*video) == shown,
            _ => false,
        });
        if touched {
            self.repaint(timeline);
        }
    }

    fn transition(&mut self, next: EngineStatus) {
        self.last_status = self.status;
        self.status = next;
    }

    fn should_prime(&self) -> bool {
        self.policy == ResumePolicy::Always || self.last_status == EngineStatus::ShowPreview
    }

    fn begin_pass(
        &mut self,
        timeline: &Timeline,
        segment: SegmentId,
    ) -> Result<Option<ActivePass>> {
        let Some(video) = timeline.video_segment(segment) else {
            return Ok(None);
        };
        if video.chunks.is_empty() {
            return Ok(None);
        }
        let chunks = Arc::clone(&video.chunks);
        let trace = self.traces.trace(segment, chunks.len());
        let live = self.decoders.remove(&segment);
        let presented_until_us = if trace.is_sliced() {
            self.queue.last_timestamp_for(segment)
        } else {
            None
        };

        let pass = match live {
            Some(decoder) if trace.is_sliced() && !self.should_prime() => ActivePass {
                segment,
                chunks,
                decoder,
                next_chunk: trace.last_frame_idx,
                last_key: trace.last_key_frame_idx,
                render_from: trace.last_frame_idx,
                min_timestamp_us: None,
                presented_until_us,
            },
            live => {
                let mut decoder = match live {
                    Some(decoder) => decoder,
                    None => self.backend.video_decoder(&video.track)?,
                };
                decoder.reset();
                let (next_chunk, render_from) = if trace.is_sliced() {
                    (trace.last_key_frame_idx, trace.last_frame_idx)
                } else {
                    (0, 0)
                };
                let min_timestamp_us = if trace.is_sliced() {
                    chunks.get(render_from).map(|chunk| chunk.timestamp_us)
                } else {
                    None
                };
                ActivePass {
                    segment,
                    chunks,
                    decoder,
                    next_chunk,
                    last_key: next_chunk,
                    render_from,
                    min_timestamp_us,
                    presented_until_us,
                }
            }
        };

        tracing::debug!(
            segment = %segment,
            from = pass.next_chunk,
            render_from = pass.render_from,
            sliced = trace.is_sliced(),
            "segment pass started"
        );
        Ok(Some(pass))
    }

    fn advance(&mut self, timeline: &Timeline, mut pass: ActivePass) -> StepOutcome {
        let chunks = Arc::clone(&pass.chunks);
        let idx = pass.next_chunk;
        let Some(chunk) = chunks.get(idx) else {
            return self.finish(timeline, pass);
        };

        if chunk.is_key() {
            pass.last_key = idx;
        }
        if let Err(err) = pass.decoder.decode(chunk) {
            return self.halt(pass, idx, &err);
        }
        pass.next_chunk += 1;
        self.drain(timeline, &mut pass);
        if idx >= pass.render_from {
            self.pacer.wait(self.frame_interval);
        }

        if pass.next_chunk >= chunks.len() {
            return self.finish(timeline, pass);
        }
        let segment = pass.segment;
        self.pass = Some(pass);
        StepOutcome::Advanced(segment)
    }

    fn finish(&mut self, timeline: &Timeline, mut pass: ActivePass) -> StepOutcome {
        let segment = pass.segment;
        if let Err(err) = pass.decoder.flush() {
            let last = pass.chunks.len().saturating_sub(1);
            return self.halt(pass, last, &err);
        }
        self.drain(timeline, &mut pass);

        pass.decoder.reset();
        self.decoders.insert(segment, pass.decoder);
        self.traces.reset(segment);
        tracing::debug!(segment = %segment, "segment finished");

        self.continue_playback(timeline, segment);
        StepOutcome::SegmentFinished(segment)
    }

    /// Moves the selection to the segment after `finished` in display order.
    fn continue_playback(&mut self, timeline: &Timeline, finished: SegmentId) {
        if matches!(
            self.status,
            EngineStatus::Pausing | EngineStatus::ShowPreview
        ) {
            return;
        }
        let order = timeline.display_order();
        let next = match order.iter().position(|id| *id == finished) {
            Some(pos) => order.get(pos + 1).copied(),
            None => order.first().copied(),
        };
        match next {
            Some(id) => self.selected = Some(id),
            None => {
                self.transition(EngineStatus::Pending);
                self.selected = order.first().copied();
                tracing::debug!("display order exhausted");
            }
        }
    }

    /// Saves the progress of an interrupted pass.
    fn park(&mut self, timeline: &Timeline, mut pass: ActivePass) {
        let segment = pass.segment;
        let total = pass.chunks.len();

        if self.policy == ResumePolicy::Always {
            if let Err(err) = pass.decoder.flush() {
                let chunk = pass.next_chunk.saturating_sub(1);
                self.halt(pass, chunk, &err);
                return;
            }
            self.drain(timeline, &mut pass);
        }

        let cursor = pass.next_chunk.min(total.saturating_sub(1));
        let key = match pass.chunks.get(cursor) {
            Some(chunk) if chunk.is_key() => cursor,
            _ => pass.last_key,
        };
        self.traces.set_sliced(segment, total, key, cursor);
        if self.policy == ResumePolicy::PreviewOnly {
            self.decoders.insert(segment, pass.decoder);
        }
        tracing::debug!(segment = %segment, key, cursor, "segment parked");
    }

    fn halt(&mut self, pass: ActivePass, chunk: usize, err: &ClipCraftError) -> StepOutcome {
        let segment = pass.segment;
        self.report(segment, chunk, err);
        let key = pass.chunks.key_at_or_before(chunk);
        self.traces.set_sliced(segment, pass.chunks.len(), key, chunk);
        self.halted = Some(segment);
        StepOutcome::Halted(segment)
    }

    fn report(&mut self, segment: SegmentId, chunk: usize, err: &ClipCraftError) -> ClipCraftError {
        let message = err.to_string();
        tracing::error!(segment = %segment, chunk, error = %message, "decode failed");
        self.diagnostics.push(Diagnostic {
            segment,
            chunk,
            message: message.clone(),
        });
        ClipCraftError::decode(segment, chunk, message)
    }

    /// Pulls every available frame out of the pass decoder and presents the
    /// renderable ones in order.
    fn drain(&mut self, timeline: &Timeline, pass: &mut ActivePass) {
        while let Some(frame) = pass.decoder.receive_frame() {
            let queued = QueuedFrame {
                segment: pass.segment,
                frame,
            };
            if let Err(rejected) = self.queue.push(queued) {
                self.present_pending(timeline, pass);
                self.offer(timeline, pass, rejected);
            }
        }
        self.present_pending(timeline, pass);
    }

    fn present_pending(&mut self, timeline: &Timeline, pass: &mut ActivePass) {
        while let Some(frame) = self.queue.pop() {
            self.offer(timeline, pass, frame);
        }
    }

    fn offer(&mut self, timeline: &Timeline, pass: &mut ActivePass, frame: QueuedFrame) {
        let timestamp_us = frame.timestamp_us();
        if pass.accepts(timestamp_us) {
            pass.presented_until_us = Some(timestamp_us);
            self.present(timeline, frame);
        }
    }

    fn present(&mut self, timeline: &Timeline, frame: QueuedFrame) {
        let images = timeline.images_for(frame.segment);
        let filter = timeline.filter_for(frame.segment);
        let image = self.compositor.compose(&frame.frame.image, &images, filter);
        self.presenter.present(PresentedFrame {
            segment: frame.segment,
            timestamp_us: frame.timestamp_us(),
            image,
        });
        self.queue.retain_last(frame);
    }

    fn repaint(&mut self, timeline: &Timeline) {
        let Some(last) = self.queue.last() else {
            return;
        };
        let images = timeline.images_for(last.segment);
        let filter = timeline.filter_for(last.segment);
        let frame = PresentedFrame {
            segment: last.segment,
            timestamp_us: last.timestamp_us(),
            image: self.compositor.compose(&last.frame.image, &images, filter),
        };
        self.presenter.present(frame);
    }

    /// Drops all progress and shows the first frame of the leading segment.
    fn roll_back(&mut self, timeline: &Timeline) {
        if self.status != EngineStatus::Pending {
            self.transition(EngineStatus::Pending);
        }
        self.pass = None;
        self.halted = None;
        self.decoders.clear();
        self.traces.reset_all();
        self.queue.clear();
        self.selected = timeline.display_order().first().copied();

        match self.selected {
            Some(segment) => self.render_first_frame(timeline, segment),
            None => self.presenter.clear(),
        }
        tracing::debug!(selected = ?self.selected, "playback rolled back");
    }

    fn render_first_frame(&mut self, timeline: &Timeline, segment: SegmentId) {
        let Some(video) = timeline.video_segment(segment) else {
            return;
        };
        let Some(chunk) = video.chunks.first() else {
            self.presenter.clear();
            return;
        };
        let decoded = self
            .backend
            .video_decoder(&video.track)
            .and_then(|mut decoder| {
                decoder.decode(chunk)?;
                decoder.flush()?;
                Ok(decoder.receive_frame())
            });
        match decoded {
            Ok(Some(frame)) => self.present(timeline, QueuedFrame { segment, frame }),
            Ok(None) => self.presenter.clear(),
            Err(err) => {
                self.report(segment, 0, &err);
            }
        }
    }
}

fn take_matching(
    decoder: &mut dyn VideoDecoder,
    timestamp_us: i64,
    shown: &mut Option<DecodedFrame>,
) {
    while let Some(frame) = decoder.receive_frame() {
        if shown.is_none() && frame.timestamp_us == timestamp_us {
            *shown = Some(frame);
        }
    }
}
