//! Segment model of the editing timeline.
//!
//! The timeline owns every video, audio, image and filter segment of a
//! session. Video segments are never removed; hiding one drops it from the
//! display order, and the start/end offsets of the remaining visible segments
//! are chained again from zero.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::{
    chunks::ChunkIndex,
    media::{AudioTrackInfo, DemuxedMedia, VideoTrackInfo},
    scene::{ImageFilter, ImagePosition},
    ClipCraftError, Result,
};

mod segments;

pub use segments::{AudioSegment, ImageSegment, VideoSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image-{}", self.0)
    }
}

/// Snapshot of a video segment published when it is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegmentInfo {
    pub id: SegmentId,
    pub start_ms: f64,
    pub duration: u64,
    pub timescale: u32,
    pub total_chunks: usize,
}

/// Start offset of a visible segment, in display order.
pub type TimePosition = (SegmentId, f64);

/// Result of a visibility toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order: Vec<SegmentId>,
    pub time_positions: Vec<TimePosition>,
}

/// Change notifications emitted by [`Timeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    VideoAdded(VideoSegmentInfo),
    ImageAdded { video: SegmentId, image: ImageId },
    DisplayOrderChanged(Vec<SegmentId>),
    TimePositionsRecalculated(Vec<TimePosition>),
    ImagePositionChanged { video: SegmentId, image: ImageId },
    FilterChanged { video: SegmentId, filter: ImageFilter },
}

impl TimelineEvent {
    /// Whether the event invalidates playback progress.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::DisplayOrderChanged(_))
    }
}

#[derive(Debug, Default)]
pub struct Timeline {
    /// Video segments in creation order; index == `position_at_creation`.
    videos: Vec<VideoSegment>,
    audio: HashMap<SegmentId, AudioSegment>,
    images: HashMap<ImageId, ImageSegment>,
    images_by_video: HashMap<SegmentId, Vec<ImageId>>,
    filters: HashMap<SegmentId, ImageFilter>,
    display_order: Vec<SegmentId>,
    next_id: u64,
    subscribers: Vec<Sender<TimelineEvent>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener. Events emitted from now on are delivered to
    /// it in emission order.
    pub fn subscribe(&mut self) -> Receiver<TimelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Adds a demuxed media file: its video track and, when present, its
    /// audio track.
    pub fn add_media(&mut self, media: DemuxedMedia) -> SegmentId {
        let DemuxedMedia {
            video,
            video_chunks,
            audio,
        } = media;
        let id = self.add_video_segment(video, video_chunks);
        if let Some((track, chunks)) = audio {
            self.audio.insert(id, AudioSegment::new(id, track, chunks));
        }
        id
    }

    pub fn add_video_segment(&mut self, track: VideoTrackInfo, chunks: ChunkIndex) -> SegmentId {
        let id = SegmentId(self.allocate_id());
        let position = self.videos.len();
        self.videos
            .push(VideoSegment::new(id, position, track, Arc::new(chunks)));
        self.filters.insert(id, ImageFilter::None);

        self.display_order.push(id);
        self.recalculate_time_positions();

        let info = self.videos[position].info();
        tracing::debug!(segment = %id, position, chunks = info.total_chunks, "video segment added");
        self.emit(TimelineEvent::VideoAdded(info));
        self.emit(TimelineEvent::DisplayOrderChanged(self.display_order.clone()));
        id
    }

    /// Attaches an audio track to an existing video segment, replacing any
    /// previous one.
    pub fn add_audio_segment(
        &mut self,
        video: SegmentId,
        track: AudioTrackInfo,
        chunks: ChunkIndex,
    ) -> Result<()> {
        self.require_video(video)?;
        self.audio.insert(video, AudioSegment::new(video, track, chunks));
        Ok(())
    }

    pub fn add_image_segment(
        &mut self,
        video: SegmentId,
        bitmap: RgbaImage,
        position: ImagePosition,
    ) -> Result<ImageId> {
        self.require_video(video)?;
        let id = ImageId(self.allocate_id());
        self.images
            .insert(id, ImageSegment::new(id, video, position, bitmap));
        self.images_by_video.entry(video).or_default().push(id);

        self.emit(TimelineEvent::ImageAdded { video, image: id });
        Ok(id)
    }

    pub fn set_filter(&mut self, video: SegmentId, filter: ImageFilter) -> Result<()> {
        self.require_video(video)?;
        self.filters.insert(video, filter);
        self.emit(TimelineEvent::FilterChanged { video, filter });
        Ok(())
    }

    pub fn set_image_position(&mut self, image: ImageId, position: ImagePosition) -> Result<()> {
        let segment = self
            .images
            .get_mut(&image)
            .ok_or(ClipCraftError::UnknownImage(image))?;
        segment.position = position;
        let video = segment.video;
        self.emit(TimelineEvent::ImagePositionChanged { video, image });
        Ok(())
    }

    /// Shows a hidden segment or hides a visible one, then rebuilds the
    /// display order and the time positions of every visible segment.
    pub fn toggle_visibility(&mut self, video: SegmentId) -> Result<OrderUpdate> {
        let segment = self
            .videos
            .iter_mut()
            .find(|segment| segment.id == video)
            .ok_or(ClipCraftError::UnknownSegment(video))?;
        segment.visible = !segment.visible;
        tracing::debug!(segment = %video, visible = segment.visible, "visibility toggled");

        self.display_order = self
            .videos
            .iter()
            .filter(|segment| segment.visible)
            .map(|segment| segment.id)
            .collect();
        let time_positions = self.recalculate_time_positions();

        self.emit(TimelineEvent::DisplayOrderChanged(self.display_order.clone()));
        self.emit(TimelineEvent::TimePositionsRecalculated(
            time_positions.clone(),
        ));

        Ok(OrderUpdate {
            order: self.display_order.clone(),
            time_positions,
        })
    }

    pub fn display_order(&self) -> &[SegmentId] {
        &self.display_order
    }

    pub fn video_segment(&self, id: SegmentId) -> Option<&VideoSegment> {
        self.videos.iter().find(|segment| segment.id == id)
    }

    /// All video segments in creation order, hidden ones included.
    pub fn video_segments(&self) -> &[VideoSegment] {
        &self.videos
    }

    pub fn audio_for(&self, video: SegmentId) -> Option<&AudioSegment> {
        self.audio.get(&video)
    }

    pub fn image_segment(&self, id: ImageId) -> Option<&ImageSegment> {
        self.images.get(&id)
    }

    /// Images attached to `video`, bottom-most first.
    pub fn images_for(&self, video: SegmentId) -> Vec<&ImageSegment> {
        self.images_by_video
            .get(&video)
            .map(|ids| ids.iter().filter_map(|id| self.images.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn filter_for(&self, video: SegmentId) -> ImageFilter {
        self.filters.get(&video).copied().unwrap_or_default()
    }

    pub fn time_positions(&self) -> Vec<TimePosition> {
        self.display_order
            .iter()
            .filter_map(|id| self.video_segment(*id))
            .map(|segment| (segment.id, segment.start_ms))
            .collect()
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.display_order
            .last()
            .and_then(|id| self.video_segment(*id))
            .map(|segment| segment.end_ms)
            .unwrap_or(0.0)
    }

    fn recalculate_time_positions(&mut self) -> Vec<TimePosition> {
        let mut cursor = 0.0;
        let mut positions = Vec::with_capacity(self.display_order.len());
        for id in &self.display_order {
            if let Some(segment) = self.videos.iter_mut().find(|segment| segment.id == *id) {
                segment.start_ms = cursor;
                segment.end_ms = cursor + segment.duration_ms();
                cursor = segment.end_ms;
                positions.push((segment.id, segment.start_ms));
            }
        }
        positions
    }

    fn require_video(&self, video: SegmentId) -> Result<()> {
        if self.video_segment(video).is_some() {
            Ok(())
        } else {
            Err(ClipCraftError::UnknownSegment(video))
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&mut self, event: TimelineEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
