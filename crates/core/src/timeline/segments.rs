use std::sync::Arc;

use image::RgbaImage;

use super::{ImageId, SegmentId, VideoSegmentInfo};
use crate::{
    chunks::ChunkIndex,
    media::{AudioTrackInfo, VideoTrackInfo},
    scene::ImagePosition,
};

#[derive(Debug, Clone)]
pub struct VideoSegment {
    pub id: SegmentId,
    /// Insertion index. Stable while the segment is hidden so it can be put
    /// back at its original place.
    pub position_at_creation: usize,
    pub start_ms: f64,
    pub end_ms: f64,
    pub visible: bool,
    pub track: VideoTrackInfo,
    pub chunks: Arc<ChunkIndex>,
}

impl VideoSegment {
    pub(crate) fn new(
        id: SegmentId,
        position_at_creation: usize,
        track: VideoTrackInfo,
        chunks: Arc<ChunkIndex>,
    ) -> Self {
        let end_ms = track.duration_ms();
        Self {
            id,
            position_at_creation,
            start_ms: 0.0,
            end_ms,
            visible: true,
            track,
            chunks,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.track.duration_ms()
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn info(&self) -> VideoSegmentInfo {
        VideoSegmentInfo {
            id: self.id,
            start_ms: self.start_ms,
            duration: self.track.duration,
            timescale: self.track.timescale,
            total_chunks: self.total_chunks(),
        }
    }
}

/// Demuxed audio of a video segment. Kept for completeness; never mixed into
/// the preview or the export.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub video: SegmentId,
    pub track: AudioTrackInfo,
    pub chunks: Arc<ChunkIndex>,
}

impl AudioSegment {
    pub(crate) fn new(video: SegmentId, track: AudioTrackInfo, chunks: ChunkIndex) -> Self {
        Self {
            video,
            track,
            chunks: Arc::new(chunks),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageSegment {
    pub id: ImageId,
    pub video: SegmentId,
    pub position: ImagePosition,
    pub bitmap: RgbaImage,
}

impl ImageSegment {
    pub(crate) fn new(
        id: ImageId,
        video: SegmentId,
        position: ImagePosition,
        bitmap: RgbaImage,
    ) -> Self {
        Self {
            id,
            video,
            position,
            bitmap,
        }
    }
}
