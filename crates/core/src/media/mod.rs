//! Interfaces to the codec layer.
//!
//! Container parsing, decoding, encoding and muxing live outside the core. The
//! engine and the export builder only talk to them through the traits in this
//! module, and a [`MediaBackend`] bundles one implementation of each. The
//! [`raw`] module provides a self-contained backend for uncompressed RGBA
//! video.

use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::{chunks::ChunkIndex, Result};

pub mod raw;

/// Microseconds per second, the unit of every chunk and frame timestamp.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Decodable without reference to earlier chunks.
    Key,
    Delta,
}

/// One encoded sample as produced by a demuxer or an encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub kind: ChunkKind,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub data: Arc<[u8]>,
}

impl EncodedChunk {
    pub fn is_key(&self) -> bool {
        self.kind == ChunkKind::Key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTrackInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Units per second of `duration`.
    pub timescale: u32,
    pub duration: u64,
    pub total_chunks: usize,
    #[serde(default)]
    pub extradata: Vec<u8>,
}

impl VideoTrackInfo {
    pub fn duration_ms(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.duration as f64 / f64::from(self.timescale) * 1_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub timescale: u32,
    pub duration: u64,
    pub total_chunks: usize,
}

/// Everything a demuxer extracts from one media buffer.
#[derive(Debug, Clone)]
pub struct DemuxedMedia {
    pub video: VideoTrackInfo,
    pub video_chunks: ChunkIndex,
    pub audio: Option<(AudioTrackInfo, ChunkIndex)>,
}

/// A decoded picture. Dropping it releases the pixel buffer.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: RgbaImage,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

/// A composited frame handed to an encoder.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub image: RgbaImage,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub fps: u32,
}

/// Decoder for a single video track.
///
/// Output is pulled: after `decode` or `flush`, the caller drains frames with
/// `receive_frame` until it returns `None`. After `reset` or `flush` the next
/// chunk must be a key chunk.
pub trait VideoDecoder: Send {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<()>;
    fn receive_frame(&mut self) -> Option<DecodedFrame>;
    /// Emits every frame still held by the decoder.
    fn flush(&mut self) -> Result<()>;
    /// Drops all internal state, including undelivered frames.
    fn reset(&mut self);
}

pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: &OutputFrame, key_frame: bool) -> Result<()>;
    fn receive_chunk(&mut self) -> Option<EncodedChunk>;
    fn flush(&mut self) -> Result<()>;
}

pub trait Muxer: Send {
    fn add_video_chunk(&mut self, chunk: EncodedChunk) -> Result<()>;
    /// Writes the container and returns its bytes.
    fn finalize(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Factory for the codec-layer collaborators.
pub trait MediaBackend: Send + Sync {
    fn demux(&self, bytes: &[u8]) -> Result<DemuxedMedia>;
    /// Fails with [`crate::ClipCraftError::UnsupportedCodec`] when no decoder
    /// can be configured for the track.
    fn check_video_config(&self, track: &VideoTrackInfo) -> Result<()>;
    fn video_decoder(&self, track: &VideoTrackInfo) -> Result<Box<dyn VideoDecoder>>;
    fn video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>>;
    fn muxer(&self, config: &EncoderConfig) -> Result<Box<dyn Muxer>>;
}
