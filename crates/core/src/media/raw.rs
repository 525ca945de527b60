//! Uncompressed `raw-rgba` codec and the `CCRAW` container.
//!
//! Every chunk carries one full RGBA picture, so any chunk could be decoded on
//! its own. The decoder still insists on a key chunk after a reset or flush so
//! that callers exercise the same priming rules a predictive codec needs.

use std::collections::VecDeque;
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::{
    ChunkKind, DecodedFrame, DemuxedMedia, EncodedChunk, EncoderConfig, MediaBackend, Muxer,
    OutputFrame, VideoDecoder, VideoEncoder, VideoTrackInfo, MICROS_PER_SECOND,
};
use crate::{chunks::ChunkIndex, ClipCraftError, Result};

pub const RAW_CODEC: &str = "raw-rgba";

const MAGIC: &[u8; 6] = b"CCRAW1";

/// Backend for `raw-rgba` tracks stored in `CCRAW` containers.
#[derive(Debug, Clone, Default)]
pub struct RawBackend {
    decoder_delay: usize,
}

impl RawBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoders created by this backend hold back `frames` pictures until
    /// more chunks arrive or the decoder is flushed.
    pub fn with_decoder_delay(frames: usize) -> Self {
        Self {
            decoder_delay: frames,
        }
    }
}

impl MediaBackend for RawBackend {
    fn demux(&self, bytes: &[u8]) -> Result<DemuxedMedia> {
        demux(bytes)
    }

    fn check_video_config(&self, track: &VideoTrackInfo) -> Result<()> {
        if track.codec != RAW_CODEC {
            return Err(ClipCraftError::unsupported(
                &track.codec,
                format!("only `{RAW_CODEC}` is available"),
            ));
        }
        if track.width == 0 || track.height == 0 {
            return Err(ClipCraftError::unsupported(
                &track.codec,
                "coded size must be non-zero",
            ));
        }
        Ok(())
    }

    fn video_decoder(&self, track: &VideoTrackInfo) -> Result<Box<dyn VideoDecoder>> {
        self.check_video_config(track)?;
        Ok(Box::new(RawDecoder::new(
            track.width,
            track.height,
            self.decoder_delay,
        )))
    }

    fn video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>> {
        if config.codec != RAW_CODEC {
            return Err(ClipCraftError::unsupported(
                &config.codec,
                "encoder only produces raw-rgba",
            ));
        }
        Ok(Box::new(RawEncoder::new(config.width, config.height)))
    }

    fn muxer(&self, config: &EncoderConfig) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(RawMuxer::new(config.width, config.height)))
    }
}

#[derive(Debug)]
pub struct RawDecoder {
    width: u32,
    height: u32,
    delay: usize,
    needs_key: bool,
    held: VecDeque<DecodedFrame>,
    ready: VecDeque<DecodedFrame>,
}

impl RawDecoder {
    pub fn new(width: u32, height: u32, delay: usize) -> Self {
        Self {
            width,
            height,
            delay,
            needs_key: true,
            held: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }
}

impl VideoDecoder for RawDecoder {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<()> {
        if self.needs_key && !chunk.is_key() {
            return Err(ClipCraftError::msg(
                "a key chunk is required after configure, reset or flush",
            ));
        }
        let image = RgbaImage::from_raw(self.width, self.height, chunk.data.to_vec())
            .ok_or_else(|| {
                ClipCraftError::msg(format!(
                    "chunk holds {} bytes, expected {}x{} RGBA",
                    chunk.data.len(),
                    self.width,
                    self.height
                ))
            })?;
        self.needs_key = false;
        self.held.push_back(DecodedFrame {
            image,
            timestamp_us: chunk.timestamp_us,
            duration_us: chunk.duration_us,
        });
        while self.held.len() > self.delay {
            if let Some(frame) = self.held.pop_front() {
                self.ready.push_back(frame);
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Option<DecodedFrame> {
        self.ready.pop_front()
    }

    fn flush(&mut self) -> Result<()> {
        self.ready.extend(self.held.drain(..));
        self.needs_key = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.held.clear();
        self.ready.clear();
        self.needs_key = true;
    }
}

#[derive(Debug)]
pub struct RawEncoder {
    width: u32,
    height: u32,
    output: VecDeque<EncodedChunk>,
}

impl RawEncoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            output: VecDeque::new(),
        }
    }
}

impl VideoEncoder for RawEncoder {
    fn encode(&mut self, frame: &OutputFrame, key_frame: bool) -> Result<()> {
        if frame.image.dimensions() != (self.width, self.height) {
            return Err(ClipCraftError::Encode(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.image.width(),
                frame.image.height(),
                self.width,
                self.height
            )));
        }
        let kind = if key_frame {
            ChunkKind::Key
        } else {
            ChunkKind::Delta
        };
        self.output.push_back(EncodedChunk {
            kind,
            timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us,
            data: Arc::from(frame.image.as_raw().as_slice()),
        });
        Ok(())
    }

    fn receive_chunk(&mut self) -> Option<EncodedChunk> {
        self.output.pop_front()
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct RawMuxer {
    width: u32,
    height: u32,
    chunks: Vec<EncodedChunk>,
}

impl RawMuxer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            chunks: Vec::new(),
        }
    }
}

impl Muxer for RawMuxer {
    fn add_video_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        if let Some(last) = self.chunks.last() {
            if chunk.timestamp_us <= last.timestamp_us {
                return Err(ClipCraftError::Encode(format!(
                    "chunk timestamp {} does not increase past {}",
                    chunk.timestamp_us, last.timestamp_us
                )));
            }
        }
        self.chunks.push(chunk);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        write_container(self.width, self.height, &self.chunks)
    }
}

/// Serializes chunks into a `CCRAW` container.
pub fn write_container(width: u32, height: u32, chunks: &[EncodedChunk]) -> Result<Vec<u8>> {
    let count = u32::try_from(chunks.len())
        .map_err(|_| ClipCraftError::InvalidInput("too many chunks for a CCRAW container"))?;
    let duration: i64 = chunks.iter().map(|chunk| chunk.duration_us).sum();
    let payload: usize = chunks.iter().map(|chunk| chunk.data.len() + 21).sum();

    let mut out = Vec::with_capacity(MAGIC.len() + 24 + payload);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&(MICROS_PER_SECOND as u32).to_le_bytes());
    out.extend_from_slice(&(duration.max(0) as u64).to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());

    for chunk in chunks {
        let len = u32::try_from(chunk.data.len())
            .map_err(|_| ClipCraftError::InvalidInput("chunk too large for a CCRAW container"))?;
        out.push(u8::from(chunk.is_key()));
        out.extend_from_slice(&chunk.timestamp_us.to_le_bytes());
        out.extend_from_slice(&chunk.duration_us.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&chunk.data);
    }
    Ok(out)
}

/// Parses a `CCRAW` container.
pub fn demux(bytes: &[u8]) -> Result<DemuxedMedia> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(ClipCraftError::Demux("missing CCRAW signature".to_string()));
    }
    let width = reader.u32()?;
    let height = reader.u32()?;
    let timescale = reader.u32()?;
    let duration = reader.u64()?;
    let count = reader.u32()? as usize;

    let mut chunks = Vec::with_capacity(count.min(bytes.len() / 21));
    for _ in 0..count {
        let kind = match reader.take(1)?[0] {
            0 => ChunkKind::Delta,
            1 => ChunkKind::Key,
            other => {
                return Err(ClipCraftError::Demux(format!("invalid chunk kind {other}")));
            }
        };
        let timestamp_us = reader.i64()?;
        let duration_us = reader.i64()?;
        let len = reader.u32()? as usize;
        let data = Arc::from(reader.take(len)?);
        chunks.push(EncodedChunk {
            kind,
            timestamp_us,
            duration_us,
            data,
        });
    }
    if reader.pos != bytes.len() {
        return Err(ClipCraftError::Demux(format!(
            "{} trailing bytes after the last chunk",
            bytes.len() - reader.pos
        )));
    }

    Ok(DemuxedMedia {
        video: VideoTrackInfo {
            codec: RAW_CODEC.to_string(),
            width,
            height,
            timescale,
            duration,
            total_chunks: chunks.len(),
            extradata: Vec::new(),
        },
        video_chunks: ChunkIndex::new(chunks),
        audio: None,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ClipCraftError::Demux("container is truncated".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}

/// Builds a `CCRAW` clip of `frames` pictures at 30 fps with a key chunk every
/// `gop` chunks. Each picture is a gradient shifted by its frame number.
pub fn synthetic_clip(frames: usize, width: u32, height: u32, gop: usize) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(ClipCraftError::InvalidInput("clip size must be non-zero"));
    }
    let gop = gop.max(1);
    let duration_us = MICROS_PER_SECOND / 30;
    let chunks: Vec<EncodedChunk> = (0..frames)
        .map(|n| {
            let shift = (n * 7) as u32;
            let image = RgbaImage::from_fn(width, height, |x, y| {
                Rgba([
                    ((x + shift) % 256) as u8,
                    ((y + shift) % 256) as u8,
                    (n % 256) as u8,
                    255,
                ])
            });
            EncodedChunk {
                kind: if n % gop == 0 {
                    ChunkKind::Key
                } else {
                    ChunkKind::Delta
                },
                timestamp_us: n as i64 * duration_us,
                duration_us,
                data: Arc::from(image.into_raw()),
            }
        })
        .collect();
    write_container(width, height, &chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_survives_a_write_read_cycle() {
        let bytes = synthetic_clip(5, 4, 2, 2).unwrap();
        let media = demux(&bytes).unwrap();

        assert_eq!(media.video.codec, RAW_CODEC);
        assert_eq!((media.video.width, media.video.height), (4, 2));
        assert_eq!(media.video.total_chunks, 5);
        assert_eq!(media.video.timescale, 1_000_000);
        assert_eq!(media.video.duration, 5 * 33_333);
        let kinds: Vec<bool> = media.video_chunks.iter().map(EncodedChunk::is_key).collect();
        assert_eq!(kinds, vec![true, false, true, false, true]);
    }

    #[test]
    fn rejects_truncated_containers() {
        let bytes = synthetic_clip(2, 4, 2, 1).unwrap();
        let err = demux(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(format!("{err}").contains("truncated"));
        assert!(demux(b"nope").is_err());
    }

    #[test]
    fn decoder_requires_a_key_chunk_after_flush() {
        let media = demux(&synthetic_clip(3, 2, 2, 3).unwrap()).unwrap();
        let mut decoder = RawDecoder::new(2, 2, 0);

        decoder.decode(media.video_chunks.get(0).unwrap()).unwrap();
        decoder.decode(media.video_chunks.get(1).unwrap()).unwrap();
        decoder.flush().unwrap();
        assert!(decoder.decode(media.video_chunks.get(2).unwrap()).is_err());

        let mut fresh = RawDecoder::new(2, 2, 0);
        assert!(fresh.decode(media.video_chunks.get(1).unwrap()).is_err());
    }

    #[test]
    fn delayed_decoder_releases_frames_on_flush() {
        let media = demux(&synthetic_clip(3, 2, 2, 1).unwrap()).unwrap();
        let mut decoder = RawDecoder::new(2, 2, 2);

        for chunk in media.video_chunks.iter() {
            decoder.decode(chunk).unwrap();
        }
        let early: Vec<i64> = std::iter::from_fn(|| decoder.receive_frame())
            .map(|frame| frame.timestamp_us)
            .collect();
        assert_eq!(early, vec![0]);

        decoder.flush().unwrap();
        let rest: Vec<i64> = std::iter::from_fn(|| decoder.receive_frame())
            .map(|frame| frame.timestamp_us)
            .collect();
        assert_eq!(rest, vec![33_333, 66_666]);
    }

    #[test]
    fn backend_rejects_foreign_codecs() {
        let track = VideoTrackInfo {
            codec: "avc1.640032".to_string(),
            width: 1280,
            height: 720,
            timescale: 90_000,
            duration: 90_000,
            total_chunks: 30,
            extradata: Vec::new(),
        };

        let err = RawBackend::new().check_video_config(&track).unwrap_err();
        assert!(matches!(err, ClipCraftError::UnsupportedCodec { .. }));
    }
}
