//! Offline rendering of the visible timeline into a single encoded buffer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    config::ExportConfig,
    media::{
        EncoderConfig, MediaBackend, Muxer, OutputFrame, VideoDecoder, VideoEncoder,
        MICROS_PER_SECOND,
    },
    scene::{ImageFilter, SceneCompositor, Watermark},
    timeline::{ImageSegment, Timeline},
    ClipCraftError, Result,
};

/// Output resolution and bitrate preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "1080p")]
    FullHd,
    #[default]
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "480p")]
    Sd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub width: u32,
    pub height: u32,
    /// Bits per second.
    pub bitrate: u64,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::FullHd, Quality::Hd, Quality::Sd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::FullHd => "1080p",
            Quality::Hd => "720p",
            Quality::Sd => "480p",
        }
    }

    pub fn preset(&self) -> QualityPreset {
        match self {
            Quality::FullHd => QualityPreset {
                width: 1920,
                height: 1080,
                bitrate: 30_000_000,
            },
            Quality::Hd => QualityPreset {
                width: 1280,
                height: 720,
                bitrate: 15_000_000,
            },
            Quality::Sd => QualityPreset {
                width: 852,
                height: 480,
                bitrate: 6_000_000,
            },
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = ClipCraftError;

    fn from_str(s: &str) -> Result<Self> {
        Quality::ALL
            .into_iter()
            .find(|quality| quality.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ClipCraftError::msg(format!("unknown quality `{s}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    pub stage: ExportStage,
    pub frames_encoded: usize,
    pub total_frames: usize,
}

/// Finished export held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub quality: Quality,
    pub frame_count: usize,
    pub duration_us: i64,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The display order was empty; no encoder was created.
    Empty,
    Finished(ExportArtifact),
}

impl ExportOutcome {
    pub fn artifact(self) -> Option<ExportArtifact> {
        match self {
            ExportOutcome::Empty => None,
            ExportOutcome::Finished(artifact) => Some(artifact),
        }
    }
}

type ProgressCallback<'a> = Box<dyn FnMut(ExportProgress) + 'a>;

/// Renders every visible segment, in display order, through a fresh decoder,
/// the compositor and one encoder.
pub struct ExportBuilder<'a> {
    backend: &'a dyn MediaBackend,
    config: &'a ExportConfig,
    progress: Option<ProgressCallback<'a>>,
}

impl<'a> ExportBuilder<'a> {
    pub fn new(backend: &'a dyn MediaBackend, config: &'a ExportConfig) -> Self {
        Self {
            backend,
            config,
            progress: None,
        }
    }

    pub fn on_progress(mut self, callback: impl FnMut(ExportProgress) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn export(&mut self, timeline: &Timeline, quality: Quality) -> Result<ExportOutcome> {
        let order = timeline.display_order().to_vec();
        if order.is_empty() {
            tracing::info!("display order is empty, nothing to export");
            return Ok(ExportOutcome::Empty);
        }

        let segments = order
            .iter()
            .map(|id| {
                timeline
                    .video_segment(*id)
                    .ok_or(ClipCraftError::UnknownSegment(*id))
            })
            .collect::<Result<Vec<_>>>()?;
        let total_frames: usize = segments.iter().map(|segment| segment.total_chunks()).sum();
        self.report(ExportStage::Preparing, 0, total_frames);

        let preset = quality.preset();
        let encoder_config = EncoderConfig {
            codec: self.config.codec.clone(),
            width: preset.width,
            height: preset.height,
            bitrate: preset.bitrate,
            fps: self.config.fps,
        };
        tracing::info!(
            %quality,
            segments = segments.len(),
            total_frames,
            codec = %encoder_config.codec,
            "export started"
        );

        let mut pipeline = Pipeline {
            encoder: self.backend.video_encoder(&encoder_config)?,
            muxer: self.backend.muxer(&encoder_config)?,
            compositor: SceneCompositor::new(preset.width, preset.height)
                .with_watermark(self.config.watermark.as_deref().map(Watermark::new)),
            fps: i64::from(self.config.fps.max(1)),
            keyframe_interval: self.config.keyframe_interval.max(1),
            counter: 0,
        };

        for segment in &segments {
            let mut decoder = self.backend.video_decoder(&segment.track)?;
            let images = timeline.images_for(segment.id);
            let filter = timeline.filter_for(segment.id);
            tracing::debug!(segment = %segment.id, chunks = segment.total_chunks(), %filter, "exporting segment");

            for (idx, chunk) in segment.chunks.iter().enumerate() {
                decoder
                    .decode(chunk)
                    .map_err(|err| ClipCraftError::decode(segment.id, idx, err.to_string()))?;
                pipeline.render_ready(decoder.as_mut(), &images, filter)?;
                self.report(ExportStage::Rendering, pipeline.encoded(), total_frames);
            }
            decoder.flush().map_err(|err| {
                ClipCraftError::decode(segment.id, segment.total_chunks(), err.to_string())
            })?;
            pipeline.render_ready(decoder.as_mut(), &images, filter)?;
            self.report(ExportStage::Rendering, pipeline.encoded(), total_frames);
        }

        pipeline.encoder.flush()?;
        pipeline.forward_chunks()?;
        let frame_count = pipeline.encoded();
        if frame_count != total_frames {
            return Err(ClipCraftError::Encode(format!(
                "encoded {frame_count} frames, expected {total_frames}"
            )));
        }

        self.report(ExportStage::Finalizing, frame_count, total_frames);
        let duration_us = pipeline.timestamp(pipeline.counter);
        let buffer = pipeline.muxer.finalize()?;
        self.report(ExportStage::Complete, frame_count, total_frames);
        tracing::info!(frames = frame_count, bytes = buffer.len(), "export finished");

        Ok(ExportOutcome::Finished(ExportArtifact {
            quality,
            frame_count,
            duration_us,
            buffer,
        }))
    }

    fn report(&mut self, stage: ExportStage, frames_encoded: usize, total_frames: usize) {
        if let Some(callback) = self.progress.as_mut() {
            callback(ExportProgress {
                stage,
                frames_encoded,
                total_frames,
            });
        }
    }
}

struct Pipeline {
    encoder: Box<dyn VideoEncoder>,
    muxer: Box<dyn Muxer>,
    compositor: SceneCompositor,
    fps: i64,
    keyframe_interval: u64,
    counter: u64,
}

impl Pipeline {
    fn encoded(&self) -> usize {
        self.counter as usize
    }

    fn timestamp(&self, counter: u64) -> i64 {
        counter as i64 * MICROS_PER_SECOND / self.fps
    }

    /// Composites and encodes every frame the decoder has ready. Source
    /// frames are dropped as soon as they are encoded.
    fn render_ready(
        &mut self,
        decoder: &mut dyn VideoDecoder,
        images: &[&ImageSegment],
        filter: ImageFilter,
    ) -> Result<()> {
        while let Some(frame) = decoder.receive_frame() {
            let output = OutputFrame {
                image: self.compositor.compose(&frame.image, images, filter),
                timestamp_us: self.timestamp(self.counter),
                duration_us: MICROS_PER_SECOND / self.fps,
            };
            drop(frame);
            let key_frame = self.counter % self.keyframe_interval == 0;
            self.encoder.encode(&output, key_frame)?;
            self.counter += 1;
            self.forward_chunks()?;
        }
        Ok(())
    }

    fn forward_chunks(&mut self) -> Result<()> {
        while let Some(chunk) = self.encoder.receive_chunk() {
            self.muxer.add_video_chunk(chunk)?;
        }
        Ok(())
    }
}

/// Exports `timeline` with the quality named in `config` unless overridden.
pub fn export_timeline(
    backend: &dyn MediaBackend,
    config: &ExportConfig,
    timeline: &Timeline,
    quality: Option<Quality>,
) -> Result<ExportOutcome> {
    ExportBuilder::new(backend, config).export(timeline, quality.unwrap_or(config.default_quality))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::media::{raw, DecodedFrame, DemuxedMedia, EncodedChunk, VideoTrackInfo};
    use crate::scene::ImagePosition;
    use crate::test_support::clip;
    use image::{Rgba, RgbaImage};

    /// Raw backend that counts encoder creations and can drop decoded frames.
    #[derive(Default)]
    struct ProbeBackend {
        inner: raw::RawBackend,
        encoders: AtomicUsize,
        drop_every: Option<usize>,
        /// When set, encoders only record their key-frame flags here.
        key_log: Option<Arc<Mutex<Vec<bool>>>>,
    }

    struct KeyLogEncoder {
        log: Arc<Mutex<Vec<bool>>>,
    }

    impl VideoEncoder for KeyLogEncoder {
        fn encode(&mut self, _frame: &OutputFrame, key_frame: bool) -> Result<()> {
            self.log.lock().unwrap().push(key_frame);
            Ok(())
        }

        fn receive_chunk(&mut self) -> Option<EncodedChunk> {
            None
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct LossyDecoder {
        inner: Box<dyn VideoDecoder>,
        drop_every: usize,
        seen: usize,
    }

    impl VideoDecoder for LossyDecoder {
        fn decode(&mut self, chunk: &EncodedChunk) -> Result<()> {
            self.inner.decode(chunk)
        }

        fn receive_frame(&mut self) -> Option<DecodedFrame> {
            loop {
                let frame = self.inner.receive_frame()?;
                self.seen += 1;
                if self.seen % self.drop_every != 0 {
                    return Some(frame);
                }
            }
        }

        fn flush(&mut self) -> Result<()> {
            self.inner.flush()
        }

        fn reset(&mut self) {
            self.inner.reset()
        }
    }

    impl MediaBackend for ProbeBackend {
        fn demux(&self, bytes: &[u8]) -> Result<DemuxedMedia> {
            self.inner.demux(bytes)
        }

        fn check_video_config(&self, track: &VideoTrackInfo) -> Result<()> {
            self.inner.check_video_config(track)
        }

        fn video_decoder(&self, track: &VideoTrackInfo) -> Result<Box<dyn VideoDecoder>> {
            let inner = self.inner.video_decoder(track)?;
            Ok(match self.drop_every {
                Some(drop_every) => Box::new(LossyDecoder {
                    inner,
                    drop_every,
                    seen: 0,
                }),
                None => inner,
            })
        }

        fn video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>> {
            self.encoders.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &self.key_log {
                return Ok(Box::new(KeyLogEncoder {
                    log: Arc::clone(log),
                }));
            }
            self.inner.video_encoder(config)
        }

        fn muxer(&self, config: &EncoderConfig) -> Result<Box<dyn Muxer>> {
            self.inner.muxer(config)
        }
    }

    fn timeline_with(frame_counts: &[usize]) -> Timeline {
        let mut timeline = Timeline::new();
        for frames in frame_counts {
            timeline.add_media(clip(*frames, 2));
        }
        timeline
    }

    fn config(keyframe_interval: u64) -> ExportConfig {
        ExportConfig {
            keyframe_interval,
            watermark: None,
            ..ExportConfig::default()
        }
    }

    #[test]
    fn encodes_every_chunk_of_every_visible_segment() {
        let backend = ProbeBackend::default();
        let timeline = timeline_with(&[4, 3, 5]);
        let config = config(5);

        let artifact = ExportBuilder::new(&backend, &config)
            .export(&timeline, Quality::Sd)
            .unwrap()
            .artifact()
            .unwrap();
        assert_eq!(artifact.frame_count, 12);
        assert_eq!(artifact.duration_us, 400_000);

        let media = raw::demux(&artifact.buffer).unwrap();
        assert_eq!((media.video.width, media.video.height), (852, 480));
        let timestamps: Vec<i64> = media.video_chunks.iter().map(|c| c.timestamp_us).collect();
        let expected: Vec<i64> = (0..12).map(|n| n * 1_000_000 / 30).collect();
        assert_eq!(timestamps, expected);

        let keys: Vec<usize> = media
            .video_chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.is_key())
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(keys, vec![0, 5, 10]);
    }

    #[test]
    fn default_config_forces_a_key_frame_every_300_frames() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let backend = ProbeBackend {
            key_log: Some(Arc::clone(&log)),
            ..ProbeBackend::default()
        };
        let timeline = timeline_with(&[150, 152]);
        let config = ExportConfig {
            watermark: None,
            ..ExportConfig::default()
        };

        let outcome = export_timeline(&backend, &config, &timeline, Some(Quality::Sd)).unwrap();
        assert_eq!(outcome.artifact().unwrap().frame_count, 302);

        let keys: Vec<usize> = log
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, key)| **key)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(keys, vec![0, 300]);
    }

    #[test]
    fn hidden_segments_are_skipped() {
        let backend = ProbeBackend::default();
        let mut timeline = timeline_with(&[4, 3]);
        let first = timeline.display_order()[0];
        timeline.toggle_visibility(first).unwrap();

        let outcome = export_timeline(&backend, &config(300), &timeline, Some(Quality::Sd)).unwrap();
        assert_eq!(outcome.artifact().unwrap().frame_count, 3);
    }

    #[test]
    fn empty_timeline_never_creates_an_encoder() {
        let backend = ProbeBackend::default();
        let timeline = Timeline::new();
        let mut stages = Vec::new();

        let outcome = ExportBuilder::new(&backend, &config(300))
            .on_progress(|progress| stages.push(progress.stage))
            .export(&timeline, Quality::Hd)
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Empty);
        assert_eq!(backend.encoders.load(Ordering::SeqCst), 0);
        assert!(stages.is_empty());
    }

    #[test]
    fn reports_progress_through_every_stage() {
        let backend = ProbeBackend::default();
        let timeline = timeline_with(&[2]);
        let mut updates = Vec::new();

        ExportBuilder::new(&backend, &config(300))
            .on_progress(|progress| updates.push(progress))
            .export(&timeline, Quality::Sd)
            .unwrap();

        assert_eq!(updates.first().unwrap().stage, ExportStage::Preparing);
        assert!(updates.iter().any(|p| p.stage == ExportStage::Rendering));
        let last = updates.last().unwrap();
        assert_eq!(
            (last.stage, last.frames_encoded, last.total_frames),
            (ExportStage::Complete, 2, 2)
        );
    }

    #[test]
    fn lost_frames_fail_before_finalizing() {
        let backend = ProbeBackend {
            drop_every: Some(3),
            ..ProbeBackend::default()
        };
        let timeline = timeline_with(&[6]);

        let err = ExportBuilder::new(&backend, &config(300))
            .export(&timeline, Quality::Sd)
            .unwrap_err();
        assert!(matches!(err, ClipCraftError::Encode(ref message) if message.contains("encoded 4 frames")));
    }

    #[test]
    fn frames_carry_images_filter_and_watermark() {
        let backend = ProbeBackend::default();
        let mut timeline = timeline_with(&[1]);
        let video = timeline.display_order()[0];
        timeline
            .add_image_segment(
                video,
                RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])),
                ImagePosition::Top,
            )
            .unwrap();
        timeline.set_filter(video, ImageFilter::Invert).unwrap();
        let first_frame = |config: &ExportConfig| {
            let artifact = export_timeline(&backend, config, &timeline, Some(Quality::Sd))
                .unwrap()
                .artifact()
                .unwrap();
            let media = raw::demux(&artifact.buffer).unwrap();
            RgbaImage::from_raw(852, 480, media.video_chunks.get(0).unwrap().data.to_vec())
                .unwrap()
        };
        let plain = first_frame(&config(300));
        let stamped = first_frame(&ExportConfig {
            watermark: Some("clip craft".to_string()),
            ..config(300)
        });

        assert_eq!(*stamped.get_pixel(0, 0), Rgba([245, 235, 225, 255]));
        assert_eq!(*stamped.get_pixel(0, 240), Rgba([255, 255, 255, 0]));
        assert_eq!(stamped.get_pixel(426, 20), plain.get_pixel(426, 20));
        assert!((0..852).any(|x| stamped.get_pixel(x, 240) != plain.get_pixel(x, 240)));
    }

    #[test]
    fn parses_quality_names() {
        assert_eq!("1080p".parse::<Quality>().unwrap(), Quality::FullHd);
        assert_eq!(Quality::default().preset().width, 1280);
        assert_eq!(Quality::Sd.preset().bitrate, 6_000_000);
        assert_eq!(serde_json::to_string(&Quality::Hd).unwrap(), "\"720p\"");
        assert!("4k".parse::<Quality>().is_err());
    }
}
