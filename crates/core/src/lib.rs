//! Core library for the Clip Craft video editor.
//!
//! A [`Session`] owns the [`Timeline`] of imported clips and a
//! [`PlaybackEngine`] that previews it frame by frame. Edits (overlay images,
//! filters, visibility) are applied to the timeline and observed by the
//! engine at its next step; [`ExportBuilder`] renders the visible segments
//! into a single encoded buffer. All codec work goes through the
//! [`MediaBackend`] trait, with [`media::raw`] as the built-in backend.

pub mod chunks;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod media;
pub mod scene;
pub mod session;
pub mod timeline;

#[cfg(test)]
mod test_support;

pub use chunks::ChunkIndex;
pub use config::{AppConfig, ExportConfig, LoggingConfig, PlaybackConfig, ResumePolicy};
pub use engine::{
    ChannelPresenter, EngineStatus, NoPacer, Pacer, PlaybackEngine, PresentedFrame, Presenter,
    PreviewEvent, RealtimePacer, StepOutcome,
};
pub use error::{ClipCraftError, Result};
pub use export::{
    ExportArtifact, ExportBuilder, ExportOutcome, ExportProgress, ExportStage, Quality,
};
pub use media::{raw::RawBackend, DemuxedMedia, EncodedChunk, MediaBackend, VideoTrackInfo};
pub use scene::{ImageFilter, ImagePosition, SceneCompositor};
pub use session::{Command, Notification, Session};
pub use timeline::{ImageId, SegmentId, Timeline, TimelineEvent};
