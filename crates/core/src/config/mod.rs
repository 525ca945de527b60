use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{media::raw::RAW_CODEC, ClipCraftError, Quality, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.playback.validate()?;
        self.export.validate()
    }
}

/// Decides whether a sliced resume re-decodes the chunks between the key
/// chunk and the resume point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumePolicy {
    /// Re-decode only when the previous engine state was a preview seek. A
    /// plain pause keeps the segment's decoder alive and continues from it.
    #[default]
    PreviewOnly,
    /// Reset the decoder and re-decode from the key chunk on every resume.
    Always,
}

/// Configuration of the interactive preview surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub fps: u32,
    /// Upper bound of decoded frames waiting to be presented.
    pub frame_queue_capacity: usize,
    pub resume_policy: ResumePolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1280,
            canvas_height: 720,
            fps: 30,
            frame_queue_capacity: 8,
            resume_policy: ResumePolicy::default(),
        }
    }
}

impl PlaybackConfig {
    fn validate(&self) -> Result<()> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(ClipCraftError::Config(
                "playback canvas width/height must be non-zero".to_string(),
            ));
        }
        if self.fps == 0 {
            return Err(ClipCraftError::Config("playback fps must be non-zero".to_string()));
        }
        if self.frame_queue_capacity == 0 {
            return Err(ClipCraftError::Config(
                "frame queue capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Codec requested from the media backend's encoder.
    pub codec: String,
    pub fps: u32,
    /// Every n-th output frame is encoded as a key frame.
    pub keyframe_interval: u64,
    pub watermark: Option<String>,
    pub default_quality: Quality,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            codec: RAW_CODEC.to_string(),
            fps: 30,
            keyframe_interval: 300,
            watermark: Some("CLIP CRAFT".to_string()),
            default_quality: Quality::default(),
        }
    }
}

impl ExportConfig {
    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(ClipCraftError::Config("export fps must be non-zero".to_string()));
        }
        if self.keyframe_interval == 0 {
            return Err(ClipCraftError::Config(
                "keyframe interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "playback": { "resume_policy": "always" } }"#).unwrap();

        assert_eq!(config.playback.resume_policy, ResumePolicy::Always);
        assert_eq!(config.playback.fps, 30);
        assert_eq!(config.export.keyframe_interval, 300);
        assert_eq!(config.export.default_quality, Quality::Hd);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_sized_canvas() {
        let mut config = AppConfig::default();
        config.playback.canvas_width = 0;

        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("canvas"));
    }
}
