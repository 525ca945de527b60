//! Composition of decoded frames onto the output canvas.
//!
//! Every frame goes through the same pipeline: clear, draw the video frame
//! letterboxed, draw the attached images at their anchors, draw the optional
//! watermark, then run the segment's filter over the whole canvas.

use std::fmt;
use std::str::FromStr;

use image::imageops::{overlay, resize, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::{timeline::ImageSegment, ClipCraftError};

mod filters;
mod watermark;

pub use filters::ImageFilter;
pub use watermark::Watermark;

/// Anchor of an image overlay on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePosition {
    Top,
    Right,
    Bottom,
    Left,
    #[default]
    Center,
}

impl ImagePosition {
    pub const ALL: [ImagePosition; 5] = [
        ImagePosition::Top,
        ImagePosition::Right,
        ImagePosition::Bottom,
        ImagePosition::Left,
        ImagePosition::Center,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePosition::Top => "top",
            ImagePosition::Right => "right",
            ImagePosition::Bottom => "bottom",
            ImagePosition::Left => "left",
            ImagePosition::Center => "center",
        }
    }

    /// Top-left corner of an `image` sized overlay on a `canvas` sized
    /// surface. May be negative when the image is larger than the canvas.
    pub fn offset(&self, canvas: (u32, u32), image: (u32, u32)) -> (i64, i64) {
        let (cw, ch) = (i64::from(canvas.0), i64::from(canvas.1));
        let (iw, ih) = (i64::from(image.0), i64::from(image.1));
        match self {
            ImagePosition::Top | ImagePosition::Left => (0, 0),
            ImagePosition::Right => (cw - iw, 0),
            ImagePosition::Bottom => (0, ch - ih),
            ImagePosition::Center => ((cw - iw) / 2, (ch - ih) / 2),
        }
    }
}

impl fmt::Display for ImagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImagePosition {
    type Err = ClipCraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImagePosition::ALL
            .into_iter()
            .find(|position| position.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ClipCraftError::msg(format!("unknown image position `{s}`")))
    }
}

#[derive(Debug, Clone)]
pub struct SceneCompositor {
    width: u32,
    height: u32,
    watermark: Option<Watermark>,
}

impl SceneCompositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            watermark: None,
        }
    }

    pub fn with_watermark(mut self, watermark: Option<Watermark>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn compose(
        &self,
        frame: &RgbaImage,
        images: &[&ImageSegment],
        filter: ImageFilter,
    ) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 0]));

        self.draw_frame(&mut canvas, frame);
        for image in images {
            let (x, y) = image
                .position
                .offset(self.size(), image.bitmap.dimensions());
            overlay(&mut canvas, &image.bitmap, x, y);
        }
        if let Some(watermark) = &self.watermark {
            watermark.draw(&mut canvas);
        }
        filter.apply(&mut canvas);
        canvas
    }

    fn draw_frame(&self, canvas: &mut RgbaImage, frame: &RgbaImage) {
        let Some((width, height)) = fit_within(frame.dimensions(), self.size()) else {
            return;
        };
        let (x, y) = ImagePosition::Center.offset(self.size(), (width, height));
        if (width, height) == frame.dimensions() {
            overlay(canvas, frame, x, y);
        } else {
            let scaled = resize(frame, width, height, FilterType::Triangle);
            overlay(canvas, &scaled, x, y);
        }
    }
}

/// Size of `source` scaled by `min(W/w, H/h)` so it fills `bounds` on one
/// axis with its aspect ratio kept.
fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> Option<(u32, u32)> {
    let (sw, sh) = source;
    let (bw, bh) = bounds;
    if sw == 0 || sh == 0 || bw == 0 || bh == 0 {
        return None;
    }
    let scale = (f64::from(bw) / f64::from(sw)).min(f64::from(bh) / f64::from(sh));
    let width = (f64::from(sw) * scale).round().clamp(1.0, f64::from(bw)) as u32;
    let height = (f64::from(sh) * scale).round().clamp(1.0, f64::from(bh)) as u32;
    Some((width, height))
}
