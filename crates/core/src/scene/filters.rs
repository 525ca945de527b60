use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::ClipCraftError;

/// Whole-canvas color filter. Alpha is never modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFilter {
    #[default]
    None,
    Grayscale,
    Sepia,
    Invert,
    Brightness,
    Darken,
}

const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

impl ImageFilter {
    pub const ALL: [ImageFilter; 6] = [
        ImageFilter::None,
        ImageFilter::Grayscale,
        ImageFilter::Sepia,
        ImageFilter::Invert,
        ImageFilter::Brightness,
        ImageFilter::Darken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFilter::None => "none",
            ImageFilter::Grayscale => "grayscale",
            ImageFilter::Sepia => "sepia",
            ImageFilter::Invert => "invert",
            ImageFilter::Brightness => "brightness",
            ImageFilter::Darken => "darken",
        }
    }

    pub fn apply(&self, canvas: &mut RgbaImage) {
        if *self == ImageFilter::None {
            return;
        }
        for pixel in canvas.pixels_mut() {
            let [r, g, b, _] = pixel.0;
            let rgb = self.map(r, g, b);
            pixel.0[..3].copy_from_slice(&rgb);
        }
    }

    fn map(&self, r: u8, g: u8, b: u8) -> [u8; 3] {
        match self {
            ImageFilter::None => [r, g, b],
            ImageFilter::Grayscale => {
                let mean = clamp_channel((f32::from(r) + f32::from(g) + f32::from(b)) / 3.0);
                [mean; 3]
            }
            ImageFilter::Sepia => SEPIA.map(|[kr, kg, kb]| {
                clamp_channel(f32::from(r) * kr + f32::from(g) * kg + f32::from(b) * kb)
            }),
            ImageFilter::Invert => [255 - r, 255 - g, 255 - b],
            ImageFilter::Brightness => [r, g, b].map(|c| clamp_channel(f32::from(c) * 1.5)),
            ImageFilter::Darken => [r, g, b].map(|c| clamp_channel(f32::from(c) * 0.5)),
        }
    }
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

impl fmt::Display for ImageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFilter {
    type Err = ClipCraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageFilter::ALL
            .into_iter()
            .find(|filter| filter.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ClipCraftError::msg(format!("unknown filter `{s}`")))
    }
}
