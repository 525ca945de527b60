use image::{Rgba, RgbaImage};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Glyph advance in font cells, including one cell of spacing.
const ADVANCE: u32 = GLYPH_WIDTH + 1;
const INK: Rgba<u8> = Rgba([255, 255, 255, 128]);

/// Centered text stamp drawn on exported frames.
///
/// Text is rendered with a built-in 5x7 bitmap font covering `A-Z`, `0-9`
/// and space; lowercase letters are drawn in uppercase and any other
/// character advances like a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    text: String,
}

impl Watermark {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().to_ascii_uppercase(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn draw(&self, canvas: &mut RgbaImage) {
        let (width, height) = canvas.dimensions();
        let columns = self.text.chars().count() as u32 * ADVANCE;
        if columns == 0 || width == 0 || height == 0 {
            return;
        }

        let cell = (height / 90).min(width / columns).max(1);
        let text_width = (columns - 1) * cell;
        let text_height = GLYPH_HEIGHT * cell;
        let origin_x = i64::from(width) / 2 - i64::from(text_width) / 2;
        let origin_y = i64::from(height) / 2 - i64::from(text_height) / 2;

        for (index, ch) in self.text.chars().enumerate() {
            let rows = glyph(ch);
            let glyph_x = origin_x + i64::from(index as u32 * ADVANCE * cell);
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let x = glyph_x + i64::from(col * cell);
                    let y = origin_y + i64::from(row as u32 * cell);
                    fill_cell(canvas, x, y, cell);
                }
            }
        }
    }
}

fn fill_cell(canvas: &mut RgbaImage, x: i64, y: i64, size: u32) {
    let (width, height) = canvas.dimensions();
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + i64::from(size)).min(i64::from(width));
    let y1 = (y + i64::from(size)).min(i64::from(height));
    for py in y0..y1 {
        for px in x0..x1 {
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            *pixel = composite_over(*pixel, INK);
        }
    }
}

/// Source-over with straight alpha. An opaque destination stays opaque.
fn composite_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = u32::from(src[3]);
    let inv_sa = 255 - sa;
    let mix = |s: u8, d: u8| ((u32::from(s) * sa + u32::from(d) * inv_sa) / 255) as u8;
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (sa + u32::from(dst[3]) * inv_sa / 255).min(255) as u8,
    ])
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        _ => [0; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn stamps_only_the_middle_band() {
        let mut canvas = RgbaImage::from_pixel(320, 180, BLACK);
        Watermark::new("Clip Craft").draw(&mut canvas);

        assert_eq!(*canvas.get_pixel(0, 0), BLACK);
        assert_eq!(*canvas.get_pixel(319, 179), BLACK);
        assert_eq!(*canvas.get_pixel(160, 20), BLACK);

        let inked: Vec<(u32, u32)> = canvas
            .enumerate_pixels()
            .filter(|(_, _, pixel)| **pixel != BLACK)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!inked.is_empty());
        assert!(inked.iter().all(|&(_, y)| (83..97).contains(&y)));

        let (_, _, sample) = canvas
            .enumerate_pixels()
            .find(|(_, _, pixel)| **pixel != BLACK)
            .unwrap();
        assert!(sample[0] > 100 && sample[0] < 160);
        assert_eq!(sample[3], 255);
    }

    #[test]
    fn ink_keeps_opaque_pixels_opaque() {
        assert_eq!(composite_over(BLACK, INK), Rgba([128, 128, 128, 255]));
        assert_eq!(
            composite_over(Rgba([0, 0, 0, 0]), INK),
            Rgba([128, 128, 128, 128])
        );
    }

    #[test]
    fn uppercases_text() {
        assert_eq!(Watermark::new("Clip Craft").text(), "CLIP CRAFT");
    }

    #[test]
    fn tiny_canvases_are_clipped() {
        let mut canvas = RgbaImage::from_pixel(3, 2, BLACK);
        Watermark::new("CLIP CRAFT").draw(&mut canvas);
        assert_eq!(canvas.dimensions(), (3, 2));
    }
}
