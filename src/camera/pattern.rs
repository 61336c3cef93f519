// Simulated camera: renders a test pattern and encodes it as JPEG

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};

use super::{CameraError, FrameSource};

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Test pattern: a square, a circle and a bar sweeping across the bottom so
/// a stalled stream is visible.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    quality: u8,
    frame_count: u64,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32, quality: u8) -> Result<Self, CameraError> {
        if width < 16 || height < 16 {
            return Err(CameraError::InvalidResolution { width, height });
        }
        Ok(Self {
            width,
            height,
            quality: quality.clamp(1, 100),
            frame_count: 0,
        })
    }

    fn render(&self) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let mut img = RgbImage::from_pixel(w, h, BACKGROUND);

        // Square outline in the upper-left quarter
        let (x0, y0, side) = (w / 6, h / 5, w.min(h) / 5);
        for i in 0..=side {
            for t in 0..2 {
                img.put_pixel(x0 + i, y0 + t, GREEN);
                img.put_pixel(x0 + i, y0 + side - t, GREEN);
                img.put_pixel(x0 + t, y0 + i, GREEN);
                img.put_pixel(x0 + side - t, y0 + i, GREEN);
            }
        }

        // Circle outline right of center
        let (cx, cy, r) = ((w * 5 / 8) as f32, (h / 2) as f32, (w.min(h) / 10) as f32);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
            if (d - r).abs() < 1.5 {
                *px = RED;
            }
        }

        // Sweeping bar, one step per frame
        let bar_w = (w / 16).max(1);
        let bar_x = ((self.frame_count * 4) % u64::from(w - bar_w)) as u32;
        for y in h - h / 10..h - h / 20 {
            for x in bar_x..bar_x + bar_w {
                img.put_pixel(x, y, WHITE);
            }
        }

        img
    }
}

impl FrameSource for TestPatternCamera {
    fn capture(&mut self) -> Result<Vec<u8>, CameraError> {
        let img = self.render();
        self.frame_count += 1;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            img.as_raw(),
            self.width,
            self.height,
            ColorType::Rgb8,
        )?;
        Ok(jpeg)
    }
}
