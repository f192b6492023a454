//! Sampled content analysis used to bias the encode quality.

use image::RgbImage;

/// Statistics estimated from a pixel subset.
///
/// All values are normalized to 0.0..=1.0.
#[derive(Debug, Clone, Copy)]
pub struct ContentStats {
    pub brightness: f32,
    pub contrast: f32,
    pub edge_density: f32,
}

/// Luma delta (0..255 scale) above which neighboring samples count as an edge
const EDGE_THRESHOLD: f32 = 25.0;

/// Sample roughly this many pixels regardless of image size
const TARGET_SAMPLES: u32 = 10_000;

fn luma(image: &RgbImage, x: u32, y: u32) -> f32 {
    let p = image.get_pixel(x, y);
    0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32
}

impl ContentStats {
    /// Estimate brightness, contrast and local complexity from a grid of
    /// samples rather than every pixel.
    pub fn sample(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        if width < 2 || height < 2 {
            return Self {
                brightness: 0.5,
                contrast: 0.0,
                edge_density: 0.0,
            };
        }

        let total = width as u64 * height as u64;
        let step = (((total / TARGET_SAMPLES as u64) as f64).sqrt() as u32).max(1);

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut edges = 0u32;
        let mut count = 0u32;

        let mut y = 0;
        while y < height - 1 {
            let mut x = 0;
            while x < width - 1 {
                let here = luma(image, x, y);
                sum += here as f64;
                sum_sq += (here as f64) * (here as f64);
                count += 1;

                // Right and down neighbors approximate local gradient
                if (luma(image, x + 1, y) - here).abs() > EDGE_THRESHOLD
                    || (luma(image, x, y + 1) - here).abs() > EDGE_THRESHOLD
                {
                    edges += 1;
                }

                x += step;
            }
            y += step;
        }

        if count == 0 {
            return Self {
                brightness: 0.5,
                contrast: 0.0,
                edge_density: 0.0,
            };
        }

        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);

        Self {
            brightness: (mean / 255.0) as f32,
            contrast: ((variance.sqrt() / 128.0) as f32).min(1.0),
            edge_density: edges as f32 / count as f32,
        }
    }

    /// Combined complexity signal: detailed, high-contrast content tolerates
    /// lower quality; smooth content shows artifacts first.
    pub fn complexity(&self) -> f32 {
        (self.edge_density * 1.5 + self.contrast * 0.5).min(1.0)
    }

    /// Pick an encode quality inside `band`, biased down as complexity rises.
    pub fn quality_within(&self, band: (f32, f32)) -> f32 {
        let (min, max) = band;
        (max - (max - min) * self.complexity()).clamp(min, max)
    }
}
