//! Adaptive image compression pipeline.
//!
//! Stages: size preflight, decode, resize, sampled content analysis, then a
//! quality-stepping JPEG encode loop bounded by the tier's byte ceiling. On
//! constrained tiers each stage runs in its own blocking task with a
//! cooperative yield in between, so one large photo cannot monopolize the
//! runtime.

use image::codecs::jpeg::JpegEncoder;
use image::imageops;
use image::{GenericImageView, RgbImage};
use std::sync::Arc;
use tokio::task;

use super::analysis::ContentStats;
use super::types::{
    CompressedImage, CompressionSettings, ABSOLUTE_INPUT_CEILING, QUALITY_FLOOR, QUALITY_STEP,
};
use crate::domains::device::DeviceProfile;
use crate::errors::UploadError;

/// Compress an image according to the device profile's tier settings.
pub async fn compress_image(
    bytes: Vec<u8>,
    profile: &DeviceProfile,
) -> Result<CompressedImage, UploadError> {
    let settings = CompressionSettings::for_tier(profile.tier);

    // Preflight before any decoding work. The absolute ceiling catches
    // hopeless inputs on every tier; the tier ceiling reports "too large
    // for this device" on constrained hardware.
    let input_size = bytes.len() as u64;
    if input_size > ABSOLUTE_INPUT_CEILING {
        return Err(UploadError::SizeLimitExceeded {
            size_bytes: input_size,
            limit_bytes: ABSOLUTE_INPUT_CEILING,
            scope: "absolute",
        });
    }
    if input_size > settings.input_ceiling {
        return Err(UploadError::SizeLimitExceeded {
            size_bytes: input_size,
            limit_bytes: settings.input_ceiling,
            scope: "device tier",
        });
    }

    let cooperative = settings.cooperative_yield;

    let decoded = run_stage(cooperative, move || {
        image::load_from_memory(&bytes)
            .map_err(|e| UploadError::Processing(format!("Failed to decode image: {}", e)))
    })
    .await?;

    let (source_width, source_height) = decoded.dimensions();
    let (target_width, target_height) =
        bounded_dimensions(source_width, source_height, settings.max_width);

    let filter = settings.resize_filter();
    let resized: Arc<RgbImage> = Arc::new(
        run_stage(cooperative, move || {
            let rgb = decoded.to_rgb8();
            if (target_width, target_height) == (source_width, source_height) {
                Ok(rgb)
            } else {
                Ok(imageops::resize(&rgb, target_width, target_height, filter))
            }
        })
        .await?,
    );

    let stats_image = Arc::clone(&resized);
    let stats = run_stage(cooperative, move || Ok(ContentStats::sample(&stats_image))).await?;

    let mut quality = stats.quality_within(settings.quality_band);
    log::debug!(
        "compression: {}x{} -> {}x{}, complexity {:.2}, starting quality {:.2}",
        source_width,
        source_height,
        target_width,
        target_height,
        stats.complexity(),
        quality
    );

    loop {
        let encode_image = Arc::clone(&resized);
        let q = quality;
        let encoded =
            run_stage(cooperative, move || encode_jpeg(&encode_image, q)).await?;

        if encoded.len() as u64 <= settings.byte_ceiling || quality <= QUALITY_FLOOR {
            if encoded.len() as u64 > settings.byte_ceiling {
                log::warn!(
                    "compression: {} bytes still over the {} byte ceiling at floor quality",
                    encoded.len(),
                    settings.byte_ceiling
                );
            }
            return Ok(CompressedImage {
                bytes: encoded,
                width: target_width,
                height: target_height,
                quality,
                content_type: "image/jpeg",
            });
        }

        quality = (quality - QUALITY_STEP).max(QUALITY_FLOOR);
    }
}

/// Bound width while preserving aspect ratio. Never upscales.
fn bounded_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }
    let scaled_height =
        ((height as u64 * max_width as u64) as f64 / width as f64).round() as u32;
    (max_width, scaled_height.max(1))
}

fn encode_jpeg(image: &RgbImage, quality: f32) -> Result<Vec<u8>, UploadError> {
    let mut output = Vec::new();
    let mut encoder =
        JpegEncoder::new_with_quality(&mut output, (quality * 100.0).round() as u8);
    encoder
        .encode_image(image)
        .map_err(|e| UploadError::Processing(format!("JPEG encoding error: {}", e)))?;
    Ok(output)
}

async fn run_stage<T, F>(cooperative: bool, f: F) -> Result<T, UploadError>
where
    F: FnOnce() -> Result<T, UploadError> + Send + 'static,
    T: Send + 'static,
{
    let result = task::spawn_blocking(f)
        .await
        .map_err(|e| UploadError::Processing(format!("Task join error: {}", e)))?;
    if cooperative {
        task::yield_now().await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::device::{
        BrowserFamily, ConnectionType, DeviceProfile, PerformanceTier,
    };
    use image::Rgb;

    fn profile(tier: PerformanceTier) -> DeviceProfile {
        DeviceProfile {
            tier,
            memory_mb: Some(8192),
            logical_cores: 8,
            is_mobile: false,
            browser: BrowserFamily::Chromium,
            connection: ConnectionType::Wifi,
        }
    }

    fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x % 256) as u8,
                (y % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        });
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, 95)
            .encode_image(&image)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_high_tier_bounds_width_and_quality() {
        let input = gradient_jpeg(2000, 1500);
        let out = compress_image(input, &profile(PerformanceTier::High))
            .await
            .unwrap();

        assert_eq!(out.width, 1920);
        assert_eq!(out.height, 1440);
        assert!((0.30..=0.95).contains(&out.quality));
        assert_eq!(out.content_type, "image/jpeg");
        // JPEG SOI marker
        assert_eq!(&out.bytes[0..2], &[0xFF, 0xD8]);
        assert!(
            out.bytes.len() as u64
                <= CompressionSettings::for_tier(PerformanceTier::High).byte_ceiling
                || out.quality <= QUALITY_FLOOR
        );
    }

    #[tokio::test]
    async fn test_smooth_content_keeps_high_quality() {
        let image = RgbImage::from_pixel(1000, 800, Rgb([120, 130, 140]));
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, 95)
            .encode_image(&image)
            .unwrap();

        let out = compress_image(bytes, &profile(PerformanceTier::High))
            .await
            .unwrap();
        // A flat image is trivially small, so the biased starting quality
        // survives the ceiling loop untouched.
        assert!(out.quality >= 0.90);
    }

    #[tokio::test]
    async fn test_small_images_are_not_upscaled() {
        let input = gradient_jpeg(800, 600);
        let out = compress_image(input, &profile(PerformanceTier::High))
            .await
            .unwrap();
        assert_eq!((out.width, out.height), (800, 600));
    }

    #[tokio::test]
    async fn test_low_tier_rejects_oversized_input_before_decoding() {
        let oversized = vec![0u8; 16 * 1024 * 1024];
        let err = compress_image(oversized, &profile(PerformanceTier::Low))
            .await
            .unwrap_err();
        match err {
            UploadError::SizeLimitExceeded {
                limit_bytes, scope, ..
            } => {
                assert_eq!(limit_bytes, 15 * 1024 * 1024);
                assert_eq!(scope, "device tier");
            }
            other => panic!("expected size limit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_absolute_ceiling_applies_on_every_tier() {
        let oversized = vec![0u8; (ABSOLUTE_INPUT_CEILING + 1) as usize];
        let err = compress_image(oversized, &profile(PerformanceTier::High))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::SizeLimitExceeded {
                scope: "absolute",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_corrupt_input_is_a_processing_error() {
        let err = compress_image(b"definitely not an image".to_vec(), &profile(PerformanceTier::Low))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Processing(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_low_tier_still_processes_within_its_ceiling() {
        let input = gradient_jpeg(2400, 1600);
        let out = compress_image(input, &profile(PerformanceTier::Low))
            .await
            .unwrap();
        assert_eq!(out.width, 1920);
        assert!((QUALITY_FLOOR..=0.75).contains(&out.quality));
    }
}
