//! Type definitions for the compression domain.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::domains::device::PerformanceTier;

/// Inputs above this are rejected outright, regardless of tier.
pub const ABSOLUTE_INPUT_CEILING: u64 = 50 * 1024 * 1024;

/// Quality floor for the re-encode loop
pub const QUALITY_FLOOR: f32 = 0.30;

/// Quality reduction applied per re-encode iteration
pub const QUALITY_STEP: f32 = 0.15;

/// Tier-derived parameters for one compression run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Output width bound; aspect ratio is preserved
    pub max_width: u32,
    /// Quality band the content analysis may move within (min, max)
    pub quality_band: (f32, f32),
    /// Encoded output must fit under this many bytes (or hit the floor)
    pub byte_ceiling: u64,
    /// Inputs above this are rejected before any processing
    pub input_ceiling: u64,
    /// Insert cooperative yields between pipeline stages
    pub cooperative_yield: bool,
}

impl CompressionSettings {
    pub fn for_tier(tier: PerformanceTier) -> Self {
        match tier {
            PerformanceTier::High => Self {
                max_width: 1920,
                quality_band: (0.80, 0.95),
                byte_ceiling: 1_228_800,
                input_ceiling: ABSOLUTE_INPUT_CEILING,
                cooperative_yield: false,
            },
            PerformanceTier::Medium => Self {
                max_width: 1920,
                quality_band: (0.70, 0.85),
                byte_ceiling: 819_200,
                input_ceiling: 30 * 1024 * 1024,
                cooperative_yield: false,
            },
            PerformanceTier::Low => Self {
                max_width: 1920,
                quality_band: (0.60, 0.75),
                byte_ceiling: 512_000,
                input_ceiling: 15 * 1024 * 1024,
                cooperative_yield: true,
            },
        }
    }

    /// Constrained tiers trade resampling quality for less CPU time.
    pub fn resize_filter(&self) -> FilterType {
        if self.cooperative_yield {
            FilterType::Triangle
        } else {
            FilterType::Lanczos3
        }
    }
}

/// Result of one compression run
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Quality the final encode actually used, 0.0..=1.0
    pub quality: f32,
    pub content_type: &'static str,
}
