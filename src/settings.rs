//! Target-size driven encoder settings
//!
//! Everything here is pure: the same target, metadata and flags always give
//! the same settings. Out-of-range inputs are clamped, never rejected.

use serde::{Deserialize, Serialize};

use crate::media::ImageFormat;
use crate::metadata::{force_even, AudioMetadata, ImageMetadata, Resolution, SourceMetadata};

pub const MB: u64 = 1024 * 1024;

/// Lowest video bitrate ever emitted
pub const MIN_VIDEO_BITRATE_KBPS: u32 = 200;

/// Ceiling for the audio track of a video
pub const MAX_AUDIO_BITRATE_KBPS: u32 = 128;

/// Share of the total budget granted to audio
pub const AUDIO_BUDGET_SHARE: f64 = 0.12;

pub const HIGH_MOTION_EFFICIENCY: f64 = 0.80;
pub const STATIC_EFFICIENCY: f64 = 0.85;

/// Bounds for audio-only output
pub const AUDIO_ONLY_MIN_KBPS: u32 = 32;
pub const AUDIO_ONLY_MAX_KBPS: u32 = 320;

/// Size bucket that fixes resolution cap, CRF and frame-rate cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeTier {
    /// Up to 8 MB
    Maximum,
    /// Up to 25 MB
    High,
    /// Up to 50 MB
    Balanced,
    /// Above 50 MB
    Light,
}

impl SizeTier {
    /// Ascending thresholds, first match wins
    pub fn for_target(target_size_bytes: u64) -> Self {
        if target_size_bytes <= 8 * MB {
            SizeTier::Maximum
        } else if target_size_bytes <= 25 * MB {
            SizeTier::High
        } else if target_size_bytes <= 50 * MB {
            SizeTier::Balanced
        } else {
            SizeTier::Light
        }
    }

    /// Widest allowed output. `Light` carries no cap at all.
    pub fn max_width(&self, high_motion: bool) -> Option<u32> {
        match (self, high_motion) {
            (SizeTier::Maximum, true) => Some(1280),
            (SizeTier::Maximum, false) => Some(854),
            (SizeTier::High, true) => Some(1440),
            (SizeTier::High, false) => Some(1280),
            (SizeTier::Balanced, _) => Some(1920),
            (SizeTier::Light, _) => None,
        }
    }

    /// Motion content gets the lower (higher quality) CRF
    pub fn crf(&self, high_motion: bool) -> u32 {
        let (motion, still) = match self {
            SizeTier::Maximum => (20, 22),
            SizeTier::High => (16, 18),
            SizeTier::Balanced => (14, 16),
            SizeTier::Light => (12, 14),
        };
        if high_motion {
            motion
        } else {
            still
        }
    }

    pub fn fps_cap(&self) -> u32 {
        match self {
            SizeTier::Maximum => 24,
            _ => 30,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SizeTier::Maximum => "Maximum compression",
            SizeTier::High => "High compression",
            SizeTier::Balanced => "Balanced",
            SizeTier::Light => "Light compression",
        }
    }
}

/// User-facing target size choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizePreset {
    Maximum,
    High,
    Balanced,
    Light,
    Custom(u64),
}

impl SizePreset {
    pub fn target_bytes(&self) -> u64 {
        match self {
            SizePreset::Maximum => 8 * MB,
            SizePreset::High => 25 * MB,
            SizePreset::Balanced => 50 * MB,
            SizePreset::Light => 100 * MB,
            SizePreset::Custom(bytes) => (*bytes).max(1),
        }
    }

    /// Parse the CLI spelling of a preset
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "maximum" | "max" => Some(SizePreset::Maximum),
            "high" => Some(SizePreset::High),
            "balanced" => Some(SizePreset::Balanced),
            "light" => Some(SizePreset::Light),
            _ => None,
        }
    }
}

/// Concrete encoder parameters for one video job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub target_resolution: Resolution,
    pub constant_rate_factor: u32,
    pub buffer_size_kbps: u32,
    pub target_frame_rate: u32,
    pub tier: SizeTier,
}

/// Total bitrate budget in kbps for a target size over a duration
fn total_bitrate_kbps(target_size_bytes: u64, duration_seconds: f64, efficiency: f64) -> u32 {
    let duration = if duration_seconds > 0.0 { duration_seconds } else { 1.0 };
    let kbps = target_size_bytes as f64 * 8.0 / duration / 1000.0 * efficiency;
    kbps.round().clamp(0.0, u32::MAX as f64) as u32
}

/// Derive video encoder settings from a target size
pub fn compute_settings(
    target_size_bytes: u64,
    meta: &SourceMetadata,
    preserve_frame_rate: bool,
) -> CompressionSettings {
    let motion = meta.has_high_motion;
    let efficiency = if motion { HIGH_MOTION_EFFICIENCY } else { STATIC_EFFICIENCY };

    let total = total_bitrate_kbps(target_size_bytes, meta.duration_seconds, efficiency);
    let audio = MAX_AUDIO_BITRATE_KBPS.min((total as f64 * AUDIO_BUDGET_SHARE).round() as u32);
    let video = MIN_VIDEO_BITRATE_KBPS.max(total.saturating_sub(audio));

    let tier = SizeTier::for_target(target_size_bytes);
    let target_resolution = fit_width(meta.resolution, tier.max_width(motion));

    let target_frame_rate = if preserve_frame_rate {
        meta.frame_rate
    } else {
        meta.frame_rate.min(tier.fps_cap())
    };

    let buffer_multiplier = if motion { 3 } else { 2 };

    CompressionSettings {
        video_bitrate_kbps: video,
        audio_bitrate_kbps: audio,
        target_resolution,
        constant_rate_factor: tier.crf(motion),
        buffer_size_kbps: video.saturating_mul(buffer_multiplier),
        target_frame_rate,
        tier,
    }
}

/// Downscale to a maximum width keeping the aspect ratio; never upscale
fn fit_width(source: Resolution, max_width: Option<u32>) -> Resolution {
    match max_width {
        Some(max) if source.width > max => {
            let width = force_even(max);
            let height = (width as f64 / source.aspect_ratio()).round() as u32;
            Resolution::new(width, force_even(height))
        }
        _ => source.even(),
    }
}

/// Encoder parameters for an audio-only job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub bitrate_kbps: u32,
}

/// Audio-only jobs spend the whole budget on the audio track
pub fn compute_audio_settings(target_size_bytes: u64, meta: &AudioMetadata) -> AudioSettings {
    let total = total_bitrate_kbps(target_size_bytes, meta.duration_seconds, STATIC_EFFICIENCY);
    AudioSettings {
        bitrate_kbps: total.clamp(AUDIO_ONLY_MIN_KBPS, AUDIO_ONLY_MAX_KBPS),
    }
}

/// Encoder parameters for an image job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// 1 (smallest) to 100 (best)
    pub quality: u8,
    pub target_resolution: Option<Resolution>,
    pub format: ImageFormat,
}

/// Quality-driven image plan; downscales only when the longest edge exceeds `max_dimension`
pub fn compute_image_settings(
    quality: u8,
    meta: Option<&ImageMetadata>,
    format: ImageFormat,
    max_dimension: Option<u32>,
) -> ImageSettings {
    let target_resolution = match (meta, max_dimension) {
        (Some(meta), Some(max)) => {
            let source = meta.resolution;
            let longest = source.width.max(source.height);
            if longest > max {
                let scale = max as f64 / longest as f64;
                let width = (source.width as f64 * scale).round() as u32;
                let height = (source.height as f64 * scale).round() as u32;
                Some(Resolution::new(width, height).even())
            } else {
                None
            }
        }
        _ => None,
    };

    ImageSettings {
        quality: quality.clamp(1, 100),
        target_resolution,
        format,
    }
}

/// Per-kind plan handed to the argument renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPlan {
    Video(CompressionSettings),
    Audio(AudioSettings),
    Image(ImageSettings),
}
