//! Source metadata and the heuristics derived from it

use serde::{Deserialize, Serialize};

/// Frame rate assumed until the background sniff resolves
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Bits-per-pixel ratio (kbps per pixel, scaled by 1000) above which content counts as high motion
pub const MOTION_BITS_PER_PIXEL_THRESHOLD: f64 = 0.1;

/// Raw source bitrate above which content counts as high motion
pub const MOTION_BITRATE_THRESHOLD_KBPS: u32 = 3000;

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// Round each dimension down to an even value, never below 2
    pub fn even(&self) -> Self {
        Self {
            width: force_even(self.width),
            height: force_even(self.height),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decrement odd values; encoders reject odd chroma-subsampled dimensions
pub fn force_even(value: u32) -> u32 {
    let even = value - value % 2;
    even.max(2)
}

/// Codec guessed from the filename, informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecHint {
    H264,
    H265,
    Vp9,
    Av1,
    Unknown,
}

impl CodecHint {
    pub fn from_filename(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if ["h265", "hevc", "x265"].iter().any(|t| lower.contains(t)) {
            CodecHint::H265
        } else if ["h264", "x264", "avc"].iter().any(|t| lower.contains(t)) {
            CodecHint::H264
        } else if lower.contains("vp9") {
            CodecHint::Vp9
        } else if lower.contains("av1") {
            CodecHint::Av1
        } else {
            CodecHint::Unknown
        }
    }
}

/// Source bitrate estimate from container size and duration
pub fn estimate_bitrate_kbps(file_size_bytes: u64, duration_seconds: f64) -> u32 {
    if duration_seconds <= 0.0 {
        return 0;
    }
    let kbps = file_size_bytes as f64 * 8.0 / duration_seconds / 1000.0;
    kbps.round().min(u32::MAX as f64) as u32
}

/// Cheap stand-in for motion analysis
pub fn is_high_motion(bitrate_kbps: u32, resolution: Resolution) -> bool {
    let pixels = resolution.pixels().max(1) as f64;
    let bits_per_pixel = bitrate_kbps as f64 / pixels * 1000.0;
    bits_per_pixel > MOTION_BITS_PER_PIXEL_THRESHOLD || bitrate_kbps > MOTION_BITRATE_THRESHOLD_KBPS
}

/// Probed characteristics of a video source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub duration_seconds: f64,
    pub resolution: Resolution,
    pub estimated_source_bitrate_kbps: u32,
    pub frame_rate: u32,
    pub has_high_motion: bool,
    pub codec_hint: CodecHint,
}

impl SourceMetadata {
    /// Build metadata from raw probe values, deriving bitrate, motion and codec hint
    pub fn derive(
        filename: &str,
        file_size_bytes: u64,
        duration_seconds: f64,
        resolution: Resolution,
        frame_rate: Option<u32>,
    ) -> Self {
        let estimated_source_bitrate_kbps = estimate_bitrate_kbps(file_size_bytes, duration_seconds);

        Self {
            duration_seconds,
            resolution,
            estimated_source_bitrate_kbps,
            frame_rate: frame_rate.filter(|fps| *fps > 0).unwrap_or(DEFAULT_FRAME_RATE),
            has_high_motion: is_high_motion(estimated_source_bitrate_kbps, resolution),
            codec_hint: CodecHint::from_filename(filename),
        }
    }

    /// Copy with a sniffed frame rate
    pub fn with_frame_rate(&self, frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            ..self.clone()
        }
    }
}

/// Probed characteristics of an audio-only source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub duration_seconds: f64,
    pub estimated_source_bitrate_kbps: u32,
}

impl AudioMetadata {
    pub fn derive(file_size_bytes: u64, duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            estimated_source_bitrate_kbps: estimate_bitrate_kbps(file_size_bytes, duration_seconds),
        }
    }
}

/// Probed characteristics of a still image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub resolution: Resolution,
}

/// Metadata attached to a job, tagged by media kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaMetadata {
    Video(SourceMetadata),
    Audio(AudioMetadata),
    Image(ImageMetadata),
}
