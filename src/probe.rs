//! Metadata probing collaborators

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::ProbeError;
use crate::media::{MediaKind, SourceContent, SourceFile};
use crate::metadata::{AudioMetadata, ImageMetadata, MediaMetadata, Resolution, SourceMetadata};

/// Raw values from a lightweight decode
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub duration_seconds: Option<f64>,
    pub resolution: Option<Resolution>,
}

impl ProbeReport {
    /// Turn raw probe values into metadata for `kind`; the frame rate starts at the default
    pub fn into_metadata(self, file: &SourceFile, kind: MediaKind) -> Result<MediaMetadata, ProbeError> {
        let duration = || {
            self.duration_seconds
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| ProbeError::InvalidMetadata(format!("{} has no usable duration", file.name())))
        };
        let resolution = || {
            self.resolution
                .filter(|r| r.width > 0 && r.height > 0)
                .ok_or_else(|| ProbeError::InvalidMetadata(format!("{} has no usable resolution", file.name())))
        };

        match kind {
            MediaKind::Video => Ok(MediaMetadata::Video(SourceMetadata::derive(
                file.name(),
                file.size_bytes(),
                duration()?,
                resolution()?.even(),
                None,
            ))),
            MediaKind::Audio => Ok(MediaMetadata::Audio(AudioMetadata::derive(
                file.size_bytes(),
                duration()?,
            ))),
            MediaKind::Image => Ok(MediaMetadata::Image(ImageMetadata {
                resolution: resolution()?,
            })),
        }
    }
}

/// Probes source files for duration, resolution and frame rate
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, file: &SourceFile, kind: MediaKind) -> Result<ProbeReport, ProbeError>;

    /// Best-effort real frame rate from a one-frame decode
    async fn sniff_frame_rate(&self, _file: &SourceFile) -> Option<u32> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Parse "30000/1001" or "25" into whole frames per second
pub fn parse_frame_rate(value: &str) -> Option<u32> {
    let fps = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };
    if fps.is_finite() && fps >= 1.0 {
        Some(fps.round() as u32)
    } else {
        None
    }
}

/// Parse ffprobe JSON into a report
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeReport, ProbeError> {
    let output: FfprobeOutput = serde_json::from_str(json)?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration_seconds = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| output.streams.iter().find_map(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    let resolution = video.and_then(|s| match (s.width, s.height) {
        (Some(w), Some(h)) => Some(Resolution::new(w, h)),
        _ => None,
    });

    Ok(ProbeReport {
        duration_seconds,
        resolution,
    })
}

/// Prober backed by the `ffprobe` binary
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: String,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    async fn run(&self, args: &[&str], path: &Path) -> Result<String, ProbeError> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args(args)
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Tool(format!("ffprobe failed for {}: {}", path.display(), stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

/// In-memory sources are staged to a temporary file for the probe tool
enum Staged {
    Existing(PathBuf),
    Temporary(NamedTempFile),
}

impl Staged {
    async fn from_source(file: &SourceFile) -> Result<Self, ProbeError> {
        match file.content() {
            SourceContent::Disk(path) => Ok(Staged::Existing(path.clone())),
            SourceContent::Memory(bytes) => {
                let temp = tempfile::Builder::new()
                    .prefix("probe-")
                    .suffix(&format!(".{}", file.extension()))
                    .tempfile()?;
                tokio::fs::write(temp.path(), bytes).await?;
                Ok(Staged::Temporary(temp))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            Staged::Existing(path) => path,
            Staged::Temporary(temp) => temp.path(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, file: &SourceFile, kind: MediaKind) -> Result<ProbeReport, ProbeError> {
        let staged = Staged::from_source(file).await?;
        let json = self
            .run(&["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"], staged.path())
            .await?;
        let report = parse_ffprobe_json(&json)?;

        info!(
            "📊 Probed {} {}: {:?}s, {:?}",
            kind.label(),
            file.name(),
            report.duration_seconds,
            report.resolution
        );
        Ok(report)
    }

    async fn sniff_frame_rate(&self, file: &SourceFile) -> Option<u32> {
        let staged = Staged::from_source(file).await.ok()?;
        let json = self
            .run(
                &[
                    "-v", "quiet",
                    "-print_format", "json",
                    "-select_streams", "v:0",
                    "-read_intervals", "%+#1",
                    "-show_entries", "stream=avg_frame_rate,r_frame_rate,codec_type",
                ],
                staged.path(),
            )
            .await
            .ok()?;

        let output: FfprobeOutput = serde_json::from_str(&json).ok()?;
        let stream = output.streams.first()?;
        let fps = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

        debug!("Sniffed frame rate for {}: {:?}", file.name(), fps);
        fps
    }
}
