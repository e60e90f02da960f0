/// Media Squeeze - target-size media compressor
///
/// Picks encoder settings that land a video, audio or image file near a
/// target size and drives a batch of files through a shared FFmpeg engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod media;
pub mod metadata;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod settings;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::engine::{Engine, EngineEvent, EngineHandle, EngineState, FfmpegEngine};
pub use crate::error::{EngineError, ProbeError, QueueError, ValidationError};
pub use crate::job::{JobId, JobSnapshot, JobStatus, RunSummary};
pub use crate::media::{MediaKind, SourceFile};
pub use crate::metadata::{MediaMetadata, Resolution, SourceMetadata};
pub use crate::orchestrator::{EnqueueReport, Orchestrator, RunOptions};
pub use crate::probe::{FfprobeProber, Prober};
pub use crate::progress::RunProgress;
pub use crate::settings::{compute_settings, CompressionSettings, SizePreset};
