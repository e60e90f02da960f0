use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::args::EncoderOptions;
use crate::media::AllowList;

/// 5 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Configuration for the media compressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Queue admission and probing
    pub queue: QueueConfig,

    /// Progress and ETA reporting
    pub progress: ProgressConfig,

    /// Media engine settings
    pub engine: EngineConfig,

    /// Image compression defaults
    pub image: ImageConfig,

    /// Output and logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Hard ceiling for a single file in bytes
    pub max_file_size: u64,

    /// How long a run waits for an in-flight probe before giving up on a job (seconds)
    pub probe_wait_seconds: u64,

    /// Accepted extensions per media kind
    pub allow_list: AllowList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// ETA is withheld until progress passes this percentage
    pub eta_min_progress_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine module locations; for the native engine the first entry is the ffmpeg binary
    pub module_urls: Vec<String>,

    /// ffmpeg binary used when no module URL is given
    pub ffmpeg_path: String,

    /// ffprobe binary used for metadata probing
    pub ffprobe_path: String,

    /// Video encoder
    pub video_codec: String,

    /// Encoder speed preset
    pub preset: String,

    /// Encoder threads per job (1 disables multithreading)
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Default quality, 1 to 100
    pub default_quality: u8,

    /// Longest edge allowed before downscaling (None = keep size)
    pub max_dimension: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for compressed files
    pub dir: PathBuf,

    /// Suffix inserted before the output extension
    pub suffix: String,

    /// Log level
    pub log_level: String,
}

impl EngineConfig {
    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            video_codec: self.video_codec.clone(),
            preset: self.preset.clone(),
            threads: self.threads.max(1),
        }
    }
}

impl QueueConfig {
    pub fn probe_wait(&self) -> Duration {
        Duration::from_secs(self.probe_wait_seconds)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = ["media-squeeze.toml", "config/media-squeeze.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read {}: {}", path.display(), e))?;
        let config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(size) = std::env::var("MEDIA_SQUEEZE_MAX_FILE_SIZE") {
            self.queue.max_file_size = size
                .parse()
                .map_err(|e| anyhow!("MEDIA_SQUEEZE_MAX_FILE_SIZE: {}", e))?;
        }

        if let Ok(threads) = std::env::var("MEDIA_SQUEEZE_THREADS") {
            self.engine.threads = threads.parse().unwrap_or(1);
        }

        if let Ok(ffmpeg) = std::env::var("MEDIA_SQUEEZE_FFMPEG") {
            self.engine.ffmpeg_path = ffmpeg;
        }

        if let Ok(ffprobe) = std::env::var("MEDIA_SQUEEZE_FFPROBE") {
            self.engine.ffprobe_path = ffprobe;
        }

        if let Ok(output_dir) = std::env::var("MEDIA_SQUEEZE_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(output_dir);
        }

        if let Ok(log_level) = std::env::var("MEDIA_SQUEEZE_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        Ok(self)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_file_size == 0 {
            return Err(anyhow!("max_file_size must be greater than 0"));
        }

        let allow = &self.queue.allow_list;
        if allow.video_extensions.is_empty() && allow.audio_extensions.is_empty() && allow.image_extensions.is_empty() {
            return Err(anyhow!("allow_list must accept at least one extension"));
        }

        if !(0.0..100.0).contains(&self.progress.eta_min_progress_percent) {
            return Err(anyhow!("eta_min_progress_percent must be within [0, 100)"));
        }

        if self.engine.threads == 0 {
            return Err(anyhow!("threads must be greater than 0"));
        }

        if !(1..=100).contains(&self.image.default_quality) {
            return Err(anyhow!("image default_quality must be within 1..=100"));
        }

        if self.image.max_dimension == Some(0) {
            return Err(anyhow!("image max_dimension must be greater than 0"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Media Squeeze Configuration:\n\
            - Max File Size: {} bytes\n\
            - Video Extensions: {}\n\
            - Audio Extensions: {}\n\
            - Image Extensions: {}\n\
            - Encoder: {} ({}, {} threads)\n\
            - Image Quality: {}\n\
            - Output Directory: {}",
            self.queue.max_file_size,
            self.queue.allow_list.video_extensions.join(", "),
            self.queue.allow_list.audio_extensions.join(", "),
            self.queue.allow_list.image_extensions.join(", "),
            self.engine.video_codec,
            self.engine.preset,
            self.engine.threads,
            self.image.default_quality,
            self.output.dir.display()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                max_file_size: DEFAULT_MAX_FILE_SIZE,
                probe_wait_seconds: 30,
                allow_list: AllowList::default(),
            },
            progress: ProgressConfig {
                eta_min_progress_percent: 1.0,
            },
            engine: EngineConfig {
                module_urls: Vec::new(),
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
                video_codec: "libx264".to_string(),
                preset: "medium".to_string(),
                threads: num_cpus::get().min(8), // Use available cores, max 8
            },
            image: ImageConfig {
                default_quality: 80,
                max_dimension: Some(4096),
            },
            output: OutputConfig {
                dir: PathBuf::from("./output"),
                suffix: "squeezed".to_string(),
                log_level: "info".to_string(),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.config.queue.max_file_size = bytes;
        self
    }

    pub fn with_probe_wait_seconds(mut self, seconds: u64) -> Self {
        self.config.queue.probe_wait_seconds = seconds;
        self
    }

    pub fn with_eta_min_progress(mut self, percent: f64) -> Self {
        self.config.progress.eta_min_progress_percent = percent;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.config.engine.threads = threads;
        self
    }

    pub fn with_image_quality(mut self, quality: u8) -> Self {
        self.config.image.default_quality = quality;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.dir = dir;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
