use anyhow::{anyhow, Result};
use clap::Parser;
use media_squeeze::config::Config;
use media_squeeze::engine::{EngineHandle, FfmpegEngine};
use media_squeeze::job::JobStatus;
use media_squeeze::media::{MediaKind, SourceFile};
use media_squeeze::orchestrator::{Orchestrator, RunOptions};
use media_squeeze::probe::FfprobeProber;
use media_squeeze::settings::{SizePreset, MB};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "media-squeeze")]
#[command(version, author = "TigreRoll")]
#[command(about = "Compress videos, audio and images to a target size")]
struct Cli {
    /// Files or directories to compress
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Size preset: maximum (8MB), high (25MB), balanced (50MB), light (100MB)
    #[arg(short, long, default_value = "high", conflicts_with = "target_mb")]
    preset: String,

    /// Custom target size in megabytes
    #[arg(short, long)]
    target_mb: Option<u64>,

    /// Keep the source frame rate instead of capping it
    #[arg(long)]
    preserve_fps: bool,

    /// Image quality, 1 to 100
    #[arg(long)]
    image_quality: Option<u8>,

    /// Output directory for compressed files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "media_squeeze=debug,warn"
    } else {
        "media_squeeze=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }
    config.validate()?;
    debug!("{}", config.summary());

    let preset = match cli.target_mb {
        Some(mb) => SizePreset::Custom(mb.saturating_mul(MB)),
        None => SizePreset::parse(&cli.preset).ok_or_else(|| anyhow!("Unknown preset: {}", cli.preset))?,
    };
    let options = RunOptions::new(preset)
        .preserve_frame_rate(cli.preserve_fps)
        .image_quality(cli.image_quality.unwrap_or(config.image.default_quality));

    info!("🚀 Media Squeeze starting...");
    info!("🎯 Target size: {} bytes", preset.target_bytes());
    info!("📂 Output directory: {}", config.output.dir.display());

    info!("🔍 Discovering files...");
    let files = discover(&cli.paths).await?;
    if files.is_empty() {
        return Err(anyhow!("No files found"));
    }

    let engine = FfmpegEngine::new(config.engine.ffmpeg_path.clone())?;
    let handle = EngineHandle::new(Arc::new(engine));
    handle.bootstrap(&config.engine.module_urls).await?;

    let prober = Arc::new(FfprobeProber::new(config.engine.ffprobe_path.clone()));
    let orchestrator = Orchestrator::new(handle, prober, &config);

    let report = orchestrator.enqueue(files).await;
    if let Some(rejected) = &report.rejected {
        for file in &rejected.rejected {
            warn!("Skipping {}: {}", file.name, file.reason);
        }
    }
    if report.accepted.is_empty() {
        return Err(anyhow!("None of the given files can be compressed"));
    }

    let mut progress = orchestrator.subscribe_progress();
    let reporter = tokio::spawn(async move {
        let mut last_logged = -1i64;
        while progress.changed().await.is_ok() {
            let current = progress.borrow_and_update().clone();
            let step = (current.percent / 25.0).floor() as i64;
            if current.running && step != last_logged {
                last_logged = step;
                match current.eta {
                    Some(eta) => info!("⏱️ {} {:.0}% (about {}s left)", current.message, current.percent, eta.as_secs()),
                    None => info!("⏱️ {} {:.0}%", current.message, current.percent),
                }
            }
        }
    });

    tokio::fs::create_dir_all(&config.output.dir).await?;

    let start_time = std::time::Instant::now();
    let summary = orchestrator.run(options).await?;
    let duration = start_time.elapsed();
    reporter.abort();

    let mut names = OutputNames::new(&config.output.suffix);
    let mut written = 0usize;
    for job in orchestrator.snapshot().await {
        match job.status {
            JobStatus::Completed => {
                let Some(bytes) = orchestrator.result(job.id).await else {
                    continue;
                };
                let target = config.output.dir.join(names.claim(&job.name, job.kind));
                tokio::fs::write(&target, &bytes[..]).await?;
                info!(
                    "💾 {} -> {} ({:.1}% of source)",
                    job.name,
                    target.display(),
                    job.compression_ratio().unwrap_or(0.0) * 100.0
                );
                written += 1;
            }
            JobStatus::Errored => {
                error!("{}: {}", job.name, job.error_detail.as_deref().unwrap_or("unknown error"));
            }
            _ => {}
        }
    }

    // Print results
    info!("🎉 Processing completed in {:.2}s", duration.as_secs_f64());
    info!("✅ Successful: {}", summary.completed);
    info!("❌ Failed: {}", summary.errored);
    info!("💾 Written: {}", written);

    if summary.errored > 0 {
        return Err(anyhow!("{}", summary));
    }
    Ok(())
}

/// Expand directories into the files below them
async fn discover(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    files.push(SourceFile::from_path(entry.path()).await?);
                }
            }
        } else if path.is_file() {
            files.push(SourceFile::from_path(path).await?);
        } else {
            warn!("Path does not exist: {}", path.display());
        }
    }

    info!("📹 Found {} file(s)", files.len());
    Ok(files)
}

/// Hands out output file names, numbering repeats of the same source name
struct OutputNames {
    suffix: String,
    taken: HashSet<String>,
}

impl OutputNames {
    fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            taken: HashSet::new(),
        }
    }

    /// `clip.mov` becomes `clip.squeezed.mp4`, then `clip-2.squeezed.mp4`
    fn claim(&mut self, source_name: &str, kind: MediaKind) -> String {
        let path = Path::new(source_name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let extension = kind.output_extension(&extension);

        let mut candidate = format!("{}.{}.{}", stem, self.suffix, extension);
        let mut counter = 1;
        while !self.taken.insert(candidate.clone()) {
            counter += 1;
            candidate = format!("{}-{}.{}.{}", stem, counter, self.suffix, extension);
        }
        candidate
    }
}
