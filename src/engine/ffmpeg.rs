//! Native engine driving the `ffmpeg` binary inside a private scratch directory

use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use super::{Engine, EngineEvent};
use crate::error::EngineError;
use crate::media::{SourceContent, SourceFile};

const EVENT_CAPACITY: usize = 256;
const ERROR_TAIL_LINES: usize = 8;

/// Extracts progress from FFmpeg's stderr
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_re: Regex,
    time_re: Regex,
    total_seconds: Option<f64>,
}

impl ProgressParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            duration_re: Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")?,
            time_re: Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")?,
            total_seconds: None,
        })
    }

    /// Feed one line; returns a fraction once both the input duration and a timestamp are known
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        if self.total_seconds.is_none() {
            if let Some(total) = capture_seconds(&self.duration_re, line) {
                if total > 0.0 {
                    self.total_seconds = Some(total);
                }
                return None;
            }
        }

        let current = capture_seconds(&self.time_re, line)?;
        let total = self.total_seconds?;
        Some((current / total).clamp(0.0, 1.0))
    }

    /// Start over for a new operation
    pub fn reset(&mut self) {
        self.total_seconds = None;
    }
}

fn capture_seconds(re: &Regex, line: &str) -> Option<f64> {
    let caps = re.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// FFmpeg process engine
///
/// The scratch directory plays the role of the engine's virtual filesystem
/// and is removed when the engine is dropped.
pub struct FfmpegEngine {
    root: TempDir,
    default_binary: String,
    binary: RwLock<Option<String>>,
    operation: Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
    parser: ProgressParser,
}

impl FfmpegEngine {
    pub fn new(default_binary: impl Into<String>) -> Result<Self, EngineError> {
        let root = tempfile::Builder::new().prefix("media-squeeze-").tempdir()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let parser = ProgressParser::new().map_err(|e| EngineError::Load(e.to_string()))?;

        Ok(Self {
            root,
            default_binary: default_binary.into(),
            binary: RwLock::new(None),
            operation: Mutex::new(()),
            events,
            parser,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Map an engine-relative path into the scratch directory
    fn resolve(&self, path: &str) -> Result<PathBuf, EngineError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.is_empty() {
            return Err(invalid_input(format!("path escapes engine root: {}", path)));
        }
        Ok(self.root.path().join(relative))
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn invalid_input(message: String) -> EngineError {
    EngineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}

/// Mounted files live directly inside their mount directory
fn plain_file_name(name: &str) -> Result<&Path, EngineError> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(invalid_input(format!("not a plain file name: {}", name))),
    }
}

fn not_found_as_missing(e: std::io::Error, path: &str) -> EngineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        EngineError::Missing(path.to_string())
    } else {
        EngineError::Io(e)
    }
}

#[async_trait]
impl Engine for FfmpegEngine {
    async fn load(&self, module_urls: &[String]) -> Result<(), EngineError> {
        let binary = module_urls
            .first()
            .cloned()
            .unwrap_or_else(|| self.default_binary.clone());

        let output = Command::new(&binary)
            .arg("-version")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Load(format!("{}: {}", binary, e)))?;

        if !output.status.success() {
            return Err(EngineError::Load(format!("{} -version exited with {}", binary, output.status)));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("🎬 Using {}", version.lines().next().unwrap_or(&binary));

        *self.binary.write().await = Some(binary);
        Ok(())
    }

    async fn mount(&self, dir: &str, files: &[SourceFile]) -> Result<(), EngineError> {
        let target = self.resolve(dir)?;
        let names = files
            .iter()
            .map(|file| plain_file_name(file.name()))
            .collect::<Result<Vec<_>, _>>()?;
        tokio::fs::create_dir_all(&target).await?;

        for (file, name) in files.iter().zip(names) {
            let destination = target.join(name);
            match file.content() {
                SourceContent::Memory(bytes) => tokio::fs::write(&destination, bytes).await?,
                SourceContent::Disk(path) => {
                    if tokio::fs::hard_link(path, &destination).await.is_err() {
                        tokio::fs::copy(path, &destination).await?;
                    }
                }
            }
        }

        debug!("Mounted {} file(s) at {}", files.len(), dir);
        Ok(())
    }

    async fn unmount(&self, dir: &str) -> Result<(), EngineError> {
        let target = self.resolve(dir)?;
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    async fn exec(&self, argv: Vec<String>) -> Result<(), EngineError> {
        let _operation = self.operation.try_lock().map_err(|_| EngineError::Busy)?;
        let binary = self.binary.read().await.clone().ok_or(EngineError::NotLoaded)?;

        let mut child = Command::new(&binary)
            .args(["-hide_banner", "-nostdin"])
            .args(&argv)
            .current_dir(self.root.path())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Exec("failed to capture stderr".to_string()))?;

        // Stats lines end in '\r', log lines in '\n'
        let mut segments = BufReader::new(stderr).split(b'\r');
        let mut parser = self.parser.clone();
        parser.reset();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(ERROR_TAIL_LINES);

        while let Some(segment) = segments.next_segment().await? {
            let text = String::from_utf8_lossy(&segment);
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if let Some(fraction) = parser.feed(line) {
                    self.emit(EngineEvent::Progress(fraction));
                    continue;
                }
                if tail.len() == ERROR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
                self.emit(EngineEvent::Log(line.to_string()));
            }
        }

        let status = child.wait().await?;
        if status.success() {
            self.emit(EngineEvent::Progress(1.0));
            Ok(())
        } else {
            let detail = tail.back().cloned().unwrap_or_default();
            Err(EngineError::Exec(format!("ffmpeg exited with {}: {}", status, detail)))
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        let resolved = self.resolve(path)?;
        tokio::fs::read(&resolved).await.map_err(|e| not_found_as_missing(e, path))
    }

    async fn delete_file(&self, path: &str) -> Result<(), EngineError> {
        let resolved = self.resolve(path)?;
        tokio::fs::remove_file(&resolved).await.map_err(|e| not_found_as_missing(e, path))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
