//! Media engine contract, readiness state and scoped mounts

pub mod args;
pub mod ffmpeg;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::media::SourceFile;

pub use args::{render_args, JobPaths};
pub use ffmpeg::FfmpegEngine;

/// Event emitted by the engine while an operation runs
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Fraction of the current operation, 0.0 to 1.0
    Progress(f64),
    Log(String),
}

/// Lifecycle of the process-wide engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Loading => write!(f, "loading"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A single-operation-at-a-time media engine
///
/// Paths are relative to the engine's own filesystem root. Callers must not
/// start an operation before the previous one has settled.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn load(&self, module_urls: &[String]) -> Result<(), EngineError>;
    async fn mount(&self, dir: &str, files: &[SourceFile]) -> Result<(), EngineError>;
    async fn unmount(&self, dir: &str) -> Result<(), EngineError>;
    async fn exec(&self, argv: Vec<String>) -> Result<(), EngineError>;
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, EngineError>;
    async fn delete_file(&self, path: &str) -> Result<(), EngineError>;
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Shared engine handle carrying the readiness state machine
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<dyn Engine>,
    state: Arc<watch::Sender<EngineState>>,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        let (state, _) = watch::channel(EngineState::Uninitialized);
        Self {
            engine,
            state: Arc::new(state),
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), EngineState::Ready)
    }

    /// Observe readiness changes
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Load the engine once; repeated calls on a ready engine are no-ops
    pub async fn bootstrap(&self, module_urls: &[String]) -> Result<(), EngineError> {
        let mut should_load = false;
        self.state.send_if_modified(|state| match state {
            EngineState::Uninitialized | EngineState::Failed(_) => {
                *state = EngineState::Loading;
                should_load = true;
                true
            }
            _ => false,
        });

        if !should_load {
            return match self.state() {
                EngineState::Ready => Ok(()),
                other => Err(EngineError::Load(format!("engine is {}", other))),
            };
        }

        info!("🔧 Loading media engine");
        match self.engine.load(module_urls).await {
            Ok(()) => {
                self.state.send_replace(EngineState::Ready);
                info!("✅ Media engine ready");
                Ok(())
            }
            Err(e) => {
                error!("Media engine failed to load: {}", e);
                self.state.send_replace(EngineState::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Mount `files` under `dir`, run `body`, then always clean up
///
/// `cleanup_paths` are deleted before unmounting whatever the outcome of the
/// body, including a panic inside it. A failed mount is unmounted before its
/// error is returned. Cleanup failures are logged only.
pub async fn with_mount<F, Fut, T>(
    engine: &dyn Engine,
    dir: &str,
    files: &[SourceFile],
    cleanup_paths: &[String],
    body: F,
) -> Result<T, EngineError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    if let Err(e) = engine.mount(dir, files).await {
        // A partial mount may have created the directory already
        if let Err(cleanup) = engine.unmount(dir).await {
            warn!("Failed to unmount {} after mount error: {}", dir, cleanup);
        }
        return Err(e);
    }

    let outcome = AssertUnwindSafe(body()).catch_unwind().await;

    for path in cleanup_paths {
        if let Err(e) = engine.delete_file(path).await {
            // Output is absent whenever exec failed early
            if !matches!(e, EngineError::Missing(_)) {
                warn!("Failed to delete {} from engine filesystem: {}", path, e);
            }
        }
    }
    if let Err(e) = engine.unmount(dir).await {
        warn!("Failed to unmount {}: {}", dir, e);
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(EngineError::Panicked(message))
        }
    }
}
