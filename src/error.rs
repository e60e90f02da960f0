//! Error types for the compressor core

use std::fmt;

use crate::engine::EngineState;

/// Why a single file was refused at enqueue time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// Neither the MIME type nor the extension is on an allow-list
    UnsupportedType,

    /// File exceeds the configured size ceiling
    TooLarge { size: u64, limit: u64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::UnsupportedType => write!(f, "unsupported file type"),
            RejectionReason::TooLarge { size, limit } => {
                write!(f, "file is {} bytes, limit is {} bytes", size, limit)
            }
        }
    }
}

/// A file that was not added to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFile {
    pub name: String,
    pub reason: RejectionReason,
}

/// Aggregate validation failure for one `enqueue` call
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{} file(s) rejected: {}", .rejected.len(), describe(.rejected))]
pub struct ValidationError {
    pub rejected: Vec<RejectedFile>,
}

fn describe(rejected: &[RejectedFile]) -> String {
    rejected
        .iter()
        .map(|r| format!("{} ({})", r.name, r.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Queue-level precondition violations reported by `run`
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("engine is not ready (state: {0})")]
    EngineNotReady(EngineState),

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("no pending jobs to process")]
    NothingPending,
}

/// Failures raised by a media engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("engine has not been loaded")]
    NotLoaded,

    #[error("engine is busy with another operation")]
    Busy,

    #[error("engine failed to load: {0}")]
    Load(String),

    #[error("engine execution failed: {0}")]
    Exec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found in engine filesystem: {0}")]
    Missing(String),

    #[error("engine operation panicked: {0}")]
    Panicked(String),

    #[error("metadata unavailable for {0}")]
    MetadataUnavailable(String),
}

/// Failures raised while probing source metadata
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe tool failed: {0}")]
    Tool(String),

    #[error("failed to parse probe output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}
