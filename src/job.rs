//! Queued jobs and the read-only views handed to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::media::{MediaKind, SourceFile};
use crate::metadata::MediaMetadata;

/// Opaque job identifier, stable for the job's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Errored,
}

/// Progress of the background metadata probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeState {
    Probing,
    Ready,
    Failed,
}

/// A file moving through probe, compress and a terminal state
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub source: SourceFile,
    pub kind: MediaKind,
    pub status: JobStatus,
    pub error_detail: Option<String>,
    pub result_bytes: Option<Arc<[u8]>>,
    pub output_size_bytes: Option<u64>,
    pub metadata: Option<MediaMetadata>,
    pub probe_state: ProbeState,
    pub enqueued_at: DateTime<Utc>,
    pub processing_time: Option<Duration>,
}

impl QueuedJob {
    pub fn new(source: SourceFile, kind: MediaKind) -> Self {
        Self {
            id: JobId::new(),
            source,
            kind,
            status: JobStatus::Pending,
            error_detail: None,
            result_bytes: None,
            output_size_bytes: None,
            metadata: None,
            probe_state: ProbeState::Probing,
            enqueued_at: Utc::now(),
            processing_time: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.error_detail = None;
    }

    pub fn complete(&mut self, bytes: Vec<u8>, elapsed: Duration) {
        self.output_size_bytes = Some(bytes.len() as u64);
        self.result_bytes = Some(Arc::from(bytes));
        self.status = JobStatus::Completed;
        self.processing_time = Some(elapsed);
    }

    pub fn fail(&mut self, detail: impl Into<String>, elapsed: Duration) {
        self.status = JobStatus::Errored;
        self.error_detail = Some(detail.into());
        self.result_bytes = None;
        self.output_size_bytes = None;
        self.processing_time = Some(elapsed);
    }

    /// Back to Pending for another run
    pub fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.error_detail = None;
        self.result_bytes = None;
        self.output_size_bytes = None;
        self.processing_time = None;
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.source.name().to_string(),
            kind: self.kind,
            source_size_bytes: self.source.size_bytes(),
            status: self.status,
            error_detail: self.error_detail.clone(),
            output_size_bytes: self.output_size_bytes,
            metadata: self.metadata.clone(),
            probe_state: self.probe_state,
            enqueued_at: self.enqueued_at,
            processing_time: self.processing_time,
        }
    }
}

/// Read-only copy of a job, without the result bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub kind: MediaKind,
    pub source_size_bytes: u64,
    pub status: JobStatus,
    pub error_detail: Option<String>,
    pub output_size_bytes: Option<u64>,
    pub metadata: Option<MediaMetadata>,
    pub probe_state: ProbeState,
    pub enqueued_at: DateTime<Utc>,
    pub processing_time: Option<Duration>,
}

impl JobSnapshot {
    /// Output size relative to the source, e.g. 0.25 for a 4x reduction
    pub fn compression_ratio(&self) -> Option<f64> {
        let output = self.output_size_bytes?;
        if self.source_size_bytes == 0 {
            return None;
        }
        Some(output as f64 / self.source_size_bytes as f64)
    }
}

/// Counts derived from a queue snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut summary = RunSummary::default();
        for status in jobs {
            summary.total += 1;
            match status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Processing => summary.processing += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Errored => summary.errored += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} completed", self.completed, self.total)?;
        if self.errored > 0 {
            write!(f, ", {} failed", self.errored)?;
        }
        Ok(())
    }
}
