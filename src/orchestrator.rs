//! Batch queue orchestration
//!
//! The orchestrator owns the job queue, probes each accepted file in the
//! background and drives the shared engine through one job at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::args::{describe_plan, EncoderOptions};
use crate::engine::{render_args, with_mount, EngineEvent, EngineHandle, EngineState, JobPaths};
use crate::error::{EngineError, QueueError, RejectedFile, RejectionReason, ValidationError};
use crate::job::{JobId, JobSnapshot, JobStatus, ProbeState, QueuedJob, RunSummary};
use crate::media::{AllowList, ImageFormat, MediaKind, SourceFile};
use crate::metadata::MediaMetadata;
use crate::probe::Prober;
use crate::progress::{ProgressTracker, RunProgress};
use crate::settings::{
    compute_audio_settings, compute_image_settings, compute_settings, JobPlan, SizePreset,
};

/// Caller choices for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub target_size_bytes: u64,
    pub preserve_frame_rate: bool,
    /// 1 to 100, used for image jobs
    pub image_quality: u8,
}

impl RunOptions {
    pub fn new(preset: SizePreset) -> Self {
        Self {
            target_size_bytes: preset.target_bytes(),
            preserve_frame_rate: false,
            image_quality: 80,
        }
    }

    pub fn preserve_frame_rate(mut self, preserve: bool) -> Self {
        self.preserve_frame_rate = preserve;
        self
    }

    pub fn image_quality(mut self, quality: u8) -> Self {
        self.image_quality = quality;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(SizePreset::High)
    }
}

/// Outcome of one `enqueue` call
#[derive(Debug, Clone, Default)]
pub struct EnqueueReport {
    pub accepted: Vec<JobId>,
    pub rejected: Option<ValidationError>,
}

/// Queue limits and encoder knobs taken from the configuration
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_file_size: u64,
    pub allow_list: AllowList,
    pub probe_wait: Duration,
    pub encoder: EncoderOptions,
    pub image_max_dimension: Option<u32>,
    pub eta_min_progress_percent: f64,
}

impl From<&Config> for QueueSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_file_size: config.queue.max_file_size,
            allow_list: config.queue.allow_list.clone(),
            probe_wait: config.queue.probe_wait(),
            encoder: config.engine.encoder_options(),
            image_max_dimension: config.image.max_dimension,
            eta_min_progress_percent: config.progress.eta_min_progress_percent,
        }
    }
}

struct Shared {
    engine: EngineHandle,
    prober: Arc<dyn Prober>,
    settings: QueueSettings,
    jobs: RwLock<Vec<QueuedJob>>,
    running: AtomicBool,
    probe_done: Notify,
    progress: ProgressTracker,
}

/// Clears the run flag however `run` exits
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sequential batch compressor over a shared engine
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(engine: EngineHandle, prober: Arc<dyn Prober>, config: &Config) -> Self {
        Self::with_settings(engine, prober, QueueSettings::from(config))
    }

    pub fn with_settings(engine: EngineHandle, prober: Arc<dyn Prober>, settings: QueueSettings) -> Self {
        let progress = ProgressTracker::new(settings.eta_min_progress_percent);
        Self {
            shared: Arc::new(Shared {
                engine,
                prober,
                settings,
                jobs: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                probe_done: Notify::new(),
                progress,
            }),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.shared.engine
    }

    /// Validate and append files; every accepted file starts probing right away
    pub async fn enqueue(&self, files: Vec<SourceFile>) -> EnqueueReport {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for file in files {
            match self.admit(&file) {
                Ok(kind) => accepted.push(QueuedJob::new(file, kind)),
                Err(reason) => rejected.push(RejectedFile {
                    name: file.name().to_string(),
                    reason,
                }),
            }
        }

        let probes: Vec<(JobId, SourceFile, MediaKind)> = accepted
            .iter()
            .map(|job| (job.id, job.source.clone(), job.kind))
            .collect();
        let ids: Vec<JobId> = probes.iter().map(|(id, _, _)| *id).collect();

        self.shared.jobs.write().await.extend(accepted);

        for (id, source, kind) in probes {
            self.spawn_probe(id, source, kind);
        }

        if !ids.is_empty() {
            info!("📥 Queued {} file(s)", ids.len());
        }

        let rejected = if rejected.is_empty() {
            None
        } else {
            let err = ValidationError { rejected };
            warn!("{}", err);
            Some(err)
        };

        EnqueueReport {
            accepted: ids,
            rejected,
        }
    }

    fn admit(&self, file: &SourceFile) -> Result<MediaKind, RejectionReason> {
        let kind = self
            .shared
            .settings
            .allow_list
            .classify(file)
            .ok_or(RejectionReason::UnsupportedType)?;

        let limit = self.shared.settings.max_file_size;
        if file.size_bytes() > limit {
            return Err(RejectionReason::TooLarge {
                size: file.size_bytes(),
                limit,
            });
        }

        Ok(kind)
    }

    fn spawn_probe(&self, id: JobId, source: SourceFile, kind: MediaKind) {
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let probed = match shared.prober.probe(&source, kind).await {
                Ok(report) => report.into_metadata(&source, kind),
                Err(e) => Err(e),
            };

            let ready = probed.is_ok();
            match probed {
                Ok(metadata) => {
                    shared
                        .update_job(id, |job| {
                            job.metadata = Some(metadata);
                            job.probe_state = ProbeState::Ready;
                        })
                        .await;
                }
                Err(e) => {
                    warn!("⚠️ Metadata probe failed for {}: {}", source.name(), e);
                    shared.update_job(id, |job| job.probe_state = ProbeState::Failed).await;
                }
            }
            shared.probe_done.notify_waiters();

            if ready && kind == MediaKind::Video {
                if let Some(fps) = shared.prober.sniff_frame_rate(&source).await {
                    shared
                        .update_job(id, |job| {
                            if let Some(MediaMetadata::Video(meta)) = job.metadata.as_mut() {
                                *meta = meta.with_frame_rate(fps);
                            }
                        })
                        .await;
                    debug!("Frame rate for {} resolved to {} fps", source.name(), fps);
                }
            }
        });
    }

    /// Remove a job unless it is currently processing
    pub async fn remove(&self, id: JobId) -> bool {
        let mut jobs = self.shared.jobs.write().await;
        match jobs.iter().position(|job| job.id == id) {
            Some(index) if jobs[index].status != JobStatus::Processing => {
                jobs.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Drop every job; a run in progress discards the result of a vanished job
    pub async fn clear(&self) -> usize {
        let mut jobs = self.shared.jobs.write().await;
        let removed = jobs.len();
        jobs.clear();
        removed
    }

    /// Move an errored job back to Pending
    ///
    /// A job whose metadata probe failed is probed again.
    pub async fn retry(&self, id: JobId) -> bool {
        let reset = self
            .shared
            .update_job(id, |job| {
                if job.status != JobStatus::Errored {
                    return None;
                }
                job.reset();
                if job.probe_state == ProbeState::Failed {
                    job.probe_state = ProbeState::Probing;
                    Some(Some((job.source.clone(), job.kind)))
                } else {
                    Some(None)
                }
            })
            .await
            .flatten();

        match reset {
            Some(reprobe) => {
                if let Some((source, kind)) = reprobe {
                    debug!("Probing {} again", source.name());
                    self.spawn_probe(id, source, kind);
                }
                true
            }
            None => false,
        }
    }

    pub async fn result(&self, id: JobId) -> Option<Arc<[u8]>> {
        let jobs = self.shared.jobs.read().await;
        jobs.iter()
            .find(|job| job.id == id)
            .and_then(|job| job.result_bytes.clone())
    }

    pub async fn job(&self, id: JobId) -> Option<JobSnapshot> {
        let jobs = self.shared.jobs.read().await;
        jobs.iter().find(|job| job.id == id).map(QueuedJob::snapshot)
    }

    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let jobs = self.shared.jobs.read().await;
        jobs.iter().map(QueuedJob::snapshot).collect()
    }

    pub async fn summary(&self) -> RunSummary {
        let jobs = self.shared.jobs.read().await;
        RunSummary::from_jobs(jobs.iter().map(|job| &job.status))
    }

    pub fn progress(&self) -> RunProgress {
        self.shared.progress.current()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<RunProgress> {
        self.shared.progress.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Process every job that is Pending right now, oldest first
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, QueueError> {
        let state = self.shared.engine.state();
        if state != EngineState::Ready {
            return Err(QueueError::EngineNotReady(state));
        }

        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.shared.running);

        let pending: Vec<JobId> = {
            let jobs = self.shared.jobs.read().await;
            jobs.iter()
                .filter(|job| job.status == JobStatus::Pending)
                .map(|job| job.id)
                .collect()
        };
        if pending.is_empty() {
            return Err(QueueError::NothingPending);
        }

        let total = pending.len();
        info!("🚀 Starting batch of {} job(s)", total);
        self.shared
            .progress
            .run_started(format!("Processing {} file(s)", total));

        for (index, id) in pending.into_iter().enumerate() {
            self.process_job(id, index + 1, total, &options).await;
        }

        let summary = self.summary().await;
        info!("🏁 Batch finished: {}", summary);
        self.shared.progress.run_finished(summary.to_string());
        Ok(summary)
    }

    async fn process_job(&self, id: JobId, position: usize, total: usize, options: &RunOptions) {
        let claimed = self
            .shared
            .update_job(id, |job| {
                if job.status == JobStatus::Pending {
                    job.mark_processing();
                    Some((job.source.clone(), job.kind))
                } else {
                    None
                }
            })
            .await
            .flatten();

        let Some((source, kind)) = claimed else {
            debug!("Job {} is gone or no longer pending, skipping", id);
            return;
        };

        info!("📹 Processing {}/{}: {}", position, total, source.name());
        self.shared
            .progress
            .job_started(id, format!("Compressing {} ({}/{})", source.name(), position, total));

        let started = Instant::now();
        let outcome = match self.plan_job(id, &source, kind, options).await {
            Ok(plan) => self.compress(id, &source, kind, &plan).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        let recorded = self
            .shared
            .update_job(id, |job| match outcome {
                Ok(bytes) => {
                    info!(
                        "✅ Completed: {} in {:.2}s ({} -> {} bytes)",
                        source.name(),
                        elapsed.as_secs_f64(),
                        source.size_bytes(),
                        bytes.len()
                    );
                    job.complete(bytes, elapsed);
                }
                Err(e) => {
                    warn!("❌ Failed: {} - {}", source.name(), e);
                    job.fail(e.to_string(), elapsed);
                }
            })
            .await;

        if recorded.is_none() {
            warn!("Job {} was removed while processing; result discarded", id);
        }
    }

    /// Wait for an in-flight probe, then derive the plan for this job
    async fn plan_job(
        &self,
        id: JobId,
        source: &SourceFile,
        kind: MediaKind,
        options: &RunOptions,
    ) -> Result<JobPlan, EngineError> {
        let metadata = self.await_metadata(id).await;
        let unavailable = || EngineError::MetadataUnavailable(source.name().to_string());

        match kind {
            MediaKind::Video => match metadata {
                Some(MediaMetadata::Video(meta)) => Ok(JobPlan::Video(compute_settings(
                    options.target_size_bytes,
                    &meta,
                    options.preserve_frame_rate,
                ))),
                _ => Err(unavailable()),
            },
            MediaKind::Audio => match metadata {
                Some(MediaMetadata::Audio(meta)) => Ok(JobPlan::Audio(compute_audio_settings(
                    options.target_size_bytes,
                    &meta,
                ))),
                _ => Err(unavailable()),
            },
            MediaKind::Image => {
                let image = match &metadata {
                    Some(MediaMetadata::Image(meta)) => Some(meta),
                    _ => None,
                };
                Ok(JobPlan::Image(compute_image_settings(
                    options.image_quality,
                    image,
                    ImageFormat::from_extension(&source.extension()),
                    self.shared.settings.image_max_dimension,
                )))
            }
        }
    }

    async fn await_metadata(&self, id: JobId) -> Option<MediaMetadata> {
        let deadline = tokio::time::Instant::now() + self.shared.settings.probe_wait;

        loop {
            let notified = self.shared.probe_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (state, metadata) = {
                let jobs = self.shared.jobs.read().await;
                let job = jobs.iter().find(|job| job.id == id)?;
                (job.probe_state, job.metadata.clone())
            };

            if state != ProbeState::Probing {
                return metadata;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("⏳ Gave up waiting for metadata of job {}", id);
                return metadata;
            }
        }
    }

    async fn compress(
        &self,
        id: JobId,
        source: &SourceFile,
        kind: MediaKind,
        plan: &JobPlan,
    ) -> Result<Vec<u8>, EngineError> {
        let paths = JobPaths::for_job(&id, source, kind);
        let argv = render_args(plan, &paths, &self.shared.settings.encoder);
        info!("🎯 {}: {}", source.name(), describe_plan(plan));
        debug!("Engine args: {}", argv.join(" "));

        let engine = self.shared.engine.engine();
        let cleanup = [paths.output.clone()];

        with_mount(engine, &paths.mount_dir, std::slice::from_ref(source), &cleanup, || async {
            self.exec_with_progress(argv).await?;
            engine.read_file(&paths.output).await
        })
        .await
    }

    async fn exec_with_progress(&self, argv: Vec<String>) -> Result<(), EngineError> {
        let engine = self.shared.engine.engine();
        let mut events = engine.subscribe();
        self.shared.progress.encode_started();
        let exec = engine.exec(argv);
        tokio::pin!(exec);

        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Ok(EngineEvent::Progress(fraction)) => self.shared.progress.update(fraction),
                    Ok(EngineEvent::Log(line)) => debug!(target: "media_squeeze::engine", "{}", line),
                    Err(RecvError::Lagged(skipped)) => debug!("Skipped {} engine events", skipped),
                    Err(RecvError::Closed) => return (&mut exec).await,
                },
                result = &mut exec => return result,
            }
        }
    }
}

impl Shared {
    /// Apply `f` to a job if it is still queued
    async fn update_job<T>(&self, id: JobId, f: impl FnOnce(&mut QueuedJob) -> T) -> Option<T> {
        let mut jobs = self.jobs.write().await;
        jobs.iter_mut().find(|job| job.id == id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MB;

    #[test]
    fn test_run_options_from_preset() {
        let options = RunOptions::new(SizePreset::Maximum)
            .preserve_frame_rate(true)
            .image_quality(65);
        assert_eq!(options.target_size_bytes, 8 * MB);
        assert!(options.preserve_frame_rate);
        assert_eq!(options.image_quality, 65);
    }

    #[test]
    fn test_queue_settings_follow_config() {
        let config = crate::config::ConfigBuilder::new()
            .with_max_file_size(1234)
            .with_probe_wait_seconds(3)
            .with_threads(2)
            .build();
        let settings = QueueSettings::from(&config);
        assert_eq!(settings.max_file_size, 1234);
        assert_eq!(settings.probe_wait, Duration::from_secs(3));
        assert_eq!(settings.encoder.threads, 2);
        assert_eq!(settings.image_max_dimension, Some(4096));
    }

    #[test]
    fn test_run_guard_resets_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = RunGuard(&flag);
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
