//! Per-job progress and ETA signals

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::job::JobId;

/// Snapshot published to observers during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// 0 to 100 for the job currently processing
    pub percent: f64,
    pub eta: Option<Duration>,
    pub message: String,
    pub current_job: Option<JobId>,
    pub running: bool,
}

/// `remaining = elapsed / progress * (100 - progress)`, once progress passes `min_percent`
pub fn estimate_remaining(elapsed: Duration, percent: f64, min_percent: f64) -> Option<Duration> {
    if percent.is_nan() || percent <= min_percent || percent > 100.0 {
        return None;
    }
    let remaining = elapsed.as_secs_f64() / percent * (100.0 - percent);
    Some(Duration::from_secs_f64(remaining.max(0.0)))
}

/// Owns the published progress channel
pub struct ProgressTracker {
    sender: watch::Sender<RunProgress>,
    eta_min_percent: f64,
    job_started: Mutex<Option<Instant>>,
}

impl ProgressTracker {
    pub fn new(eta_min_percent: f64) -> Self {
        let (sender, _) = watch::channel(RunProgress::default());
        Self {
            sender,
            eta_min_percent,
            job_started: Mutex::new(None),
        }
    }

    fn started_slot(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.job_started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> RunProgress {
        self.sender.borrow().clone()
    }

    pub fn run_started(&self, message: impl Into<String>) {
        let message = message.into();
        self.sender.send_modify(|p| {
            *p = RunProgress {
                message,
                running: true,
                ..RunProgress::default()
            };
        });
    }

    /// Reset percent and ETA for the next job
    pub fn job_started(&self, id: JobId, message: impl Into<String>) {
        *self.started_slot() = None;
        let message = message.into();
        self.sender.send_modify(|p| {
            p.percent = 0.0;
            p.eta = None;
            p.current_job = Some(id);
            p.message = message;
        });
    }

    /// Start the ETA clock once the engine begins encoding
    pub fn encode_started(&self) {
        *self.started_slot() = Some(Instant::now());
    }

    /// Engine reported a fraction of the current operation
    pub fn update(&self, fraction: f64) {
        let percent = (fraction * 100.0).clamp(0.0, 100.0);
        let started = *self.started_slot();
        let eta = started
            .and_then(|started| estimate_remaining(started.elapsed(), percent, self.eta_min_percent));
        self.sender.send_modify(|p| {
            p.percent = percent;
            p.eta = eta;
        });
    }

    /// Reset everything once the run settles
    pub fn run_finished(&self, message: impl Into<String>) {
        *self.started_slot() = None;
        let message = message.into();
        self.sender.send_modify(|p| {
            *p = RunProgress {
                message,
                ..RunProgress::default()
            };
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_formula() {
        let eta = estimate_remaining(Duration::from_secs(10), 25.0, 1.0).unwrap();
        assert_eq!(eta, Duration::from_secs(30));
    }

    #[test]
    fn test_eta_suppressed_near_zero() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0.5, 1.0), None);
        assert_eq!(estimate_remaining(Duration::from_secs(10), 1.0, 1.0), None);
        assert_eq!(estimate_remaining(Duration::from_secs(10), f64::NAN, 1.0), None);
    }

    #[test]
    fn test_tracker_resets_between_jobs() {
        let tracker = ProgressTracker::new(1.0);
        let rx = tracker.subscribe();

        tracker.run_started("starting");
        tracker.job_started(JobId::new(), "job 1");
        tracker.encode_started();
        tracker.update(0.5);
        assert_eq!(rx.borrow().percent, 50.0);
        assert!(rx.borrow().eta.is_some());

        tracker.job_started(JobId::new(), "job 2");
        assert_eq!(rx.borrow().percent, 0.0);
        assert!(rx.borrow().eta.is_none());
        assert!(rx.borrow().running);

        tracker.run_finished("done");
        let last = tracker.current();
        assert_eq!(last.percent, 0.0);
        assert!(last.eta.is_none());
        assert!(last.current_job.is_none());
        assert!(!last.running);
        assert_eq!(last.message, "done");
    }

    #[test]
    fn test_eta_clock_ignores_time_before_encoding() {
        let tracker = ProgressTracker::new(1.0);
        tracker.run_started("starting");
        tracker.job_started(JobId::new(), "job 1");
        std::thread::sleep(Duration::from_millis(200));

        tracker.update(0.5);
        assert!(tracker.current().eta.is_none());

        tracker.encode_started();
        tracker.update(0.5);
        let eta = tracker.current().eta.unwrap();
        assert!(eta < Duration::from_millis(100), "eta {:?} counts the wait", eta);
    }
}
