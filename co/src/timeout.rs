//! TimeoutMonitor - advisory stall and overrun signals for a live run
//!
//! Reads only the status file's modification time and a process-local run
//! start marker. Never mutates the record.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Thresholds for the two checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// No record update for longer than this means stalled
    pub stall_secs: u64,
    /// Run longer than this means timed out
    pub hard_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stall_secs: 5 * 60,
            hard_timeout_secs: 30 * 60,
        }
    }
}

/// Result of one check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutSnapshot {
    pub stalled: bool,
    pub timed_out: bool,
    /// Modification time of the status file
    pub last_update: Option<DateTime<Utc>>,
    /// Time since `start`
    pub runtime: Option<Duration>,
}

#[derive(Debug)]
pub struct TimeoutMonitor {
    status_file: PathBuf,
    config: TimeoutConfig,
    run_start: Mutex<Option<SystemTime>>,
}

impl TimeoutMonitor {
    pub fn new(status_file: impl Into<PathBuf>, config: TimeoutConfig) -> Self {
        let status_file = status_file.into();
        debug!(?status_file, ?config, "TimeoutMonitor::new: called");
        Self {
            status_file,
            config,
            run_start: Mutex::new(None),
        }
    }

    pub fn config(&self) -> TimeoutConfig {
        self.config
    }

    /// Mark the start of a run
    pub fn start(&self) {
        debug!("TimeoutMonitor::start: called");
        self.start_at(SystemTime::now());
    }

    pub fn start_at(&self, when: SystemTime) {
        *self.run_start.lock().unwrap_or_else(|e| e.into_inner()) = Some(when);
    }

    /// Clear the run start marker
    pub fn stop(&self) {
        debug!("TimeoutMonitor::stop: called");
        *self.run_start.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_armed(&self) -> bool {
        self.run_start.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn check(&self) -> TimeoutSnapshot {
        self.check_at(SystemTime::now())
    }

    /// Compute both flags as of `now`
    pub fn check_at(&self, now: SystemTime) -> TimeoutSnapshot {
        let mtime = fs::metadata(&self.status_file).and_then(|m| m.modified()).ok();
        let run_start = *self.run_start.lock().unwrap_or_else(|e| e.into_inner());

        // A clock behind the file counts as zero elapsed
        let since_update = mtime.map(|t| now.duration_since(t).unwrap_or_default());
        let runtime = run_start.map(|t| now.duration_since(t).unwrap_or_default());

        let snapshot = TimeoutSnapshot {
            stalled: since_update.is_some_and(|d| d > Duration::from_secs(self.config.stall_secs)),
            timed_out: runtime.is_some_and(|d| d > Duration::from_secs(self.config.hard_timeout_secs)),
            last_update: mtime.map(DateTime::<Utc>::from),
            runtime,
        };
        debug!(?snapshot, "TimeoutMonitor::check_at: returning");
        snapshot
    }
}
