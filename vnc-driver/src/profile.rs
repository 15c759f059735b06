//! Operation timing collector behind `start_profile` / `end_profile`.

use crate::errors::DriverError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Accumulated timings for one operation, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpStats {
    /// Number of calls.
    pub count: u64,
    /// Sum of all call durations.
    pub total_us: u64,
    /// Longest single call.
    pub max_us: u64,
}

impl OpStats {
    fn record(&mut self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count += 1;
        self.total_us = self.total_us.saturating_add(us);
        self.max_us = self.max_us.max(us);
    }
}

/// What `end_profile` writes.
#[derive(Debug, Serialize)]
pub struct ProfileSummary {
    /// Time since `start_profile`.
    pub elapsed_us: u64,
    /// Per-operation timings keyed by operation name (`connect`, `step`, ...).
    pub operations: BTreeMap<&'static str, OpStats>,
}

/// An active profiling run.
#[derive(Debug)]
pub struct Profiler {
    path: PathBuf,
    started: Instant,
    operations: BTreeMap<&'static str, OpStats>,
}

impl Profiler {
    /// Start timing now; the summary goes to `path` on [`write`](Self::write).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started: Instant::now(),
            operations: BTreeMap::new(),
        }
    }

    /// Where the summary will be written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add one call of `operation` that took `elapsed`.
    pub fn record(&mut self, operation: &'static str, elapsed: Duration) {
        self.operations.entry(operation).or_default().record(elapsed);
    }

    /// Timings collected so far.
    #[must_use]
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            elapsed_us: u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX),
            operations: self.operations.clone(),
        }
    }

    /// Write the summary as pretty JSON to the profile path.
    pub fn write(&self) -> Result<(), DriverError> {
        let json = serde_json::to_string_pretty(&self.summary())
            .map_err(|e| DriverError::Profile(format!("serializing profile: {}", e)))?;
        std::fs::write(&self.path, json).map_err(|e| {
            DriverError::Profile(format!("writing profile {}: {}", self.path.display(), e))
        })?;
        tracing::info!("profile written to {}", self.path.display());
        Ok(())
    }
}
