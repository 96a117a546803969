//! Telemetry surface for the environment.
//!
//! Two layers: a write-only [`HistogramSink`] that receives named samples
//! (the embedder decides where they go), and [`EnvMetrics`], a set of
//! in-process counters that can be snapshotted at any time.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    observability::log_warn,
    translate::{FileError, MethodId},
};

/// Destination for histogram samples.
pub trait HistogramSink: Send + Sync {
    /// Record a value from a bounded enumeration (`0..boundary`).
    fn record_enumeration(&self, name: &str, sample: i32, boundary: i32);

    /// Record a count.
    fn record_count(&self, name: &str, sample: i32);

    /// Record a boolean outcome.
    fn record_boolean(&self, name: &str, sample: bool);

    /// Record an elapsed time.
    fn record_time(&self, name: &str, sample: Duration);
}

/// Sink that discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistograms;

impl HistogramSink for NoopHistograms {
    fn record_enumeration(&self, _name: &str, _sample: i32, _boundary: i32) {}

    fn record_count(&self, _name: &str, _sample: i32) {}

    fn record_boolean(&self, _name: &str, _sample: bool) {}

    fn record_time(&self, _name: &str, _sample: Duration) {}
}

/// One captured sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramSample {
    Enumeration(i32),
    Count(i32),
    Boolean(bool),
    Time(Duration),
}

/// Sink that keeps every sample in memory, keyed by histogram name.
#[derive(Debug, Default)]
pub struct InMemoryHistograms {
    samples: Mutex<HashMap<String, Vec<HistogramSample>>>,
}

impl InMemoryHistograms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples recorded under `name`, oldest first.
    pub fn samples(&self, name: &str) -> Vec<HistogramSample> {
        self.samples.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.samples.lock().get(name).map_or(0, Vec::len)
    }

    /// Names that received at least one sample, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.samples.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn push(&self, name: &str, sample: HistogramSample) {
        self.samples
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(sample);
    }
}

impl HistogramSink for InMemoryHistograms {
    fn record_enumeration(&self, name: &str, sample: i32, _boundary: i32) {
        self.push(name, HistogramSample::Enumeration(sample));
    }

    fn record_count(&self, name: &str, sample: i32) {
        self.push(name, HistogramSample::Count(sample));
    }

    fn record_boolean(&self, name: &str, sample: bool) {
        self.push(name, HistogramSample::Boolean(sample));
    }

    fn record_time(&self, name: &str, sample: Duration) {
        self.push(name, HistogramSample::Time(sample));
    }
}

/// Point-in-time view of [`EnvMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct EnvMetricsSnapshot {
    /// Parent directories fsynced after a manifest sync.
    pub dir_syncs: u64,
    /// Table files copied to their backup sibling.
    pub table_backups: u64,
    /// Backup copies that failed.
    pub backup_failures: u64,
    /// Tables recreated from a backup during a directory listing.
    pub tables_restored: u64,
    /// Sleeps taken while retrying a transient failure.
    pub retries: u64,
    /// Lock attempts rejected because this process already held the lock.
    pub lock_conflicts: u64,
    /// Background tasks that ran to completion (or panicked).
    pub background_tasks: u64,
}

/// In-process counters for an environment instance.
#[derive(Debug, Default)]
pub struct EnvMetrics {
    dir_syncs: AtomicU64,
    table_backups: AtomicU64,
    backup_failures: AtomicU64,
    tables_restored: AtomicU64,
    retries: AtomicU64,
    lock_conflicts: AtomicU64,
    background_tasks: AtomicU64,
}

impl EnvMetrics {
    pub fn snapshot(&self) -> EnvMetricsSnapshot {
        EnvMetricsSnapshot {
            dir_syncs: self.dir_syncs.load(Ordering::Relaxed),
            table_backups: self.table_backups.load(Ordering::Relaxed),
            backup_failures: self.backup_failures.load(Ordering::Relaxed),
            tables_restored: self.tables_restored.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            background_tasks: self.background_tasks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dir_sync(&self) {
        self.dir_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_conflict(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_background_task(&self) {
        self.background_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tables_restored(&self, count: u64) {
        self.tables_restored.fetch_add(count, Ordering::Relaxed);
    }
}

/// Names histograms after the owning environment and forwards samples.
pub struct EnvRecorder {
    name: String,
    sink: Arc<dyn HistogramSink>,
    metrics: EnvMetrics,
}

impl fmt::Debug for EnvRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvRecorder")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl EnvRecorder {
    pub fn new(name: impl Into<String>, sink: Arc<dyn HistogramSink>) -> Self {
        Self {
            name: name.into(),
            sink,
            metrics: EnvMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &EnvMetrics {
        &self.metrics
    }

    /// An I/O error occurred in `method`, with no platform detail.
    pub fn record_error_at(&self, method: MethodId) {
        self.sink.record_enumeration(
            &format!("{}.IOError", self.name),
            method.index() as i32,
            MethodId::COUNT as i32,
        );
    }

    /// An I/O error occurred in `method` with a platform file error.
    pub fn record_os_error(&self, method: MethodId, error: FileError) {
        self.record_error_at(method);
        log_warn!(
            component = "env",
            event = "os_error",
            env = %self.name,
            method = %method,
            error = %error,
        );
        self.sink.record_enumeration(
            &format!("{}.IOError.BFE.{}", self.name, method),
            -error.code(),
            -FileError::MAX,
        );
    }

    /// An I/O error occurred in `method` with only a raw OS error number.
    pub fn record_errno(&self, method: MethodId, errno: i32) {
        self.record_error_at(method);
        log_warn!(
            component = "env",
            event = "os_error",
            env = %self.name,
            method = %method,
            errno,
        );
        self.sink
            .record_count(&format!("{}.IOError.Errno.{}", self.name, method), errno);
    }

    pub fn record_backup_result(&self, success: bool) {
        if success {
            self.metrics.table_backups.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.backup_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.sink
            .record_boolean(&format!("{}.TableBackup", self.name), success);
    }

    pub fn record_restore_result(&self, success: bool) {
        self.sink
            .record_boolean(&format!("{}.TableRestore", self.name), success);
    }

    pub fn record_missing_files(&self, count: usize) {
        self.sink.record_count(
            &format!("{}.MissingFiles", self.name),
            i32::try_from(count).unwrap_or(i32::MAX),
        );
    }

    pub fn record_lock_file_ancestors(&self, missing: usize) {
        self.sink.record_count(
            &format!("{}.LockFileAncestorsNotFound", self.name),
            i32::try_from(missing).unwrap_or(i32::MAX),
        );
    }

    pub fn record_retry_time(&self, method: MethodId, elapsed: Duration) {
        self.sink.record_time(
            &format!("{}.TimeUntilSuccess.{}", self.name, method),
            elapsed,
        );
    }

    pub fn record_recovered_from_error(&self, method: MethodId, error: FileError) {
        self.sink.record_enumeration(
            &format!("{}.RetryRecoveredFromError.{}", self.name, method),
            -error.code(),
            -FileError::MAX,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefixed_with_env_name() {
        let sink = Arc::new(InMemoryHistograms::new());
        let recorder = EnvRecorder::new("LevelDBEnv.IDB", sink.clone());

        recorder.record_os_error(MethodId::LockFile, FileError::InUse);
        recorder.record_backup_result(true);
        recorder.record_backup_result(false);

        assert_eq!(
            sink.samples("LevelDBEnv.IDB.IOError"),
            vec![HistogramSample::Enumeration(MethodId::LockFile.index() as i32)]
        );
        assert_eq!(
            sink.samples("LevelDBEnv.IDB.IOError.BFE.LockFile"),
            vec![HistogramSample::Enumeration(2)]
        );
        assert_eq!(sink.count("LevelDBEnv.IDB.TableBackup"), 2);

        let snapshot = recorder.metrics().snapshot();
        assert_eq!(snapshot.table_backups, 1);
        assert_eq!(snapshot.backup_failures, 1);
    }

    #[test]
    fn noop_sink_accepts_everything() {
        let recorder = EnvRecorder::new("LevelDBEnv", Arc::new(NoopHistograms));
        recorder.record_missing_files(usize::MAX);
        recorder.record_retry_time(MethodId::CreateDir, Duration::from_millis(3));
        assert_eq!(recorder.metrics().snapshot(), EnvMetricsSnapshot::default());
    }
}
