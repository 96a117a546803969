//! The environment handed to the storage engine.
//!
//! [`Env`] is the whole surface the engine uses to reach the operating
//! system. Two backends implement it: [`DiskEnv`] talks to the local
//! filesystem, [`SandboxedEnv`] routes everything through a directory
//! service. Both share an [`EnvCore`] holding options, metrics, the manifest
//! write tracker and the background queue.

pub mod disk;
pub mod sandboxed;

use std::{
    io,
    sync::Arc,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;

pub use disk::DiskEnv;
pub use sandboxed::SandboxedEnv;

use crate::{
    background::{self, BackgroundQueue, BackgroundTask},
    fs::{tracker::WriteTracker, RandomAccessFile, SequentialFile, WritableFile},
    lock::FileLock,
    logger::Logger,
    metrics::{EnvMetricsSnapshot, EnvRecorder},
    observability::log_error,
    option::EnvOptions,
    retry::RetrierProvider,
    status::{Result, Status},
    translate::{make_io_error_with_file_error, FileError, MethodId},
};

/// Prefix of directories handed out by [`Env::get_test_directory`].
pub const TEST_DIRECTORY_PREFIX: &str = "leveldb-test-";

pub trait Env: Send + Sync {
    /// Open an existing file for sequential reads.
    fn new_sequential_file(&self, fname: &str) -> Result<Box<dyn SequentialFile>>;

    /// Open an existing file for positioned reads.
    fn new_random_access_file(&self, fname: &str) -> Result<Box<dyn RandomAccessFile>>;

    /// Create `fname`, truncating any existing file.
    fn new_writable_file(&self, fname: &str) -> Result<Box<dyn WritableFile>>;

    /// Open `fname` for appending, creating it if missing.
    fn new_appendable_file(&self, fname: &str) -> Result<Box<dyn WritableFile>>;

    fn file_exists(&self, fname: &str) -> bool;

    /// Names of the entries in `dir`. Tables that only survive as backups
    /// are restored first when the environment keeps backups.
    fn get_children(&self, dir: &str) -> Result<Vec<String>>;

    /// Delete `fname` and, for tables, its backup.
    fn delete_file(&self, fname: &str) -> Result<()>;

    fn create_dir(&self, dirname: &str) -> Result<()>;

    fn delete_dir(&self, dirname: &str) -> Result<()>;

    fn get_file_size(&self, fname: &str) -> Result<u64>;

    fn rename_file(&self, src: &str, target: &str) -> Result<()>;

    /// Lock `fname` against other users in this and other processes.
    fn lock_file(&self, fname: &str) -> Result<FileLock>;

    fn unlock_file(&self, lock: FileLock) -> Result<()>;

    /// Run `task` on the background worker after every task already queued.
    fn schedule(&self, task: BackgroundTask);

    /// Run `task` on a new detached thread.
    fn start_thread(&self, task: BackgroundTask);

    /// A scratch directory for tests, created on first use and reused after.
    ///
    /// Local environments share one directory for the whole process. A
    /// sandboxed environment creates its own inside its service directory,
    /// since it cannot reach paths outside it.
    fn get_test_directory(&self) -> Result<String>;

    fn new_logger(&self, fname: &str) -> Result<Box<dyn Logger>>;

    /// Microseconds since the Unix epoch.
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_micros() as u64)
    }

    fn sleep_for_microseconds(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }
}

/// State shared by both backends.
pub(crate) struct EnvCore {
    pub(crate) options: EnvOptions,
    pub(crate) recorder: Arc<EnvRecorder>,
    pub(crate) tracker: Arc<WriteTracker>,
    background: BackgroundQueue,
}

impl EnvCore {
    pub(crate) fn new(options: EnvOptions) -> Self {
        let recorder = Arc::new(EnvRecorder::new(
            options.name.clone(),
            options.histograms.clone(),
        ));
        Self {
            background: BackgroundQueue::new(
                format!("{}.bg", options.name),
                recorder.clone(),
            ),
            tracker: Arc::new(WriteTracker::new()),
            recorder,
            options,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.options.name
    }

    pub(crate) fn schedule(&self, task: BackgroundTask) {
        self.background.schedule(task);
    }

    pub(crate) fn start_thread(&self, task: BackgroundTask) {
        let name = format!("{}.thread", self.options.name);
        if let Err(err) = background::start_thread(&name, task) {
            log_error!(
                component = "background",
                event = "thread_spawn_failed",
                thread = %name,
                error = %err,
            );
        }
    }

    pub(crate) fn metrics(&self) -> EnvMetricsSnapshot {
        self.recorder.metrics().snapshot()
    }

    /// Record an OS failure and build a status with `message`.
    pub(crate) fn os_error(
        &self,
        fname: &str,
        message: &str,
        method: MethodId,
        err: &io::Error,
    ) -> Status {
        self.file_error(fname, message, method, FileError::from_io_error(err))
    }

    pub(crate) fn file_error(
        &self,
        fname: &str,
        message: &str,
        method: MethodId,
        error: FileError,
    ) -> Status {
        self.recorder.record_os_error(method, error);
        make_io_error_with_file_error(fname, message, method, error)
    }
}

impl RetrierProvider for EnvCore {
    fn max_retry_time(&self) -> Duration {
        self.options.max_retry_time
    }

    fn retry_interval(&self) -> Duration {
        self.options.retry_interval
    }

    fn recorder(&self) -> &EnvRecorder {
        &self.recorder
    }
}

static DEFAULT_ENV: Lazy<DiskEnv> = Lazy::new(|| DiskEnv::new(EnvOptions::default()));

static INDEXED_DB_ENV: Lazy<DiskEnv> = Lazy::new(|| DiskEnv::new(EnvOptions::indexed_db()));

/// Process-wide local environment, created on first use and never torn down.
pub fn default_env() -> &'static DiskEnv {
    &DEFAULT_ENV
}

/// Process-wide local environment that keeps table backups.
pub fn indexed_db_env() -> &'static DiskEnv {
    &INDEXED_DB_ENV
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_are_stable() {
        assert!(std::ptr::eq(default_env(), default_env()));
        assert_eq!(default_env().name(), "LevelDBEnv");
        assert_eq!(indexed_db_env().name(), "LevelDBEnv.IDB");
        assert!(indexed_db_env().makes_backups());
        assert!(!default_env().makes_backups());
    }

    #[test]
    fn clock_moves_forward() {
        let env = default_env();
        let before = env.now_micros();
        env.sleep_for_microseconds(2_000);
        assert!(env.now_micros() >= before + 2_000);
    }
}
