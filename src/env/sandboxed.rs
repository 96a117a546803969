use std::{
    fs::File,
    process,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

use crate::{
    background::BackgroundTask,
    env::{Env, EnvCore, TEST_DIRECTORY_PREFIX},
    fs::{
        native::{NativeRandomAccessFile, NativeSequentialFile, NativeWritableFile, ParentSync},
        RandomAccessFile, SequentialFile, WritableFile,
    },
    lock::{FileLock, HeldLock, LockTable},
    logger::{FileLogger, Logger},
    metrics::EnvMetricsSnapshot,
    observability::log_debug,
    option::EnvOptions,
    retry::retry,
    service::{
        proxy::{DirHandle, ServiceProxy},
        DirectoryService, FsError, OpenMode, ServiceResult,
    },
    status::{Result, Status},
    translate::{make_io_error, make_service_error, MethodId},
};

static TEST_DIRECTORY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Environment whose every filesystem operation goes through a directory
/// service. Paths are relative to the registered directory.
///
/// Table backups are never made or restored here.
pub struct SandboxedEnv {
    core: EnvCore,
    proxy: Arc<ServiceProxy>,
    dir: DirHandle,
    locks: LockTable,
    test_directory: Mutex<Option<String>>,
}

impl SandboxedEnv {
    /// Register `service` with `proxy` and build an environment on it. The
    /// registration is dropped together with the environment.
    pub fn new(
        proxy: Arc<ServiceProxy>,
        service: Arc<dyn DirectoryService>,
        options: EnvOptions,
    ) -> Self {
        let dir = proxy.register_directory(service);
        let options = options.make_backup(false);
        log_debug!(
            component = "sandbox",
            event = "directory_registered",
            env = %options.name,
        );
        Self {
            core: EnvCore::new(options),
            proxy,
            dir,
            locks: LockTable::new(),
            test_directory: Mutex::new(None),
        }
    }

    /// Like [`SandboxedEnv::new`] with a proxy of its own.
    pub fn with_service(
        service: Arc<dyn DirectoryService>,
        options: EnvOptions,
    ) -> std::io::Result<Self> {
        Ok(Self::new(ServiceProxy::new()?, service, options))
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn metrics(&self) -> EnvMetricsSnapshot {
        self.core.metrics()
    }

    fn service_failure(&self, fname: &str, method: MethodId, error: FsError) -> Status {
        self.core
            .recorder
            .record_os_error(method, error.file_error());
        make_service_error(fname, method, error)
    }

    fn open(&self, fname: &str, mode: OpenMode, method: MethodId) -> Result<File> {
        self.proxy
            .open_file(self.dir, fname, mode)
            .map_err(|error| self.service_failure(fname, method, error))
    }

    /// Retry a service call the same way local operations are retried.
    fn retried<T>(
        &self,
        method: MethodId,
        mut call: impl FnMut() -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        retry(method, &self.core, || {
            call().map_err(|error| error.file_error())
        })
        .map_err(FsError::from)
    }

    fn already_locked(&self, fname: &str) -> Status {
        self.core.recorder.metrics().record_lock_conflict();
        make_io_error(fname, "Lock file already locked.", MethodId::LockFile)
    }

    fn writable(&self, fname: &str, file: File) -> Box<dyn WritableFile> {
        self.core.tracker.did_create_new_file(fname);
        Box::new(NativeWritableFile::new(
            fname,
            file,
            false,
            ParentSync::Service {
                proxy: self.proxy.clone(),
                dir: self.dir,
            },
            self.core.tracker.clone(),
            self.core.recorder.clone(),
        ))
    }
}

impl Env for SandboxedEnv {
    fn new_sequential_file(&self, fname: &str) -> Result<Box<dyn SequentialFile>> {
        let file = self.open(fname, OpenMode::Read, MethodId::NewSequentialFile)?;
        Ok(Box::new(NativeSequentialFile::new(
            fname,
            file,
            self.core.recorder.clone(),
        )))
    }

    fn new_random_access_file(&self, fname: &str) -> Result<Box<dyn RandomAccessFile>> {
        let file = self.open(fname, OpenMode::Read, MethodId::NewRandomAccessFile)?;
        Ok(Box::new(NativeRandomAccessFile::new(
            fname,
            file,
            self.core.recorder.clone(),
        )))
    }

    fn new_writable_file(&self, fname: &str) -> Result<Box<dyn WritableFile>> {
        let file = self.open(fname, OpenMode::CreateAlways, MethodId::NewWritableFile)?;
        Ok(self.writable(fname, file))
    }

    fn new_appendable_file(&self, fname: &str) -> Result<Box<dyn WritableFile>> {
        let file = self.open(
            fname,
            OpenMode::OpenAlwaysAppend,
            MethodId::NewAppendableFile,
        )?;
        Ok(self.writable(fname, file))
    }

    fn file_exists(&self, fname: &str) -> bool {
        self.proxy.file_exists(self.dir, fname).unwrap_or(false)
    }

    fn get_children(&self, dir: &str) -> Result<Vec<String>> {
        self.proxy
            .get_children(self.dir, dir)
            .map_err(|error| self.service_failure(dir, MethodId::GetChildren, error))
    }

    fn delete_file(&self, fname: &str) -> Result<()> {
        self.proxy
            .delete(self.dir, fname, false)
            .map_err(|error| self.service_failure(fname, MethodId::DeleteFile, error))
    }

    fn create_dir(&self, dirname: &str) -> Result<()> {
        self.retried(MethodId::CreateDir, || self.proxy.create_dir(self.dir, dirname))
            .map_err(|error| self.service_failure(dirname, MethodId::CreateDir, error))
    }

    fn delete_dir(&self, dirname: &str) -> Result<()> {
        self.proxy
            .delete(self.dir, dirname, true)
            .map_err(|error| self.service_failure(dirname, MethodId::DeleteDir, error))
    }

    fn get_file_size(&self, fname: &str) -> Result<u64> {
        self.proxy
            .get_file_size(self.dir, fname)
            .map_err(|error| self.service_failure(fname, MethodId::GetFileSize, error))
    }

    fn rename_file(&self, src: &str, target: &str) -> Result<()> {
        self.retried(MethodId::RenameFile, || {
            self.proxy.rename(self.dir, src, target)
        })
        .map_err(|error| self.service_failure(src, MethodId::RenameFile, error))
    }

    fn lock_file(&self, fname: &str) -> Result<FileLock> {
        if !self.locks.insert(fname) {
            return Err(self.already_locked(fname));
        }
        match self.retried(MethodId::LockFile, || self.proxy.lock(self.dir, fname)) {
            Ok(token) => Ok(FileLock {
                name: fname.to_string(),
                held: HeldLock::Service(token),
            }),
            Err(error) => {
                self.locks.remove(fname);
                // Held by another environment in this process.
                if error == FsError::Exists {
                    return Err(self.already_locked(fname));
                }
                Err(self.service_failure(fname, MethodId::LockFile, error))
            }
        }
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        let HeldLock::Service(token) = lock.held else {
            return Err(Status::invalid_argument(
                lock.name,
                "lock was not acquired through this environment's service",
            ));
        };
        let result = self
            .proxy
            .unlock(self.dir, token)
            .map_err(|error| self.service_failure(&lock.name, MethodId::UnlockFile, error));
        let removed = self.locks.remove(&lock.name);
        debug_assert!(removed, "unlocking {}, which is not held", lock.name);
        result
    }

    fn schedule(&self, task: BackgroundTask) {
        self.core.schedule(task);
    }

    fn start_thread(&self, task: BackgroundTask) {
        self.core.start_thread(task);
    }

    fn get_test_directory(&self) -> Result<String> {
        let mut cached = self.test_directory.lock();
        if let Some(dir) = cached.as_ref() {
            return Ok(dir.clone());
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.subsec_nanos());
        let dir = format!(
            "{TEST_DIRECTORY_PREFIX}{}-{nanos}-{}",
            process::id(),
            TEST_DIRECTORY_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        self.proxy
            .create_dir(self.dir, &dir)
            .map_err(|error| self.service_failure(&dir, MethodId::GetTestDirectory, error))?;
        *cached = Some(dir.clone());
        Ok(dir)
    }

    fn new_logger(&self, fname: &str) -> Result<Box<dyn Logger>> {
        let file = self.open(fname, OpenMode::CreateAlways, MethodId::NewLogger)?;
        Ok(Box::new(FileLogger::new(file)))
    }
}

impl Drop for SandboxedEnv {
    fn drop(&mut self) {
        self.proxy.unregister_directory(self.dir);
    }
}

impl std::fmt::Debug for SandboxedEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxedEnv")
            .field("options", &self.core.options)
            .field("dir", &self.dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        service::local::LocalDirectoryService,
        translate::{parse_method_and_error, ErrorParsingResult},
    };

    fn env(dir: &TempDir) -> SandboxedEnv {
        SandboxedEnv::with_service(
            Arc::new(LocalDirectoryService::new(dir.path())),
            EnvOptions::default().name("TestSandboxEnv"),
        )
        .expect("proxy thread")
    }

    #[test]
    fn service_errors_are_tagged() {
        let dir = TempDir::new().expect("tempdir");
        let status = env(&dir)
            .get_file_size("missing.ldb")
            .expect_err("size of missing file");

        assert!(status.is_io_error());
        assert_eq!(
            parse_method_and_error(&status),
            ErrorParsingResult::MethodAndServiceError(MethodId::GetFileSize, FsError::NotFound)
        );
    }

    #[test]
    fn backups_are_disabled() {
        let dir = TempDir::new().expect("tempdir");
        let env = SandboxedEnv::with_service(
            Arc::new(LocalDirectoryService::new(dir.path())),
            EnvOptions::indexed_db(),
        )
        .expect("proxy thread");

        let mut table = env.new_writable_file("000005.ldb").expect("table");
        table.append(b"rows").expect("append");
        table.sync().expect("sync");

        assert!(!dir.path().join("000005.bak").exists());
        assert_eq!(env.metrics().table_backups, 0);
    }

    #[test]
    fn dropping_env_releases_registration() {
        let dir = TempDir::new().expect("tempdir");
        let proxy = ServiceProxy::new().expect("proxy thread");
        let env = SandboxedEnv::new(
            proxy.clone(),
            Arc::new(LocalDirectoryService::new(dir.path())),
            EnvOptions::default(),
        );
        let handle = env.dir;
        env.create_dir("db").expect("create dir");
        drop(env);

        assert_eq!(proxy.file_exists(handle, "db"), Err(FsError::InvalidOperation));
    }
}
