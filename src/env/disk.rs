use std::{
    fs::{self, File, OpenOptions},
    path::Path,
};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{
    backup,
    background::BackgroundTask,
    env::{Env, EnvCore, TEST_DIRECTORY_PREFIX},
    fs::{
        is_table,
        native::{NativeRandomAccessFile, NativeSequentialFile, NativeWritableFile, ParentSync},
        RandomAccessFile, SequentialFile, WritableFile,
    },
    lock::{lock_native, process_lock_table, unlock_native, FileLock, HeldLock},
    logger::{FileLogger, Logger},
    metrics::EnvMetricsSnapshot,
    option::EnvOptions,
    retry::retry,
    status::{Result, Status},
    translate::{make_io_error, FileError, MethodId},
};

static TEST_DIRECTORY: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Environment backed by the local filesystem.
pub struct DiskEnv {
    core: EnvCore,
}

impl DiskEnv {
    pub fn new(options: EnvOptions) -> Self {
        Self {
            core: EnvCore::new(options),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn makes_backups(&self) -> bool {
        self.core.options.make_backup
    }

    pub fn metrics(&self) -> EnvMetricsSnapshot {
        self.core.metrics()
    }

    fn writable(&self, fname: &str, file: File) -> Box<dyn WritableFile> {
        self.core.tracker.did_create_new_file(fname);
        Box::new(NativeWritableFile::new(
            fname,
            file,
            self.core.options.make_backup,
            ParentSync::Local,
            self.core.tracker.clone(),
            self.core.recorder.clone(),
        ))
    }

    fn method_failure(&self, fname: &str, message: &str, method: MethodId) -> Status {
        self.core.recorder.record_error_at(method);
        make_io_error(fname, message, method)
    }
}

impl Env for DiskEnv {
    fn new_sequential_file(&self, fname: &str) -> Result<Box<dyn SequentialFile>> {
        match File::open(fname) {
            Ok(file) => Ok(Box::new(NativeSequentialFile::new(
                fname,
                file,
                self.core.recorder.clone(),
            ))),
            Err(err) => Err(self.core.os_error(
                fname,
                "Unable to create sequential file",
                MethodId::NewSequentialFile,
                &err,
            )),
        }
    }

    fn new_random_access_file(&self, fname: &str) -> Result<Box<dyn RandomAccessFile>> {
        match File::open(fname) {
            Ok(file) => Ok(Box::new(NativeRandomAccessFile::new(
                fname,
                file,
                self.core.recorder.clone(),
            ))),
            Err(err) => {
                let error = FileError::from_io_error(&err);
                Err(self.core.file_error(
                    fname,
                    &error.to_string(),
                    MethodId::NewRandomAccessFile,
                    error,
                ))
            }
        }
    }

    fn new_writable_file(&self, fname: &str) -> Result<Box<dyn WritableFile>> {
        let opened = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(fname);
        match opened {
            Ok(file) => Ok(self.writable(fname, file)),
            Err(err) => Err(self.core.os_error(
                fname,
                "Unable to create writable file",
                MethodId::NewWritableFile,
                &err,
            )),
        }
    }

    fn new_appendable_file(&self, fname: &str) -> Result<Box<dyn WritableFile>> {
        match OpenOptions::new().append(true).create(true).open(fname) {
            Ok(file) => Ok(self.writable(fname, file)),
            Err(err) => Err(self.core.os_error(
                fname,
                "Unable to create appendable file",
                MethodId::NewAppendableFile,
                &err,
            )),
        }
    }

    fn file_exists(&self, fname: &str) -> bool {
        Path::new(fname).exists()
    }

    fn get_children(&self, dir: &str) -> Result<Vec<String>> {
        let listing = fs::read_dir(dir).and_then(|entries| {
            entries
                .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
                .collect::<std::io::Result<Vec<String>>>()
        });
        let mut names = listing.map_err(|err| {
            self.core.os_error(
                dir,
                "Could not open/read directory",
                MethodId::GetChildren,
                &err,
            )
        })?;
        if self.core.options.make_backup {
            backup::restore_if_necessary(dir, &mut names, &self.core.recorder);
        }
        Ok(names)
    }

    fn delete_file(&self, fname: &str) -> Result<()> {
        let result = fs::remove_file(fname)
            .map_err(|_| self.method_failure(fname, "Could not delete file.", MethodId::DeleteFile));
        if self.core.options.make_backup && is_table(fname) {
            backup::delete_backup(fname);
        }
        result
    }

    fn create_dir(&self, dirname: &str) -> Result<()> {
        retry(MethodId::CreateDir, &self.core, || {
            fs::create_dir_all(dirname).map_err(|err| FileError::from_io_error(&err))
        })
        .map_err(|error| {
            self.core.file_error(
                dirname,
                &format!("Could not create/open directory, error: {error}"),
                MethodId::CreateDir,
                error,
            )
        })
    }

    fn delete_dir(&self, dirname: &str) -> Result<()> {
        fs::remove_dir(dirname).map_err(|_| {
            self.method_failure(dirname, "Could not delete directory.", MethodId::DeleteDir)
        })
    }

    fn get_file_size(&self, fname: &str) -> Result<u64> {
        fs::metadata(fname).map(|metadata| metadata.len()).map_err(|_| {
            self.method_failure(fname, "Could not determine file size.", MethodId::GetFileSize)
        })
    }

    fn rename_file(&self, src: &str, target: &str) -> Result<()> {
        retry(MethodId::RenameFile, &self.core, || {
            fs::rename(src, target).map_err(|err| FileError::from_io_error(&err))
        })
        .map_err(|error| {
            self.core.file_error(
                src,
                &format!("Could not rename file: {error}"),
                MethodId::RenameFile,
                error,
            )
        })
    }

    fn lock_file(&self, fname: &str) -> Result<FileLock> {
        lock_native(fname, process_lock_table(), &self.core)
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        match lock.held {
            HeldLock::Native(file) => {
                unlock_native(&lock.name, file, process_lock_table(), &self.core)
            }
            HeldLock::Service(_) => Err(Status::invalid_argument(
                lock.name,
                "lock was not acquired from the local filesystem",
            )),
        }
    }

    fn schedule(&self, task: BackgroundTask) {
        self.core.schedule(task);
    }

    fn start_thread(&self, task: BackgroundTask) {
        self.core.start_thread(task);
    }

    fn get_test_directory(&self) -> Result<String> {
        let mut cached = TEST_DIRECTORY.lock();
        if let Some(dir) = cached.as_ref() {
            return Ok(dir.clone());
        }
        let created = tempfile::Builder::new()
            .prefix(TEST_DIRECTORY_PREFIX)
            .tempdir()
            .map_err(|_| {
                self.method_failure(
                    "",
                    "Could not create temp directory.",
                    MethodId::GetTestDirectory,
                )
            })?;
        let dir = created.keep().to_string_lossy().into_owned();
        *cached = Some(dir.clone());
        Ok(dir)
    }

    fn new_logger(&self, fname: &str) -> Result<Box<dyn Logger>> {
        match File::create(fname) {
            Ok(file) => Ok(Box::new(FileLogger::new(file))),
            Err(err) => Err(self.core.os_error(
                fname,
                "Unable to create log file",
                MethodId::NewLogger,
                &err,
            )),
        }
    }
}

impl std::fmt::Debug for DiskEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskEnv")
            .field("options", &self.core.options)
            .finish()
    }
}
