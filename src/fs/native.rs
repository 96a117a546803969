//! File wrappers over native handles.

use std::{
    fs::File,
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    sync::Arc,
};

use crate::{
    backup,
    fs::{
        os_failure, parent_dir, tracker::WriteTracker, FileType, RandomAccessFile,
        SequentialFile, WritableFile,
    },
    metrics::EnvRecorder,
    observability::log_debug,
    service::proxy::{DirHandle, ServiceProxy},
    status::Result,
    translate::{
        make_io_error, make_io_error_with_file_error, make_service_error, FileError, MethodId,
    },
};

pub struct NativeSequentialFile<R = File> {
    filename: String,
    file: R,
    recorder: Arc<EnvRecorder>,
}

impl<R> NativeSequentialFile<R>
where
    R: Read + Seek + Send,
{
    pub(crate) fn new(filename: impl Into<String>, file: R, recorder: Arc<EnvRecorder>) -> Self {
        Self {
            filename: filename.into(),
            file,
            recorder,
        }
    }
}

impl<R> SequentialFile for NativeSequentialFile<R>
where
    R: Read + Seek + Send,
{
    fn read(&mut self, n: usize, scratch: &mut Vec<u8>) -> Result<()> {
        scratch.clear();
        scratch.resize(n, 0);
        let mut filled = 0;
        while filled < n {
            match self.file.read(&mut scratch[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    scratch.truncate(filled);
                    return Err(os_failure(
                        &self.recorder,
                        &self.filename,
                        MethodId::SequentialFileRead,
                        &err,
                    ));
                }
            }
        }
        scratch.truncate(filled);
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let seek = i64::try_from(n)
            .map_err(|_| io::Error::from(ErrorKind::InvalidInput))
            .and_then(|offset| self.file.seek(SeekFrom::Current(offset)));
        match seek {
            Ok(_) => Ok(()),
            Err(err) => Err(os_failure(
                &self.recorder,
                &self.filename,
                MethodId::SequentialFileSkip,
                &err,
            )),
        }
    }
}

pub struct NativeRandomAccessFile {
    filename: String,
    file: File,
    recorder: Arc<EnvRecorder>,
}

impl NativeRandomAccessFile {
    pub(crate) fn new(filename: impl Into<String>, file: File, recorder: Arc<EnvRecorder>) -> Self {
        Self {
            filename: filename.into(),
            file,
            recorder,
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

impl RandomAccessFile for NativeRandomAccessFile {
    fn read(&self, offset: u64, n: usize, scratch: &mut Vec<u8>) -> Result<()> {
        scratch.clear();
        scratch.resize(n, 0);
        let mut filled = 0;
        while filled < n {
            match read_at(&self.file, &mut scratch[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    scratch.clear();
                    self.recorder.record_error_at(MethodId::RandomAccessFileRead);
                    return Err(make_io_error(
                        &self.filename,
                        "Could not perform read",
                        MethodId::RandomAccessFileRead,
                    ));
                }
            }
        }
        scratch.truncate(filled);
        Ok(())
    }
}

/// How a manifest's parent directory is made durable.
pub(crate) enum ParentSync {
    /// fsync the directory directly.
    Local,
    /// Ask the filesystem service to do it.
    Service {
        proxy: Arc<ServiceProxy>,
        dir: DirHandle,
    },
}

pub struct NativeWritableFile {
    filename: String,
    file: Option<File>,
    file_type: FileType,
    parent_dir: String,
    make_backup: bool,
    parent_sync: ParentSync,
    tracker: Arc<WriteTracker>,
    recorder: Arc<EnvRecorder>,
}

impl NativeWritableFile {
    pub(crate) fn new(
        filename: impl Into<String>,
        file: File,
        make_backup: bool,
        parent_sync: ParentSync,
        tracker: Arc<WriteTracker>,
        recorder: Arc<EnvRecorder>,
    ) -> Self {
        let filename = filename.into();
        Self {
            file_type: FileType::from_filename(&filename),
            parent_dir: parent_dir(&filename),
            filename,
            file: Some(file),
            make_backup,
            parent_sync,
            tracker,
            recorder,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    fn handle(&self, method: MethodId) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| make_io_error(&self.filename, "File is closed.", method))
    }

    fn sync_parent(&self) -> Result<()> {
        match &self.parent_sync {
            ParentSync::Local => sync_local_dir(&self.parent_dir, &self.recorder)?,
            ParentSync::Service { proxy, dir } => {
                if let Err(error) = proxy.sync_directory(*dir, &self.parent_dir) {
                    self.recorder.record_error_at(MethodId::SyncParent);
                    return Err(make_service_error(
                        &self.parent_dir,
                        MethodId::SyncParent,
                        error,
                    ));
                }
            }
        }
        self.recorder.metrics().record_dir_sync();
        Ok(())
    }
}

#[cfg(unix)]
fn sync_local_dir(dir: &str, recorder: &EnvRecorder) -> Result<()> {
    let handle = File::open(dir).map_err(|err| {
        let error = FileError::from_io_error(&err);
        recorder.record_os_error(MethodId::SyncParent, error);
        make_io_error_with_file_error(dir, "Unable to open directory", MethodId::SyncParent, error)
    })?;
    handle
        .sync_all()
        .map_err(|err| os_failure(recorder, dir, MethodId::SyncParent, &err))
}

// Directory entries are durable once created on platforms without a
// directory fsync.
#[cfg(not(unix))]
fn sync_local_dir(_dir: &str, _recorder: &EnvRecorder) -> Result<()> {
    Ok(())
}

impl WritableFile for NativeWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        let mut file = self.handle(MethodId::WritableFileAppend)?;
        file.write_all(data).map_err(|err| {
            os_failure(
                &self.recorder,
                &self.filename,
                MethodId::WritableFileAppend,
                &err,
            )
        })
    }

    fn close(&mut self) -> Result<()> {
        self.file.take();
        Ok(())
    }

    // Writes go straight to the OS handle; there is no userspace buffer.
    fn flush(&mut self) -> Result<()> {
        self.handle(MethodId::WritableFileFlush).map(|_| ())
    }

    fn sync(&mut self) -> Result<()> {
        let file = self.handle(MethodId::WritableFileSync)?;
        if let Err(err) = file.sync_all() {
            return Err(os_failure(
                &self.recorder,
                &self.filename,
                MethodId::WritableFileSync,
                &err,
            ));
        }

        if self.make_backup && self.file_type == FileType::Table {
            let success = backup::make_backup(&self.filename);
            self.recorder.record_backup_result(success);
        }

        if self.file_type == FileType::Manifest && self.tracker.does_dir_need_sync(&self.filename)
        {
            self.sync_parent()?;
            self.tracker.did_sync_dir(&self.filename);
            log_debug!(
                component = "file",
                event = "parent_dir_synced",
                dir = %self.parent_dir,
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for NativeWritableFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeWritableFile")
            .field("filename", &self.filename)
            .field("file_type", &self.file_type)
            .field("closed", &self.file.is_none())
            .finish()
    }
}
