//! File abstractions handed to the storage engine.
//!
//! Both backends end up with native handles (the sandboxed service opens
//! files on the caller's behalf and hands back the handle), so the same
//! wrappers in [`native`] serve both; only the parent-directory sync differs.

pub mod native;
pub mod tracker;

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter},
    io,
    path::Path,
};

use crate::{
    metrics::EnvRecorder,
    status::{Result, Status},
    translate::{io_error_status, FileError, MethodId},
};

/// Extension of the engine's sorted table files.
pub const TABLE_EXTENSION: &str = "ldb";
/// Extension of a table's backup copy.
pub const BACKUP_EXTENSION: &str = "bak";
/// Filename prefix of manifest files.
pub const MANIFEST_PREFIX: &str = "MANIFEST";

/// Sequential reader. Used by one thread at a time.
pub trait SequentialFile: Send {
    /// Read up to `n` bytes into `scratch`, replacing its contents.
    ///
    /// Fewer than `n` bytes with `Ok` means end of file. On error `scratch`
    /// still holds whatever was read before the failure.
    fn read(&mut self, n: usize, scratch: &mut Vec<u8>) -> Result<()>;

    /// Advance the cursor by `n` bytes without reading them.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// Positioned reader, safe to share between threads.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `n` bytes starting at `offset` into `scratch`, replacing its
    /// contents. On error `scratch` is left empty.
    fn read(&self, offset: u64, n: usize, scratch: &mut Vec<u8>) -> Result<()>;
}

/// Append-only writer. Used by one thread at a time.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Make appended data durable. Table files are also backed up when the
    /// environment asks for it, and manifest files sync their directory.
    fn sync(&mut self) -> Result<()>;
}

/// Role of a file, derived from its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Manifest,
    Table,
    Other,
}

impl Display for FileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Manifest => write!(f, "manifest"),
            FileType::Table => write!(f, "table"),
            FileType::Other => write!(f, "other"),
        }
    }
}

impl FileType {
    pub fn from_filename(fname: &str) -> Self {
        let path = Path::new(fname);
        let is_manifest = path
            .file_name()
            .and_then(OsStr::to_str)
            .is_some_and(|name| name.starts_with(MANIFEST_PREFIX));
        if is_manifest {
            FileType::Manifest
        } else if is_table(fname) {
            FileType::Table
        } else {
            FileType::Other
        }
    }
}

pub(crate) fn is_table(fname: &str) -> bool {
    Path::new(fname).extension().and_then(OsStr::to_str) == Some(TABLE_EXTENSION)
}

/// Directory containing `fname`; `"."` when the name has no directory part.
pub(crate) fn parent_dir(fname: &str) -> String {
    match Path::new(fname).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    }
}

/// Record an OS failure and translate it into a status.
pub(crate) fn os_failure(
    recorder: &EnvRecorder,
    filename: &str,
    method: MethodId,
    err: &io::Error,
) -> Status {
    match (FileError::from_io_error(err), err.raw_os_error()) {
        (FileError::Failed, Some(errno)) => recorder.record_errno(method, errno),
        (error, _) => recorder.record_os_error(method, error),
    }
    io_error_status(filename, method, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_name() {
        assert_eq!(FileType::from_filename("db/MANIFEST-000002"), FileType::Manifest);
        assert_eq!(FileType::from_filename("MANIFEST-000010"), FileType::Manifest);
        assert_eq!(FileType::from_filename("db/000005.ldb"), FileType::Table);
        assert_eq!(FileType::from_filename("db/000005.bak"), FileType::Other);
        assert_eq!(FileType::from_filename("db/000003.log"), FileType::Other);
        assert_eq!(FileType::from_filename("db/CURRENT"), FileType::Other);
        // Only the base name counts.
        assert_eq!(FileType::from_filename("MANIFEST/000003.log"), FileType::Other);
    }

    #[test]
    fn parent_dir_defaults_to_current() {
        assert_eq!(parent_dir("MANIFEST-000001"), ".");
        assert_eq!(parent_dir("db/MANIFEST-000001"), "db");
        assert_eq!(parent_dir("/tmp/db/000005.ldb"), "/tmp/db");
    }
}
