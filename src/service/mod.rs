//! Directory-scoped filesystem service used by the sandboxed backend.
//!
//! A sandboxed process cannot open arbitrary paths. Instead it is handed a
//! [`DirectoryService`] confined to one directory and reaches it through a
//! [`proxy::ServiceProxy`], which serializes every call onto a dedicated
//! thread. Files opened by the service come back as native handles.

pub mod local;
pub mod proxy;

use std::{fs::File, io};

use thiserror::Error;

use crate::translate::FileError;

/// Service-side error. Shares the numeric code space of [`FileError`] but is
/// kept distinct so statuses can tell which transport produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(i32)]
pub enum FsError {
    #[error("Service: operation failed.")]
    Failed = -1,
    #[error("Service: file in use.")]
    InUse = -2,
    #[error("Service: file exists.")]
    Exists = -3,
    #[error("Service: file not found.")]
    NotFound = -4,
    #[error("Service: access denied.")]
    AccessDenied = -5,
    #[error("Service: too many files open.")]
    TooManyOpened = -6,
    #[error("Service: out of memory.")]
    NoMemory = -7,
    #[error("Service: no space left.")]
    NoSpace = -8,
    #[error("Service: not a directory.")]
    NotADirectory = -9,
    #[error("Service: invalid operation.")]
    InvalidOperation = -10,
    #[error("Service: path outside of the directory.")]
    Security = -11,
    #[error("Service: operation aborted.")]
    Abort = -12,
    #[error("Service: not a file.")]
    NotAFile = -13,
    #[error("Service: directory not empty.")]
    NotEmpty = -14,
    #[error("Service: invalid path.")]
    InvalidUrl = -15,
    #[error("Service: I/O error.")]
    Io = -16,
}

impl FsError {
    pub const ALL: [FsError; 16] = [
        FsError::Failed,
        FsError::InUse,
        FsError::Exists,
        FsError::NotFound,
        FsError::AccessDenied,
        FsError::TooManyOpened,
        FsError::NoMemory,
        FsError::NoSpace,
        FsError::NotADirectory,
        FsError::InvalidOperation,
        FsError::Security,
        FsError::Abort,
        FsError::NotAFile,
        FsError::NotEmpty,
        FsError::InvalidUrl,
        FsError::Io,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<FsError> {
        if code >= 0 || code <= -17 {
            return None;
        }
        Self::ALL.get((-code - 1) as usize).copied()
    }

    /// The platform error with the same code.
    pub fn file_error(self) -> FileError {
        FileError::from_code(self.code()).unwrap_or(FileError::Failed)
    }
}

impl From<FileError> for FsError {
    fn from(error: FileError) -> Self {
        FsError::from_code(error.code()).unwrap_or(FsError::Failed)
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        FileError::from_io_error(&err).into()
    }
}

pub type ServiceResult<T> = Result<T, FsError>;

/// How [`DirectoryService::open_file`] opens a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only.
    Read,
    /// Create or truncate, write only.
    CreateAlways,
    /// Create if missing, writes go to the end.
    OpenAlwaysAppend,
}

/// Opaque handle for a lock held by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(pub(crate) u64);

/// Filesystem operations on one directory tree. Paths are relative to the
/// service root.
pub trait DirectoryService: Send + Sync + 'static {
    fn open_file(&self, path: &str, mode: OpenMode) -> ServiceResult<File>;

    fn file_exists(&self, path: &str) -> ServiceResult<bool>;

    /// Entry names (not paths) directly inside `path`.
    fn get_children(&self, path: &str) -> ServiceResult<Vec<String>>;

    fn delete(&self, path: &str, recursive: bool) -> ServiceResult<()>;

    /// Create `path` and any missing parents.
    fn create_dir(&self, path: &str) -> ServiceResult<()>;

    fn get_file_size(&self, path: &str) -> ServiceResult<u64>;

    fn rename(&self, from: &str, to: &str) -> ServiceResult<()>;

    /// Take an exclusive lock on `path`. A lock already held in this process
    /// fails with [`FsError::Exists`]; one held elsewhere with a transient
    /// error such as [`FsError::InUse`].
    fn lock(&self, path: &str) -> ServiceResult<LockToken>;

    fn unlock(&self, token: LockToken) -> ServiceResult<()>;

    fn sync_directory(&self, path: &str) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_line_up_with_file_errors() {
        for (fs_error, file_error) in FsError::ALL.into_iter().zip(FileError::ALL) {
            assert_eq!(fs_error.code(), file_error.code());
            assert_eq!(FsError::from(file_error), fs_error);
            assert_eq!(fs_error.file_error(), file_error);
        }
        assert_eq!(FsError::from_code(0), None);
        assert_eq!(FsError::from_code(-17), None);
        assert_eq!(FsError::from_code(i32::MIN), None);
    }

    #[test]
    fn io_errors_convert() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(FsError::from(err), FsError::NotFound);
    }
}
