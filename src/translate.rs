//! Translation between OS-level failures and engine statuses.
//!
//! The engine's [`Status`] only carries text, so structured details (which
//! environment method failed, and with which platform error) are embedded
//! into the message using a fixed pattern and parsed back out for metrics:
//!
//! - `"<message> (ChromeMethodOnly: <id>::<name>)"`
//! - `"<message> (ChromeMethodBFE: <id>::<name>::<-file error>)"`
//! - `"<message> (ChromeMethodErrno: <id>::<name>::<errno>)"`
//! - `"<message> (SandboxFSError: <id>::<name>::<-service error>)"`

use std::{fmt, io};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::{service::FsError, status::Status};

/// Environment entry points, used to tag errors and metrics.
///
/// The numeric value of each variant is part of the status text and of
/// recorded metrics; new methods are appended at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MethodId {
    SequentialFileRead = 0,
    SequentialFileSkip,
    RandomAccessFileRead,
    WritableFileAppend,
    WritableFileClose,
    WritableFileFlush,
    WritableFileSync,
    NewSequentialFile,
    NewRandomAccessFile,
    NewWritableFile,
    DeleteFile,
    CreateDir,
    DeleteDir,
    GetFileSize,
    RenameFile,
    LockFile,
    UnlockFile,
    GetTestDirectory,
    NewLogger,
    SyncParent,
    GetChildren,
    NewAppendableFile,
}

impl MethodId {
    /// Every method, in numeric order.
    pub const ALL: [MethodId; 22] = [
        MethodId::SequentialFileRead,
        MethodId::SequentialFileSkip,
        MethodId::RandomAccessFileRead,
        MethodId::WritableFileAppend,
        MethodId::WritableFileClose,
        MethodId::WritableFileFlush,
        MethodId::WritableFileSync,
        MethodId::NewSequentialFile,
        MethodId::NewRandomAccessFile,
        MethodId::NewWritableFile,
        MethodId::DeleteFile,
        MethodId::CreateDir,
        MethodId::DeleteDir,
        MethodId::GetFileSize,
        MethodId::RenameFile,
        MethodId::LockFile,
        MethodId::UnlockFile,
        MethodId::GetTestDirectory,
        MethodId::NewLogger,
        MethodId::SyncParent,
        MethodId::GetChildren,
        MethodId::NewAppendableFile,
    ];

    /// Number of methods; exclusive bound for enumeration histograms.
    pub const COUNT: u32 = Self::ALL.len() as u32;

    pub fn from_index(index: u32) -> Option<MethodId> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodId::SequentialFileRead => "SequentialFileRead",
            MethodId::SequentialFileSkip => "SequentialFileSkip",
            MethodId::RandomAccessFileRead => "RandomAccessFileRead",
            MethodId::WritableFileAppend => "WritableFileAppend",
            MethodId::WritableFileClose => "WritableFileClose",
            MethodId::WritableFileFlush => "WritableFileFlush",
            MethodId::WritableFileSync => "WritableFileSync",
            MethodId::NewSequentialFile => "NewSequentialFile",
            MethodId::NewRandomAccessFile => "NewRandomAccessFile",
            MethodId::NewWritableFile => "NewWritableFile",
            MethodId::DeleteFile => "DeleteFile",
            MethodId::CreateDir => "CreateDir",
            MethodId::DeleteDir => "DeleteDir",
            MethodId::GetFileSize => "GetFileSize",
            MethodId::RenameFile => "RenameFile",
            MethodId::LockFile => "LockFile",
            MethodId::UnlockFile => "UnlockFile",
            MethodId::GetTestDirectory => "GetTestDirectory",
            MethodId::NewLogger => "NewLogger",
            MethodId::SyncParent => "SyncParent",
            MethodId::GetChildren => "GetChildren",
            MethodId::NewAppendableFile => "NewAppendableFile",
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform file error. Codes are negative; success is not represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(i32)]
pub enum FileError {
    #[error("No further details.")]
    Failed = -1,
    #[error("File currently in use.")]
    InUse = -2,
    #[error("File already exists.")]
    Exists = -3,
    #[error("File not found.")]
    NotFound = -4,
    #[error("Access denied.")]
    AccessDenied = -5,
    #[error("Too many files open.")]
    TooManyOpened = -6,
    #[error("Out of memory.")]
    NoMemory = -7,
    #[error("No space left on drive.")]
    NoSpace = -8,
    #[error("Not a directory.")]
    NotADirectory = -9,
    #[error("Invalid operation.")]
    InvalidOperation = -10,
    #[error("Security error.")]
    Security = -11,
    #[error("File operation aborted.")]
    Abort = -12,
    #[error("The supplied path was not a file.")]
    NotAFile = -13,
    #[error("The file was not empty.")]
    NotEmpty = -14,
    #[error("Invalid URL.")]
    InvalidUrl = -15,
    #[error("OS or hardware error.")]
    Io = -16,
}

#[cfg(unix)]
mod os_codes {
    pub(super) const TOO_MANY_OPEN: &[i32] = &[23, 24]; // ENFILE, EMFILE
    pub(super) const SHARING: &[i32] = &[];
}

#[cfg(windows)]
mod os_codes {
    // ERROR_TOO_MANY_OPEN_FILES
    pub(super) const TOO_MANY_OPEN: &[i32] = &[4];
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    pub(super) const SHARING: &[i32] = &[32, 33];
}

#[cfg(not(any(unix, windows)))]
mod os_codes {
    pub(super) const TOO_MANY_OPEN: &[i32] = &[];
    pub(super) const SHARING: &[i32] = &[];
}

impl FileError {
    /// Every error value, from -1 down to the most negative code.
    pub const ALL: [FileError; 16] = [
        FileError::Failed,
        FileError::InUse,
        FileError::Exists,
        FileError::NotFound,
        FileError::AccessDenied,
        FileError::TooManyOpened,
        FileError::NoMemory,
        FileError::NoSpace,
        FileError::NotADirectory,
        FileError::InvalidOperation,
        FileError::Security,
        FileError::Abort,
        FileError::NotAFile,
        FileError::NotEmpty,
        FileError::InvalidUrl,
        FileError::Io,
    ];

    /// One past the most negative code.
    pub const MAX: i32 = -17;

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<FileError> {
        if code >= 0 || code <= Self::MAX {
            return None;
        }
        Self::ALL.get((-code - 1) as usize).copied()
    }

    /// Map a std I/O error onto the platform error space.
    pub fn from_io_error(err: &io::Error) -> FileError {
        if let Some(raw) = err.raw_os_error() {
            if os_codes::TOO_MANY_OPEN.contains(&raw) {
                return FileError::TooManyOpened;
            }
            if os_codes::SHARING.contains(&raw) {
                return FileError::InUse;
            }
        }
        match err.kind() {
            io::ErrorKind::NotFound => FileError::NotFound,
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::IsADirectory
            | io::ErrorKind::ReadOnlyFilesystem => FileError::AccessDenied,
            io::ErrorKind::AlreadyExists => FileError::Exists,
            io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy => FileError::InUse,
            io::ErrorKind::StorageFull => FileError::NoSpace,
            io::ErrorKind::NotADirectory => FileError::NotADirectory,
            io::ErrorKind::DirectoryNotEmpty => FileError::NotEmpty,
            io::ErrorKind::OutOfMemory => FileError::NoMemory,
            io::ErrorKind::InvalidInput => FileError::InvalidOperation,
            io::ErrorKind::Interrupted => FileError::Abort,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::WriteZero => FileError::Io,
            _ => FileError::Failed,
        }
    }

    /// Whether another attempt may succeed without outside intervention.
    ///
    /// Contention (sharing violations, held locks, descriptor exhaustion)
    /// and unclassified failures are retried; missing files, permissions
    /// and full disks are not.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FileError::InUse | FileError::TooManyOpened | FileError::Abort | FileError::Failed
        )
    }
}

/// Status carrying only the failing method.
pub fn make_io_error(filename: &str, message: &str, method: MethodId) -> Status {
    Status::io_error(
        filename,
        format!(
            "{message} (ChromeMethodOnly: {}::{})",
            method.index(),
            method.as_str()
        ),
    )
}

/// Status carrying the failing method and a platform file error.
pub fn make_io_error_with_file_error(
    filename: &str,
    message: &str,
    method: MethodId,
    error: FileError,
) -> Status {
    Status::io_error(
        filename,
        format!(
            "{message} (ChromeMethodBFE: {}::{}::{})",
            method.index(),
            method.as_str(),
            -error.code()
        ),
    )
}

/// Status carrying the failing method and a raw OS error number.
pub fn make_io_error_with_errno(
    filename: &str,
    message: &str,
    method: MethodId,
    errno: i32,
) -> Status {
    Status::io_error(
        filename,
        format!(
            "{message} (ChromeMethodErrno: {}::{}::{errno})",
            method.index(),
            method.as_str()
        ),
    )
}

/// Status for a failure reported by a sandboxed filesystem service.
pub fn make_service_error(filename: &str, method: MethodId, error: FsError) -> Status {
    Status::io_error(
        filename,
        format!(
            "{error} (SandboxFSError: {}::{}::{})",
            method.index(),
            method.as_str(),
            -error.code()
        ),
    )
}

/// Translate a std I/O error, keeping as much structure as the error has.
pub fn io_error_status(filename: &str, method: MethodId, err: &io::Error) -> Status {
    match (FileError::from_io_error(err), err.raw_os_error()) {
        (FileError::Failed, Some(errno)) => {
            make_io_error_with_errno(filename, &err.to_string(), method, errno)
        }
        (error, _) => make_io_error_with_file_error(filename, &error.to_string(), method, error),
    }
}

/// What [`parse_method_and_error`] recovered from a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorParsingResult {
    MethodOnly(MethodId),
    MethodAndFileError(MethodId, FileError),
    MethodAndErrno(MethodId, i32),
    MethodAndServiceError(MethodId, FsError),
    None,
}

static METHOD_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ChromeMethodOnly: (\d+)").expect("static regex"));
static METHOD_AND_BFE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ChromeMethodBFE: (\d+)::.*::(\d+)").expect("static regex"));
static METHOD_AND_ERRNO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ChromeMethodErrno: (\d+)::.*::(-?\d+)").expect("static regex"));
static METHOD_AND_SERVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SandboxFSError: (\d+)::.*::(\d+)").expect("static regex"));

fn method_at(captures: &regex::Captures<'_>) -> Option<MethodId> {
    captures[1].parse().ok().and_then(MethodId::from_index)
}

/// Recover the method and platform error embedded by the `make_*` helpers.
pub fn parse_method_and_error(status: &Status) -> ErrorParsingResult {
    let text = status.to_string();
    if let Some(method) = METHOD_ONLY.captures(&text).and_then(|c| method_at(&c)) {
        return ErrorParsingResult::MethodOnly(method);
    }
    if let Some(captures) = METHOD_AND_BFE.captures(&text) {
        let error = captures[2]
            .parse::<i32>()
            .ok()
            .and_then(|code| FileError::from_code(-code));
        if let (Some(method), Some(error)) = (method_at(&captures), error) {
            return ErrorParsingResult::MethodAndFileError(method, error);
        }
    }
    if let Some(captures) = METHOD_AND_ERRNO.captures(&text) {
        if let (Some(method), Ok(errno)) = (method_at(&captures), captures[2].parse::<i32>()) {
            return ErrorParsingResult::MethodAndErrno(method, errno);
        }
    }
    if let Some(captures) = METHOD_AND_SERVICE.captures(&text) {
        let error = captures[2]
            .parse::<i32>()
            .ok()
            .and_then(|code| FsError::from_code(-code));
        if let (Some(method), Some(error)) = (method_at(&captures), error) {
            return ErrorParsingResult::MethodAndServiceError(method, error);
        }
    }
    ErrorParsingResult::None
}

/// Whether an I/O status was caused by the disk filling up.
pub fn indicates_disk_full(status: &Status) -> bool {
    if !status.is_io_error() {
        return false;
    }
    match parse_method_and_error(status) {
        ErrorParsingResult::MethodAndFileError(_, error) => error == FileError::NoSpace,
        ErrorParsingResult::MethodAndErrno(_, errno) => {
            io::Error::from_raw_os_error(errno).kind() == io::ErrorKind::StorageFull
        }
        ErrorParsingResult::MethodAndServiceError(_, error) => error == FsError::NoSpace,
        ErrorParsingResult::MethodOnly(_) | ErrorParsingResult::None => false,
    }
}

// Metric values are the 1-based position in this table. Shipped entries must
// never move or be removed; new patterns go at the end.
const CORRUPTION_PATTERNS: [&str; 30] = [
    "missing files",
    "corrupted internal key",
    "partial record",
    "missing start of fragmented record",
    "error in middle of record",
    "unknown record type",
    "truncated record at end",
    "bad record length",
    "VersionEdit",
    "FileReader invoked with unexpected value",
    "corrupted key",
    "CURRENT file does not end with newline",
    "no meta-nextfile entry",
    "no meta-lognumber entry",
    "no last-sequence-number entry",
    "malformed WriteBatch",
    "bad WriteBatch Put",
    "bad WriteBatch Delete",
    "unknown WriteBatch tag",
    "WriteBatch has wrong count",
    "bad entry in block",
    "bad block contents",
    "bad block handle",
    "truncated block read",
    "block checksum mismatch",
    "checksum mismatch",
    "corrupted compressed block contents",
    "bad block type",
    "bad magic number",
    "file is too short",
];

/// Stable metric value for a corruption status; 0 when unrecognized.
pub fn corruption_code(status: &Status) -> usize {
    let text = status.to_string();
    CORRUPTION_PATTERNS
        .iter()
        .position(|pattern| text.contains(pattern))
        .map_or(0, |index| index + 1)
}

/// Exclusive upper bound of [`corruption_code`].
pub fn num_corruption_codes() -> usize {
    CORRUPTION_PATTERNS.len() + 1
}

pub fn corruption_message(status: &Status) -> &'static str {
    match corruption_code(status) {
        0 => "Unknown corruption",
        code => CORRUPTION_PATTERNS[code - 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_error_round_trips_for_every_method() {
        for method in MethodId::ALL {
            for error in FileError::ALL {
                let status =
                    make_io_error_with_file_error("db/LOCK", "message", method, error);
                assert_eq!(
                    parse_method_and_error(&status),
                    ErrorParsingResult::MethodAndFileError(method, error),
                    "{status}"
                );
            }
        }
    }

    #[test]
    fn method_only_round_trips() {
        for method in MethodId::ALL {
            let status = make_io_error("db/CURRENT", "Could not delete file.", method);
            assert_eq!(
                parse_method_and_error(&status),
                ErrorParsingResult::MethodOnly(method)
            );
        }
    }

    #[test]
    fn errno_round_trips() {
        for method in MethodId::ALL {
            for errno in [1, 2, 13, 28, 4095, i32::MAX, -7] {
                let status = make_io_error_with_errno("f", "strerror text", method, errno);
                assert_eq!(
                    parse_method_and_error(&status),
                    ErrorParsingResult::MethodAndErrno(method, errno)
                );
            }
        }
    }

    #[test]
    fn service_error_round_trips() {
        for method in MethodId::ALL {
            for error in FsError::ALL {
                let status = make_service_error("MANIFEST-000002", method, error);
                assert_eq!(
                    parse_method_and_error(&status),
                    ErrorParsingResult::MethodAndServiceError(method, error)
                );
            }
        }
    }

    #[test]
    fn engine_statuses_do_not_parse() {
        let status = Status::corruption("block checksum mismatch", "");
        assert_eq!(parse_method_and_error(&status), ErrorParsingResult::None);
        let status = Status::io_error("f", "(ChromeMethodOnly: 999::Bogus)");
        assert_eq!(parse_method_and_error(&status), ErrorParsingResult::None);
    }

    #[test]
    fn file_error_codes_are_dense() {
        for (offset, error) in FileError::ALL.iter().enumerate() {
            assert_eq!(error.code(), -(offset as i32) - 1);
            assert_eq!(FileError::from_code(error.code()), Some(*error));
        }
        assert_eq!(FileError::from_code(0), None);
        assert_eq!(FileError::from_code(FileError::MAX), None);
    }

    #[test]
    fn io_errors_map_by_kind() {
        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(FileError::from_io_error(&missing), FileError::NotFound);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(FileError::from_io_error(&denied), FileError::AccessDenied);
        let busy = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(FileError::from_io_error(&busy), FileError::InUse);
        assert!(FileError::InUse.is_transient());
        assert!(!FileError::NotFound.is_transient());
    }

    #[test]
    fn io_error_status_prefers_file_error() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        let status = io_error_status("db/000001.log", MethodId::NewSequentialFile, &err);
        assert!(status.message().starts_with("db/000001.log: File not found."));
        assert_eq!(
            parse_method_and_error(&status),
            ErrorParsingResult::MethodAndFileError(
                MethodId::NewSequentialFile,
                FileError::NotFound
            )
        );
    }

    #[test]
    fn bad_magic_number_keeps_its_code() {
        let status = Status::corruption("db/000005.ldb", "bad magic number");
        assert_eq!(corruption_code(&status), 29);
        assert_eq!(corruption_message(&status), "bad magic number");
    }

    #[test]
    fn corruption_codes_are_first_match() {
        let status = Status::corruption("block checksum mismatch", "");
        assert_eq!(corruption_code(&status), 25);
        let status = Status::corruption("something new", "");
        assert_eq!(corruption_code(&status), 0);
        assert_eq!(corruption_message(&status), "Unknown corruption");
        assert_eq!(num_corruption_codes(), 31);
    }

    #[test]
    fn disk_full_is_detected_across_encodings() {
        let status = make_io_error_with_file_error(
            "f",
            "No space left on drive.",
            MethodId::WritableFileAppend,
            FileError::NoSpace,
        );
        assert!(indicates_disk_full(&status));
        let status = make_service_error("f", MethodId::WritableFileSync, FsError::NoSpace);
        assert!(indicates_disk_full(&status));
        let status = make_io_error("f", "Could not delete file.", MethodId::DeleteFile);
        assert!(!indicates_disk_full(&status));
        assert!(!indicates_disk_full(&Status::corruption("no space", "")));
    }
}
