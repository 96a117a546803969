//! Engine-facing status values.
//!
//! The storage engine only understands a status code plus a free-form
//! message, so every failure produced by this crate is flattened into a
//! [`Status`] before it leaves the environment.

use std::fmt;

use thiserror::Error;

/// Result type returned by every environment operation.
pub type Result<T, E = Status> = std::result::Result<T, E>;

/// Category of a non-ok status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// The requested entry does not exist.
    NotFound,
    /// Stored data failed an integrity check.
    Corruption,
    /// The operation is not available on this backend.
    NotSupported,
    /// The caller passed an argument the environment cannot act on.
    InvalidArgument,
    /// The operating system or filesystem service reported a failure.
    IoError,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::NotFound => write!(f, "NotFound"),
            StatusCode::Corruption => write!(f, "Corruption"),
            StatusCode::NotSupported => write!(f, "Not implemented"),
            StatusCode::InvalidArgument => write!(f, "Invalid argument"),
            StatusCode::IoError => write!(f, "IO error"),
        }
    }
}

/// A non-ok outcome, rendered as `"<code>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    /// Build a status from a code and two message parts joined by `": "`.
    pub fn new(code: StatusCode, msg: impl AsRef<str>, msg2: impl AsRef<str>) -> Self {
        let (msg, msg2) = (msg.as_ref(), msg2.as_ref());
        let message = if msg2.is_empty() {
            msg.to_string()
        } else if msg.is_empty() {
            msg2.to_string()
        } else {
            format!("{msg}: {msg2}")
        };
        Self { code, message }
    }

    pub fn io_error(filename: impl AsRef<str>, msg: impl AsRef<str>) -> Self {
        Self::new(StatusCode::IoError, filename, msg)
    }

    pub fn not_found(msg: impl AsRef<str>, msg2: impl AsRef<str>) -> Self {
        Self::new(StatusCode::NotFound, msg, msg2)
    }

    pub fn corruption(msg: impl AsRef<str>, msg2: impl AsRef<str>) -> Self {
        Self::new(StatusCode::Corruption, msg, msg2)
    }

    pub fn not_supported(msg: impl AsRef<str>, msg2: impl AsRef<str>) -> Self {
        Self::new(StatusCode::NotSupported, msg, msg2)
    }

    pub fn invalid_argument(msg: impl AsRef<str>, msg2: impl AsRef<str>) -> Self {
        Self::new(StatusCode::InvalidArgument, msg, msg2)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_io_error(&self) -> bool {
        self.code == StatusCode::IoError
    }

    pub fn is_corruption(&self) -> bool {
        self.code == StatusCode::Corruption
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }
}

/// Metric value describing the outcome of an engine operation.
///
/// Values are reported as enumeration samples; the numbering is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusUmaValue {
    Ok = 0,
    NotFound = 1,
    Corruption = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    IoError = 5,
}

impl StatusUmaValue {
    /// Exclusive upper bound of the enumeration.
    pub const BOUNDARY: i32 = 6;
}

/// Classify an outcome for metrics.
pub fn status_uma_value(result: &Result<()>) -> StatusUmaValue {
    match result {
        Ok(()) => StatusUmaValue::Ok,
        Err(status) => match status.code() {
            StatusCode::NotFound => StatusUmaValue::NotFound,
            StatusCode::Corruption => StatusUmaValue::Corruption,
            StatusCode::NotSupported => StatusUmaValue::NotSupported,
            StatusCode::InvalidArgument => StatusUmaValue::InvalidArgument,
            StatusCode::IoError => StatusUmaValue::IoError,
        },
    }
}
