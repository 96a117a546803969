//! Platform environment for a LevelDB-style storage engine.
//!
//! The engine reaches the operating system only through [`Env`]: file
//! readers and writers, directory listings, locks, a background worker and
//! an info logger. Failures come back as [`Status`] values whose text embeds
//! the failing method and platform error so they can be classified later
//! with [`parse_method_and_error`].
//!
//! Two backends are provided. [`DiskEnv`] uses the local filesystem directly
//! and can keep `.bak` copies of table files to recover from lost tables.
//! [`SandboxedEnv`] forwards every operation to a [`DirectoryService`]
//! through a [`ServiceProxy`] for processes that may not open paths
//! themselves.

/// Single background worker and detached threads.
pub mod background;

/// Table backup and restore.
pub mod backup;

/// The [`Env`] trait and its backends.
pub mod env;

/// File traits and native implementations.
pub mod fs;

/// Database lock files.
pub mod lock;

/// Info log files.
pub mod logger;

/// Histograms and counters.
pub mod metrics;

mod observability;

/// Environment configuration.
pub mod option;

/// Retrying transient failures.
pub mod retry;

/// Directory service used by the sandboxed backend.
pub mod service;

/// Engine-facing status values.
pub mod status;

/// Mapping platform errors to statuses and back.
pub mod translate;

pub use crate::{
    background::BackgroundTask,
    env::{default_env, indexed_db_env, DiskEnv, Env, SandboxedEnv},
    fs::{FileType, RandomAccessFile, SequentialFile, WritableFile},
    lock::FileLock,
    logger::Logger,
    metrics::{EnvMetricsSnapshot, HistogramSink, InMemoryHistograms, NoopHistograms},
    option::EnvOptions,
    service::{local::LocalDirectoryService, proxy::ServiceProxy, DirectoryService, FsError},
    status::{Result, Status, StatusCode},
    translate::{parse_method_and_error, ErrorParsingResult, FileError, MethodId},
};
