//! Database lock files.
//!
//! OS-level locks alone do not stop one process from locking the same file
//! twice on every platform, so every lock held by this process is also
//! recorded in a process-wide [`LockTable`].

use std::{
    collections::HashSet,
    fmt,
    fs::{File, OpenOptions},
    path::Path,
};

use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{
    observability::log_warn,
    retry::{retry, RetrierProvider},
    service::LockToken,
    status::{Result, Status},
    translate::{make_io_error, make_io_error_with_file_error, FileError, MethodId},
};

/// Names currently locked by this process.
#[derive(Debug, Default)]
pub struct LockTable {
    names: Mutex<HashSet<String>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `name` is already present.
    pub fn insert(&self, name: &str) -> bool {
        self.names.lock().insert(name.to_string())
    }

    /// Returns false if `name` was not present.
    pub fn remove(&self, name: &str) -> bool {
        self.names.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }
}

static PROCESS_LOCKS: Lazy<LockTable> = Lazy::new(LockTable::new);

/// The table shared by every environment in this process.
pub fn process_lock_table() -> &'static LockTable {
    &PROCESS_LOCKS
}

pub(crate) enum HeldLock {
    Native(File),
    Service(LockToken),
}

/// A lock held on behalf of the caller. Release it with `Env::unlock_file`.
pub struct FileLock {
    pub(crate) name: String,
    pub(crate) held: HeldLock,
}

impl FileLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for FileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self.held {
            HeldLock::Native(_) => "native",
            HeldLock::Service(_) => "service",
        };
        f.debug_struct("FileLock")
            .field("name", &self.name)
            .field("backend", &backend)
            .finish()
    }
}

/// Number of missing directories directly above `fname`.
pub(crate) fn count_missing_ancestors(fname: &str) -> usize {
    let mut missing = 0;
    let mut current = Path::new(fname).parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir.is_dir() {
            break;
        }
        missing += 1;
        current = dir.parent();
    }
    missing
}

fn lock_failure(fname: &str, error: FileError, provider: &dyn RetrierProvider) -> Status {
    provider.recorder().record_os_error(MethodId::LockFile, error);
    make_io_error_with_file_error(fname, &error.to_string(), MethodId::LockFile, error)
}

/// Open (creating if needed) and exclusively lock `fname`.
pub(crate) fn lock_native(
    fname: &str,
    table: &LockTable,
    provider: &dyn RetrierProvider,
) -> Result<FileLock> {
    let opened = retry(MethodId::LockFile, provider, || {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(fname)
            .map_err(|err| FileError::from_io_error(&err))
    });
    let file = match opened {
        Ok(file) => file,
        Err(error) => {
            if error == FileError::NotFound {
                provider
                    .recorder()
                    .record_lock_file_ancestors(count_missing_ancestors(fname));
            }
            return Err(lock_failure(fname, error, provider));
        }
    };

    if !table.insert(fname) {
        provider.recorder().metrics().record_lock_conflict();
        log_warn!(
            component = "lock",
            event = "lock_already_held",
            file = %fname,
        );
        return Err(make_io_error(
            fname,
            "Lock file already locked.",
            MethodId::LockFile,
        ));
    }

    let locked = retry(MethodId::LockFile, provider, || {
        FileExt::try_lock_exclusive(&file).map_err(|err| FileError::from_io_error(&err))
    });
    if let Err(error) = locked {
        table.remove(fname);
        return Err(lock_failure(fname, error, provider));
    }

    Ok(FileLock {
        name: fname.to_string(),
        held: HeldLock::Native(file),
    })
}

/// Release the OS lock and forget the name.
pub(crate) fn unlock_native(
    name: &str,
    file: File,
    table: &LockTable,
    provider: &dyn RetrierProvider,
) -> Result<()> {
    let result = FileExt::unlock(&file).map_err(|err| {
        let error = FileError::from_io_error(&err);
        provider
            .recorder()
            .record_os_error(MethodId::UnlockFile, error);
        make_io_error_with_file_error(
            name,
            "Could not unlock lock file.",
            MethodId::UnlockFile,
            error,
        )
    });
    drop(file);
    let removed = table.remove(name);
    debug_assert!(removed, "unlocking {name}, which this process does not hold");
    result
}
