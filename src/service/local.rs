use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use fs2::FileExt;
use parking_lot::Mutex;

use crate::{
    lock::process_lock_table,
    service::{DirectoryService, FsError, LockToken, OpenMode, ServiceResult},
};

/// In-process service confined to `root`.
#[derive(Debug)]
pub struct LocalDirectoryService {
    root: PathBuf,
    locks: Mutex<HashMap<u64, (String, File)>>,
    next_token: AtomicU64,
}

impl LocalDirectoryService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> ServiceResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FsError::Security)
                }
            }
        }
        Ok(resolved)
    }
}

impl DirectoryService for LocalDirectoryService {
    fn open_file(&self, path: &str, mode: OpenMode) -> ServiceResult<File> {
        let path = self.resolve(path)?;
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::CreateAlways => options.write(true).create(true).truncate(true),
            OpenMode::OpenAlwaysAppend => options.append(true).create(true),
        };
        Ok(options.open(path)?)
    }

    fn file_exists(&self, path: &str) -> ServiceResult<bool> {
        Ok(self.resolve(path)?.exists())
    }

    fn get_children(&self, path: &str) -> ServiceResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn delete(&self, path: &str, recursive: bool) -> ServiceResult<()> {
        let path = self.resolve(path)?;
        if path == self.root {
            return Err(FsError::AccessDenied);
        }
        let metadata = fs::symlink_metadata(&path)?;
        if !metadata.is_dir() {
            fs::remove_file(&path)?;
        } else if recursive {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_dir(&path)?;
        }
        Ok(())
    }

    fn create_dir(&self, path: &str) -> ServiceResult<()> {
        Ok(fs::create_dir_all(self.resolve(path)?)?)
    }

    fn get_file_size(&self, path: &str) -> ServiceResult<u64> {
        let metadata = fs::metadata(self.resolve(path)?)?;
        if metadata.is_dir() {
            return Err(FsError::NotAFile);
        }
        Ok(metadata.len())
    }

    fn rename(&self, from: &str, to: &str) -> ServiceResult<()> {
        Ok(fs::rename(self.resolve(from)?, self.resolve(to)?)?)
    }

    fn lock(&self, path: &str) -> ServiceResult<LockToken> {
        let path = self.resolve(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let key = path.to_string_lossy().into_owned();
        if !process_lock_table().insert(&key) {
            return Err(FsError::Exists);
        }
        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            process_lock_table().remove(&key);
            return Err(err.into());
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.locks.lock().insert(token, (key, file));
        Ok(LockToken(token))
    }

    fn unlock(&self, token: LockToken) -> ServiceResult<()> {
        let (key, file) = self
            .locks
            .lock()
            .remove(&token.0)
            .ok_or(FsError::InvalidOperation)?;
        let unlocked = FileExt::unlock(&file);
        process_lock_table().remove(&key);
        Ok(unlocked?)
    }

    #[cfg(unix)]
    fn sync_directory(&self, path: &str) -> ServiceResult<()> {
        let dir = File::open(self.resolve(path)?)?;
        Ok(dir.sync_all()?)
    }

    #[cfg(not(unix))]
    fn sync_directory(&self, path: &str) -> ServiceResult<()> {
        self.resolve(path).map(|_| ())
    }
}
