use std::{
    collections::HashMap,
    fs::File,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use parking_lot::RwLock;

use crate::{
    observability::log_debug,
    service::{DirectoryService, FsError, LockToken, OpenMode, ServiceResult},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

type Directories = Arc<RwLock<HashMap<u64, Arc<dyn DirectoryService>>>>;

/// Handle for a directory registered with a [`ServiceProxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(u64);

/// Forwards directory operations to a single service thread and waits for
/// the reply.
pub struct ServiceProxy {
    jobs: flume::Sender<Job>,
    thread_id: ThreadId,
    directories: Directories,
    next_handle: AtomicU64,
}

impl ServiceProxy {
    /// Start the proxy thread. It exits once the proxy is dropped.
    pub fn new() -> std::io::Result<Arc<Self>> {
        let (jobs, inbox) = flume::unbounded::<Job>();
        let worker = thread::Builder::new()
            .name("leveldb-service-proxy".to_string())
            .spawn(move || {
                log_debug!(component = "sandbox", event = "proxy_started");
                while let Ok(job) = inbox.recv() {
                    job();
                }
                log_debug!(component = "sandbox", event = "proxy_stopped");
            })?;
        Ok(Arc::new(Self {
            jobs,
            thread_id: worker.thread().id(),
            directories: Arc::new(RwLock::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
        }))
    }

    pub fn register_directory(&self, service: Arc<dyn DirectoryService>) -> DirHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.directories.write().insert(handle, service);
        DirHandle(handle)
    }

    /// Forget `dir`. Calls already running keep their service alive until
    /// they finish.
    pub fn unregister_directory(&self, dir: DirHandle) {
        self.directories.write().remove(&dir.0);
    }

    fn run<T, F>(&self, dir: DirHandle, op: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DirectoryService) -> ServiceResult<T> + Send + 'static,
    {
        let service = self
            .directories
            .read()
            .get(&dir.0)
            .cloned()
            .ok_or(FsError::InvalidOperation)?;

        // The proxy thread cannot wait on itself.
        if thread::current().id() == self.thread_id {
            return op(service.as_ref());
        }

        let (reply, response) = flume::bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply.send(op(service.as_ref()));
        });
        self.jobs.send(job).map_err(|_| FsError::Abort)?;
        response.recv().map_err(|_| FsError::Abort)?
    }

    pub fn open_file(&self, dir: DirHandle, path: &str, mode: OpenMode) -> ServiceResult<File> {
        let path = path.to_string();
        self.run(dir, move |service| service.open_file(&path, mode))
    }

    pub fn file_exists(&self, dir: DirHandle, path: &str) -> ServiceResult<bool> {
        let path = path.to_string();
        self.run(dir, move |service| service.file_exists(&path))
    }

    pub fn get_children(&self, dir: DirHandle, path: &str) -> ServiceResult<Vec<String>> {
        let path = path.to_string();
        self.run(dir, move |service| service.get_children(&path))
    }

    pub fn delete(&self, dir: DirHandle, path: &str, recursive: bool) -> ServiceResult<()> {
        let path = path.to_string();
        self.run(dir, move |service| service.delete(&path, recursive))
    }

    pub fn create_dir(&self, dir: DirHandle, path: &str) -> ServiceResult<()> {
        let path = path.to_string();
        self.run(dir, move |service| service.create_dir(&path))
    }

    pub fn get_file_size(&self, dir: DirHandle, path: &str) -> ServiceResult<u64> {
        let path = path.to_string();
        self.run(dir, move |service| service.get_file_size(&path))
    }

    pub fn rename(&self, dir: DirHandle, from: &str, to: &str) -> ServiceResult<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.run(dir, move |service| service.rename(&from, &to))
    }

    pub fn lock(&self, dir: DirHandle, path: &str) -> ServiceResult<LockToken> {
        let path = path.to_string();
        self.run(dir, move |service| service.lock(&path))
    }

    pub fn unlock(&self, dir: DirHandle, token: LockToken) -> ServiceResult<()> {
        self.run(dir, move |service| service.unlock(token))
    }

    pub fn sync_directory(&self, dir: DirHandle, path: &str) -> ServiceResult<()> {
        let path = path.to_string();
        self.run(dir, move |service| service.sync_directory(&path))
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("directories", &self.directories.read().len())
            .finish()
    }
}
