use std::{
    fs::File,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use leveldb_env::{
    metrics::HistogramSample,
    service::{LockToken, OpenMode, ServiceResult},
    translate::{indicates_disk_full, make_service_error},
    DirectoryService, Env, EnvOptions, ErrorParsingResult, FileError, FsError,
    InMemoryHistograms, LocalDirectoryService, MethodId, SandboxedEnv, ServiceProxy,
};
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;
use common::{random_bytes, write_synced};

fn sandboxed(dir: &TempDir, sink: Arc<InMemoryHistograms>) -> SandboxedEnv {
    SandboxedEnv::with_service(
        Arc::new(LocalDirectoryService::new(dir.path())),
        EnvOptions::default()
            .name("TestSandbox")
            .max_retry_time(Duration::from_millis(100))
            .histograms(sink),
    )
    .expect("proxy thread")
}

#[test]
fn files_round_trip_through_the_service() {
    let dir = TempDir::new().expect("tempdir");
    let env = sandboxed(&dir, Arc::new(InMemoryHistograms::new()));
    let payload = random_bytes(2048);

    env.create_dir("db").expect("create dir");
    let mut file = env.new_writable_file("db/000005.ldb").expect("writable");
    write_synced(file.as_mut(), &payload);
    file.close().expect("close");

    assert!(env.file_exists("db/000005.ldb"));
    assert_eq!(env.get_file_size("db/000005.ldb").expect("size"), 2048);
    assert_eq!(
        env.get_children("db").expect("children"),
        vec!["000005.ldb"]
    );

    let random = env
        .new_random_access_file("db/000005.ldb")
        .expect("random access");
    let mut scratch = Vec::new();
    random.read(1000, 24, &mut scratch).expect("read");
    assert_eq!(scratch, &payload[1000..1024]);

    env.rename_file("db/000005.ldb", "db/000006.ldb")
        .expect("rename");
    let mut seq = env.new_sequential_file("db/000006.ldb").expect("sequential");
    seq.read(4096, &mut scratch).expect("read all");
    assert_eq!(scratch, payload);

    env.delete_file("db/000006.ldb").expect("delete");
    env.delete_dir("db").expect("delete dir");
    assert!(!dir.path().join("db").exists());
}

#[test]
fn paths_outside_the_directory_are_refused() {
    let outer = TempDir::new().expect("tempdir");
    let root = outer.path().join("root");
    std::fs::create_dir(&root).expect("create root");
    let env = SandboxedEnv::with_service(
        Arc::new(LocalDirectoryService::new(&root)),
        EnvOptions::default(),
    )
    .expect("proxy thread");

    let status = env
        .new_writable_file("../escaped.log")
        .err()
        .expect("escape must fail");

    assert!(!outer.path().join("escaped.log").exists());
    assert_eq!(
        leveldb_env::parse_method_and_error(&status),
        ErrorParsingResult::MethodAndServiceError(MethodId::NewWritableFile, FsError::Security)
    );
    assert!(!env.file_exists("/etc/hostname"));
}

#[test]
fn lock_is_exclusive_within_environment() {
    let dir = TempDir::new().expect("tempdir");
    let env = sandboxed(&dir, Arc::new(InMemoryHistograms::new()));

    let lock = env.lock_file("LOCK").expect("lock");
    let status = env.lock_file("LOCK").expect_err("second lock");
    assert!(status.to_string().contains("Lock file already locked."));
    assert_eq!(env.metrics().lock_conflicts, 1);

    env.unlock_file(lock).expect("unlock");
    let lock = env.lock_file("LOCK").expect("relock");
    env.unlock_file(lock).expect("unlock");
}

#[test]
fn manifest_sync_goes_through_service() {
    let dir = TempDir::new().expect("tempdir");
    let env = sandboxed(&dir, Arc::new(InMemoryHistograms::new()));

    let mut manifest = env.new_writable_file("MANIFEST-000001").expect("manifest");
    for _ in 0..4 {
        manifest.append(&random_bytes(32)).expect("append");
    }
    manifest.sync().expect("sync");
    manifest.sync().expect("sync again");

    assert_eq!(env.metrics().dir_syncs, 1);
}

#[test]
fn test_directory_is_created_inside_the_sandbox() {
    let dir = TempDir::new().expect("tempdir");
    let env = sandboxed(&dir, Arc::new(InMemoryHistograms::new()));

    let test_dir = env.get_test_directory().expect("test dir");

    assert_eq!(env.get_test_directory().expect("cached"), test_dir);
    assert!(test_dir.starts_with("leveldb-test-"));
    assert!(dir.path().join(&test_dir).is_dir());
}

#[test]
fn logger_writes_through_service_handle() {
    let dir = TempDir::new().expect("tempdir");
    let env = sandboxed(&dir, Arc::new(InMemoryHistograms::new()));

    let logger = env.new_logger("LOG").expect("logger");
    logger.logv(format_args!("compacted {} files", 4));

    let contents = std::fs::read_to_string(dir.path().join("LOG")).expect("read log");
    assert!(contents.ends_with(" compacted 4 files\n"));
}

#[test]
fn two_environments_share_one_proxy() {
    let first_dir = TempDir::new().expect("tempdir");
    let second_dir = TempDir::new().expect("tempdir");
    let proxy = ServiceProxy::new().expect("proxy thread");
    let first = SandboxedEnv::new(
        proxy.clone(),
        Arc::new(LocalDirectoryService::new(first_dir.path())),
        EnvOptions::default(),
    );
    let second = SandboxedEnv::new(
        proxy,
        Arc::new(LocalDirectoryService::new(second_dir.path())),
        EnvOptions::default(),
    );

    first.create_dir("only-in-first").expect("create");

    assert!(first.file_exists("only-in-first"));
    assert!(!second.file_exists("only-in-first"));
}

#[test]
fn no_space_service_errors_read_as_disk_full() {
    let status = make_service_error("000012.ldb", MethodId::WritableFileAppend, FsError::NoSpace);
    assert!(indicates_disk_full(&status));
}

#[test]
fn second_environment_is_refused_the_lock_immediately() {
    let dir = TempDir::new().expect("tempdir");
    let options = EnvOptions::default().max_retry_time(Duration::from_secs(5));
    let first = SandboxedEnv::with_service(
        Arc::new(LocalDirectoryService::new(dir.path())),
        options.clone(),
    )
    .expect("proxy thread");
    let second = SandboxedEnv::with_service(
        Arc::new(LocalDirectoryService::new(dir.path())),
        options,
    )
    .expect("proxy thread");

    let lock = first.lock_file("LOCK").expect("first lock");
    let started = Instant::now();
    let status = second.lock_file("LOCK").expect_err("second lock");

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(status.is_io_error());
    assert!(status.to_string().contains("Lock file already locked."));
    assert_eq!(second.metrics().lock_conflicts, 1);
    assert_eq!(second.metrics().retries, 0);

    first.unlock_file(lock).expect("unlock");
    let lock = second.lock_file("LOCK").expect("lock after release");
    second.unlock_file(lock).expect("unlock");
}

/// Fails the first `failures` directory creations and renames with a
/// transient error, then behaves like the wrapped service.
struct FlakyService {
    inner: LocalDirectoryService,
    failures: AtomicUsize,
}

impl FlakyService {
    fn new(inner: LocalDirectoryService, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }

    fn stumble(&self) -> ServiceResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(FsError::InUse);
        }
        Ok(())
    }
}

impl DirectoryService for FlakyService {
    fn open_file(&self, path: &str, mode: OpenMode) -> ServiceResult<File> {
        self.inner.open_file(path, mode)
    }

    fn file_exists(&self, path: &str) -> ServiceResult<bool> {
        self.inner.file_exists(path)
    }

    fn get_children(&self, path: &str) -> ServiceResult<Vec<String>> {
        self.inner.get_children(path)
    }

    fn delete(&self, path: &str, recursive: bool) -> ServiceResult<()> {
        self.inner.delete(path, recursive)
    }

    fn create_dir(&self, path: &str) -> ServiceResult<()> {
        self.stumble()?;
        self.inner.create_dir(path)
    }

    fn get_file_size(&self, path: &str) -> ServiceResult<u64> {
        self.inner.get_file_size(path)
    }

    fn rename(&self, from: &str, to: &str) -> ServiceResult<()> {
        self.stumble()?;
        self.inner.rename(from, to)
    }

    fn lock(&self, path: &str) -> ServiceResult<LockToken> {
        self.inner.lock(path)
    }

    fn unlock(&self, token: LockToken) -> ServiceResult<()> {
        self.inner.unlock(token)
    }

    fn sync_directory(&self, path: &str) -> ServiceResult<()> {
        self.inner.sync_directory(path)
    }
}

#[test]
fn create_dir_and_rename_recover_from_transient_errors() {
    let dir = TempDir::new().expect("tempdir");
    let sink = Arc::new(InMemoryHistograms::new());
    let service = Arc::new(FlakyService::new(LocalDirectoryService::new(dir.path()), 2));
    let env = SandboxedEnv::with_service(
        service.clone(),
        EnvOptions::default()
            .name("TestSandbox")
            .max_retry_time(Duration::from_secs(5))
            .retry_interval(Duration::from_millis(1))
            .histograms(sink.clone()),
    )
    .expect("proxy thread");

    env.create_dir("db").expect("create dir after retries");
    assert!(dir.path().join("db").is_dir());
    assert_eq!(env.metrics().retries, 2);
    assert_eq!(sink.count("TestSandbox.TimeUntilSuccess.CreateDir"), 1);
    assert_eq!(
        sink.samples("TestSandbox.RetryRecoveredFromError.CreateDir"),
        vec![HistogramSample::Enumeration(-FileError::InUse.code())]
    );

    let mut file = env.new_writable_file("db/000001.log").expect("writable");
    write_synced(file.as_mut(), b"record");
    file.close().expect("close");
    service.failures.store(1, Ordering::SeqCst);

    env.rename_file("db/000001.log", "db/000002.log")
        .expect("rename after retry");
    assert!(dir.path().join("db/000002.log").exists());
    assert_eq!(env.metrics().retries, 3);
    assert_eq!(sink.count("TestSandbox.TimeUntilSuccess.RenameFile"), 1);
}
