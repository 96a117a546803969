//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::{path::Path, sync::Arc, time::Duration};

use leveldb_env::{DiskEnv, EnvOptions, InMemoryHistograms, WritableFile};

/// Local environment reporting into `sink`, with a short retry budget.
pub fn disk_env(make_backup: bool, sink: Arc<InMemoryHistograms>) -> DiskEnv {
    DiskEnv::new(
        EnvOptions::default()
            .name("TestEnv")
            .make_backup(make_backup)
            .max_retry_time(Duration::from_millis(100))
            .histograms(sink),
    )
}

pub fn path_str(dir: &Path, name: &str) -> String {
    dir.join(name).to_string_lossy().into_owned()
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    std::iter::repeat_with(|| fastrand::u8(..)).take(len).collect()
}

/// Append `data` and sync.
pub fn write_synced(file: &mut dyn WritableFile, data: &[u8]) {
    file.append(data).expect("append");
    file.sync().expect("sync");
}
