//! Directories with unsynced entries.
//!
//! Creating a file dirties its directory; the next manifest sync in that
//! directory fsyncs it once and clears the mark.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::fs::parent_dir;

#[derive(Debug, Default)]
pub struct WriteTracker {
    needs_sync: Mutex<HashSet<String>>,
}

impl WriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn did_create_new_file(&self, fname: &str) {
        self.needs_sync.lock().insert(parent_dir(fname));
    }

    pub fn does_dir_need_sync(&self, fname: &str) -> bool {
        self.needs_sync.lock().contains(&parent_dir(fname))
    }

    pub fn did_sync_dir(&self, fname: &str) {
        self.needs_sync.lock().remove(&parent_dir(fname));
    }
}
