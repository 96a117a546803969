//! Table backups.
//!
//! A synced table `N.ldb` is copied to `N.bak`. When a directory listing
//! shows a backup without its table, the table is recreated from the backup
//! before the listing is handed to the engine. A table without a backup is
//! left alone; it may simply not have been synced yet.
//!
//! Restored tables are trusted as-is: the backup's contents are not
//! checked against anything before being copied into place.

use std::{collections::BTreeSet, ffi::OsStr, fs, path::Path};

use crate::{
    fs::{is_table, BACKUP_EXTENSION, TABLE_EXTENSION},
    metrics::EnvRecorder,
    observability::{log_debug, log_info, log_warn},
};

/// Backup sibling of a table file, or `None` for non-table names.
pub fn backup_name(fname: &str) -> Option<String> {
    if !is_table(fname) {
        return None;
    }
    Some(
        Path::new(fname)
            .with_extension(BACKUP_EXTENSION)
            .to_string_lossy()
            .into_owned(),
    )
}

/// Copy a table over its backup. Returns whether the copy succeeded.
pub fn make_backup(fname: &str) -> bool {
    let Some(backup) = backup_name(fname) else {
        return false;
    };
    match fs::copy(fname, &backup) {
        Ok(bytes) => {
            log_debug!(
                component = "backup",
                event = "table_backed_up",
                table = %fname,
                bytes,
            );
            true
        }
        Err(err) => {
            log_warn!(
                component = "backup",
                event = "table_backup_failed",
                table = %fname,
                error = %err,
            );
            false
        }
    }
}

/// Remove a table's backup, ignoring any failure.
pub fn delete_backup(fname: &str) {
    if let Some(backup) = backup_name(fname) {
        let _ = fs::remove_file(backup);
    }
}

/// Recreate tables that only exist as backups in `dir`, appending the
/// restored names to `entries` (a listing of `dir`).
pub fn restore_if_necessary(dir: &str, entries: &mut Vec<String>, recorder: &EnvRecorder) {
    let mut tables = BTreeSet::new();
    let mut backups = BTreeSet::new();
    for entry in entries.iter() {
        let path = Path::new(entry);
        let Some(stem) = path.file_stem().and_then(OsStr::to_str) else {
            continue;
        };
        match path.extension().and_then(OsStr::to_str) {
            Some(TABLE_EXTENSION) => {
                tables.insert(stem.to_string());
            }
            Some(BACKUP_EXTENSION) => {
                backups.insert(stem.to_string());
            }
            _ => {}
        }
    }

    let backups_only: Vec<String> = backups.difference(&tables).cloned().collect();
    if backups_only.is_empty() {
        return;
    }
    recorder.record_missing_files(backups_only.len());

    let dir_path = Path::new(dir);
    let mut restored = 0;
    for stem in backups_only {
        let backup = dir_path.join(format!("{stem}.{BACKUP_EXTENSION}"));
        let table_name = format!("{stem}.{TABLE_EXTENSION}");
        let success = match fs::copy(&backup, dir_path.join(&table_name)) {
            Ok(_) => {
                log_info!(
                    component = "backup",
                    event = "table_restored",
                    dir = %dir,
                    table = %table_name,
                );
                true
            }
            Err(err) => {
                log_warn!(
                    component = "backup",
                    event = "table_restore_failed",
                    dir = %dir,
                    table = %table_name,
                    error = %err,
                );
                false
            }
        };
        recorder.record_restore_result(success);
        if success {
            entries.push(table_name);
            restored += 1;
        }
    }
    recorder.metrics().record_tables_restored(restored);
}
