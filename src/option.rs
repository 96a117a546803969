use std::{fmt, sync::Arc, time::Duration};

use crate::metrics::{HistogramSink, NoopHistograms};

/// Histogram prefix of the default environment.
pub const DEFAULT_ENV_NAME: &str = "LevelDBEnv";
/// Histogram prefix of the backup-enabled environment.
pub const INDEXED_DB_ENV_NAME: &str = "LevelDBEnv.IDB";

pub(crate) const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_millis(1000);
pub(crate) const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct EnvOptions {
    pub(crate) name: String,
    pub(crate) make_backup: bool,
    pub(crate) max_retry_time: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) histograms: Arc<dyn HistogramSink>,
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            name: DEFAULT_ENV_NAME.to_string(),
            make_backup: false,
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            histograms: Arc::new(NoopHistograms),
        }
    }
}

impl EnvOptions {
    /// Options of the environment used for IndexedDB-style stores: table
    /// backups enabled, reported under their own histogram prefix.
    pub fn indexed_db() -> Self {
        EnvOptions::default()
            .name(INDEXED_DB_ENV_NAME)
            .make_backup(true)
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        EnvOptions {
            name: name.into(),
            ..self
        }
    }

    pub fn make_backup(self, make_backup: bool) -> Self {
        EnvOptions {
            make_backup,
            ..self
        }
    }

    pub fn max_retry_time(self, max_retry_time: Duration) -> Self {
        EnvOptions {
            max_retry_time,
            ..self
        }
    }

    pub fn retry_interval(self, retry_interval: Duration) -> Self {
        EnvOptions {
            retry_interval,
            ..self
        }
    }

    pub fn histograms(self, histograms: Arc<dyn HistogramSink>) -> Self {
        EnvOptions { histograms, ..self }
    }
}

impl fmt::Debug for EnvOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvOptions")
            .field("name", &self.name)
            .field("make_backup", &self.make_backup)
            .field("max_retry_time", &self.max_retry_time)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}
