//! Bounded retry loop for operations that fail transiently.
//!
//! Usage:
//!
//! ```ignore
//! let mut retrier = Retrier::new(MethodId::CreateDir, provider);
//! let result = loop {
//!     match attempt() {
//!         Ok(value) => break Ok(value),
//!         Err(error) if retrier.should_keep_trying(error) => continue,
//!         Err(error) => break Err(error),
//!     }
//! };
//! retrier.record_outcome();
//! ```
//!
//! [`retry`] wraps exactly that loop.

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    metrics::EnvRecorder,
    observability::log_warn,
    translate::{FileError, MethodId},
};

/// Supplies the retry budget and the metrics destination.
pub trait RetrierProvider {
    fn max_retry_time(&self) -> Duration;

    fn retry_interval(&self) -> Duration;

    fn recorder(&self) -> &EnvRecorder;
}

pub struct Retrier<'a> {
    method: MethodId,
    provider: &'a dyn RetrierProvider,
    start: Instant,
    limit: Instant,
    last: Instant,
    last_error: Option<FileError>,
    gave_up: bool,
}

impl<'a> Retrier<'a> {
    pub fn new(method: MethodId, provider: &'a dyn RetrierProvider) -> Self {
        let start = Instant::now();
        Self {
            method,
            provider,
            start,
            limit: start + provider.max_retry_time(),
            last: start,
            last_error: None,
            gave_up: false,
        }
    }

    /// Called after a failed attempt. Sleeps and returns true while the
    /// budget lasts and the error is transient; returns false otherwise.
    pub fn should_keep_trying(&mut self, error: FileError) -> bool {
        self.last_error = Some(error);
        if error.is_transient() && self.last < self.limit {
            thread::sleep(self.provider.retry_interval());
            self.last = Instant::now();
            self.provider.recorder().metrics().record_retry();
            return true;
        }
        if error.is_transient() {
            log_warn!(
                component = "retry",
                event = "retry_exhausted",
                method = %self.method,
                error = %error,
                elapsed_ms = self.last.duration_since(self.start).as_millis() as u64,
            );
        }
        self.gave_up = true;
        false
    }

    /// Time spent between construction and the latest attempt.
    pub fn elapsed(&self) -> Duration {
        self.last.duration_since(self.start)
    }

    /// Emit the outcome samples. A loop that gave up emits nothing.
    pub fn record_outcome(self) {
        if self.gave_up {
            return;
        }
        let recorder = self.provider.recorder();
        recorder.record_retry_time(self.method, self.elapsed());
        if let Some(error) = self.last_error {
            recorder.record_recovered_from_error(self.method, error);
        }
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the budget runs out.
pub fn retry<T>(
    method: MethodId,
    provider: &dyn RetrierProvider,
    mut attempt: impl FnMut() -> Result<T, FileError>,
) -> Result<T, FileError> {
    let mut retrier = Retrier::new(method, provider);
    let result = loop {
        match attempt() {
            Ok(value) => break Ok(value),
            Err(error) if retrier.should_keep_trying(error) => continue,
            Err(error) => break Err(error),
        }
    };
    retrier.record_outcome();
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metrics::{HistogramSample, InMemoryHistograms};

    struct TestProvider {
        budget: Duration,
        recorder: EnvRecorder,
    }

    impl TestProvider {
        fn new(budget: Duration, sink: Arc<InMemoryHistograms>) -> Self {
            Self {
                budget,
                recorder: EnvRecorder::new("TestEnv", sink),
            }
        }
    }

    impl RetrierProvider for TestProvider {
        fn max_retry_time(&self) -> Duration {
            self.budget
        }

        fn retry_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn recorder(&self) -> &EnvRecorder {
            &self.recorder
        }
    }

    #[test]
    fn always_failing_operation_stops_after_budget() {
        let sink = Arc::new(InMemoryHistograms::new());
        let provider = TestProvider::new(Duration::from_millis(60), sink.clone());
        let started = Instant::now();
        let mut attempts = 0;

        let result: Result<(), FileError> = retry(MethodId::RenameFile, &provider, || {
            attempts += 1;
            Err(FileError::InUse)
        });

        assert_eq!(result, Err(FileError::InUse));
        assert!(attempts >= 2, "expected at least one retry, got {attempts}");
        // One extra interval past the budget at most, plus scheduling slack.
        assert!(started.elapsed() < Duration::from_millis(60 + 10 + 500));
        assert!(sink.names().is_empty(), "exhausted loops record nothing");
        assert!(provider.recorder.metrics().snapshot().retries >= 1);
    }

    #[test]
    fn recovery_records_time_and_error() {
        let sink = Arc::new(InMemoryHistograms::new());
        let provider = TestProvider::new(Duration::from_millis(500), sink.clone());
        let mut failures_left = 2;

        let result = retry(MethodId::CreateDir, &provider, || {
            if failures_left > 0 {
                failures_left -= 1;
                Err(FileError::TooManyOpened)
            } else {
                Ok(7)
            }
        });

        assert_eq!(result, Ok(7));
        assert_eq!(sink.count("TestEnv.TimeUntilSuccess.CreateDir"), 1);
        assert_eq!(
            sink.samples("TestEnv.RetryRecoveredFromError.CreateDir"),
            vec![HistogramSample::Enumeration(6)]
        );
    }

    #[test]
    fn first_try_success_records_only_time() {
        let sink = Arc::new(InMemoryHistograms::new());
        let provider = TestProvider::new(Duration::from_millis(500), sink.clone());

        retry(MethodId::LockFile, &provider, || Ok(())).expect("succeeds");

        assert_eq!(sink.count("TestEnv.TimeUntilSuccess.LockFile"), 1);
        assert_eq!(sink.count("TestEnv.RetryRecoveredFromError.LockFile"), 0);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let sink = Arc::new(InMemoryHistograms::new());
        let provider = TestProvider::new(Duration::from_secs(5), sink.clone());
        let mut attempts = 0;

        let result: Result<(), FileError> = retry(MethodId::CreateDir, &provider, || {
            attempts += 1;
            Err(FileError::AccessDenied)
        });

        assert_eq!(result, Err(FileError::AccessDenied));
        assert_eq!(attempts, 1);
        assert!(sink.names().is_empty());
    }

    #[test]
    fn zero_budget_gives_up_immediately() {
        let sink = Arc::new(InMemoryHistograms::new());
        let provider = TestProvider::new(Duration::ZERO, sink);
        let mut retrier = Retrier::new(MethodId::RenameFile, &provider);
        assert!(!retrier.should_keep_trying(FileError::InUse));
        retrier.record_outcome();
    }
}
