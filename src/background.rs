//! Single background worker with a FIFO queue.
//!
//! The worker thread is spawned on the first [`BackgroundQueue::schedule`]
//! and blocks on a condition variable whenever the queue is empty. Dropping
//! the queue lets the worker drain what is left and exit.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    metrics::EnvRecorder,
    observability::{log_debug, log_error, log_warn},
};

/// Deferred work handed to [`BackgroundQueue::schedule`].
pub type BackgroundTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    started: bool,
    shutdown: bool,
    tasks: VecDeque<BackgroundTask>,
}

struct Shared {
    state: Mutex<QueueState>,
    signal: Condvar,
    recorder: Arc<EnvRecorder>,
}

pub struct BackgroundQueue {
    shared: Arc<Shared>,
    thread_name: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundQueue {
    pub fn new(thread_name: impl Into<String>, recorder: Arc<EnvRecorder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                signal: Condvar::new(),
                recorder,
            }),
            thread_name: thread_name.into(),
            worker: Mutex::new(None),
        }
    }

    /// Queue `task` behind every task already scheduled.
    pub fn schedule(&self, task: BackgroundTask) {
        let mut state = self.shared.state.lock();
        if !state.started {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(self.thread_name.clone())
                .spawn(move || run(shared));
            match spawned {
                Ok(handle) => {
                    state.started = true;
                    *self.worker.lock() = Some(handle);
                    log_debug!(
                        component = "background",
                        event = "worker_started",
                        thread = %self.thread_name,
                    );
                }
                Err(err) => log_warn!(
                    component = "background",
                    event = "worker_spawn_failed",
                    thread = %self.thread_name,
                    error = %err,
                ),
            }
        }

        // The worker only waits while the queue is empty.
        if state.tasks.is_empty() {
            self.shared.signal.notify_one();
        }
        state.tasks.push_back(task);
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }

    /// Tasks queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }
}

impl std::fmt::Debug for BackgroundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundQueue")
            .field("thread_name", &self.thread_name)
            .field("started", &self.is_started())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.signal.notify_one();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        // A task may drop the last handle to its own environment.
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            log_warn!(
                component = "background",
                event = "worker_join_failed",
                thread = %self.thread_name,
            );
        }
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.shutdown {
                    log_debug!(component = "background", event = "worker_stopped");
                    return;
                }
                shared.signal.wait(&mut state);
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log_error!(
                component = "background",
                event = "task_panicked",
                reason = %reason,
            );
        }
        shared.recorder.metrics().record_background_task();
    }
}

/// Run `task` on a new detached thread.
pub fn start_thread(name: &str, task: BackgroundTask) -> std::io::Result<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(task)
        .map(|_| ())
}
