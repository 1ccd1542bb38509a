use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use log::{error, trace};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// The worker pool that native copies and texture encoding run on. The scheduling thread never
/// awaits it, it polls [`BackgroundTask`]s until they are finished.
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl WorkerPool {
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads.max(1))
            .thread_name("avatar-worker")
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    pub fn spawn<T, F>(&self, name: &'static str, work: F) -> BackgroundTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        trace!("Spawning background task '{}'", name);
        BackgroundTask {
            name,
            state: TaskState::Running(self.handle.spawn_blocking(work)),
        }
    }

    /// Waits up to `timeout` for running work. Tasks spawned afterwards fault right away.
    pub fn shutdown(&self, timeout: Duration) {
        if let Some(runtime) = self.runtime.lock().expect("Worker Runtime Lock").take() {
            runtime.shutdown_timeout(timeout);
        }
    }
}

enum TaskState<T> {
    Running(JoinHandle<anyhow::Result<T>>),
    Finished(anyhow::Result<T>),
    Taken,
}

/// One unit of background work. Errors and panics of the work both surface as a faulted task.
pub struct BackgroundTask<T> {
    name: &'static str,
    state: TaskState<T>,
}

impl<T> BackgroundTask<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the work stopped running, without collecting its result.
    pub fn is_done(&self) -> bool {
        match &self.state {
            TaskState::Running(handle) => handle.is_finished(),
            TaskState::Finished(_) | TaskState::Taken => true,
        }
    }

    /// Non-blocking. Moves the result out of the worker pool once the work is done.
    pub fn poll(&mut self) -> bool {
        let TaskState::Running(handle) = &self.state else {
            return true;
        };
        if !handle.is_finished() {
            return false;
        }

        if let TaskState::Running(handle) = std::mem::replace(&mut self.state, TaskState::Taken) {
            // The task already finished, so this resolves without blocking.
            let result = match pollster::block_on(handle) {
                Ok(result) => result,
                Err(join_error) => Err(anyhow!("Background task '{}' panicked: {}", self.name, join_error)),
            };

            if let Err(err) = &result {
                error!("Background task '{}' faulted: {:?}", self.name, err);
            }
            self.state = TaskState::Finished(result);
        }
        true
    }

    pub fn is_finished(&mut self) -> bool {
        self.poll()
    }

    pub fn is_faulted(&mut self) -> bool {
        self.poll() && matches!(self.state, TaskState::Finished(Err(_)))
    }

    /// The result, once. `None` while running or if it was already taken.
    pub fn take(&mut self) -> Option<anyhow::Result<T>> {
        if !self.poll() {
            return None;
        }

        match std::mem::replace(&mut self.state, TaskState::Taken) {
            TaskState::Finished(result) => Some(result),
            _ => None,
        }
    }

    /// Like [`BackgroundTask::take`], for tasks known to be finished.
    pub fn take_result(&mut self) -> anyhow::Result<T> {
        self.take()
            .unwrap_or_else(|| Err(anyhow!("The result of '{}' isn't available", self.name)))
    }
}

/// Polls a whole group of tasks. `Some(true)` once everything finished fine, `Some(false)` as soon as any faulted.
pub fn poll_all<'a, I>(tasks: I) -> Option<bool>
where
    I: IntoIterator<Item = &'a mut dyn PollableTask>,
{
    let mut all_done = true;
    for task in tasks {
        if !task.poll_finished() {
            all_done = false;
        } else if task.faulted() {
            return Some(false);
        }
    }
    all_done.then_some(true)
}

/// Object-safe view of a [`BackgroundTask`], independent of its output type.
pub trait PollableTask {
    fn poll_finished(&mut self) -> bool;
    fn faulted(&mut self) -> bool;
}

impl<T> PollableTask for BackgroundTask<T> {
    fn poll_finished(&mut self) -> bool {
        self.poll()
    }

    fn faulted(&mut self) -> bool {
        self.is_faulted()
    }
}
