use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, trace};

type Cleanup = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceStatus {
    Running = 0,
    Completed = 1,
    /// The slice returned an error. Counts as completed, dependents have to notice and cancel themselves.
    Faulted = 2,
    Cancelled = 3,
    /// The handle was dropped while the slice still ran. Always a caller bug.
    EmergencyShutdown = 4,
}

impl SliceStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SliceStatus::Running,
            1 => SliceStatus::Completed,
            2 => SliceStatus::Faulted,
            3 => SliceStatus::Cancelled,
            _ => SliceStatus::EmergencyShutdown,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != SliceStatus::Running
    }
}

/// State shared between the scheduler entry and the [`SliceHandle`].
pub(crate) struct SliceShared {
    pub(crate) id: u64,
    pub(crate) name: String,
    status: AtomicU8,
    cleanup: Mutex<Option<Cleanup>>,
}

impl SliceShared {
    pub(crate) fn new(id: u64, name: String, cleanup: Option<Cleanup>) -> Self {
        Self {
            id,
            name,
            status: AtomicU8::new(SliceStatus::Running as u8),
            cleanup: Mutex::new(cleanup),
        }
    }

    pub(crate) fn status(&self) -> SliceStatus {
        SliceStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Moves a running slice into `status`. Returns false if it already was terminal.
    pub(crate) fn finish(&self, status: SliceStatus) -> bool {
        let transitioned = self
            .status
            .compare_exchange(
                SliceStatus::Running as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if transitioned && status != SliceStatus::Cancelled {
            // Only cancellation runs the cleanup, the other terminal states just drop it.
            self.cleanup.lock().expect("Slice Cleanup Lock").take();
        }
        transitioned
    }

    /// Runs the registered cleanup exactly once, synchronously, on the first call.
    pub(crate) fn cancel(&self) -> bool {
        if !self.finish(SliceStatus::Cancelled) {
            return false;
        }

        let cleanup = self.cleanup.lock().expect("Slice Cleanup Lock").take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        true
    }
}

/// A cancellable handle to one scheduled slice.
///
/// Lifecycle: invalid -> running -> {completed, faulted, cancelled}. The owner has to [`SliceHandle::clear`]
/// (or [`SliceHandle::cancel`]) it explicitly, dropping a handle of a still running slice triggers the
/// emergency shutdown path, which is logged as an error.
pub struct SliceHandle {
    shared: Option<Arc<SliceShared>>,
}

impl SliceHandle {
    pub(crate) fn new(shared: Arc<SliceShared>) -> Self {
        Self { shared: Some(shared) }
    }

    pub fn invalid() -> Self {
        Self { shared: None }
    }

    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }

    pub fn status(&self) -> Option<SliceStatus> {
        self.shared.as_ref().map(|shared| shared.status())
    }

    pub fn is_running(&self) -> bool {
        self.status() == Some(SliceStatus::Running)
    }

    /// Completed includes faulted slices, as both ran to their end.
    pub fn is_completed(&self) -> bool {
        matches!(
            self.status(),
            Some(SliceStatus::Completed | SliceStatus::Faulted)
        )
    }

    pub fn is_faulted(&self) -> bool {
        self.status() == Some(SliceStatus::Faulted)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == Some(SliceStatus::Cancelled)
    }

    /// Idempotent: cancelling twice, or cancelling a completed slice, is a successful no-op.
    /// Returns whether the handle reached a terminal state.
    pub fn cancel(&self) -> bool {
        match &self.shared {
            Some(shared) => {
                if shared.cancel() {
                    trace!("Cancelled slice '{}' ({})", shared.name, shared.id);
                }
                shared.status().is_terminal()
            }
            None => true,
        }
    }

    /// Releases the handle. Clearing a running slice cancels it first.
    pub fn clear(&mut self) {
        if let Some(shared) = self.shared.take() {
            if shared.status() == SliceStatus::Running {
                shared.cancel();
            }
        }
    }

    /// Lets the slice run to completion without an owner.
    pub fn detach(mut self) {
        self.shared.take();
    }
}

impl Default for SliceHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Debug for SliceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.shared {
            Some(shared) => write!(f, "SliceHandle('{}', {:?})", shared.name, shared.status()),
            None => write!(f, "SliceHandle(invalid)"),
        }
    }
}

impl Drop for SliceHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            if shared.finish(SliceStatus::EmergencyShutdown) {
                error!(
                    "Slice '{}' ({}) was dropped while still running, shutting it down",
                    shared.name, shared.id
                );
            }
        }
    }
}
