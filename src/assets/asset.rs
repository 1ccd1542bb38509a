use std::sync::atomic::{AtomicBool, Ordering};

use avatar_native::{AssetId, ResourceId};
use log::error;

/// The contract shared by every asset a resource consists of.
pub trait LoadableAsset: Send + Sync {
    fn asset_id(&self) -> AssetId;
    fn resource_id(&self) -> ResourceId;
    fn name(&self) -> &str;

    fn is_loaded(&self) -> bool;
    fn is_cancelled(&self) -> bool;

    /// Whether the asset no longer reads anything from the native resource, so it may be released.
    fn has_copied_all_resource_data(&self) -> bool;

    /// Returns whether the cancellation succeeded, cancelling twice is an error that still succeeds.
    fn cancel_load(&self) -> bool;

    /// Releases every engine object and removes the asset from the registry. Idempotent.
    fn dispose(&self);

    /// Waits on other assets treat a cancelled asset as resolved, not as a success.
    fn is_resolved(&self) -> bool {
        self.is_loaded() || self.is_cancelled()
    }
}

/// Loaded/cancelled/disposed bookkeeping. Once cancelled an asset never becomes loaded again.
/// Dropping a lifecycle that was never disposed is reported, as disposal has to be explicit.
#[derive(Debug)]
pub struct AssetLifecycle {
    kind: &'static str,
    id: AssetId,
    name: String,
    loaded: AtomicBool,
    cancelled: AtomicBool,
    disposed: AtomicBool,
}

impl AssetLifecycle {
    pub fn new(kind: &'static str, id: AssetId, name: &str) -> Self {
        Self {
            kind,
            id,
            name: name.to_string(),
            loaded: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire) && !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns false if the asset has been cancelled in the meantime.
    pub fn mark_loaded(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.loaded.store(true, Ordering::Release);
        true
    }

    /// Returns false if the asset was already cancelled.
    pub fn mark_cancelled(&self) -> bool {
        let first = self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.loaded.store(false, Ordering::Release);
        }
        first
    }

    /// Returns false if the asset was already disposed.
    pub fn mark_disposed(&self) -> bool {
        self.disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for AssetLifecycle {
    fn drop(&mut self) {
        if !self.is_disposed() {
            error!(
                "{} {} ({}) was dropped without being disposed",
                self.kind, self.name, self.id
            );
        }
    }
}
