//! A resource is the bundle of primitives and images the native runtime loaded under one id. Its
//! loader creates the sub-assets, starts the primitives one after another, releases the native
//! resource as soon as nothing reads from it anymore and reports completion once everything resolved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use avatar_native::{AvatarNative, ResourceId};
use log::{debug, error, info, trace, warn};

use crate::assets::drain::DrainSlice;
use crate::assets::{ImageLoader, LoadContext, LoadableAsset, PrimitiveLoader};
use crate::slicing::{Directive, SliceHandle, TimeSlice};

/// Releases the native resource, at most once per `released` flag.
fn release_native(native: &dyn AvatarNative, resource: ResourceId, released: &AtomicBool) -> bool {
    if released
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }

    if !native.release_resource(resource) {
        error!("The native runtime refused to release {}", resource);
    }
    debug!("Released native resource {}", resource);
    true
}

#[derive(Default)]
struct ResourceState {
    handle: SliceHandle,
    primitives: Vec<Arc<PrimitiveLoader>>,
    images: Vec<Arc<ImageLoader>>,
}

pub struct ResourceLoader {
    id: ResourceId,
    ctx: Arc<LoadContext>,
    loaded: AtomicBool,
    cancelled: AtomicBool,
    released: Arc<AtomicBool>,
    disposed: AtomicBool,
    state: Mutex<ResourceState>,
}

impl ResourceLoader {
    pub fn create(ctx: Arc<LoadContext>, id: ResourceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            ctx,
            loaded: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            released: Arc::new(AtomicBool::new(false)),
            disposed: AtomicBool::new(false),
            state: Mutex::new(ResourceState::default()),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn start_load(self: &Arc<Self>) {
        let handle = self.ctx.slicer.schedule(ResourceSlice::new(self.clone()));
        self.lock_state().handle = handle;
    }

    pub fn primitives(&self) -> Vec<Arc<PrimitiveLoader>> {
        self.lock_state().primitives.clone()
    }

    pub fn images(&self) -> Vec<Arc<ImageLoader>> {
        self.lock_state().images.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire) && !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_resolved(&self) -> bool {
        self.is_loaded() || self.is_cancelled()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ResourceState> {
        self.state.lock().expect("Resource State Lock")
    }

    fn sub_assets(&self) -> Vec<Arc<dyn LoadableAsset>> {
        let state = self.lock_state();
        let primitives = state.primitives.iter().map(|p| p.clone() as Arc<dyn LoadableAsset>);
        let images = state.images.iter().map(|i| i.clone() as Arc<dyn LoadableAsset>);
        primitives.chain(images).collect()
    }

    fn release_native(&self) -> bool {
        release_native(self.ctx.native.as_ref(), self.id, &self.released)
    }

    /// Idempotent, a second completion is ignored.
    fn complete(&self) {
        if self.is_cancelled() || self.loaded.swap(true, Ordering::AcqRel) {
            warn!("{} was already resolved, ignoring its completion", self.id);
            return;
        }

        self.ctx.tracker.resource_completed(self.id);
        if !self.ctx.native.resource_ready_to_render(self.id) {
            warn!("{} couldn't be marked ready to render", self.id);
        }
        info!("{} loaded", self.id);
    }

    /// Cancels every sub-asset that is still loading. The native resource is released right away
    /// if nothing reads from it anymore, otherwise as soon as the outstanding copies finished.
    /// Returns whether every cancellation succeeded.
    pub fn cancel_load(&self) -> bool {
        if self.loaded.load(Ordering::Acquire) {
            debug!("{} already loaded, nothing to cancel", self.id);
            return true;
        }

        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!("{} has already been cancelled", self.id);
            return true;
        }

        let handle = std::mem::take(&mut self.lock_state().handle);
        let mut cancelled = handle.cancel();

        let assets = self.sub_assets();
        for asset in assets.iter().filter(|asset| !asset.is_resolved()) {
            cancelled &= asset.cancel_load();
        }

        if assets.iter().all(|asset| asset.has_copied_all_resource_data()) {
            self.release_native();
        } else {
            trace!("{} defers its release until every copy finished", self.id);
            let native = self.ctx.native.clone();
            let id = self.id;
            let released = self.released.clone();
            let drain = DrainSlice::new(format!("Release {}", self.id))
                .until(move || assets.iter().all(|asset| asset.has_copied_all_resource_data()))
                .on_drained(move || {
                    release_native(native.as_ref(), id, &released);
                });
            self.ctx.slicer.schedule(drain).detach();
        }

        self.ctx.tracker.resource_cancelled(self.id);
        if !cancelled {
            error!("Cancelling {} failed", self.id);
        }
        cancelled
    }

    /// Cancels an unresolved load and disposes every sub-asset. The native resource is never
    /// released twice.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if !self.is_resolved() {
            self.cancel_load();
        }

        for asset in self.sub_assets() {
            asset.dispose();
        }
        self.lock_state().handle.clear();
        debug!("Disposed {}", self.id);
    }
}

enum ResourceStage {
    Enumerate,
    CreateImages { next: u32, count: u32 },
    CreatePrimitives { next: u32, count: u32 },
    StartPrimitives { next: usize },
    AwaitCopies,
    AwaitResolved,
}

struct ResourceSlice {
    name: String,
    resource: Arc<ResourceLoader>,
    stage: ResourceStage,
    primitive_count: u32,
}

impl ResourceSlice {
    fn new(resource: Arc<ResourceLoader>) -> Self {
        Self {
            name: format!("Load {}", resource.id),
            resource,
            stage: ResourceStage::Enumerate,
            primitive_count: 0,
        }
    }

    fn fail(&self, reason: impl std::fmt::Display) -> Directive {
        error!("{} failed: {}", self.name, reason);
        self.resource.cancel_load();
        Directive::Cancel
    }
}

impl TimeSlice for ResourceSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        let resource = self.resource.clone();
        let ctx = &resource.ctx;

        match self.stage {
            ResourceStage::Enumerate => {
                self.primitive_count = match ctx.native.primitive_count(resource.id) {
                    Ok(count) => count,
                    Err(err) => return Ok(self.fail(format!("enumerating its primitives: {}", err))),
                };
                let image_count = ctx.native.image_count(resource.id).unwrap_or_else(|err| {
                    warn!("{} has no images: {}", resource.id, err);
                    0
                });

                trace!(
                    "{} has {} primitives and {} images",
                    resource.id,
                    self.primitive_count,
                    image_count
                );
                self.stage = ResourceStage::CreateImages {
                    next: 0,
                    count: image_count,
                };
                Ok(Directive::Continue)
            }
            ResourceStage::CreateImages { next, count } if next < count => {
                self.stage = ResourceStage::CreateImages { next: next + 1, count };
                let descriptor = match ctx.native.image_by_index(resource.id, next) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        warn!("{}: skipping image {}: {}", resource.id, next, err);
                        return Ok(Directive::Hold);
                    }
                };

                if ctx.assets.contains(descriptor.id) {
                    warn!("{}: image {} is already loaded, skipping it", resource.id, descriptor.id);
                    return Ok(Directive::Hold);
                }

                // images load concurrently, primitives wait for them in their material track
                let image = ImageLoader::create(ctx.clone(), resource.id, descriptor);
                image.start_load();
                resource.lock_state().images.push(image);
                Ok(Directive::Hold)
            }
            ResourceStage::CreateImages { .. } => {
                self.stage = ResourceStage::CreatePrimitives {
                    next: 0,
                    count: self.primitive_count,
                };
                Ok(Directive::Continue)
            }
            ResourceStage::CreatePrimitives { next, count } if next < count => {
                self.stage = ResourceStage::CreatePrimitives { next: next + 1, count };
                let descriptor = match ctx.native.primitive_by_index(resource.id, next) {
                    Ok(descriptor) => descriptor,
                    Err(err) => return Ok(self.fail(format!("enumerating primitive {}: {}", next, err))),
                };

                let id = descriptor.id;
                match PrimitiveLoader::create(ctx.clone(), resource.id, descriptor) {
                    Some(primitive) => resource.lock_state().primitives.push(primitive),
                    None => warn!("{}: primitive {} is already loaded, skipping it", resource.id, id),
                }
                Ok(Directive::Hold)
            }
            ResourceStage::CreatePrimitives { .. } => {
                self.stage = ResourceStage::StartPrimitives { next: 0 };
                Ok(Directive::Continue)
            }
            ResourceStage::StartPrimitives { next } => {
                let primitives = resource.primitives();
                if next > 0 && primitives[next - 1].is_starting() {
                    return Ok(Directive::Defer);
                }

                match primitives.get(next) {
                    Some(primitive) => {
                        primitive.start_load();
                        self.stage = ResourceStage::StartPrimitives { next: next + 1 };
                        Ok(Directive::Hold)
                    }
                    None => {
                        self.stage = ResourceStage::AwaitCopies;
                        Ok(Directive::Continue)
                    }
                }
            }
            ResourceStage::AwaitCopies => {
                if !resource
                    .sub_assets()
                    .iter()
                    .all(|asset| asset.has_copied_all_resource_data())
                {
                    return Ok(Directive::Delay);
                }

                resource.release_native();
                self.stage = ResourceStage::AwaitResolved;
                Ok(Directive::Continue)
            }
            ResourceStage::AwaitResolved => {
                if !resource.sub_assets().iter().all(|asset| asset.is_resolved()) {
                    return Ok(Directive::Wait);
                }

                resource.complete();
                Ok(Directive::Complete)
            }
        }
    }
}
