use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use avatar_native::{AvatarNative, ResourceId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::assets::{LoadContext, MeshLoadedCallback, MeshSnapshot, ResourceEvent, ResourceLoader};
use crate::engine::RenderBackend;
use crate::settings::LoaderSettings;
use crate::slicing::TickReport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0} is already loaded")]
    AlreadyLoaded(ResourceId),

    #[error("{0} isn't loaded")]
    UnknownResource(ResourceId),

    #[error("The session has been shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub resources_disposed: usize,
    /// Slices that were still running after the drain ticks.
    pub leaked_slices: usize,
    /// Assets nobody disposed.
    pub leaked_assets: usize,
    pub leaked_vertex_buffers: usize,
    pub leaked_atlas_blocks: u32,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.leaked_slices == 0
            && self.leaked_assets == 0
            && self.leaked_vertex_buffers == 0
            && self.leaked_atlas_blocks == 0
    }
}

/// Owns everything the loaders share: the scheduler, the worker pool and the registries. All of it
/// lives exactly as long as the session and is torn down by [`AvatarSession::shutdown`].
pub struct AvatarSession {
    ctx: Arc<LoadContext>,
    resources: DashMap<ResourceId, Arc<ResourceLoader>>,
    shut_down: AtomicBool,
}

impl AvatarSession {
    pub fn new(
        native: Arc<dyn AvatarNative>,
        backend: Arc<dyn RenderBackend>,
        settings: LoaderSettings,
    ) -> anyhow::Result<Self> {
        debug!("Starting an avatar session with {:?}", settings);
        Ok(Self {
            ctx: Arc::new(LoadContext::new(native, backend, settings)?),
            resources: DashMap::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn context(&self) -> &Arc<LoadContext> {
        &self.ctx
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn load_resource(&self, id: ResourceId) -> Result<Arc<ResourceLoader>, SessionError> {
        if self.is_shut_down() {
            return Err(SessionError::ShutDown);
        }

        let resource = match self.resources.entry(id) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyLoaded(id)),
            Entry::Vacant(vacant) => vacant
                .insert(ResourceLoader::create(self.ctx.clone(), id))
                .value()
                .clone(),
        };

        info!("Loading {}", id);
        resource.start_load();
        Ok(resource)
    }

    pub fn resource(&self, id: ResourceId) -> Option<Arc<ResourceLoader>> {
        self.resources.get(&id).map(|resource| resource.value().clone())
    }

    /// Returns whether every cancellation succeeded.
    pub fn cancel_resource(&self, id: ResourceId) -> Result<bool, SessionError> {
        let resource = self.resource(id).ok_or(SessionError::UnknownResource(id))?;
        Ok(resource.cancel_load())
    }

    /// Disposes the resource and everything it loaded, the id may be loaded again afterwards.
    pub fn unload_resource(&self, id: ResourceId) -> Result<(), SessionError> {
        let (_, resource) = self.resources.remove(&id).ok_or(SessionError::UnknownResource(id))?;
        resource.dispose();
        self.ctx.tracker.forget(id);
        Ok(())
    }

    pub fn subscribe(&self) -> Receiver<ResourceEvent> {
        self.ctx.tracker.subscribe()
    }

    pub fn set_mesh_loaded_callback(&self, callback: impl Fn(&MeshSnapshot) + Send + Sync + 'static) {
        let callback: MeshLoadedCallback = Box::new(callback);
        self.ctx.mesh_loaded.store(Some(Arc::new(callback)));
    }

    pub fn clear_mesh_loaded_callback(&self) {
        self.ctx.mesh_loaded.store(None);
    }

    /// One frame of loading work.
    pub fn tick(&self) -> TickReport {
        self.ctx.slicer.tick()
    }

    /// Ticks until `done` holds, sleeping a millisecond between frames so background work progresses.
    /// Returns false if `done` still doesn't hold after `max_ticks`.
    pub fn tick_until(&self, max_ticks: u32, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_ticks {
            self.tick();
            if done(self) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        done(self)
    }

    /// Disposes every resource, gives the remaining work a bounded number of ticks to wind down
    /// and reports whatever is still alive afterwards as leaked.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            warn!("The avatar session has already been shut down");
            return ShutdownReport::default();
        }

        let mut report = ShutdownReport::default();
        let ids = self.resources.iter().map(|entry| *entry.key()).collect::<Vec<_>>();
        for id in ids {
            if let Some((_, resource)) = self.resources.remove(&id) {
                resource.dispose();
                report.resources_disposed += 1;
            }
        }

        let ctx = &self.ctx;
        for _ in 0..ctx.settings.shutdown_ticks {
            if ctx.slicer.pending() == 0 {
                break;
            }
            ctx.slicer.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
        report.leaked_slices = ctx.slicer.shutdown();
        ctx.workers.shutdown(ctx.settings.worker_shutdown_timeout);

        for (id, name) in ctx.assets.live_assets() {
            error!("Asset {} ({}) was never disposed", name, id);
            if let Some(entry) = ctx.assets.get(id) {
                entry.asset().dispose();
            }
            // disposal unregisters, whatever is left refused to go
            ctx.assets.unregister(id);
            report.leaked_assets += 1;
        }

        report.leaked_vertex_buffers = ctx.vertex_buffers.shutdown();
        report.leaked_atlas_blocks = ctx.atlases.live_blocks();
        if report.leaked_atlas_blocks > 0 {
            error!("{} skinning atlas blocks were never released", report.leaked_atlas_blocks);
        }
        ctx.mesh_loaded.store(None);

        info!("Avatar session shut down: {:?}", report);
        report
    }
}

impl Drop for AvatarSession {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            warn!("The avatar session was dropped without a shutdown");
            self.shutdown();
        }
    }
}
