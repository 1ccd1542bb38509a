//! The loadable assets and the session scoped tables they share.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use avatar_native::AvatarNative;

use crate::assets::compute_skinning::VertexBufferRegistry;
use crate::assets::gpu_skinning::SkinningAtlases;
use crate::assets::shader::ShaderManager;
use crate::engine::RenderBackend;
use crate::settings::LoaderSettings;
use crate::slicing::{TimeSlicer, WorkerPool};

pub mod asset;
pub mod compute_skinning;
pub mod drain;
pub mod gpu_skinning;
pub mod image;
pub mod primitive;
pub mod registry;
pub mod resource;
pub mod shader;
pub mod tracker;

pub use asset::{AssetLifecycle, LoadableAsset};
pub use image::ImageLoader;
pub use primitive::{MeshSnapshot, PrimitiveLoader};
pub use registry::{AssetEntry, AssetRegistry};
pub use resource::ResourceLoader;
pub use tracker::{ResourceEvent, ResourceTracker};

pub type MeshLoadedCallback = Box<dyn Fn(&MeshSnapshot) + Send + Sync>;

/// Everything a loader needs, owned by one [`crate::session::AvatarSession`].
pub struct LoadContext {
    pub native: Arc<dyn AvatarNative>,
    pub backend: Arc<dyn RenderBackend>,
    pub settings: LoaderSettings,
    pub slicer: TimeSlicer,
    pub workers: WorkerPool,
    pub assets: AssetRegistry,
    pub vertex_buffers: VertexBufferRegistry,
    pub atlases: SkinningAtlases,
    pub shaders: ShaderManager,
    pub tracker: ResourceTracker,
    pub mesh_loaded: ArcSwapOption<MeshLoadedCallback>,
}

impl LoadContext {
    pub fn new(
        native: Arc<dyn AvatarNative>,
        backend: Arc<dyn RenderBackend>,
        settings: LoaderSettings,
    ) -> anyhow::Result<Self> {
        let mut shaders = ShaderManager::with_defaults();
        for entry in &settings.shaders {
            shaders.register(entry.clone());
        }

        Ok(Self {
            slicer: TimeSlicer::new(settings.tick_budget),
            workers: WorkerPool::new(settings.worker_threads)?,
            assets: AssetRegistry::default(),
            vertex_buffers: VertexBufferRegistry::new(backend.clone()),
            atlases: SkinningAtlases::new(backend.clone(), settings.atlas),
            shaders,
            tracker: ResourceTracker::default(),
            mesh_loaded: ArcSwapOption::empty(),
            native,
            backend,
            settings,
        })
    }
}
