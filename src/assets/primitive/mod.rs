//! Loading of one primitive: a mesh track and a material track, each its own slice, plus the
//! skinning backends the session enabled. The overall loaded state is the conjunction of the
//! independent per track flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use avatar_native::types::{
    BindPose, BoneWeight, CompactSkinningMeta, PrimitiveDescriptor, PrimitiveMaterial,
};
use avatar_native::{AssetId, ResourceId};
use glam::{Vec3, Vec4};
use log::{error, trace};

use crate::assets::compute_skinning::{ComputeSkinnedPrimitive, ComputeSkinningStatus};
use crate::assets::drain::DrainSlice;
use crate::assets::gpu_skinning::GpuSkinnedPrimitive;
use crate::assets::{AssetEntry, AssetLifecycle, LoadContext, LoadableAsset};
use crate::engine::{ComputeBufferHandle, MaterialHandle, MeshHandle};
use crate::settings::SkinningCapabilities;
use crate::slicing::{Directive, SliceHandle};

mod layout;
mod material;
mod mesh;
mod mesh_info;
mod retrieval;
mod start;

#[cfg(test)]
mod tests;

pub use layout::{VertexFormat, encode_streams, exclude_submeshes, vertex_format, vertex_layout};
pub use mesh_info::{MeshConsumers, MeshInfo};

use retrieval::MeshRetrieval;
use start::StartSlice;

/// A decoupled CPU side copy of a primitive's mesh, handed to the mesh loaded callback before the
/// buffers are freed.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSnapshot {
    pub name: String,
    pub triangles: Vec<u32>,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Option<Vec<Vec4>>,
    pub bone_weights: Option<Vec<BoneWeight>>,
    pub bind_poses: Vec<BindPose>,
}

impl MeshSnapshot {
    fn of(name: &str, mesh: &MeshInfo) -> Self {
        Self {
            name: name.to_string(),
            triangles: mesh.triangles.clone(),
            positions: mesh.positions.clone(),
            normals: mesh.normals.clone(),
            tangents: mesh.tangents.clone(),
            bone_weights: mesh.bone_weights.clone(),
            bind_poses: mesh.bind_poses.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimitiveCounts {
    pub vertex_count: u32,
    pub morph_target_count: u32,
    pub index_count: u32,
}

/// What a primitive loads, decided once its counts are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadPlan {
    pub needs_mesh: bool,
    pub needs_morph: bool,
    pub engine_skinned: bool,
    pub gpu_skinned: bool,
    pub compute_skinned: bool,
}

impl LoadPlan {
    pub fn new(capabilities: SkinningCapabilities, counts: PrimitiveCounts, descriptor: &PrimitiveDescriptor) -> Self {
        let needs_mesh = counts.vertex_count > 0 && counts.index_count > 0;
        Self {
            needs_mesh,
            needs_morph: needs_mesh && counts.morph_target_count > 0,
            engine_skinned: needs_mesh && capabilities.contains(SkinningCapabilities::ENGINE),
            gpu_skinned: needs_mesh && capabilities.contains(SkinningCapabilities::GPU_TEXTURE),
            compute_skinned: needs_mesh
                && capabilities.contains(SkinningCapabilities::COMPUTE)
                && descriptor.compact_skinning.is_some(),
        }
    }

    /// Only the compute skinner reads vertices, the engine mesh is a position placeholder.
    pub fn compute_only(&self) -> bool {
        self.compute_skinned && !self.engine_skinned && !self.gpu_skinned
    }

    pub fn needs_vertex_data(&self) -> bool {
        self.needs_mesh && !self.compute_only()
    }

    /// Morph targets only feed the morph source texture.
    pub fn needs_morph_data(&self) -> bool {
        self.needs_morph && self.gpu_skinned
    }

    pub fn consumers(&self) -> MeshConsumers {
        let mut consumers = MeshConsumers::empty();
        consumers.set(MeshConsumers::ENGINE_MESH, self.needs_mesh);
        consumers.set(MeshConsumers::GPU_SKINNING, self.gpu_skinned);
        consumers.set(MeshConsumers::COMPUTE_SKINNING, self.compute_skinned);
        consumers
    }
}

#[derive(Default)]
struct PrimitiveState {
    start: SliceHandle,
    mesh: SliceHandle,
    material: SliceHandle,
    counts: PrimitiveCounts,
    plan: LoadPlan,
    compact_meta: Option<CompactSkinningMeta>,
    retrieval: Option<MeshRetrieval>,
    material_desc: Option<PrimitiveMaterial>,
    vertex_format: VertexFormat,
    has_tangents: bool,
    mesh_handle: Option<MeshHandle>,
    material_handle: Option<MaterialHandle>,
    gpu_skin: Option<Arc<GpuSkinnedPrimitive>>,
    compute_skin: Option<ComputeSkinnedPrimitive>,
}

pub struct PrimitiveLoader {
    lifecycle: AssetLifecycle,
    resource: ResourceId,
    descriptor: PrimitiveDescriptor,
    ctx: Arc<LoadContext>,
    mesh_loaded: AtomicBool,
    material_loaded: AtomicBool,
    gpu_skinning_loaded: AtomicBool,
    compute_skinning_loaded: AtomicBool,
    copied: Arc<AtomicBool>,
    state: Mutex<PrimitiveState>,
}

impl PrimitiveLoader {
    /// Returns `None`, leaving the registered asset alone, if the id is already loaded.
    pub fn create(ctx: Arc<LoadContext>, resource: ResourceId, descriptor: PrimitiveDescriptor) -> Option<Arc<Self>> {
        let primitive = Arc::new(Self {
            lifecycle: AssetLifecycle::new("Primitive", descriptor.id, &descriptor.name),
            resource,
            descriptor,
            ctx,
            mesh_loaded: AtomicBool::new(false),
            material_loaded: AtomicBool::new(false),
            gpu_skinning_loaded: AtomicBool::new(false),
            compute_skinning_loaded: AtomicBool::new(false),
            copied: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(PrimitiveState::default()),
        });

        if !primitive.ctx.assets.register(AssetEntry::Primitive(primitive.clone())) {
            // never loaded, nothing to release
            primitive.lifecycle.mark_disposed();
            return None;
        }
        Some(primitive)
    }

    pub fn descriptor(&self) -> &PrimitiveDescriptor {
        &self.descriptor
    }

    pub fn start_load(self: &Arc<Self>) {
        let handle = self.ctx.slicer.schedule(StartSlice::new(self.clone()));
        self.lock_state().start = handle;
    }

    /// Whether the start slice is still running. The resource starts its primitives one by one.
    pub fn is_starting(&self) -> bool {
        self.lock_state().start.is_running()
    }

    pub fn counts(&self) -> PrimitiveCounts {
        self.lock_state().counts
    }

    pub fn plan(&self) -> LoadPlan {
        self.lock_state().plan
    }

    pub fn vertex_format(&self) -> VertexFormat {
        self.lock_state().vertex_format
    }

    pub fn has_tangents(&self) -> bool {
        self.lock_state().has_tangents
    }

    pub fn mesh(&self) -> Option<MeshHandle> {
        self.lock_state().mesh_handle
    }

    pub fn material(&self) -> Option<MaterialHandle> {
        self.lock_state().material_handle
    }

    pub fn gpu_skin(&self) -> Option<Arc<GpuSkinnedPrimitive>> {
        self.lock_state().gpu_skin.clone()
    }

    pub fn compute_skinning_status(&self) -> Option<ComputeSkinningStatus> {
        self.lock_state().compute_skin.as_ref().map(ComputeSkinnedPrimitive::status)
    }

    pub fn compute_index_pair_count(&self) -> usize {
        self.lock_state()
            .compute_skin
            .as_ref()
            .map_or(0, |skin| skin.index_pairs().len())
    }

    /// The compute buffer mapping this primitive's vertices into the shared skinning buffer.
    pub fn compute_index_buffer(&self) -> Option<ComputeBufferHandle> {
        self.lock_state().compute_skin.as_ref().and_then(ComputeSkinnedPrimitive::index_buffer)
    }

    pub fn is_mesh_loaded(&self) -> bool {
        self.mesh_loaded.load(Ordering::Acquire)
    }

    pub fn is_material_loaded(&self) -> bool {
        self.material_loaded.load(Ordering::Acquire)
    }

    pub fn is_gpu_skinning_loaded(&self) -> bool {
        self.gpu_skinning_loaded.load(Ordering::Acquire)
    }

    pub fn is_compute_skinning_loaded(&self) -> bool {
        self.compute_skinning_loaded.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PrimitiveState> {
        self.state.lock().expect("Primitive State Lock")
    }

    fn mark_copied(&self) {
        self.copied.store(true, Ordering::Release);
    }

    /// Primitive-fatal: logs and cancels everything, the failing slice ends with the returned directive.
    fn fail(&self, what: &str, reason: anyhow::Error) -> Directive {
        error!("Primitive {} failed to {}: {:?}", self.name(), what, reason);
        self.cancel_load();
        Directive::Cancel
    }

    fn release_engine_objects(&self) {
        let (mesh, material) = {
            let mut state = self.lock_state();
            (state.mesh_handle.take(), state.material_handle.take())
        };

        if let Some(mesh) = mesh {
            self.ctx.backend.destroy_mesh(mesh);
        }
        if let Some(material) = material {
            self.ctx.backend.destroy_material(material);
        }
    }

    fn release_skins(&self) {
        let (gpu_skin, compute_skin) = {
            let mut state = self.lock_state();
            (state.gpu_skin.take(), state.compute_skin.take())
        };

        if let Some(gpu_skin) = gpu_skin {
            gpu_skin.dispose();
        }
        if let Some(compute_skin) = compute_skin {
            compute_skin.release(&self.ctx.vertex_buffers);
        }
    }
}

impl LoadableAsset for PrimitiveLoader {
    fn asset_id(&self) -> AssetId {
        self.lifecycle.id()
    }

    fn resource_id(&self) -> ResourceId {
        self.resource
    }

    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn is_loaded(&self) -> bool {
        self.lifecycle.is_loaded()
            && self.is_mesh_loaded()
            && self.is_material_loaded()
            && self.is_gpu_skinning_loaded()
            && self.is_compute_skinning_loaded()
    }

    fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    fn has_copied_all_resource_data(&self) -> bool {
        self.copied.load(Ordering::Acquire)
    }

    fn cancel_load(&self) -> bool {
        if !self.lifecycle.mark_cancelled() {
            error!("Primitive {} has already been cancelled", self.name());
            return true;
        }

        let (handles, retrieval, gpu_skin, compute_skin) = {
            let mut state = self.lock_state();
            let handles = [
                std::mem::take(&mut state.start),
                std::mem::take(&mut state.mesh),
                std::mem::take(&mut state.material),
            ];
            (handles, state.retrieval.take(), state.gpu_skin.take(), state.compute_skin.take())
        };

        let cancelled = handles.iter().fold(true, |all, handle| handle.cancel() && all);

        if let Some(gpu_skin) = gpu_skin {
            gpu_skin.cancel();
        }
        let ticket = compute_skin.map(|skin| {
            skin.release(&self.ctx.vertex_buffers);
            skin.ticket().clone()
        });
        self.release_engine_objects();

        let outstanding = retrieval.map(MeshRetrieval::into_outstanding).unwrap_or_default();
        let build_copied = ticket.as_ref().is_none_or(|ticket| ticket.has_copied());
        if outstanding.is_empty() && build_copied {
            self.mark_copied();
        } else {
            // the native runtime still writes into these buffers
            trace!(
                "Primitive {} waits for {} copies before it is cancelled",
                self.name(),
                outstanding.len()
            );
            let copied = self.copied.clone();
            let drain = DrainSlice::new(format!("Primitive {} cancellation", self.name()))
                .with_tasks(outstanding)
                .until(move || ticket.as_ref().is_none_or(|ticket| ticket.has_copied()))
                .on_drained(move || copied.store(true, Ordering::Release));
            self.ctx.slicer.schedule(drain).detach();
        }

        trace!("Cancelled primitive {}", self.name());
        cancelled
    }

    fn dispose(&self) {
        if self.lifecycle.is_disposed() {
            return;
        }

        if self.is_resolved() {
            self.release_skins();
            self.release_engine_objects();
        } else {
            self.cancel_load();
        }

        {
            let mut state = self.lock_state();
            state.start.clear();
            state.mesh.clear();
            state.material.clear();
        }
        self.ctx.assets.unregister(self.asset_id());
        self.lifecycle.mark_disposed();
    }
}
