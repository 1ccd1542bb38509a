use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::anyhow;
use log::{debug, trace};

use crate::assets::LoadableAsset;
use crate::assets::compute_skinning::{
    ComputeSkinnedPrimitive, ComputeSkinningStatus, generate_mesh_to_compact_skinning_indices,
};
use crate::assets::gpu_skinning::{GpuSkinnedPrimitive, GpuSkinningStatus};
use crate::assets::primitive::{
    LoadPlan, MeshConsumers, MeshInfo, MeshSnapshot, PrimitiveLoader, encode_streams, exclude_submeshes,
    vertex_format, vertex_layout,
};
use crate::engine::{MeshUpload, SubMeshRange};
use crate::slicing::{Directive, TimeSlice};

enum MeshStage {
    AwaitRetrieval,
    Upload(MeshInfo),
    StartSkinning(MeshInfo),
    AwaitSkinning,
}

/// Assembles the engine mesh out of the retrieved buffers, then builds the requested skinning
/// backends and waits for them.
pub(super) struct MeshSlice {
    name: String,
    primitive: Arc<PrimitiveLoader>,
    stage: MeshStage,
}

impl MeshSlice {
    pub(super) fn new(primitive: Arc<PrimitiveLoader>) -> Self {
        Self {
            name: format!("Mesh {}", primitive.name()),
            primitive,
            stage: MeshStage::AwaitRetrieval,
        }
    }

    fn await_retrieval(&mut self) -> anyhow::Result<Directive> {
        let primitive = &self.primitive;
        let (result, compute_skinned) = {
            let mut state = primitive.lock_state();
            let compute_skinned = state.plan.compute_skinned;
            let Some(retrieval) = state.retrieval.as_mut() else {
                // taken by a cancellation
                return Ok(Directive::Cancel);
            };

            match retrieval.poll() {
                None => return Ok(Directive::Delay),
                Some(false) => (Err(anyhow!("A background copy faulted")), compute_skinned),
                Some(true) => match state.retrieval.take() {
                    Some(retrieval) => (retrieval.into_mesh_info(), compute_skinned),
                    None => return Ok(Directive::Cancel),
                },
            }
        };

        match result {
            Ok(mesh) => {
                // the shared vertex buffer copies on its own, the primitive is done with the native side
                if !compute_skinned {
                    primitive.mark_copied();
                }
                trace!("{}: retrieved {:?}", self.name, mesh);
                self.stage = MeshStage::Upload(mesh);
                Ok(Directive::Hold)
            }
            Err(err) => Ok(primitive.fail("retrieve its mesh data", err)),
        }
    }

    fn upload(&mut self, mut mesh: MeshInfo) -> anyhow::Result<Directive> {
        let primitive = self.primitive.clone();
        let ctx = &primitive.ctx;
        let (plan, compact_meta) = {
            let state = primitive.lock_state();
            (state.plan, state.compact_meta)
        };

        let excluded = match exclude_submeshes(&mut mesh.triangles, &mesh.submeshes, ctx.settings.submesh_inclusion) {
            Ok(excluded) => excluded,
            Err(err) => return Ok(primitive.fail("filter its sub-meshes", err)),
        };
        if excluded > 0 {
            debug!("{}: degenerated {} indices of excluded sub-meshes", self.name, excluded);
        }

        let compute_only = plan.compute_only();
        let format = vertex_format(&mesh, plan.engine_skinned, compute_only);
        let layout = vertex_layout(format);
        let streams = match encode_streams(&mesh, &layout, compute_only) {
            Ok(streams) => streams,
            Err(err) => return Ok(primitive.fail("encode its vertices", err)),
        };
        let has_tangents = match compact_meta.filter(|_| compute_only) {
            Some(meta) => meta.has_tangents,
            None => mesh.tangents.is_some(),
        };

        let upload = MeshUpload {
            name: primitive.name().to_string(),
            vertex_count: mesh.vertex_count,
            layout,
            streams,
            indices: mesh.triangles.clone(),
            submeshes: mesh
                .submeshes
                .iter()
                .map(|submesh| SubMeshRange {
                    index_start: submesh.index_start,
                    index_count: submesh.index_count,
                    vertex_start: submesh.vertex_start,
                    vertex_count: submesh.vertex_count,
                })
                .collect(),
            bind_poses: if plan.engine_skinned {
                mesh.bind_poses.clone()
            } else {
                vec![]
            },
        };

        let handle = match ctx.backend.create_mesh(upload) {
            Ok(handle) => handle,
            Err(err) => return Ok(primitive.fail("allocate its vertex buffers", err)),
        };

        {
            let mut state = primitive.lock_state();
            state.mesh_handle = Some(handle);
            state.vertex_format = format;
            state.has_tangents = has_tangents;
        }

        if let Some(callback) = ctx.mesh_loaded.load_full() {
            callback(&MeshSnapshot::of(primitive.name(), &mesh));
        }
        mesh.finish(MeshConsumers::ENGINE_MESH);

        trace!("{}: uploaded as {} with {:?}", self.name, handle, format);
        self.stage = MeshStage::StartSkinning(mesh);
        Ok(Directive::Hold)
    }

    fn start_skinning(&mut self, mut mesh: MeshInfo, plan: LoadPlan) -> anyhow::Result<Directive> {
        let primitive = self.primitive.clone();
        let ctx = &primitive.ctx;

        if plan.gpu_skinned {
            let morph_targets = std::mem::take(&mut mesh.morph_targets);
            match GpuSkinnedPrimitive::start(ctx, primitive.name(), &mesh, morph_targets) {
                Ok(skin) => primitive.lock_state().gpu_skin = Some(skin),
                Err(err) => return Ok(primitive.fail("build its skinning textures", err)),
            }
            mesh.finish(MeshConsumers::GPU_SKINNING);
        }

        if plan.compute_skinned {
            let (Some(id), Some(mapping)) = (primitive.descriptor.compact_skinning, mesh.compact_indices.as_ref()) else {
                return Ok(primitive.fail("start compute skinning", anyhow!("The compact skinning data is missing")));
            };

            let pairs = match generate_mesh_to_compact_skinning_indices(mapping, &mesh.triangles) {
                Ok(pairs) => pairs,
                Err(err) => return Ok(primitive.fail("map its compact skinning indices", err)),
            };
            let skin = match ComputeSkinnedPrimitive::request(ctx, id, primitive.asset_id(), mapping.format, pairs) {
                Ok(skin) => skin,
                Err(err) => return Ok(primitive.fail("upload its compact skinning indices", err)),
            };
            primitive.lock_state().compute_skin = Some(skin);
            mesh.finish(MeshConsumers::COMPUTE_SKINNING);
        }

        debug_assert!(mesh.pending().is_empty(), "{:?} still pending", mesh.pending());
        self.stage = MeshStage::AwaitSkinning;
        Ok(Directive::Wait)
    }

    fn await_skinning(&mut self) -> anyhow::Result<Directive> {
        let primitive = &self.primitive;
        let (gpu, compute, build_copied) = {
            let state = primitive.lock_state();
            (
                state.gpu_skin.as_ref().map(|skin| skin.status()),
                state.compute_skin.as_ref().map(ComputeSkinnedPrimitive::status),
                state
                    .compute_skin
                    .as_ref()
                    .is_none_or(|skin| skin.ticket().has_copied()),
            )
        };

        if build_copied {
            primitive.mark_copied();
        }

        match gpu {
            Some(GpuSkinningStatus::Failed) => {
                return Ok(primitive.fail("build its morph texture", anyhow!("The morph texture build failed")));
            }
            Some(GpuSkinningStatus::Ready) => primitive.gpu_skinning_loaded.store(true, Ordering::Release),
            Some(GpuSkinningStatus::Building) | None => {}
        }
        match compute {
            Some(ComputeSkinningStatus::Failed) => {
                return Ok(primitive.fail(
                    "build its shared vertex buffer",
                    anyhow!("The shared vertex buffer build failed"),
                ));
            }
            Some(ComputeSkinningStatus::Ready) => primitive.compute_skinning_loaded.store(true, Ordering::Release),
            Some(ComputeSkinningStatus::Pending) | None => {}
        }

        if primitive.is_gpu_skinning_loaded() && primitive.is_compute_skinning_loaded() {
            primitive.mesh_loaded.store(true, Ordering::Release);
            trace!("{} loaded", self.name);
            return Ok(Directive::Complete);
        }
        Ok(Directive::Wait)
    }
}

impl TimeSlice for MeshSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        match std::mem::replace(&mut self.stage, MeshStage::AwaitSkinning) {
            MeshStage::AwaitRetrieval => {
                self.stage = MeshStage::AwaitRetrieval;
                self.await_retrieval()
            }
            MeshStage::Upload(mesh) => self.upload(mesh),
            MeshStage::StartSkinning(mesh) => {
                let plan = self.primitive.plan();
                self.start_skinning(mesh, plan)
            }
            MeshStage::AwaitSkinning => self.await_skinning(),
        }
    }
}
