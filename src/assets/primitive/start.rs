use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use avatar_native::NativeResult;
use log::{debug, trace, warn};

use crate::assets::primitive::material::MaterialSlice;
use crate::assets::primitive::mesh::MeshSlice;
use crate::assets::primitive::{LoadPlan, MeshRetrieval, PrimitiveCounts, PrimitiveLoader};
use crate::assets::LoadableAsset;
use crate::slicing::{Directive, TimeSlice};

enum StartStage {
    Counts,
    Plan,
    Mesh,
    Material,
}

/// Queries what the primitive consists of and kicks off the mesh and material tracks.
pub(super) struct StartSlice {
    name: String,
    primitive: Arc<PrimitiveLoader>,
    stage: StartStage,
}

impl StartSlice {
    pub(super) fn new(primitive: Arc<PrimitiveLoader>) -> Self {
        Self {
            name: format!("Start primitive {}", primitive.name()),
            primitive,
            stage: StartStage::Counts,
        }
    }

    /// An absent or failing count disables that part of the primitive, it never fails the load.
    fn count(&self, what: &str, result: Option<NativeResult<u32>>) -> u32 {
        match result {
            None => 0,
            Some(Ok(count)) => count,
            Some(Err(err)) if err.is_data_not_available() => {
                debug!("Primitive {} has no {}", self.primitive.name(), what);
                0
            }
            Some(Err(err)) => {
                warn!(
                    "Querying the {} of primitive {} failed, disabling it: {}",
                    what,
                    self.primitive.name(),
                    err
                );
                0
            }
        }
    }
}

impl TimeSlice for StartSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        let primitive = self.primitive.clone();
        let ctx = &primitive.ctx;
        let descriptor = &primitive.descriptor;

        match self.stage {
            StartStage::Counts => {
                let vertex_count = self.count(
                    "vertices",
                    descriptor.vertex_buffer.map(|buffer| ctx.native.vertex_count(buffer)),
                );
                let morph_target_count = self.count(
                    "morph targets",
                    descriptor
                        .morph_target_buffer
                        .map(|buffer| ctx.native.morph_target_count(buffer)),
                );

                let index_count = if vertex_count > 0 {
                    match ctx.native.index_count(descriptor.id) {
                        Ok(count) => count,
                        Err(err) => return Ok(primitive.fail("query its index count", err.into())),
                    }
                } else {
                    0
                };

                primitive.lock_state().counts = PrimitiveCounts {
                    vertex_count,
                    morph_target_count,
                    index_count,
                };
                self.stage = StartStage::Plan;
                Ok(Directive::Hold)
            }
            StartStage::Plan => {
                let counts = primitive.counts();
                let mut plan = LoadPlan::new(ctx.settings.skinning, counts, descriptor);

                let mut compact_meta = None;
                if let Some(id) = descriptor.compact_skinning.filter(|_| plan.compute_skinned) {
                    match ctx.native.compact_skinning_meta(id) {
                        Ok(meta) => compact_meta = Some(meta),
                        Err(err) => {
                            warn!(
                                "Compact skinning data {} of primitive {} is unusable, disabling compute skinning: {}",
                                id,
                                primitive.name(),
                                err
                            );
                            plan.compute_skinned = false;
                        }
                    }
                }

                // backends that aren't requested count as loaded
                let skip = |flag: &AtomicBool, requested: bool| {
                    if !requested {
                        flag.store(true, Ordering::Release);
                    }
                };
                skip(&primitive.gpu_skinning_loaded, plan.gpu_skinned);
                skip(&primitive.compute_skinning_loaded, plan.compute_skinned);
                skip(&primitive.mesh_loaded, plan.needs_mesh);

                trace!("Primitive {}: {:?}, {:?}", primitive.name(), counts, plan);
                let mut state = primitive.lock_state();
                state.plan = plan;
                state.compact_meta = compact_meta;
                drop(state);

                self.stage = StartStage::Mesh;
                Ok(Directive::Continue)
            }
            StartStage::Mesh => {
                let (counts, plan) = {
                    let state = primitive.lock_state();
                    (state.counts, state.plan)
                };

                if plan.needs_mesh {
                    let retrieval = MeshRetrieval::spawn(ctx, descriptor, counts, plan);
                    let handle = ctx.slicer.schedule(MeshSlice::new(primitive.clone()));
                    let mut state = primitive.lock_state();
                    state.retrieval = Some(retrieval);
                    state.mesh = handle;
                }

                self.stage = StartStage::Material;
                Ok(Directive::Hold)
            }
            StartStage::Material => {
                let material = match ctx.native.primitive_material(descriptor.id) {
                    Ok(material) => material,
                    Err(err) => {
                        warn!(
                            "Primitive {} has no usable material, using the default one: {}",
                            primitive.name(),
                            err
                        );
                        Default::default()
                    }
                };

                let handle = ctx.slicer.schedule(MaterialSlice::new(primitive.clone()));
                let needs_mesh = {
                    let mut state = primitive.lock_state();
                    state.material_desc = Some(material);
                    state.material = handle;
                    state.plan.needs_mesh
                };

                // without a mesh track nothing reads from the native resource anymore
                if !needs_mesh {
                    primitive.mark_copied();
                }
                primitive.lifecycle.mark_loaded();
                trace!("Primitive {} started", primitive.name());
                Ok(Directive::Complete)
            }
        }
    }
}
