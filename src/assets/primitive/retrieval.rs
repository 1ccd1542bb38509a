use std::sync::Arc;

use anyhow::ensure;
use avatar_native::types::{
    BindPose, BoneWeight, MeshToCompactIndices, MorphTargetData, PrimitiveDescriptor, StaticAttributes,
    SubMeshDescriptor,
};
use avatar_native::{AvatarNative, NativeResult};
use glam::{Vec3, Vec4};

use crate::assets::LoadContext;
use crate::assets::primitive::{LoadPlan, MeshConsumers, MeshInfo, PrimitiveCounts};
use crate::slicing::{BackgroundTask, PollableTask, poll_all};

/// `DataNotAvailable` is an absent feature, not a failure.
fn optional<T>(result: NativeResult<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_data_not_available() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

struct VertexTasks {
    positions: BackgroundTask<Vec<Vec3>>,
    normals: BackgroundTask<Vec<Vec3>>,
    tangents: BackgroundTask<Option<Vec<Vec4>>>,
    bone_weights: BackgroundTask<Option<Vec<BoneWeight>>>,
    static_attributes: BackgroundTask<Option<StaticAttributes>>,
}

/// The background copies of one primitive's mesh data. Every buffer is its own task, a fault in
/// any of them fails the whole retrieval.
pub(crate) struct MeshRetrieval {
    vertex_count: u32,
    consumers: MeshConsumers,
    triangles: BackgroundTask<Vec<u32>>,
    topology: BackgroundTask<(Vec<SubMeshDescriptor>, Vec<BindPose>)>,
    vertices: Option<VertexTasks>,
    morph_targets: Option<BackgroundTask<Vec<MorphTargetData>>>,
    compact_indices: Option<BackgroundTask<MeshToCompactIndices>>,
}

impl MeshRetrieval {
    pub(crate) fn spawn(
        ctx: &LoadContext,
        descriptor: &PrimitiveDescriptor,
        counts: PrimitiveCounts,
        plan: LoadPlan,
    ) -> Self {
        let id = descriptor.id;
        let workers = &ctx.workers;
        let native = || -> Arc<dyn AvatarNative> { ctx.native.clone() };

        let triangles = {
            let native = native();
            let index_count = counts.index_count as usize;
            workers.spawn("triangles", move || {
                let mut triangles = vec![0u32; index_count];
                native.copy_triangles(id, &mut triangles)?;
                Ok(triangles)
            })
        };

        let topology = {
            let native = native();
            workers.spawn("submeshes", move || {
                let submeshes = optional(native.submeshes(id))?.unwrap_or_default();
                let bind_poses = optional(native.joint_bind_poses(id))?.unwrap_or_default();
                Ok((submeshes, bind_poses))
            })
        };

        let vertex_count = counts.vertex_count as usize;
        let vertices = descriptor
            .vertex_buffer
            .filter(|_| plan.needs_vertex_data())
            .map(|buffer| VertexTasks {
                positions: {
                    let native = native();
                    workers.spawn("positions", move || {
                        let mut positions = vec![Vec3::ZERO; vertex_count];
                        native.copy_positions(buffer, &mut positions)?;
                        Ok(positions)
                    })
                },
                normals: {
                    let native = native();
                    workers.spawn("normals", move || {
                        let mut normals = vec![Vec3::ZERO; vertex_count];
                        Ok(optional(native.copy_normals(buffer, &mut normals))?
                            .map(|_| normals)
                            .unwrap_or_default())
                    })
                },
                tangents: {
                    let native = native();
                    workers.spawn("tangents", move || {
                        let mut tangents = vec![Vec4::ZERO; vertex_count];
                        Ok(optional(native.copy_tangents(buffer, &mut tangents))?.map(|_| tangents))
                    })
                },
                bone_weights: {
                    let native = native();
                    workers.spawn("bone weights", move || {
                        let mut weights = vec![BoneWeight::default(); vertex_count];
                        Ok(optional(native.copy_bone_weights(buffer, &mut weights))?.map(|_| weights))
                    })
                },
                static_attributes: {
                    let native = native();
                    workers.spawn("static attributes", move || {
                        let Some(meta) = optional(native.static_attributes_meta(id))? else {
                            return Ok(None);
                        };
                        let attributes = native.copy_static_attributes(id)?;
                        ensure!(
                            meta.vertex_count as usize == vertex_count,
                            "Static attributes cover {} of {} vertices",
                            meta.vertex_count,
                            vertex_count
                        );
                        Ok(Some(attributes))
                    })
                },
            });

        let morph_targets = descriptor
            .morph_target_buffer
            .filter(|_| plan.needs_morph_data())
            .map(|buffer| {
                let native = native();
                let vertex_count = counts.vertex_count;
                workers.spawn("morph targets", move || Ok(native.copy_morph_targets(buffer, vertex_count)?))
            });

        let compact_indices = plan.compute_skinned.then(|| {
            let native = native();
            workers.spawn("compact skinning indices", move || {
                Ok(native.mesh_to_compact_skinning_indices(id)?)
            })
        });

        Self {
            vertex_count: counts.vertex_count,
            consumers: plan.consumers(),
            triangles,
            topology,
            vertices,
            morph_targets,
            compact_indices,
        }
    }

    fn tasks_mut(&mut self) -> Vec<&mut dyn PollableTask> {
        let mut tasks: Vec<&mut dyn PollableTask> = Vec::with_capacity(9);
        tasks.push(&mut self.triangles);
        tasks.push(&mut self.topology);
        if let Some(vertices) = self.vertices.as_mut() {
            tasks.push(&mut vertices.positions);
            tasks.push(&mut vertices.normals);
            tasks.push(&mut vertices.tangents);
            tasks.push(&mut vertices.bone_weights);
            tasks.push(&mut vertices.static_attributes);
        }
        if let Some(task) = self.morph_targets.as_mut() {
            tasks.push(task);
        }
        if let Some(task) = self.compact_indices.as_mut() {
            tasks.push(task);
        }
        tasks
    }

    /// `None` while anything is still copying, `Some(false)` once any copy faulted.
    pub(crate) fn poll(&mut self) -> Option<bool> {
        poll_all(self.tasks_mut())
    }

    /// The tasks that are still running, for draining after a cancellation.
    pub(crate) fn into_outstanding(self) -> Vec<Box<dyn PollableTask + Send>> {
        let mut tasks: Vec<Box<dyn PollableTask + Send>> = Vec::with_capacity(9);
        tasks.push(Box::new(self.triangles));
        tasks.push(Box::new(self.topology));
        if let Some(vertices) = self.vertices {
            tasks.push(Box::new(vertices.positions));
            tasks.push(Box::new(vertices.normals));
            tasks.push(Box::new(vertices.tangents));
            tasks.push(Box::new(vertices.bone_weights));
            tasks.push(Box::new(vertices.static_attributes));
        }
        if let Some(task) = self.morph_targets {
            tasks.push(Box::new(task));
        }
        if let Some(task) = self.compact_indices {
            tasks.push(Box::new(task));
        }

        tasks.retain_mut(|task| !task.poll_finished());
        tasks
    }

    /// Collects every finished copy into one [`MeshInfo`].
    pub(crate) fn into_mesh_info(mut self) -> anyhow::Result<MeshInfo> {
        let mut mesh = MeshInfo::new(self.vertex_count, self.consumers);

        mesh.triangles = self.triangles.take_result()?;
        ensure!(
            mesh.triangles.iter().all(|&index| index < self.vertex_count),
            "The triangles reference vertices beyond the {} available",
            self.vertex_count
        );
        (mesh.submeshes, mesh.bind_poses) = self.topology.take_result()?;

        if let Some(mut vertices) = self.vertices {
            mesh.positions = vertices.positions.take_result()?;
            mesh.normals = vertices.normals.take_result()?;
            mesh.tangents = vertices.tangents.take_result()?;
            mesh.bone_weights = vertices.bone_weights.take_result()?;
            mesh.static_attributes = vertices.static_attributes.take_result()?;
        }
        if let Some(task) = self.morph_targets.as_mut() {
            mesh.morph_targets = task.take_result()?;
        }
        if let Some(task) = self.compact_indices.as_mut() {
            mesh.compact_indices = Some(task.take_result()?);
        }

        Ok(mesh)
    }
}
