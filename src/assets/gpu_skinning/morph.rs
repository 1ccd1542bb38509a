use std::sync::Arc;

use avatar_native::types::MorphTargetData;
use glam::{Vec3, Vec4};
use log::{debug, trace};

use crate::assets::gpu_skinning::GpuSkinnedPrimitive;
use crate::assets::gpu_skinning::texture_array::block_extent;
use crate::slicing::{BackgroundTask, Directive, TimeSlice};

/// Texels per affected vertex and morph target: position delta, normal delta.
pub const MORPH_TEXELS_PER_VERTEX: u32 = 2;

/// Which mesh vertices are moved by any morph target, and their compacted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphRemap {
    /// Per mesh vertex, its index among the affected vertices or `-1`.
    pub mesh_to_affected: Vec<i32>,
    pub affected: Vec<u32>,
}

fn is_affected(target: &MorphTargetData, vertex: usize) -> bool {
    let moved = |deltas: &[Vec3]| deltas.get(vertex).is_some_and(|delta| *delta != Vec3::ZERO);
    moved(&target.position_deltas) || moved(&target.normal_deltas) || moved(&target.tangent_deltas)
}

pub fn remap_affected_vertices(targets: &[MorphTargetData], vertex_count: u32) -> MorphRemap {
    profiling::scope!("remap_affected_vertices");
    let mut mesh_to_affected = vec![-1; vertex_count as usize];
    let mut affected = vec![];

    for vertex in 0..vertex_count as usize {
        if targets.iter().any(|target| is_affected(target, vertex)) {
            mesh_to_affected[vertex] = affected.len() as i32;
            affected.push(vertex as u32);
        }
    }

    MorphRemap {
        mesh_to_affected,
        affected,
    }
}

/// Target major: all affected vertices of the first target, then of the second one, ...
pub fn encode_morph_deltas(targets: &[MorphTargetData], remap: &MorphRemap) -> Vec<Vec4> {
    profiling::scope!("encode_morph_deltas");
    let mut texels = Vec::with_capacity(targets.len() * remap.affected.len() * MORPH_TEXELS_PER_VERTEX as usize);
    for target in targets {
        for &vertex in &remap.affected {
            let vertex = vertex as usize;
            let position = target.position_deltas.get(vertex).copied().unwrap_or(Vec3::ZERO);
            let normal = target.normal_deltas.get(vertex).copied().unwrap_or(Vec3::ZERO);
            texels.push(position.extend(0.0));
            texels.push(normal.extend(0.0));
        }
    }
    texels
}

enum MorphStage {
    Start,
    AwaitRemap(BackgroundTask<MorphRemap>),
    AwaitEncode(MorphRemap, BackgroundTask<Vec<Vec4>>),
    Done,
}

/// Builds the morph source texture of one primitive. Both encode passes run on a worker, the
/// atlas block is allocated and written on the scheduling thread.
pub(super) struct MorphSlice {
    name: String,
    primitive: Arc<GpuSkinnedPrimitive>,
    targets: Arc<Vec<MorphTargetData>>,
    vertex_count: u32,
    stage: MorphStage,
}

impl MorphSlice {
    pub(super) fn new(primitive: Arc<GpuSkinnedPrimitive>, targets: Vec<MorphTargetData>, vertex_count: u32) -> Self {
        Self {
            name: format!("Morph texture {}", primitive.name()),
            primitive,
            targets: Arc::new(targets),
            vertex_count,
            stage: MorphStage::Start,
        }
    }
}

impl TimeSlice for MorphSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        match std::mem::replace(&mut self.stage, MorphStage::Done) {
            MorphStage::Start => {
                let targets = self.targets.clone();
                let vertex_count = self.vertex_count;
                let task = self
                    .primitive
                    .ctx
                    .workers
                    .spawn("morph remap", move || Ok(remap_affected_vertices(&targets, vertex_count)));
                self.stage = MorphStage::AwaitRemap(task);
                Ok(Directive::Delay)
            }
            MorphStage::AwaitRemap(mut task) => {
                if !task.poll() {
                    self.stage = MorphStage::AwaitRemap(task);
                    return Ok(Directive::Delay);
                }

                let remap = task.take_result()?;
                if remap.affected.is_empty() {
                    debug!("{}: no vertex is affected by any morph target", self.name);
                    self.primitive.finish_morph(None, remap);
                    return Ok(Directive::Complete);
                }

                let targets = self.targets.clone();
                let for_task = remap.clone();
                let task = self
                    .primitive
                    .ctx
                    .workers
                    .spawn("morph encode", move || Ok(encode_morph_deltas(&targets, &for_task)));
                self.stage = MorphStage::AwaitEncode(remap, task);
                Ok(Directive::Delay)
            }
            MorphStage::AwaitEncode(remap, mut task) => {
                if !task.poll() {
                    self.stage = MorphStage::AwaitEncode(remap, task);
                    return Ok(Directive::Delay);
                }

                let texels = task.take_result()?;
                let atlas = &self.primitive.ctx.atlases.morph_source;
                let (width, height) = block_extent(texels.len() as u32, atlas.size());
                let block = atlas.allocate(width, height)?;
                if let Err(err) = atlas.write(&block, &texels) {
                    atlas.release(block);
                    return Err(err);
                }

                trace!(
                    "{}: {} affected vertices in {:?}",
                    self.name,
                    remap.affected.len(),
                    block
                );
                self.primitive.finish_morph(Some(block), remap);
                Ok(Directive::Complete)
            }
            MorphStage::Done => Ok(Directive::Complete),
        }
    }
}
