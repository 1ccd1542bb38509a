//! GPU-texture skinning: the neutral pose, the morph target deltas and the joint weights of a
//! primitive are stored in blocks of three session wide, expandable texture arrays.

use std::sync::{Arc, Mutex};

use avatar_native::types::{BoneWeight, MorphTargetData};
use glam::Vec4;
use log::{error, trace};

use crate::assets::LoadContext;
use crate::assets::primitive::MeshInfo;
use crate::engine::RenderBackend;
use crate::settings::AtlasSettings;
use crate::slicing::SliceHandle;

mod morph;
mod texture_array;

#[cfg(test)]
mod tests;

pub use morph::{MORPH_TEXELS_PER_VERTEX, MorphRemap, encode_morph_deltas, remap_affected_vertices};
pub use texture_array::{AtlasBlock, BYTES_PER_TEXEL, ExpandableTextureArray, block_extent};

use morph::MorphSlice;

/// Texels per vertex: position, normal, tangent.
pub const NEUTRAL_POSE_TEXELS_PER_VERTEX: u32 = 3;
/// Texels per vertex: weights, joint indices.
pub const JOINT_TEXELS_PER_VERTEX: u32 = 2;

pub struct SkinningAtlases {
    pub neutral_pose: ExpandableTextureArray,
    pub morph_source: ExpandableTextureArray,
    pub joints: ExpandableTextureArray,
}

impl SkinningAtlases {
    pub fn new(backend: Arc<dyn RenderBackend>, settings: AtlasSettings) -> Self {
        Self {
            neutral_pose: ExpandableTextureArray::new("Neutral pose atlas", settings.slice_size, backend.clone()),
            morph_source: ExpandableTextureArray::new("Morph source atlas", settings.slice_size, backend.clone()),
            joints: ExpandableTextureArray::new("Joint atlas", settings.slice_size, backend),
        }
    }

    pub fn live_blocks(&self) -> u32 {
        self.neutral_pose.live_blocks() + self.morph_source.live_blocks() + self.joints.live_blocks()
    }
}

pub fn encode_neutral_pose(mesh: &MeshInfo) -> Vec<Vec4> {
    let mut texels = Vec::with_capacity(mesh.positions.len() * NEUTRAL_POSE_TEXELS_PER_VERTEX as usize);
    for (i, position) in mesh.positions.iter().enumerate() {
        texels.push(position.extend(1.0));
        texels.push(mesh.normals.get(i).map_or(Vec4::ZERO, |normal| normal.extend(0.0)));
        texels.push(
            mesh.tangents
                .as_ref()
                .and_then(|tangents| tangents.get(i).copied())
                .unwrap_or(Vec4::ZERO),
        );
    }
    texels
}

pub fn encode_joints(weights: &[BoneWeight]) -> Vec<Vec4> {
    weights
        .iter()
        .flat_map(|weight| {
            let [a, b, c, d] = weight.indices;
            [weight.weights, Vec4::new(a as f32, b as f32, c as f32, d as f32)]
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuSkinningStatus {
    Building,
    Ready,
    Failed,
}

#[derive(Default)]
struct SkinState {
    neutral_pose: Option<AtlasBlock>,
    joints: Option<AtlasBlock>,
    morph_source: Option<AtlasBlock>,
    morph_handle: SliceHandle,
    morph_remap: Option<MorphRemap>,
    morph_done: bool,
    disposed: bool,
}

/// The GPU skinning resources of one primitive.
pub struct GpuSkinnedPrimitive {
    name: String,
    ctx: Arc<LoadContext>,
    state: Mutex<SkinState>,
}

impl GpuSkinnedPrimitive {
    /// Builds the neutral pose and joint blocks right away, the morph block (if any) in a slice.
    pub fn start(
        ctx: &Arc<LoadContext>,
        name: &str,
        mesh: &MeshInfo,
        morph_targets: Vec<MorphTargetData>,
    ) -> anyhow::Result<Arc<Self>> {
        let primitive = Arc::new(Self {
            name: name.to_string(),
            ctx: ctx.clone(),
            state: Mutex::new(SkinState::default()),
        });

        if let Err(err) = primitive.build_static_blocks(mesh) {
            primitive.release_blocks();
            primitive.state.lock().expect("Gpu Skin State Lock").disposed = true;
            return Err(err);
        }

        if morph_targets.is_empty() {
            primitive.state.lock().expect("Gpu Skin State Lock").morph_done = true;
        } else {
            let handle = ctx
                .slicer
                .schedule(MorphSlice::new(primitive.clone(), morph_targets, mesh.vertex_count));
            primitive.state.lock().expect("Gpu Skin State Lock").morph_handle = handle;
        }

        Ok(primitive)
    }

    fn build_static_blocks(&self, mesh: &MeshInfo) -> anyhow::Result<()> {
        let atlases = &self.ctx.atlases;

        let texels = encode_neutral_pose(mesh);
        let (width, height) = block_extent(texels.len() as u32, atlases.neutral_pose.size());
        let block = atlases.neutral_pose.allocate(width, height)?;
        self.state.lock().expect("Gpu Skin State Lock").neutral_pose = Some(block);
        atlases.neutral_pose.write(&block, &texels)?;

        if let Some(weights) = &mesh.bone_weights {
            let texels = encode_joints(weights);
            let (width, height) = block_extent(texels.len() as u32, atlases.joints.size());
            let block = atlases.joints.allocate(width, height)?;
            self.state.lock().expect("Gpu Skin State Lock").joints = Some(block);
            atlases.joints.write(&block, &texels)?;
        }

        trace!("{}: neutral pose and joints written", self.name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> GpuSkinningStatus {
        let state = self.state.lock().expect("Gpu Skin State Lock");
        if state.morph_done {
            GpuSkinningStatus::Ready
        } else if state.morph_handle.is_running() {
            GpuSkinningStatus::Building
        } else {
            // faulted or cancelled before it delivered
            GpuSkinningStatus::Failed
        }
    }

    pub fn neutral_pose(&self) -> Option<AtlasBlock> {
        self.state.lock().expect("Gpu Skin State Lock").neutral_pose
    }

    pub fn joints(&self) -> Option<AtlasBlock> {
        self.state.lock().expect("Gpu Skin State Lock").joints
    }

    pub fn morph_source(&self) -> Option<AtlasBlock> {
        self.state.lock().expect("Gpu Skin State Lock").morph_source
    }

    /// Number of vertices moved by any morph target, zero without morph data.
    pub fn affected_vertex_count(&self) -> usize {
        self.state
            .lock()
            .expect("Gpu Skin State Lock")
            .morph_remap
            .as_ref()
            .map_or(0, |remap| remap.affected.len())
    }

    fn finish_morph(&self, block: Option<AtlasBlock>, remap: MorphRemap) {
        let mut state = self.state.lock().expect("Gpu Skin State Lock");
        if state.disposed {
            drop(state);
            if let Some(block) = block {
                self.ctx.atlases.morph_source.release(block);
            }
            return;
        }

        state.morph_source = block;
        state.morph_remap = Some(remap);
        state.morph_done = true;
    }

    fn release_blocks(&self) {
        let (neutral_pose, joints, morph_source) = {
            let mut state = self.state.lock().expect("Gpu Skin State Lock");
            (state.neutral_pose.take(), state.joints.take(), state.morph_source.take())
        };

        let atlases = &self.ctx.atlases;
        if let Some(block) = neutral_pose {
            atlases.neutral_pose.release(block);
        }
        if let Some(block) = joints {
            atlases.joints.release(block);
        }
        if let Some(block) = morph_source {
            atlases.morph_source.release(block);
        }
    }

    /// Stops the morph build and releases every block. Expected while the primitive is cancelled.
    pub fn cancel(&self) {
        let handle = {
            let mut state = self.state.lock().expect("Gpu Skin State Lock");
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.morph_handle)
        };

        handle.cancel();
        self.release_blocks();
    }

    pub fn dispose(&self) {
        if self.status() == GpuSkinningStatus::Building {
            error!("{}: disposed while the morph texture is still being built", self.name);
        }
        self.cancel();
    }
}
