use std::fmt::{Debug, Formatter};

use avatar_native::types::{
    BindPose, BoneWeight, MeshToCompactIndices, MorphTargetData, StaticAttributes, SubMeshDescriptor,
};
use bitflags::bitflags;
use glam::{Vec3, Vec4};

bitflags! {
    /// The builders that still read from a [`MeshInfo`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MeshConsumers: u8 {
        const ENGINE_MESH = 1 << 0;
        const GPU_SKINNING = 1 << 1;
        const COMPUTE_SKINNING = 1 << 2;
    }
}

/// The CPU side buffers of one primitive, as copied out of the native runtime. Every buffer is
/// freed as soon as the last consumer that reads it finished.
#[derive(Default)]
pub struct MeshInfo {
    pub vertex_count: u32,
    pub triangles: Vec<u32>,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Option<Vec<Vec4>>,
    pub bone_weights: Option<Vec<BoneWeight>>,
    pub static_attributes: Option<StaticAttributes>,
    pub morph_targets: Vec<MorphTargetData>,
    pub submeshes: Vec<SubMeshDescriptor>,
    pub bind_poses: Vec<BindPose>,
    pub compact_indices: Option<MeshToCompactIndices>,
    pending: MeshConsumers,
}

impl MeshInfo {
    pub fn new(vertex_count: u32, consumers: MeshConsumers) -> Self {
        Self {
            vertex_count,
            pending: consumers,
            ..Default::default()
        }
    }

    pub fn pending(&self) -> MeshConsumers {
        self.pending
    }

    /// `consumer` is done reading, frees what nobody needs anymore.
    pub fn finish(&mut self, consumer: MeshConsumers) {
        self.pending.remove(consumer);
        self.release_unneeded();
    }

    fn release_unneeded(&mut self) {
        let pending = self.pending;

        if !pending.intersects(MeshConsumers::ENGINE_MESH | MeshConsumers::GPU_SKINNING) {
            self.positions = vec![];
            self.normals = vec![];
            self.tangents = None;
            self.bone_weights = None;
        }

        if !pending.contains(MeshConsumers::GPU_SKINNING) {
            self.morph_targets = vec![];
        }

        if !pending.contains(MeshConsumers::ENGINE_MESH) {
            self.static_attributes = None;
            self.bind_poses = vec![];
            self.submeshes = vec![];
        }

        if !pending.intersects(MeshConsumers::ENGINE_MESH | MeshConsumers::COMPUTE_SKINNING) {
            self.triangles = vec![];
        }

        if !pending.contains(MeshConsumers::COMPUTE_SKINNING) {
            self.compact_indices = None;
        }
    }
}

impl Debug for MeshInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ vertex_count: {}, pending: {:?}, ", self.vertex_count, self.pending)?;
        write!(f, "triangles: [{}], ", self.triangles.len())?;
        write!(f, "positions: [{}], ", self.positions.len())?;
        write!(f, "normals: [{}], ", self.normals.len())?;
        write!(f, "tangents: {:?}, ", self.tangents.as_ref().map(Vec::len))?;
        write!(f, "bone_weights: {:?}, ", self.bone_weights.as_ref().map(Vec::len))?;
        write!(f, "morph_targets: [{}], ", self.morph_targets.len())?;
        write!(f, "submeshes: [{}] }}", self.submeshes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(consumers: MeshConsumers) -> MeshInfo {
        let mut info = MeshInfo::new(3, consumers);
        info.triangles = vec![0, 1, 2];
        info.positions = vec![Vec3::ONE; 3];
        info.normals = vec![Vec3::Z; 3];
        info.tangents = Some(vec![Vec4::X; 3]);
        info.bind_poses = vec![BindPose::IDENTITY];
        info
    }

    #[test]
    fn buffers_live_until_the_last_reader_finished() {
        let mut info = filled(MeshConsumers::all());

        info.finish(MeshConsumers::ENGINE_MESH);
        assert!(info.bind_poses.is_empty());
        assert_eq!(info.positions.len(), 3, "still read by the gpu skinning");
        assert_eq!(info.triangles.len(), 3, "still read by the compute skinning");

        info.finish(MeshConsumers::GPU_SKINNING);
        assert!(info.positions.is_empty());
        assert!(info.tangents.is_none());
        assert_eq!(info.triangles.len(), 3);

        info.finish(MeshConsumers::COMPUTE_SKINNING);
        assert!(info.triangles.is_empty());
        assert!(info.pending().is_empty());
    }

    #[test]
    fn finishing_an_absent_consumer_frees_its_buffers() {
        let mut info = filled(MeshConsumers::ENGINE_MESH);
        info.finish(MeshConsumers::empty());
        assert_eq!(info.positions.len(), 3);
        info.finish(MeshConsumers::ENGINE_MESH);
        assert!(info.positions.is_empty() && info.triangles.is_empty());
    }
}
