use glam::{Vec3, Vec4};

use crate::ids::{AssetId, CompactSkinningDataId, MorphTargetBufferId, ResourceId, VertexBufferId};
use crate::types::{
    BindPose, BoneWeight, CompactSkinningData, CompactSkinningMeta, ImageDescriptor, MeshToCompactIndices,
    MorphTargetData, PrimitiveDescriptor, PrimitiveMaterial, StaticAttributes, StaticAttributesMeta,
    SubMeshDescriptor,
};
use crate::NativeResult;

/// The synchronous query/copy surface of the native avatar runtime.
///
/// Every call may be issued from a worker thread. Copies write into caller owned destinations that
/// have to be sized exactly, see [`crate::check_destination`]. Once [`AvatarNative::release_resource`]
/// returned `true`, any data belonging to that resource is gone and copies fail.
pub trait AvatarNative: Send + Sync {
    fn primitive_count(&self, resource: ResourceId) -> NativeResult<u32>;
    fn primitive_by_index(&self, resource: ResourceId, index: u32) -> NativeResult<PrimitiveDescriptor>;

    fn image_count(&self, resource: ResourceId) -> NativeResult<u32>;
    fn image_by_index(&self, resource: ResourceId, index: u32) -> NativeResult<ImageDescriptor>;
    fn copy_image_data(&self, image: AssetId, dest: &mut [u8]) -> NativeResult<()>;

    fn vertex_count(&self, buffer: VertexBufferId) -> NativeResult<u32>;
    fn morph_target_count(&self, buffer: MorphTargetBufferId) -> NativeResult<u32>;
    fn index_count(&self, primitive: AssetId) -> NativeResult<u32>;

    fn copy_triangles(&self, primitive: AssetId, dest: &mut [u32]) -> NativeResult<()>;
    fn copy_positions(&self, buffer: VertexBufferId, dest: &mut [Vec3]) -> NativeResult<()>;
    fn copy_normals(&self, buffer: VertexBufferId, dest: &mut [Vec3]) -> NativeResult<()>;
    fn copy_tangents(&self, buffer: VertexBufferId, dest: &mut [Vec4]) -> NativeResult<()>;
    fn copy_bone_weights(&self, buffer: VertexBufferId, dest: &mut [BoneWeight]) -> NativeResult<()>;
    fn copy_morph_targets(&self, buffer: MorphTargetBufferId, vertex_count: u32) -> NativeResult<Vec<MorphTargetData>>;

    fn static_attributes_meta(&self, primitive: AssetId) -> NativeResult<StaticAttributesMeta>;
    fn copy_static_attributes(&self, primitive: AssetId) -> NativeResult<StaticAttributes>;

    fn submeshes(&self, primitive: AssetId) -> NativeResult<Vec<SubMeshDescriptor>>;
    fn joint_bind_poses(&self, primitive: AssetId) -> NativeResult<Vec<BindPose>>;
    fn primitive_material(&self, primitive: AssetId) -> NativeResult<PrimitiveMaterial>;

    fn compact_skinning_meta(&self, id: CompactSkinningDataId) -> NativeResult<CompactSkinningMeta>;
    fn copy_compact_skinning_data(&self, id: CompactSkinningDataId) -> NativeResult<CompactSkinningData>;
    fn mesh_to_compact_skinning_indices(&self, primitive: AssetId) -> NativeResult<MeshToCompactIndices>;

    /// Must succeed exactly once per resource.
    fn release_resource(&self, resource: ResourceId) -> bool;
    fn resource_ready_to_render(&self, resource: ResourceId) -> bool;
}
