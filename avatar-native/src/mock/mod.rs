//! An in-memory stand-in for the native avatar runtime. Used by the demo binary and the tests:
//! it serves synthetic resources, injects failures on request, can hold copies mid-flight and
//! counts the lifecycle calls the loaders make.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use glam::{Vec3, Vec4};
use log::{trace, warn};

use crate::ids::{AssetId, CompactSkinningDataId, MorphTargetBufferId, ResourceId, VertexBufferId};
use crate::runtime::AvatarNative;
use crate::types::{
    BindPose, BoneWeight, CompactSkinningData, CompactSkinningMeta, ImageDescriptor, IndexFormat,
    MeshToCompactIndices, MorphTargetData, PrimitiveDescriptor, PrimitiveMaterial, StaticAttributes,
    StaticAttributesMeta, SubMeshDescriptor,
};
use crate::{check_destination, NativeError, NativeResult, ResultCode};

mod builder;
mod gate;

pub use builder::{next_asset_id, MockFailures, MockImage, MockPrimitive};
pub use gate::CopyGate;

/// A per-primitive query, in the order the runtime received them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockCall {
    pub query: &'static str,
    pub primitive: AssetId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounters {
    pub release_calls: u32,
    pub ready_calls: u32,
}

struct MockResource {
    primitives: Vec<MockPrimitive>,
    images: Vec<MockImage>,
    released: bool,
    enumeration_failure: Option<ResultCode>,
    counters: MockCounters,
}

struct CompactDataset {
    data: CompactSkinningData,
    /// Offset of every contributing primitive's first vertex inside the dataset.
    offsets: HashMap<AssetId, u32>,
}

#[derive(Default)]
struct MockState {
    resources: HashMap<ResourceId, MockResource>,
    primitives: HashMap<AssetId, (ResourceId, usize)>,
    images: HashMap<AssetId, (ResourceId, usize)>,
    compact: HashMap<CompactSkinningDataId, CompactDataset>,
}

impl MockState {
    fn primitive(&self, id: AssetId) -> NativeResult<&MockPrimitive> {
        let (resource_id, index) = self
            .primitives
            .get(&id)
            .ok_or(NativeError::Failed { code: ResultCode::NotFound })?;
        let resource = self.live_resource(*resource_id)?;
        Ok(&resource.primitives[*index])
    }

    fn image(&self, id: AssetId) -> NativeResult<&MockImage> {
        let (resource_id, index) = self
            .images
            .get(&id)
            .ok_or(NativeError::Failed { code: ResultCode::NotFound })?;
        let resource = self.live_resource(*resource_id)?;
        Ok(&resource.images[*index])
    }

    fn live_resource(&self, id: ResourceId) -> NativeResult<&MockResource> {
        match self.resources.get(&id) {
            Some(resource) if !resource.released => Ok(resource),
            Some(_) => {
                warn!("Access to {} after it has been released", id);
                Err(NativeError::Failed { code: ResultCode::NotFound })
            }
            None => Err(NativeError::Failed { code: ResultCode::NotFound }),
        }
    }
}

fn fail_with(injected: Option<ResultCode>) -> NativeResult<()> {
    match injected {
        Some(code) => code.into_result(),
        None => Ok(()),
    }
}

pub struct MockNative {
    state: RwLock<MockState>,
    gate: CopyGate,
    calls: Mutex<Vec<MockCall>>,
}

impl MockNative {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            gate: CopyGate::new(),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn add_resource(&self, resource: ResourceId, primitives: Vec<MockPrimitive>, images: Vec<MockImage>) {
        let mut state = self.state.write().expect("Mock State Write Lock");

        for (index, primitive) in primitives.iter().enumerate() {
            state.primitives.insert(primitive.id, (resource, index));

            if let Some(compact_id) = primitive.compact_skinning {
                let dataset = state.compact.entry(compact_id).or_insert_with(|| CompactDataset {
                    data: CompactSkinningData::default(),
                    offsets: HashMap::new(),
                });

                if !dataset.offsets.contains_key(&primitive.id) {
                    let offset = dataset.data.positions.len() as u32;
                    dataset.offsets.insert(primitive.id, offset);
                    dataset.data.positions.extend_from_slice(&primitive.positions);
                    dataset.data.normals.extend_from_slice(&primitive.normals);
                    if let Some(tangents) = &primitive.tangents {
                        dataset.data.tangents.extend_from_slice(tangents);
                    }
                    dataset.data.bone_weights.extend_from_slice(&primitive.bone_weights);
                }
            }
        }

        for (index, image) in images.iter().enumerate() {
            state.images.insert(image.id, (resource, index));
        }

        trace!(
            "Mock resource {} with {} primitives and {} images",
            resource,
            primitives.len(),
            images.len()
        );
        state.resources.insert(
            resource,
            MockResource {
                primitives,
                images,
                released: false,
                enumeration_failure: None,
                counters: MockCounters::default(),
            },
        );
    }

    pub fn fail_primitive_enumeration(&self, resource: ResourceId, code: ResultCode) {
        let mut state = self.state.write().expect("Mock State Write Lock");
        if let Some(resource) = state.resources.get_mut(&resource) {
            resource.enumeration_failure = Some(code);
        }
    }

    pub fn counters(&self, resource: ResourceId) -> MockCounters {
        self.state
            .read()
            .expect("Mock State Read Lock")
            .resources
            .get(&resource)
            .map(|resource| resource.counters)
            .unwrap_or_default()
    }

    pub fn is_released(&self, resource: ResourceId) -> bool {
        self.state
            .read()
            .expect("Mock State Read Lock")
            .resources
            .get(&resource)
            .is_some_and(|resource| resource.released)
    }

    pub fn close_copy_gate(&self) {
        self.gate.close();
    }

    pub fn open_copy_gate(&self) {
        self.gate.open();
    }

    /// Number of copies currently held by the closed gate.
    pub fn blocked_copies(&self) -> usize {
        self.gate.waiting()
    }

    /// The vertex count, index count and material queries issued so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().expect("Mock Calls Lock").clone()
    }

    fn record(&self, query: &'static str, primitive: AssetId) {
        self.calls.lock().expect("Mock Calls Lock").push(MockCall { query, primitive });
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, MockState> {
        self.state.read().expect("Mock State Read Lock")
    }

    fn vertex_primitive(&self, buffer: VertexBufferId) -> AssetId {
        AssetId(buffer.0)
    }
}

impl Default for MockNative {
    fn default() -> Self {
        Self::new()
    }
}

impl AvatarNative for MockNative {
    fn primitive_count(&self, resource: ResourceId) -> NativeResult<u32> {
        let state = self.read_state();
        let resource = state.live_resource(resource)?;
        fail_with(resource.enumeration_failure)?;
        Ok(resource.primitives.len() as u32)
    }

    fn primitive_by_index(&self, resource: ResourceId, index: u32) -> NativeResult<PrimitiveDescriptor> {
        let state = self.read_state();
        let resource = state.live_resource(resource)?;
        fail_with(resource.enumeration_failure)?;
        let primitive = resource
            .primitives
            .get(index as usize)
            .ok_or(NativeError::Failed { code: ResultCode::InvalidArgument })?;

        Ok(PrimitiveDescriptor {
            id: primitive.id,
            name: primitive.name.clone(),
            vertex_buffer: primitive.has_vertex_buffer.then_some(VertexBufferId(primitive.id.0)),
            morph_target_buffer: (!primitive.morph_targets.is_empty()).then_some(MorphTargetBufferId(primitive.id.0)),
            compact_skinning: primitive.compact_skinning,
            joints: primitive.joints.clone(),
            lod_flags: primitive.lod_flags,
            manifestation_flags: primitive.manifestation_flags,
            view_flags: primitive.view_flags,
        })
    }

    fn image_count(&self, resource: ResourceId) -> NativeResult<u32> {
        let state = self.read_state();
        Ok(state.live_resource(resource)?.images.len() as u32)
    }

    fn image_by_index(&self, resource: ResourceId, index: u32) -> NativeResult<ImageDescriptor> {
        let state = self.read_state();
        let image = state
            .live_resource(resource)?
            .images
            .get(index as usize)
            .ok_or(NativeError::Failed { code: ResultCode::InvalidArgument })?;

        Ok(ImageDescriptor {
            id: image.id,
            name: image.name.clone(),
            width: image.width,
            height: image.height,
            mip_count: 1,
            raw_format: image.raw_format,
            data_size: image.data.len(),
            srgb: image.srgb,
        })
    }

    fn copy_image_data(&self, image: AssetId, dest: &mut [u8]) -> NativeResult<()> {
        self.gate.pass();
        let state = self.read_state();
        let image = state.image(image)?;
        fail_with(image.fail_copy)?;
        check_destination(image.data.len(), dest.len())?;
        dest.copy_from_slice(&image.data);
        Ok(())
    }

    fn vertex_count(&self, buffer: VertexBufferId) -> NativeResult<u32> {
        self.record("vertex_count", self.vertex_primitive(buffer));
        let state = self.read_state();
        let primitive = state.primitive(self.vertex_primitive(buffer))?;
        fail_with(primitive.failures.vertex_count)?;
        if !primitive.has_vertex_buffer {
            return Err(NativeError::DataNotAvailable);
        }
        Ok(primitive.vertex_count())
    }

    fn morph_target_count(&self, buffer: MorphTargetBufferId) -> NativeResult<u32> {
        let state = self.read_state();
        let primitive = state.primitive(AssetId(buffer.0))?;
        fail_with(primitive.failures.morph_target_count)?;
        if primitive.morph_targets.is_empty() {
            return Err(NativeError::DataNotAvailable);
        }
        Ok(primitive.morph_targets.len() as u32)
    }

    fn index_count(&self, primitive: AssetId) -> NativeResult<u32> {
        self.record("index_count", primitive);
        let state = self.read_state();
        Ok(state.primitive(primitive)?.triangles.len() as u32)
    }

    fn copy_triangles(&self, primitive: AssetId, dest: &mut [u32]) -> NativeResult<()> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(primitive)?;
        fail_with(primitive.failures.triangles)?;
        check_destination(primitive.triangles.len(), dest.len())?;
        dest.copy_from_slice(&primitive.triangles);
        Ok(())
    }

    fn copy_positions(&self, buffer: VertexBufferId, dest: &mut [Vec3]) -> NativeResult<()> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(self.vertex_primitive(buffer))?;
        fail_with(primitive.failures.positions)?;
        check_destination(primitive.positions.len(), dest.len())?;
        dest.copy_from_slice(&primitive.positions);
        Ok(())
    }

    fn copy_normals(&self, buffer: VertexBufferId, dest: &mut [Vec3]) -> NativeResult<()> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(self.vertex_primitive(buffer))?;
        check_destination(primitive.normals.len(), dest.len())?;
        dest.copy_from_slice(&primitive.normals);
        Ok(())
    }

    fn copy_tangents(&self, buffer: VertexBufferId, dest: &mut [Vec4]) -> NativeResult<()> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(self.vertex_primitive(buffer))?;
        let tangents = primitive.tangents.as_ref().ok_or(NativeError::DataNotAvailable)?;
        check_destination(tangents.len(), dest.len())?;
        dest.copy_from_slice(tangents);
        Ok(())
    }

    fn copy_bone_weights(&self, buffer: VertexBufferId, dest: &mut [BoneWeight]) -> NativeResult<()> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(self.vertex_primitive(buffer))?;
        if primitive.bone_weights.is_empty() {
            return Err(NativeError::DataNotAvailable);
        }
        check_destination(primitive.bone_weights.len(), dest.len())?;
        dest.copy_from_slice(&primitive.bone_weights);
        Ok(())
    }

    fn copy_morph_targets(&self, buffer: MorphTargetBufferId, vertex_count: u32) -> NativeResult<Vec<MorphTargetData>> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(AssetId(buffer.0))?;
        if primitive.morph_targets.is_empty() {
            return Err(NativeError::DataNotAvailable);
        }
        check_destination(primitive.vertex_count() as usize, vertex_count as usize)?;
        Ok(primitive.morph_targets.clone())
    }

    fn static_attributes_meta(&self, primitive: AssetId) -> NativeResult<StaticAttributesMeta> {
        let state = self.read_state();
        let primitive = state.primitive(primitive)?;
        let attributes = &primitive.static_attributes;
        Ok(StaticAttributesMeta {
            vertex_count: primitive.vertex_count(),
            has_color: !attributes.colors.is_empty(),
            has_texcoord0: !attributes.texcoord0.is_empty(),
            has_texcoord1: !attributes.texcoord1.is_empty(),
        })
    }

    fn copy_static_attributes(&self, primitive: AssetId) -> NativeResult<StaticAttributes> {
        self.gate.pass();
        let state = self.read_state();
        let primitive = state.primitive(primitive)?;
        fail_with(primitive.failures.static_attributes)?;
        Ok(primitive.static_attributes.clone())
    }

    fn submeshes(&self, primitive: AssetId) -> NativeResult<Vec<SubMeshDescriptor>> {
        let state = self.read_state();
        Ok(state.primitive(primitive)?.submeshes.clone())
    }

    fn joint_bind_poses(&self, primitive: AssetId) -> NativeResult<Vec<BindPose>> {
        let state = self.read_state();
        let primitive = state.primitive(primitive)?;
        if primitive.bind_poses.is_empty() {
            return Err(NativeError::DataNotAvailable);
        }
        Ok(primitive.bind_poses.clone())
    }

    fn primitive_material(&self, primitive: AssetId) -> NativeResult<PrimitiveMaterial> {
        self.record("primitive_material", primitive);
        let state = self.read_state();
        Ok(state.primitive(primitive)?.material.clone())
    }

    fn compact_skinning_meta(&self, id: CompactSkinningDataId) -> NativeResult<CompactSkinningMeta> {
        let state = self.read_state();
        let dataset = state.compact.get(&id).ok_or(NativeError::DataNotAvailable)?;
        Ok(CompactSkinningMeta {
            vertex_count: dataset.data.positions.len() as u32,
            has_tangents: !dataset.data.tangents.is_empty()
                && dataset.data.tangents.len() == dataset.data.positions.len(),
            morph_target_count: 0,
        })
    }

    fn copy_compact_skinning_data(&self, id: CompactSkinningDataId) -> NativeResult<CompactSkinningData> {
        self.gate.pass();
        let state = self.read_state();
        let dataset = state.compact.get(&id).ok_or(NativeError::DataNotAvailable)?;
        let mut data = dataset.data.clone();
        if data.tangents.len() != data.positions.len() {
            data.tangents.clear();
        }
        Ok(data)
    }

    fn mesh_to_compact_skinning_indices(&self, primitive: AssetId) -> NativeResult<MeshToCompactIndices> {
        self.gate.pass();
        let state = self.read_state();
        let mock = state.primitive(primitive)?;
        fail_with(mock.failures.compact_indices)?;
        let compact_id = mock.compact_skinning.ok_or(NativeError::DataNotAvailable)?;
        let dataset = state.compact.get(&compact_id).ok_or(NativeError::DataNotAvailable)?;
        let offset = dataset
            .offsets
            .get(&primitive)
            .copied()
            .ok_or(NativeError::Failed { code: ResultCode::NotFound })?;

        let indices = (0..mock.vertex_count()).map(|i| i + offset).collect::<Vec<_>>();
        let format = IndexFormat::for_max_index(dataset.data.positions.len().saturating_sub(1) as u32);
        Ok(MeshToCompactIndices {
            format,
            data: format.encode(&indices),
        })
    }

    fn release_resource(&self, resource: ResourceId) -> bool {
        let mut state = self.state.write().expect("Mock State Write Lock");
        let Some(resource) = state.resources.get_mut(&resource) else {
            return false;
        };

        resource.counters.release_calls += 1;
        if resource.released {
            return false;
        }
        resource.released = true;
        true
    }

    fn resource_ready_to_render(&self, resource: ResourceId) -> bool {
        let mut state = self.state.write().expect("Mock State Write Lock");
        match state.resources.get_mut(&resource) {
            Some(resource) => {
                resource.counters.ready_calls += 1;
                true
            }
            None => false,
        }
    }
}
