use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::ids::{AssetId, CompactSkinningDataId};
use crate::types::{
    BoneWeight, LodFlags, ManifestationFlags, MaterialExtension, MaterialTextureBinding, MorphTargetData,
    PrimitiveMaterial, StaticAttributes, SubMeshDescriptor, SubMeshInclusionFlags, TextureFormat, TextureSlot,
    ViewFlags,
};
use crate::ResultCode;

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// Mock assets get their ids up front, so material bindings can reference images before anything is registered.
pub fn next_asset_id() -> AssetId {
    AssetId(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed))
}

/// Per-call failure injection. `None` means the call behaves.
#[derive(Debug, Clone, Default)]
pub struct MockFailures {
    pub vertex_count: Option<ResultCode>,
    pub morph_target_count: Option<ResultCode>,
    pub triangles: Option<ResultCode>,
    pub positions: Option<ResultCode>,
    pub static_attributes: Option<ResultCode>,
    pub compact_indices: Option<ResultCode>,
}

#[derive(Debug, Clone)]
pub struct MockPrimitive {
    pub id: AssetId,
    pub name: String,
    pub has_vertex_buffer: bool,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Option<Vec<Vec4>>,
    pub bone_weights: Vec<BoneWeight>,
    pub triangles: Vec<u32>,
    pub submeshes: Vec<SubMeshDescriptor>,
    pub morph_targets: Vec<MorphTargetData>,
    pub static_attributes: StaticAttributes,
    pub material: PrimitiveMaterial,
    pub joints: Vec<u32>,
    pub bind_poses: Vec<Mat4>,
    pub compact_skinning: Option<CompactSkinningDataId>,
    pub lod_flags: LodFlags,
    pub manifestation_flags: ManifestationFlags,
    pub view_flags: ViewFlags,
    pub failures: MockFailures,
}

impl MockPrimitive {
    /// A triangle strip of `vertex_count` vertices, skinned to two joints, as a single body sub-mesh.
    pub fn strip(name: &str, vertex_count: u32) -> Self {
        let positions = (0..vertex_count)
            .map(|i| Vec3::new(i as f32 * 0.01, (i % 2) as f32 * 0.01, 0.0))
            .collect::<Vec<_>>();
        let triangles = (0..vertex_count.saturating_sub(2))
            .flat_map(|i| {
                if i % 2 == 0 {
                    [i, i + 1, i + 2]
                } else {
                    [i + 1, i, i + 2]
                }
            })
            .collect::<Vec<_>>();
        let index_count = triangles.len() as u32;

        Self {
            id: next_asset_id(),
            name: name.to_string(),
            has_vertex_buffer: true,
            normals: vec![Vec3::Z; vertex_count as usize],
            tangents: Some(vec![Vec4::new(1.0, 0.0, 0.0, 1.0); vertex_count as usize]),
            bone_weights: vec![
                BoneWeight {
                    indices: [0, 1, 0, 0],
                    weights: Vec4::new(0.75, 0.25, 0.0, 0.0),
                };
                vertex_count as usize
            ],
            static_attributes: StaticAttributes {
                colors: vec![[255, 255, 255, 255]; vertex_count as usize],
                texcoord0: positions.iter().map(|p| Vec2::new(p.x, p.y)).collect(),
                texcoord1: vec![],
            },
            positions,
            triangles,
            submeshes: vec![SubMeshDescriptor {
                index_start: 0,
                index_count,
                vertex_start: 0,
                vertex_count,
                inclusion: SubMeshInclusionFlags::BODY,
            }],
            morph_targets: vec![],
            material: PrimitiveMaterial::default(),
            joints: vec![0, 1],
            bind_poses: vec![Mat4::IDENTITY, Mat4::from_translation(Vec3::Y)],
            compact_skinning: None,
            lod_flags: LodFlags::LOD_0,
            manifestation_flags: ManifestationFlags::FULL,
            view_flags: ViewFlags::FIRST_PERSON | ViewFlags::THIRD_PERSON,
            failures: MockFailures::default(),
        }
    }

    /// `affected` vertices (from the start of the mesh) carry non-zero deltas, in every target.
    pub fn with_morph_targets(mut self, count: u32, affected: u32) -> Self {
        let vertex_count = self.positions.len();
        self.morph_targets = (0..count)
            .map(|target| {
                let delta = |i: usize| {
                    if (i as u32) < affected {
                        Vec3::new(0.0, 0.001 * (target + 1) as f32, 0.0)
                    } else {
                        Vec3::ZERO
                    }
                };
                MorphTargetData {
                    name: format!("{}_morph_{}", self.name, target),
                    position_deltas: (0..vertex_count).map(delta).collect(),
                    normal_deltas: vec![Vec3::ZERO; vertex_count],
                    tangent_deltas: vec![],
                }
            })
            .collect();
        self
    }

    pub fn with_submeshes(mut self, submeshes: Vec<SubMeshDescriptor>) -> Self {
        self.submeshes = submeshes;
        self
    }

    pub fn with_compact_skinning(mut self, id: CompactSkinningDataId) -> Self {
        self.compact_skinning = Some(id);
        self
    }

    pub fn with_texture(mut self, slot: TextureSlot, image: AssetId) -> Self {
        self.material.textures.push(MaterialTextureBinding {
            raw_slot: slot.into(),
            image,
        });
        self
    }

    pub fn with_shader(mut self, shader_name: &str) -> Self {
        self.material.shader_name = shader_name.to_string();
        self
    }

    pub fn with_extension(mut self, extension: MaterialExtension) -> Self {
        self.material.extensions.push(extension);
        self
    }

    pub fn without_tangents(mut self) -> Self {
        self.tangents = None;
        self
    }

    pub fn without_vertex_buffer(mut self) -> Self {
        self.has_vertex_buffer = false;
        self
    }

    pub fn failing(mut self, failures: MockFailures) -> Self {
        self.failures = failures;
        self
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct MockImage {
    pub id: AssetId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub raw_format: u32,
    pub data: Vec<u8>,
    pub srgb: bool,
    pub fail_copy: Option<ResultCode>,
}

impl MockImage {
    pub fn rgba(name: &str, width: u32, height: u32) -> Self {
        let data = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, 0x80, 0x40, 0xFF])
            .collect();
        Self {
            id: next_asset_id(),
            name: name.to_string(),
            width,
            height,
            raw_format: TextureFormat::Rgba32.into(),
            data,
            srgb: true,
            fail_copy: None,
        }
    }

    pub fn with_raw_format(mut self, raw_format: u32) -> Self {
        self.raw_format = raw_format;
        self
    }

    pub fn failing_copy(mut self, code: ResultCode) -> Self {
        self.fail_copy = Some(code);
        self
    }
}
