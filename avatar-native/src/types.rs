use std::fmt::{Debug, Formatter};

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use glam::{Mat4, Vec2, Vec3, Vec4};
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

use crate::ids::{AssetId, CompactSkinningDataId, MorphTargetBufferId, VertexBufferId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LodFlags: u32 {
        const LOD_0 = 1 << 0;
        const LOD_1 = 1 << 1;
        const LOD_2 = 1 << 2;
        const LOD_3 = 1 << 3;
        const LOD_4 = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ManifestationFlags: u32 {
        const FULL = 1 << 0;
        const HALF = 1 << 1;
        const HEAD = 1 << 2;
        const HANDS = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ViewFlags: u32 {
        const FIRST_PERSON = 1 << 0;
        const THIRD_PERSON = 1 << 1;
    }
}

bitflags! {
    /// Which body regions a sub-mesh covers. A sub-mesh is excluded when it shares no bit with
    /// the inclusion filter configured for the session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SubMeshInclusionFlags: u32 {
        const BODY = 1 << 0;
        const HEAD = 1 << 1;
        const HAIR = 1 << 2;
        const EYES = 1 << 3;
        const MOUTH = 1 << 4;
        const LASHES = 1 << 5;
        const BROWS = 1 << 6;
        const CLOTHES = 1 << 7;
        const HANDS = 1 << 8;
        const ALL = u32::MAX;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveDescriptor {
    pub id: AssetId,
    pub name: String,
    pub vertex_buffer: Option<VertexBufferId>,
    pub morph_target_buffer: Option<MorphTargetBufferId>,
    pub compact_skinning: Option<CompactSkinningDataId>,
    pub joints: Vec<u32>,
    pub lod_flags: LodFlags,
    pub manifestation_flags: ManifestationFlags,
    pub view_flags: ViewFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMeshDescriptor {
    pub index_start: u32,
    pub index_count: u32,
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub inclusion: SubMeshInclusionFlags,
}

impl SubMeshDescriptor {
    pub fn index_range(&self) -> std::ops::Range<usize> {
        let start = self.index_start as usize;
        start..start + self.index_count as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoneWeight {
    pub indices: [u16; 4],
    pub weights: Vec4,
}

#[derive(Clone, PartialEq, Default)]
pub struct MorphTargetData {
    pub name: String,
    pub position_deltas: Vec<Vec3>,
    pub normal_deltas: Vec<Vec3>,
    /// Empty when the morph target carries no tangent deltas.
    pub tangent_deltas: Vec<Vec3>,
}

impl Debug for MorphTargetData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ name: {:?}, ", self.name)?;
        write!(f, "position_deltas: [{}], ", self.position_deltas.len())?;
        write!(f, "normal_deltas: [{}], ", self.normal_deltas.len())?;
        write!(f, "tangent_deltas: [{}] }}", self.tangent_deltas.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticAttributesMeta {
    pub vertex_count: u32,
    pub has_color: bool,
    pub has_texcoord0: bool,
    pub has_texcoord1: bool,
}

#[derive(Clone, PartialEq, Default)]
pub struct StaticAttributes {
    pub colors: Vec<[u8; 4]>,
    pub texcoord0: Vec<Vec2>,
    pub texcoord1: Vec<Vec2>,
}

impl Debug for StaticAttributes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ colors: [{}], ", self.colors.len())?;
        write!(f, "texcoord0: [{}], ", self.texcoord0.len())?;
        write!(f, "texcoord1: [{}] }}", self.texcoord1.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U8,
    U16,
    U32,
}

impl IndexFormat {
    pub fn byte_width(self) -> usize {
        match self {
            IndexFormat::U8 => 1,
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }

    /// The narrowest format able to hold `max_index`.
    pub fn for_max_index(max_index: u32) -> Self {
        if max_index <= u8::MAX as u32 {
            IndexFormat::U8
        } else if max_index <= u16::MAX as u32 {
            IndexFormat::U16
        } else {
            IndexFormat::U32
        }
    }

    /// Little-endian decoding. Trailing bytes that don't form a full index are ignored.
    pub fn decode(self, bytes: &[u8]) -> Vec<u32> {
        match self {
            IndexFormat::U8 => bytes.iter().map(|&b| b as u32).collect(),
            IndexFormat::U16 => bytes
                .chunks_exact(2)
                .map(|chunk| LittleEndian::read_u16(chunk) as u32)
                .collect(),
            IndexFormat::U32 => bytes
                .chunks_exact(4)
                .map(LittleEndian::read_u32)
                .collect(),
        }
    }

    /// Values wider than the format are truncated, callers pick the format with [`IndexFormat::for_max_index`].
    pub fn encode(self, indices: &[u32]) -> Vec<u8> {
        let mut bytes = vec![0u8; indices.len() * self.byte_width()];
        match self {
            IndexFormat::U8 => {
                for (dst, &index) in bytes.iter_mut().zip(indices) {
                    *dst = index as u8;
                }
            }
            IndexFormat::U16 => {
                for (dst, &index) in bytes.chunks_exact_mut(2).zip(indices) {
                    LittleEndian::write_u16(dst, index as u16);
                }
            }
            IndexFormat::U32 => LittleEndian::write_u32_into(indices, &mut bytes),
        }
        bytes
    }
}

/// For every vertex of a primitive's mesh, the index of that vertex inside the compact skinning dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshToCompactIndices {
    pub format: IndexFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactSkinningMeta {
    pub vertex_count: u32,
    pub has_tangents: bool,
    pub morph_target_count: u32,
}

#[derive(Clone, PartialEq, Default)]
pub struct CompactSkinningData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Empty unless [`CompactSkinningMeta::has_tangents`].
    pub tangents: Vec<Vec4>,
    pub bone_weights: Vec<BoneWeight>,
}

impl Debug for CompactSkinningData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ positions: [{}], ", self.positions.len())?;
        write!(f, "normals: [{}], ", self.normals.len())?;
        write!(f, "tangents: [{}], ", self.tangents.len())?;
        write!(f, "bone_weights: [{}] }}", self.bone_weights.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum TextureFormat {
    Invalid = 0,
    Rgba32 = 1,
    Rgb24 = 2,
    R8 = 3,
    Dxt1 = 10,
    Dxt5 = 11,
    Bc7 = 12,
    Astc4x4 = 20,
    Astc6x6 = 21,
    Etc2Rgba = 22,
    Pvrtc4 = 30,
}

impl TextureFormat {
    pub fn is_compressed(self) -> bool {
        !matches!(
            self,
            TextureFormat::Invalid | TextureFormat::Rgba32 | TextureFormat::Rgb24 | TextureFormat::R8
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: AssetId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    /// Kept raw, the runtime may report formats this side doesn't know.
    pub raw_format: u32,
    pub data_size: usize,
    pub srgb: bool,
}

impl ImageDescriptor {
    pub fn format(&self) -> TextureFormat {
        TextureFormat::try_from(self.raw_format).unwrap_or(TextureFormat::Invalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum TextureSlot {
    BaseColor = 0,
    Normal = 1,
    Emissive = 2,
    Occlusion = 3,
    MetallicRoughness = 4,
    /// Only referenced by material extensions.
    Extension = 5,
    #[num_enum(catch_all)]
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialTextureBinding {
    pub raw_slot: u32,
    pub image: AssetId,
}

impl MaterialTextureBinding {
    pub fn slot(&self) -> TextureSlot {
        TextureSlot::from(self.raw_slot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionValue {
    Float(f32),
    Vector(Vec4),
    Texture(AssetId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialExtensionEntry {
    pub name: String,
    pub value: ExtensionValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialExtension {
    pub name: String,
    pub entries: Vec<MaterialExtensionEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveMaterial {
    pub shader_name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub textures: Vec<MaterialTextureBinding>,
    pub extensions: Vec<MaterialExtension>,
}

impl Default for PrimitiveMaterial {
    fn default() -> Self {
        Self {
            shader_name: "default".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 1.0,
            textures: vec![],
            extensions: vec![],
        }
    }
}

pub type BindPose = Mat4;
