//! The engine side of the pipeline: everything that allocates GPU objects. Loaders only ever talk
//! to a [`RenderBackend`] from the scheduling thread; background tasks prepare CPU buffers only.

use std::fmt::{Debug, Display, Formatter};

use avatar_native::types::TextureFormat;
use glam::{Mat4, Vec4};

mod headless;

pub use headless::{HeadlessBackend, HeadlessMaterial, HeadlessTexture, HeadlessTextureArray};

macro_rules! engine_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

engine_handle!(MeshHandle);
engine_handle!(TextureHandle);
engine_handle!(TextureArrayHandle);
engine_handle!(MaterialHandle);
engine_handle!(ComputeBufferHandle);

/// Declaration order is the attribute order the engine requires inside one vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexAttribute {
    Position,
    Normal,
    Tangent,
    Color,
    TexCoord0,
    TexCoord1,
    BlendWeight,
    BlendIndices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexAttributeFormat {
    Float32,
    UNorm8,
    UInt16,
}

impl VertexAttributeFormat {
    pub fn byte_size(self) -> usize {
        match self {
            VertexAttributeFormat::Float32 => 4,
            VertexAttributeFormat::UNorm8 => 1,
            VertexAttributeFormat::UInt16 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttributeDescriptor {
    pub attribute: VertexAttribute,
    pub format: VertexAttributeFormat,
    pub dimension: u8,
    pub stream: u8,
}

impl VertexAttributeDescriptor {
    pub fn byte_size(&self) -> usize {
        self.format.byte_size() * self.dimension as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMeshRange {
    pub index_start: u32,
    pub index_count: u32,
    pub vertex_start: u32,
    pub vertex_count: u32,
}

#[derive(Clone, PartialEq)]
pub struct MeshUpload {
    pub name: String,
    pub vertex_count: u32,
    pub layout: Vec<VertexAttributeDescriptor>,
    /// Interleaved, little-endian vertex data per stream.
    pub streams: Vec<Vec<u8>>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubMeshRange>,
    pub bind_poses: Vec<Mat4>,
}

impl Debug for MeshUpload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ name: {:?}, vertex_count: {}, ", self.name, self.vertex_count)?;
        write!(f, "layout: {:?}, ", self.layout)?;
        write!(f, "streams: {:?}, ", self.streams.iter().map(Vec::len).collect::<Vec<_>>())?;
        write!(f, "indices: [{}], submeshes: {:?} }}", self.indices.len(), self.submeshes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Point,
    Bilinear,
    Trilinear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub format: TextureFormat,
    pub srgb: bool,
    pub filter: FilterMode,
    pub anisotropy: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureArrayDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub slices: u32,
    /// Every atlas stores four 32-bit float channels per texel.
    pub bytes_per_texel: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TextureBlockWrite {
    pub slice: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Debug for TextureBlockWrite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ slice: {}, rect: ({}, {}, {}x{}), data: [{}] }}",
            self.slice,
            self.x,
            self.y,
            self.width,
            self.height,
            self.data.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConfig {
    pub shader: String,
    pub keywords: Vec<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ComputeBufferDesc {
    pub name: String,
    pub stride: u32,
    pub count: u32,
    pub data: Vec<u8>,
}

impl Debug for ComputeBufferDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ name: {:?}, stride: {}, count: {}, data: [{}] }}",
            self.name,
            self.stride,
            self.count,
            self.data.len()
        )
    }
}

/// GPU object construction. All calls happen on the scheduling thread.
pub trait RenderBackend: Send + Sync {
    fn create_mesh(&self, upload: MeshUpload) -> anyhow::Result<MeshHandle>;
    fn destroy_mesh(&self, mesh: MeshHandle);

    fn create_texture(&self, desc: &TextureDesc) -> anyhow::Result<TextureHandle>;
    /// Uploads the texel data and makes the texture usable ("apply").
    fn upload_texture(&self, texture: TextureHandle, data: &[u8]) -> anyhow::Result<()>;
    fn destroy_texture(&self, texture: TextureHandle);

    fn create_texture_array(&self, desc: &TextureArrayDesc) -> anyhow::Result<TextureArrayHandle>;
    /// Grows the array, existing slices keep their content.
    fn resize_texture_array(&self, array: TextureArrayHandle, slices: u32) -> anyhow::Result<()>;
    fn write_texture_array(&self, array: TextureArrayHandle, block: &TextureBlockWrite) -> anyhow::Result<()>;
    fn destroy_texture_array(&self, array: TextureArrayHandle);

    fn create_material(&self, shader: &ShaderConfig) -> anyhow::Result<MaterialHandle>;
    fn set_material_texture(&self, material: MaterialHandle, property: &str, texture: TextureHandle)
    -> anyhow::Result<()>;
    fn set_material_keyword(&self, material: MaterialHandle, keyword: &str, enabled: bool);
    fn set_material_float(&self, material: MaterialHandle, property: &str, value: f32) -> anyhow::Result<()>;
    fn set_material_vector(&self, material: MaterialHandle, property: &str, value: Vec4) -> anyhow::Result<()>;
    fn destroy_material(&self, material: MaterialHandle);

    fn create_compute_buffer(&self, desc: ComputeBufferDesc) -> anyhow::Result<ComputeBufferHandle>;
    fn destroy_compute_buffer(&self, buffer: ComputeBufferHandle);
}
