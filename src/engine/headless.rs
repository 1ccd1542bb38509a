use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use anyhow::{anyhow, bail, ensure};
use dashmap::DashMap;
use glam::Vec4;

use crate::engine::{
    ComputeBufferDesc, ComputeBufferHandle, MaterialHandle, MeshHandle, MeshUpload, RenderBackend, ShaderConfig,
    TextureArrayDesc, TextureArrayHandle, TextureBlockWrite, TextureDesc, TextureHandle,
};

#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    pub desc: TextureDesc,
    pub uploaded_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HeadlessTextureArray {
    pub desc: TextureArrayDesc,
    pub writes: Vec<TextureBlockWrite>,
    pub resizes: u32,
}

#[derive(Debug, Clone)]
pub struct HeadlessMaterial {
    pub shader: String,
    pub keywords: BTreeSet<String>,
    pub textures: HashMap<String, TextureHandle>,
    pub floats: HashMap<String, f32>,
    pub vectors: HashMap<String, Vec4>,
}

/// A backend that keeps every object in memory. Used by the demo and the tests to observe what
/// the loaders allocate and whether they give it back.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: AtomicU64,
    meshes: DashMap<MeshHandle, MeshUpload>,
    textures: DashMap<TextureHandle, HeadlessTexture>,
    texture_arrays: DashMap<TextureArrayHandle, HeadlessTextureArray>,
    materials: DashMap<MaterialHandle, HeadlessMaterial>,
    compute_buffers: DashMap<ComputeBufferHandle, ComputeBufferDesc>,
    compute_buffers_created: AtomicUsize,
    fail_meshes: AtomicBool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Makes every following `create_mesh` fail, simulating an out of memory condition.
    pub fn fail_mesh_creation(&self, fail: bool) {
        self.fail_meshes.store(fail, Ordering::Release);
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_texture_arrays(&self) -> usize {
        self.texture_arrays.len()
    }

    pub fn live_materials(&self) -> usize {
        self.materials.len()
    }

    pub fn live_compute_buffers(&self) -> usize {
        self.compute_buffers.len()
    }

    /// Total number of compute buffers ever created, including destroyed ones.
    pub fn compute_buffers_created(&self) -> usize {
        self.compute_buffers_created.load(Ordering::Acquire)
    }

    pub fn live_objects(&self) -> usize {
        self.live_meshes()
            + self.live_textures()
            + self.live_texture_arrays()
            + self.live_materials()
            + self.live_compute_buffers()
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<MeshUpload> {
        self.meshes.get(&handle).map(|mesh| mesh.value().clone())
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<HeadlessTexture> {
        self.textures.get(&handle).map(|texture| texture.value().clone())
    }

    pub fn texture_array(&self, handle: TextureArrayHandle) -> Option<HeadlessTextureArray> {
        self.texture_arrays.get(&handle).map(|array| array.value().clone())
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<HeadlessMaterial> {
        self.materials.get(&handle).map(|material| material.value().clone())
    }

    pub fn compute_buffer(&self, handle: ComputeBufferHandle) -> Option<ComputeBufferDesc> {
        self.compute_buffers.get(&handle).map(|buffer| buffer.value().clone())
    }

    fn with_material<R>(
        &self,
        material: MaterialHandle,
        f: impl FnOnce(&mut HeadlessMaterial) -> R,
    ) -> anyhow::Result<R> {
        let mut entry = self
            .materials
            .get_mut(&material)
            .ok_or_else(|| anyhow!("Unknown material {}", material))?;
        Ok(f(entry.value_mut()))
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_mesh(&self, upload: MeshUpload) -> anyhow::Result<MeshHandle> {
        if self.fail_meshes.load(Ordering::Acquire) {
            bail!("Failed to allocate mesh {}", upload.name);
        }

        let streams = upload.layout.iter().map(|attr| attr.stream).max().map_or(0, |s| s as usize + 1);
        ensure!(
            upload.streams.len() >= streams,
            "Mesh {} declares {} streams but provides {}",
            upload.name,
            streams,
            upload.streams.len()
        );

        for (stream, data) in upload.streams.iter().enumerate() {
            let stride: usize = upload
                .layout
                .iter()
                .filter(|attr| attr.stream as usize == stream)
                .map(|attr| attr.byte_size())
                .sum();
            ensure!(
                data.len() == stride * upload.vertex_count as usize,
                "Mesh {} stream {} has {} bytes, expected {}",
                upload.name,
                stream,
                data.len(),
                stride * upload.vertex_count as usize
            );
        }

        let handle = MeshHandle(self.next());
        log::trace!("Created mesh {} as {}", upload.name, handle);
        self.meshes.insert(handle, upload);
        Ok(handle)
    }

    fn destroy_mesh(&self, mesh: MeshHandle) {
        if self.meshes.remove(&mesh).is_none() {
            log::warn!("Destroying unknown mesh {}", mesh);
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> anyhow::Result<TextureHandle> {
        ensure!(desc.width > 0 && desc.height > 0, "Texture {} has no extent", desc.name);
        let handle = TextureHandle(self.next());
        self.textures.insert(
            handle,
            HeadlessTexture {
                desc: desc.clone(),
                uploaded_bytes: None,
            },
        );
        Ok(handle)
    }

    fn upload_texture(&self, texture: TextureHandle, data: &[u8]) -> anyhow::Result<()> {
        let mut entry = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| anyhow!("Unknown texture {}", texture))?;
        entry.uploaded_bytes = Some(data.len());
        Ok(())
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_none() {
            log::warn!("Destroying unknown texture {}", texture);
        }
    }

    fn create_texture_array(&self, desc: &TextureArrayDesc) -> anyhow::Result<TextureArrayHandle> {
        let handle = TextureArrayHandle(self.next());
        self.texture_arrays.insert(
            handle,
            HeadlessTextureArray {
                desc: desc.clone(),
                writes: vec![],
                resizes: 0,
            },
        );
        Ok(handle)
    }

    fn resize_texture_array(&self, array: TextureArrayHandle, slices: u32) -> anyhow::Result<()> {
        let mut entry = self
            .texture_arrays
            .get_mut(&array)
            .ok_or_else(|| anyhow!("Unknown texture array {}", array))?;
        ensure!(slices >= entry.desc.slices, "Texture arrays can only grow");
        entry.desc.slices = slices;
        entry.resizes += 1;
        Ok(())
    }

    fn write_texture_array(&self, array: TextureArrayHandle, block: &TextureBlockWrite) -> anyhow::Result<()> {
        let mut entry = self
            .texture_arrays
            .get_mut(&array)
            .ok_or_else(|| anyhow!("Unknown texture array {}", array))?;
        let desc = &entry.desc;
        ensure!(block.slice < desc.slices, "Slice {} out of bounds", block.slice);
        ensure!(
            block.x + block.width <= desc.width && block.y + block.height <= desc.height,
            "Block {:?} exceeds {}x{}",
            block,
            desc.width,
            desc.height
        );
        ensure!(
            block.data.len() == (block.width * block.height * desc.bytes_per_texel) as usize,
            "Block {:?} has the wrong size",
            block
        );
        entry.writes.push(block.clone());
        Ok(())
    }

    fn destroy_texture_array(&self, array: TextureArrayHandle) {
        if self.texture_arrays.remove(&array).is_none() {
            log::warn!("Destroying unknown texture array {}", array);
        }
    }

    fn create_material(&self, shader: &ShaderConfig) -> anyhow::Result<MaterialHandle> {
        let handle = MaterialHandle(self.next());
        self.materials.insert(
            handle,
            HeadlessMaterial {
                shader: shader.shader.clone(),
                keywords: shader.keywords.iter().cloned().collect(),
                textures: HashMap::new(),
                floats: HashMap::new(),
                vectors: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn set_material_texture(
        &self,
        material: MaterialHandle,
        property: &str,
        texture: TextureHandle,
    ) -> anyhow::Result<()> {
        ensure!(self.textures.contains_key(&texture), "Unknown texture {}", texture);
        self.with_material(material, |mat| {
            mat.textures.insert(property.to_string(), texture);
        })
    }

    fn set_material_keyword(&self, material: MaterialHandle, keyword: &str, enabled: bool) {
        let result = self.with_material(material, |mat| {
            if enabled {
                mat.keywords.insert(keyword.to_string());
            } else {
                mat.keywords.remove(keyword);
            }
        });

        if let Err(e) = result {
            log::warn!("{}", e);
        }
    }

    fn set_material_float(&self, material: MaterialHandle, property: &str, value: f32) -> anyhow::Result<()> {
        self.with_material(material, |mat| {
            mat.floats.insert(property.to_string(), value);
        })
    }

    fn set_material_vector(&self, material: MaterialHandle, property: &str, value: Vec4) -> anyhow::Result<()> {
        self.with_material(material, |mat| {
            mat.vectors.insert(property.to_string(), value);
        })
    }

    fn destroy_material(&self, material: MaterialHandle) {
        if self.materials.remove(&material).is_none() {
            log::warn!("Destroying unknown material {}", material);
        }
    }

    fn create_compute_buffer(&self, desc: ComputeBufferDesc) -> anyhow::Result<ComputeBufferHandle> {
        ensure!(
            desc.data.len() == (desc.stride * desc.count) as usize,
            "Compute buffer {} has {} bytes, expected {}",
            desc.name,
            desc.data.len(),
            desc.stride * desc.count
        );
        let handle = ComputeBufferHandle(self.next());
        self.compute_buffers.insert(handle, desc);
        self.compute_buffers_created.fetch_add(1, Ordering::AcqRel);
        Ok(handle)
    }

    fn destroy_compute_buffer(&self, buffer: ComputeBufferHandle) {
        if self.compute_buffers.remove(&buffer).is_none() {
            log::warn!("Destroying unknown compute buffer {}", buffer);
        }
    }
}
