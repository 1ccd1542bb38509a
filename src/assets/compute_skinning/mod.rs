//! Compute-buffer skinning: the compact skinning dataset is uploaded once into a compute buffer that
//! every primitive referencing the same dataset shares. Each primitive only adds the mapping of the
//! vertices it renders to their slot in that shared buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::ensure;
use avatar_native::types::{CompactSkinningData, CompactSkinningMeta, IndexFormat};
use avatar_native::{AssetId, CompactSkinningDataId};
use byteorder::{LittleEndian, WriteBytesExt};
use log::trace;

use crate::assets::LoadContext;
use crate::engine::{ComputeBufferDesc, ComputeBufferHandle, RenderBackend};
use crate::slicing::{BackgroundTask, Directive, TimeSlice};

mod indices;
mod registry;


pub use indices::{CompactIndexPair, encode_index_pairs, generate_mesh_to_compact_skinning_indices};
pub use registry::{BuildOutcome, BuildTicket, SharedVertexBuffer, VertexBufferRegistry};

/// position (3), normal (3), tangent (4), weights (4) as f32 followed by 4 u32 joint indices.
pub const SHARED_VERTEX_STRIDE: u32 = 14 * 4 + 4 * 4;

pub struct PreparedVertexBuffer {
    pub vertex_count: u32,
    pub has_tangents: bool,
    pub data: Vec<u8>,
}

pub fn encode_shared_vertices(meta: &CompactSkinningMeta, data: &CompactSkinningData) -> anyhow::Result<PreparedVertexBuffer> {
    let count = meta.vertex_count as usize;
    ensure!(
        data.positions.len() == count && data.normals.len() == count && data.bone_weights.len() == count,
        "Compact skinning data {:?} doesn't match {} vertices",
        data,
        count
    );
    let has_tangents = meta.has_tangents && data.tangents.len() == count;

    let mut bytes = Vec::with_capacity(count * SHARED_VERTEX_STRIDE as usize);
    for i in 0..count {
        for value in data.positions[i].to_array() {
            bytes.write_f32::<LittleEndian>(value)?;
        }
        for value in data.normals[i].to_array() {
            bytes.write_f32::<LittleEndian>(value)?;
        }
        let tangent = if has_tangents { data.tangents[i].to_array() } else { [0.0; 4] };
        for value in tangent {
            bytes.write_f32::<LittleEndian>(value)?;
        }

        let weight = &data.bone_weights[i];
        for value in weight.weights.to_array() {
            bytes.write_f32::<LittleEndian>(value)?;
        }
        for joint in weight.indices {
            bytes.write_u32::<LittleEndian>(joint as u32)?;
        }
    }

    Ok(PreparedVertexBuffer {
        vertex_count: meta.vertex_count,
        has_tangents,
        data: bytes,
    })
}

/// Copies and encodes one compact skinning dataset in the background, then creates the shared
/// compute buffer and hands it to the registry.
pub(crate) struct ComputeBuildSlice {
    name: String,
    ctx: Arc<LoadContext>,
    id: CompactSkinningDataId,
    generation: u64,
    copied: Arc<AtomicBool>,
    task: Option<BackgroundTask<PreparedVertexBuffer>>,
}

impl ComputeBuildSlice {
    pub(crate) fn new(ctx: Arc<LoadContext>, id: CompactSkinningDataId, generation: u64, copied: Arc<AtomicBool>) -> Self {
        Self {
            name: format!("Shared vertex buffer {}", id),
            ctx,
            id,
            generation,
            copied,
            task: None,
        }
    }
}

impl TimeSlice for ComputeBuildSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        let Some(task) = self.task.as_mut() else {
            let native = self.ctx.native.clone();
            let id = self.id;
            self.task = Some(self.ctx.workers.spawn("compact skinning copy", move || {
                let meta = native.compact_skinning_meta(id)?;
                let data = native.copy_compact_skinning_data(id)?;
                encode_shared_vertices(&meta, &data)
            }));
            return Ok(Directive::Delay);
        };

        if !task.poll() {
            return Ok(Directive::Delay);
        }
        self.copied.store(true, Ordering::Release);

        let result = task.take_result().and_then(|prepared| {
            let buffer = self.ctx.backend.create_compute_buffer(ComputeBufferDesc {
                name: self.name.clone(),
                stride: SHARED_VERTEX_STRIDE,
                count: prepared.vertex_count,
                data: prepared.data,
            })?;
            trace!("{} created as {}", self.name, buffer);
            Ok(SharedVertexBuffer {
                id: self.id,
                buffer,
                vertex_count: prepared.vertex_count,
                has_tangents: prepared.has_tangents,
            })
        });

        self.ctx.vertex_buffers.complete_build(self.id, self.generation, result);
        Ok(Directive::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeSkinningStatus {
    Pending,
    Ready,
    Failed,
}

/// A primitive's compute skinning resources: its claim on the shared buffer and the buffer mapping
/// the vertices it renders from their compact slot to their output slot.
pub struct ComputeSkinnedPrimitive {
    ticket: Arc<BuildTicket>,
    index_pairs: Vec<CompactIndexPair>,
    index_format: IndexFormat,
    index_buffer: Option<ComputeBufferHandle>,
    backend: Arc<dyn RenderBackend>,
    released: AtomicBool,
}

impl ComputeSkinnedPrimitive {
    /// Uploads the index pairs, at least at the `native_format` width, and claims the shared
    /// buffer. A primitive that renders no vertex gets no index buffer.
    pub fn request(
        ctx: &Arc<LoadContext>,
        id: CompactSkinningDataId,
        primitive: AssetId,
        native_format: IndexFormat,
        index_pairs: Vec<CompactIndexPair>,
    ) -> anyhow::Result<Self> {
        let (index_format, data) = encode_index_pairs(&index_pairs, native_format);
        let index_buffer = if index_pairs.is_empty() {
            None
        } else {
            Some(ctx.backend.create_compute_buffer(ComputeBufferDesc {
                name: format!("Compact skinning indices {}", primitive),
                stride: 2 * index_format.byte_width() as u32,
                count: index_pairs.len() as u32,
                data,
            })?)
        };

        Ok(Self {
            ticket: ctx.vertex_buffers.request(ctx, id, primitive),
            index_pairs,
            index_format,
            index_buffer,
            backend: ctx.backend.clone(),
            released: AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> ComputeSkinningStatus {
        match self.ticket.outcome() {
            None => ComputeSkinningStatus::Pending,
            Some(BuildOutcome::Ready(_)) => ComputeSkinningStatus::Ready,
            Some(BuildOutcome::Failed) => ComputeSkinningStatus::Failed,
        }
    }

    pub fn buffer(&self) -> Option<Arc<SharedVertexBuffer>> {
        match self.ticket.outcome()? {
            BuildOutcome::Ready(buffer) => Some(buffer),
            BuildOutcome::Failed => None,
        }
    }

    pub fn index_pairs(&self) -> &[CompactIndexPair] {
        &self.index_pairs
    }

    pub fn index_format(&self) -> IndexFormat {
        self.index_format
    }

    pub fn index_buffer(&self) -> Option<ComputeBufferHandle> {
        self.index_buffer
    }

    pub fn ticket(&self) -> &Arc<BuildTicket> {
        &self.ticket
    }

    /// Idempotent.
    pub fn release(&self, registry: &VertexBufferRegistry) {
        registry.release(&self.ticket);
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(buffer) = self.index_buffer {
            self.backend.destroy_compute_buffer(buffer);
        }
    }
}
