use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use avatar_native::{AssetId, CompactSkinningDataId};
use dashmap::DashMap;
use log::{debug, error, trace, warn};

use crate::assets::LoadContext;
use crate::assets::compute_skinning::ComputeBuildSlice;
use crate::engine::{ComputeBufferHandle, RenderBackend};
use crate::slicing::SliceHandle;

/// One compute buffer holding the compact skinning dataset, shared by every primitive using it.
#[derive(Debug)]
pub struct SharedVertexBuffer {
    pub id: CompactSkinningDataId,
    pub buffer: ComputeBufferHandle,
    pub vertex_count: u32,
    pub has_tangents: bool,
}

#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Ready(Arc<SharedVertexBuffer>),
    Failed,
}

/// One primitive's claim on a shared vertex buffer. Either resolved right away, because the buffer
/// is already alive, or once the in-flight build finishes.
#[derive(Debug)]
pub struct BuildTicket {
    pub id: CompactSkinningDataId,
    pub primitive: AssetId,
    outcome: ArcSwapOption<BuildOutcome>,
    native_copied: Arc<AtomicBool>,
    released: AtomicBool,
}

impl BuildTicket {
    fn new(id: CompactSkinningDataId, primitive: AssetId, native_copied: Arc<AtomicBool>) -> Self {
        Self {
            id,
            primitive,
            outcome: ArcSwapOption::empty(),
            native_copied,
            released: AtomicBool::new(false),
        }
    }

    pub fn outcome(&self) -> Option<BuildOutcome> {
        self.outcome.load_full().map(|outcome| (*outcome).clone())
    }

    /// Whether the build this ticket waits on stopped reading from the native runtime.
    pub fn has_copied(&self) -> bool {
        self.native_copied.load(Ordering::Acquire)
    }

    fn resolve(&self, outcome: BuildOutcome) {
        self.outcome.store(Some(Arc::new(outcome)));
    }
}

/// Registry entry of one compact skinning dataset.
#[derive(Default)]
struct VertexBufferInfo {
    buffer: Option<Arc<SharedVertexBuffer>>,
    /// The buffer is alive exactly while this is non-zero.
    retain_count: u32,
    builder: Option<SliceHandle>,
    generation: u64,
    copied: Arc<AtomicBool>,
    pending: Vec<Arc<BuildTicket>>,
}

impl VertexBufferInfo {
    fn is_prunable(&self) -> bool {
        self.buffer.is_none() && self.pending.is_empty()
    }
}

/// Deduplicates the compute skinning vertex buffers by compact skinning data id.
pub struct VertexBufferRegistry {
    backend: Arc<dyn RenderBackend>,
    entries: DashMap<CompactSkinningDataId, VertexBufferInfo>,
    next_generation: AtomicU64,
    buffers_built: AtomicUsize,
}

impl VertexBufferRegistry {
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
            next_generation: AtomicU64::new(1),
            buffers_built: AtomicUsize::new(0),
        }
    }

    /// Retains the live buffer of `id`, or joins (or starts) its build.
    pub fn request(&self, ctx: &Arc<LoadContext>, id: CompactSkinningDataId, primitive: AssetId) -> Arc<BuildTicket> {
        let mut entry = self.entries.entry(id).or_default();

        if entry.retain_count > 0 {
            if let Some(buffer) = entry.buffer.clone() {
                entry.retain_count += 1;
                trace!("{} retains the live buffer of {} ({})", primitive, id, entry.retain_count);
                let ticket = BuildTicket::new(id, primitive, Arc::new(AtomicBool::new(true)));
                ticket.resolve(BuildOutcome::Ready(buffer));
                return Arc::new(ticket);
            }
        }

        if entry.builder.as_ref().is_none_or(|builder| !builder.is_running()) {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let copied = Arc::new(AtomicBool::new(false));
            debug!("Building the shared vertex buffer of {} for {}", id, primitive);

            if let Some(stale) = entry.builder.take() {
                stale.detach();
            }
            entry.generation = generation;
            entry.copied = copied.clone();
            entry.builder = Some(ctx.slicer.schedule(ComputeBuildSlice::new(ctx.clone(), id, generation, copied)));
        } else {
            trace!("{} joins the pending build of {}", primitive, id);
        }

        let ticket = Arc::new(BuildTicket::new(id, primitive, entry.copied.clone()));
        entry.pending.push(ticket.clone());
        ticket
    }

    /// Gives up the claim of `ticket`, idempotently. The last retain destroys the buffer.
    pub fn release(&self, ticket: &BuildTicket) {
        if ticket.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(mut entry) = self.entries.get_mut(&ticket.id) else {
            if matches!(ticket.outcome(), Some(BuildOutcome::Ready(_))) {
                error!("{} releases {}, which isn't registered anymore", ticket.primitive, ticket.id);
            }
            return;
        };

        if let Some(position) = entry
            .pending
            .iter()
            .position(|pending| std::ptr::eq(pending.as_ref(), ticket))
        {
            entry.pending.remove(position);
        } else if matches!(ticket.outcome(), Some(BuildOutcome::Ready(_))) {
            if entry.retain_count == 0 {
                error!("Retain count of {} would drop below zero", ticket.id);
            } else {
                entry.retain_count -= 1;
                trace!("{} releases {} ({} left)", ticket.primitive, ticket.id, entry.retain_count);
                if entry.retain_count == 0 {
                    if let Some(buffer) = entry.buffer.take() {
                        debug!("Destroying the shared vertex buffer of {}", ticket.id);
                        self.backend.destroy_compute_buffer(buffer.buffer);
                    }
                }
            }
        }

        if entry.is_prunable() {
            // a build without anyone waiting for it finishes on its own and discards the result
            if let Some(builder) = entry.builder.take() {
                builder.detach();
            }
            drop(entry);
            self.entries.remove_if(&ticket.id, |_, info| info.is_prunable());
        }
    }

    pub(crate) fn complete_build(
        &self,
        id: CompactSkinningDataId,
        generation: u64,
        result: anyhow::Result<SharedVertexBuffer>,
    ) {
        let mut orphan = None;

        match self.entries.get_mut(&id) {
            Some(mut entry) if entry.generation == generation => {
                if let Some(builder) = entry.builder.take() {
                    builder.detach();
                }

                let pending = std::mem::take(&mut entry.pending);
                match result {
                    Ok(buffer) if pending.is_empty() => orphan = Some(buffer),
                    Ok(buffer) => {
                        self.buffers_built.fetch_add(1, Ordering::AcqRel);
                        let buffer = Arc::new(buffer);
                        entry.retain_count += pending.len() as u32;
                        entry.buffer = Some(buffer.clone());
                        for ticket in pending {
                            ticket.resolve(BuildOutcome::Ready(buffer.clone()));
                        }
                    }
                    Err(err) => {
                        error!("Building the shared vertex buffer of {} failed: {:?}", id, err);
                        for ticket in pending {
                            ticket.resolve(BuildOutcome::Failed);
                        }
                    }
                }

                let prunable = entry.is_prunable();
                drop(entry);
                if prunable {
                    self.entries.remove_if(&id, |_, info| info.is_prunable());
                }
            }
            _ => {
                if let Ok(buffer) = result {
                    orphan = Some(buffer);
                }
            }
        }

        if let Some(buffer) = orphan {
            debug!("No loader needs the shared vertex buffer of {} anymore", id);
            self.backend.destroy_compute_buffer(buffer.buffer);
        }
    }

    pub fn contains(&self, id: CompactSkinningDataId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn retain_count(&self, id: CompactSkinningDataId) -> u32 {
        self.entries.get(&id).map_or(0, |entry| entry.retain_count)
    }

    pub fn pending_count(&self, id: CompactSkinningDataId) -> usize {
        self.entries.get(&id).map_or(0, |entry| entry.pending.len())
    }

    /// Number of shared buffers that have been built and handed out so far.
    pub fn buffers_built(&self) -> usize {
        self.buffers_built.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroys whatever is still alive. Returns how many entries leaked.
    pub fn shutdown(&self) -> usize {
        let ids = self.entries.iter().map(|entry| *entry.key()).collect::<Vec<_>>();
        for id in &ids {
            if let Some((_, mut info)) = self.entries.remove(id) {
                warn!(
                    "{} still has {} retains and {} pending loads at shutdown",
                    id,
                    info.retain_count,
                    info.pending.len()
                );
                if let Some(builder) = info.builder.take() {
                    builder.detach();
                }
                if let Some(buffer) = info.buffer.take() {
                    self.backend.destroy_compute_buffer(buffer.buffer);
                }
            }
        }
        ids.len()
    }
}
