use std::sync::{Arc, Mutex};

use anyhow::ensure;
use byteorder::{LittleEndian, WriteBytesExt};
use glam::Vec4;
use log::{error, trace};

use crate::engine::{RenderBackend, TextureArrayDesc, TextureArrayHandle, TextureBlockWrite};

/// RGBA, 32 bit float per channel.
pub const BYTES_PER_TEXEL: u32 = 16;

/// A rectangle inside one slice of an [`ExpandableTextureArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasBlock {
    pub slice: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AtlasBlock {
    pub fn texel_count(&self) -> u32 {
        self.width * self.height
    }
}

/// The smallest `width x height` rectangle of at most `size` columns holding `texels` texels.
pub fn block_extent(texels: u32, size: u32) -> (u32, u32) {
    let width = texels.clamp(1, size);
    (width, texels.div_ceil(width).max(1))
}

#[derive(Debug)]
struct Shelf {
    slice: u32,
    y: u32,
    height: u32,
    cursor: u32,
}

#[derive(Debug, Default)]
struct AtlasState {
    array: Option<TextureArrayHandle>,
    /// Next free row, per slice.
    slice_rows: Vec<u32>,
    shelves: Vec<Shelf>,
    live_blocks: u32,
}

/// A texture array of square slices that grows by a slice whenever a block doesn't fit anymore.
/// Blocks are packed onto shelves. Space is only reclaimed once every block has been released,
/// which also destroys the backend array.
pub struct ExpandableTextureArray {
    name: &'static str,
    size: u32,
    backend: Arc<dyn RenderBackend>,
    state: Mutex<AtlasState>,
}

impl ExpandableTextureArray {
    pub fn new(name: &'static str, size: u32, backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            name,
            size,
            backend,
            state: Mutex::new(AtlasState::default()),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn allocate(&self, width: u32, height: u32) -> anyhow::Result<AtlasBlock> {
        ensure!(
            width > 0 && height > 0 && width <= self.size && height <= self.size,
            "A {}x{} block doesn't fit into the {}x{} slices of {}",
            width,
            height,
            self.size,
            self.size,
            self.name
        );

        let mut state = self.state.lock().expect("Atlas State Lock");
        let block = match self.place(&mut state, width, height) {
            Some(block) => block,
            None => self.grow(&mut state, width, height)?,
        };

        state.live_blocks += 1;
        trace!("{}: allocated {:?}", self.name, block);
        Ok(block)
    }

    fn place(&self, state: &mut AtlasState, width: u32, height: u32) -> Option<AtlasBlock> {
        if let Some(shelf) = state
            .shelves
            .iter_mut()
            .find(|shelf| shelf.height >= height && self.size - shelf.cursor >= width)
        {
            let block = AtlasBlock {
                slice: shelf.slice,
                x: shelf.cursor,
                y: shelf.y,
                width,
                height,
            };
            shelf.cursor += width;
            return Some(block);
        }

        let slice = state.slice_rows.iter().position(|&row| row + height <= self.size)?;
        let y = state.slice_rows[slice];
        state.slice_rows[slice] += height;
        state.shelves.push(Shelf {
            slice: slice as u32,
            y,
            height,
            cursor: width,
        });
        Some(AtlasBlock {
            slice: slice as u32,
            x: 0,
            y,
            width,
            height,
        })
    }

    fn grow(&self, state: &mut AtlasState, width: u32, height: u32) -> anyhow::Result<AtlasBlock> {
        let slices = state.slice_rows.len() as u32 + 1;
        match state.array {
            Some(array) => self.backend.resize_texture_array(array, slices)?,
            None => {
                state.array = Some(self.backend.create_texture_array(&TextureArrayDesc {
                    name: self.name.to_string(),
                    width: self.size,
                    height: self.size,
                    slices,
                    bytes_per_texel: BYTES_PER_TEXEL,
                })?);
            }
        }

        state.slice_rows.push(height);
        state.shelves.push(Shelf {
            slice: slices - 1,
            y: 0,
            height,
            cursor: width,
        });
        Ok(AtlasBlock {
            slice: slices - 1,
            x: 0,
            y: 0,
            width,
            height,
        })
    }

    /// Writes `texels` row by row into `block`, the remainder of the block is zeroed.
    pub fn write(&self, block: &AtlasBlock, texels: &[Vec4]) -> anyhow::Result<()> {
        ensure!(
            texels.len() <= block.texel_count() as usize,
            "{} texels don't fit into {:?}",
            texels.len(),
            block
        );

        let mut data = Vec::with_capacity((block.texel_count() * BYTES_PER_TEXEL) as usize);
        for texel in texels {
            for value in texel.to_array() {
                data.write_f32::<LittleEndian>(value)?;
            }
        }
        data.resize((block.texel_count() * BYTES_PER_TEXEL) as usize, 0);

        let array = self.state.lock().expect("Atlas State Lock").array;
        let Some(array) = array else {
            anyhow::bail!("{} has no backing texture array", self.name);
        };

        self.backend.write_texture_array(
            array,
            &TextureBlockWrite {
                slice: block.slice,
                x: block.x,
                y: block.y,
                width: block.width,
                height: block.height,
                data,
            },
        )
    }

    pub fn release(&self, block: AtlasBlock) {
        let mut state = self.state.lock().expect("Atlas State Lock");
        if state.live_blocks == 0 {
            error!("{}: releasing {:?} without any live block", self.name, block);
            return;
        }

        state.live_blocks -= 1;
        if state.live_blocks == 0 {
            if let Some(array) = state.array.take() {
                trace!("{}: last block released, destroying {}", self.name, array);
                self.backend.destroy_texture_array(array);
            }
            *state = AtlasState::default();
        }
    }

    pub fn handle(&self) -> Option<TextureArrayHandle> {
        self.state.lock().expect("Atlas State Lock").array
    }

    pub fn live_blocks(&self) -> u32 {
        self.state.lock().expect("Atlas State Lock").live_blocks
    }

    pub fn slices(&self) -> u32 {
        self.state.lock().expect("Atlas State Lock").slice_rows.len() as u32
    }
}
