//! Packing of intermediate tensors into one shared region.
//!
//! A single pass over the nodes in execution order: tensors whose last
//! consumer is the current node are released first, then the node's
//! outputs are allocated, then any of those outputs nobody reads are
//! released again. A node may therefore write its outputs over inputs
//! that die at it. The result is not optimal, but two tensors whose live
//! ranges intersect never share bytes.

use crate::settings::RunnerSettings;

use super::Lifetimes;

/// Byte offset of every internal tensor inside the intermediate region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntermediatePlan {
    offsets: Vec<Option<u64>>,
    size: u64,
}

impl IntermediatePlan {
    pub fn offset(&self, tensor: usize) -> Option<u64> {
        self.offsets.get(tensor).copied().flatten()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Clone, Copy, Debug)]
struct Block {
    offset: u64,
    size: u64,
    owner: Option<usize>,
}

/// First-fit allocator over a region that grows at the top.
///
/// Blocks always tile `[0, size)` exactly.
#[derive(Debug)]
struct BlockAllocator {
    blocks: Vec<Block>,
    align: u64,
}

impl BlockAllocator {
    fn new(align: u64) -> Self {
        Self { blocks: Vec::new(), align: align.max(1) }
    }

    fn size(&self) -> u64 {
        self.blocks.last().map(|b| b.offset + b.size).unwrap_or(0)
    }

    fn malloc(&mut self, owner: usize, bytes: u64) -> u64 {
        let size = bytes.div_ceil(self.align) * self.align;

        if size == 0 {
            return 0;
        }

        if let Some(pos) = self.blocks.iter().position(|b| b.owner.is_none() && b.size >= size) {
            let block = self.blocks[pos];

            if block.size > size {
                let rest = Block { offset: block.offset + size, size: block.size - size, owner: None };
                self.blocks.insert(pos + 1, rest);
            }

            self.blocks[pos] = Block { offset: block.offset, size, owner: Some(owner) };
            return block.offset;
        }

        let top = self.size();

        match self.blocks.last_mut() {
            Some(last) if last.owner.is_none() => {
                last.size = size;
                last.owner = Some(owner);
                last.offset
            }
            _ => {
                self.blocks.push(Block { offset: top, size, owner: Some(owner) });
                top
            }
        }
    }

    fn free(&mut self, owner: usize) {
        let Some(mut pos) = self.blocks.iter().position(|b| b.owner == Some(owner)) else { return };

        self.blocks[pos].owner = None;

        if pos + 1 < self.blocks.len() && self.blocks[pos + 1].owner.is_none() {
            let next = self.blocks.remove(pos + 1);
            self.blocks[pos].size += next.size;
        }

        if pos > 0 && self.blocks[pos - 1].owner.is_none() {
            let this = self.blocks.remove(pos);
            pos -= 1;
            self.blocks[pos].size += this.size;
        }
    }
}

/// Assigns an offset to every produced internal tensor, `sizes[i]` being
/// the byte size of internal tensor `i`.
pub fn solve(lifetimes: &Lifetimes, sizes: &[u64], settings: &RunnerSettings) -> IntermediatePlan {
    let mut offsets = vec![None; lifetimes.num_internals()];
    let mut allocator = BlockAllocator::new(settings.intermediate_alignment);

    for node in 0..lifetimes.num_nodes() {
        if settings.reuse_intermediates {
            for &tensor in lifetimes.dying_after(node) {
                allocator.free(tensor);
            }
        }

        for &tensor in lifetimes.produced_at(node) {
            offsets[tensor] = Some(allocator.malloc(tensor, sizes[tensor]));
        }

        if settings.reuse_intermediates {
            for &tensor in lifetimes.produced_at(node) {
                if lifetimes.last_consumer(tensor).is_none() {
                    allocator.free(tensor);
                }
            }
        }
    }

    IntermediatePlan { offsets, size: allocator.size() }
}
