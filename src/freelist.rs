use std::collections::{BTreeMap, BTreeSet};

use crate::{
    block::{Block, Offset},
    error::HeapError,
};

/// Index of the free [`Block`]s of one class (committed or reserved).
///
/// Every block is kept twice:
///
/// ```text
///  by_size (size, offset)          by_addr offset -> size
/// +---------------------+        +---------------------+
/// | (16,  +0x40)        |        | +0x0   -> 32        |
/// | (32,  +0x0)         |        | +0x40  -> 16        |
/// | (32,  +0x900)       |        | +0x900 -> 32        |
/// | (4096, +0x1000)     |        | +0x1000 -> 4096     |
/// +---------------------+        +---------------------+
/// ```
///
/// The first ordering answers "smallest block that fits", and thanks to the compound
/// key ties go to the lowest address. The second one answers "who is right before /
/// after this offset", which is what we need to merge neighbours.
///
/// Both orderings are private and only [`FreeBlockIndex::insert`] and
/// [`FreeBlockIndex::remove`] touch them, so they can't diverge.
#[derive(Default)]
pub(crate) struct FreeBlockIndex {
    by_size: BTreeSet<(usize, Offset)>,
    by_addr: BTreeMap<Offset, usize>,
}

impl FreeBlockIndex {
    /// Creates a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Adds `block` as is, without looking at its neighbours.
    pub fn insert(&mut self, block: Block) {
        debug_assert!(block.size > 0);

        self.by_size.insert((block.size, block.offset));
        let previous = self.by_addr.insert(block.offset, block.size);

        debug_assert!(previous.is_none(), "free block inserted twice at {}", block.offset);
    }

    /// Removes `block` from both orderings.
    pub fn remove(&mut self, block: Block) {
        let by_size = self.by_size.remove(&(block.size, block.offset));
        let by_addr = self.by_addr.remove(&block.offset);

        debug_assert!(by_size && by_addr == Some(block.size));
    }

    /// Returns the smallest block that can hold `size` bytes, the one with the
    /// lowest address among equally sized candidates. The block stays in the index.
    pub fn find(&self, size: usize) -> Option<Block> {
        self.by_size
            .range((size, Offset::ZERO)..)
            .next()
            .map(|&(size, offset)| Block::new(offset, size))
    }

    /// Free block starting exactly at `offset`.
    pub fn get(&self, offset: Offset) -> Option<Block> {
        self.by_addr.get(&offset).map(|&size| Block::new(offset, size))
    }

    /// Free block with the highest address below `offset`.
    pub fn predecessor(&self, offset: Offset) -> Option<Block> {
        self.by_addr
            .range(..offset)
            .next_back()
            .map(|(&offset, &size)| Block::new(offset, size))
    }

    /// Free block with the lowest address above `offset`.
    pub fn successor(&self, offset: Offset) -> Option<Block> {
        use std::ops::Bound::{Excluded, Unbounded};

        self.by_addr
            .range((Excluded(offset), Unbounded))
            .next()
            .map(|(&offset, &size)| Block::new(offset, size))
    }

    /// Takes the free neighbours touching `block` out of the index and returns the
    /// merged extent. The result itself is *not* inserted.
    ///
    /// ```text
    /// +--------+---------+--------+        +---------------------------+
    /// |  free  |  block  |  free  |  --->  |          merged           |
    /// +--------+---------+--------+        +---------------------------+
    /// ```
    pub fn coalesce(&mut self, mut block: Block) -> Block {
        if let Some(next) = self.successor(block.offset) {
            if block.abuts(&next) {
                self.remove(next);
                block.size += next.size;
            }
        }

        if let Some(prev) = self.predecessor(block.offset) {
            if prev.abuts(&block) {
                self.remove(prev);
                block = Block::new(prev.offset, prev.size + block.size);
            }
        }

        block
    }

    /// Inserts `block` merged with whatever free neighbours it touches and returns
    /// the block that ended up in the index.
    pub fn release(&mut self, block: Block) -> Block {
        let merged = self.coalesce(block);
        self.insert(merged);

        merged
    }

    /// Size of the biggest free block, zero if there is none.
    pub fn largest(&self) -> usize {
        self.by_size.last().map_or(0, |&(size, _)| size)
    }

    /// Sum of the sizes of all free blocks.
    pub fn total(&self) -> usize {
        self.by_addr.values().sum()
    }

    /// Free blocks in address order.
    pub fn iter(&self) -> impl Iterator<Item = Block> + '_ {
        self.by_addr.iter().map(|(&offset, &size)| Block::new(offset, size))
    }

    /// Checks that both orderings describe the same set of blocks.
    pub fn check_consistency(&self) -> Result<(), HeapError> {
        let mismatch = self.by_size.len() != self.by_addr.len()
            || self
                .by_size
                .iter()
                .any(|&(size, offset)| self.by_addr.get(&offset) != Some(&size));

        if mismatch {
            return Err(HeapError::InvariantViolation(
                "free block orderings disagree".into(),
            ));
        }

        Ok(())
    }
}
