use std::collections::BTreeMap;

use crate::block::{Block, Offset};

/// Metadata of a live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Allocation {
    /// Guard inclusive size of the block, rounded to the block granularity.
    pub real_size: usize,
    /// Payload size the caller asked for.
    pub requested_size: usize,
}

/// Live blocks keyed by the offset where the block (not the payload) starts.
#[derive(Default)]
pub(crate) struct AllocationTable {
    blocks: BTreeMap<Offset, Allocation>,
}

impl AllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn insert(&mut self, offset: Offset, allocation: Allocation) {
        let previous = self.blocks.insert(offset, allocation);
        debug_assert!(previous.is_none(), "block at {offset} allocated twice");
    }

    pub fn get(&self, offset: Offset) -> Option<Allocation> {
        self.blocks.get(&offset).copied()
    }

    pub fn remove(&mut self, offset: Offset) -> Option<Allocation> {
        self.blocks.remove(&offset)
    }

    /// Live blocks in address order.
    pub fn iter(&self) -> impl Iterator<Item = (Block, Allocation)> + '_ {
        self.blocks
            .iter()
            .map(|(&offset, &allocation)| (Block::new(offset, allocation.real_size), allocation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_after_remove_fails() {
        let mut table = AllocationTable::new();
        let allocation = Allocation { real_size: 24, requested_size: 5 };

        table.insert(Offset::new(64), allocation);
        assert_eq!(Some(allocation), table.get(Offset::new(64)));

        assert_eq!(Some(allocation), table.remove(Offset::new(64)));
        assert_eq!(None, table.get(Offset::new(64)));
        assert!(table.is_empty());
    }

    #[test]
    fn iterates_in_address_order() {
        let mut table = AllocationTable::new();
        table.insert(Offset::new(32), Allocation { real_size: 16, requested_size: 0 });
        table.insert(Offset::new(0), Allocation { real_size: 32, requested_size: 10 });

        let blocks: Vec<_> = table.iter().map(|(block, _)| block).collect();

        assert_eq!(
            vec![Block::new(Offset::new(0), 32), Block::new(Offset::new(32), 16)],
            blocks
        );
    }
}
