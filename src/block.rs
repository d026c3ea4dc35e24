use std::{fmt, ops::Add};

/// Position of a byte inside the reserved address space, counted from its base.
///
/// The allocator never does arithmetic on raw pointers. Every block is described by
/// an `Offset` and only [`crate::kernel::AddressSpace`] turns it into a real address,
/// so ordering and adjacency comparisons are plain integer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(usize);

impl Offset {
    pub const ZERO: Offset = Offset(0);

    #[inline]
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    #[inline]
    pub fn checked_sub(self, len: usize) -> Option<Offset> {
        self.0.checked_sub(len).map(Offset)
    }

    /// Distance in bytes from `origin` up to `self`.
    #[inline]
    pub fn distance_from(self, origin: Offset) -> usize {
        debug_assert!(origin <= self);
        self.0 - origin.0
    }
}

impl Add<usize> for Offset {
    type Output = Offset;

    #[inline]
    fn add(self, len: usize) -> Offset {
        Offset(self.0 + len)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x}", self.0)
    }
}

/// A contiguous run of the address space.
///
/// Blocks don't carry their state. A block is reserved-free, committed-free or
/// allocated depending on which structure of [`crate::HeapManager`] holds it:
///
/// ```text
/// +-----------+-----------------+-----------+---------------------------+
/// | allocated | committed-free  | allocated |       reserved-free       |
/// +-----------+-----------------+-----------+---------------------------+
/// ^ base                                                   base + reserved
/// ```
///
/// Together they always tile the whole reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Where the block starts.
    pub offset: Offset,
    /// Size of the block in bytes.
    pub size: usize,
}

impl Block {
    #[inline]
    pub const fn new(offset: Offset, size: usize) -> Self {
        Self { offset, size }
    }

    /// First offset past the block.
    #[inline]
    pub fn end(&self) -> Offset {
        self.offset + self.size
    }

    /// Whether `next` starts exactly where this block ends.
    #[inline]
    pub fn abuts(&self, next: &Block) -> bool {
        self.end() == next.offset
    }

    /// Cuts the first `len` bytes off the block. The remainder is `None` when
    /// nothing is left.
    pub fn split(self, len: usize) -> (Block, Option<Block>) {
        debug_assert!(len <= self.size);

        let head = Block::new(self.offset, len);
        let rest = (len < self.size).then(|| Block::new(self.offset + len, self.size - len));

        (head, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_leaves_remainder() {
        let block = Block::new(Offset::new(16), 100);
        let (head, rest) = block.split(40);

        assert_eq!(Block::new(Offset::new(16), 40), head);
        assert_eq!(Some(Block::new(Offset::new(56), 60)), rest);
        assert!(head.abuts(&rest.unwrap()));
    }

    #[test]
    fn exact_split_has_no_remainder() {
        let block = Block::new(Offset::ZERO, 64);

        assert_eq!((block, None), block.split(64));
    }
}
