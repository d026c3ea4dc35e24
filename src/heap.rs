use std::{mem, ptr::NonNull};

use log::{debug, error, info, trace, warn};

use crate::{
    block::{Block, Offset},
    config::{GuardPolicy, HeapConfig},
    error::{HeapError, fatal},
    freelist::FreeBlockIndex,
    kernel::{AddressSpace, SystemMemory, VirtualMemory},
    pages::{PageSpan, PageUsageTracker},
    table::{Allocation, AllocationTable},
    utils::{align, align_nonzero, checked_align},
};

/// Size of each of the two guard words around a payload.
pub const GUARD_SIZE: usize = mem::size_of::<usize>();

/// Value written into the guard words.
pub const GUARD_VALUE: usize = 0xFEED_FACE_CAFE_BEEF_u64 as usize;

/// A live allocation as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveAllocation {
    /// Pointer handed out by [`HeapManager::allocate`].
    pub address: NonNull<u8>,
    pub real_size: usize,
    pub requested_size: usize,
}

/// Byte counts of every block class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub page_size: usize,
    /// Size of the whole reservation.
    pub reserved_size: usize,
    pub committed_free: usize,
    pub reserved_free: usize,
    /// Sum of real sizes of live blocks.
    pub allocated: usize,
    /// Sum of requested sizes of live blocks.
    pub requested: usize,
    pub live_allocations: usize,
}

/// Sub-allocator over a single reserved range of virtual memory.
///
/// The whole range is reserved once. Physical memory is committed when a request
/// can't be served from what is already committed and decommitted again as soon as
/// freeing leaves whole pages unused. Every byte of the range is in exactly one of
/// three states:
///
/// ```text
///                      commit on allocate           carve on allocate
///     Reserved-free  --------------------> Committed-free ---------------> Allocated
///           ^                                   |    ^                        |
///           |          decommit whole           |    |          free          |
///           +---------- unused pages -----------+    +------------------------+
/// ```
///
/// Each allocated block is laid out like this:
///
/// ```text
/// +-------+----------------------+-------+---------+
/// | guard |  payload (requested) | guard | padding |
/// +-------+----------------------+-------+---------+
/// ^ block ^ returned pointer
/// <------------------- real size ------------------>
/// ```
///
/// The manager is not thread safe. It holds a raw pointer to its reservation, so
/// it is neither `Send` nor `Sync`, and sharing it requires external locking around
/// every call.
pub struct HeapManager<M: VirtualMemory = SystemMemory> {
    memory: M,
    space: AddressSpace,
    page_size: usize,
    granularity: usize,
    guard_policy: GuardPolicy,
    /// Physically backed free blocks.
    committed: FreeBlockIndex,
    /// Reserved but not backed free blocks. Always page aligned.
    reserved: FreeBlockIndex,
    allocated: AllocationTable,
    pages: PageUsageTracker,
}

impl HeapManager<SystemMemory> {
    /// Reserves `max_size` bytes and commits the first `min_size` of them, both
    /// rounded up to the page size. Fatal if `min_size > max_size` or the OS refuses.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self::with_config(HeapConfig::new(min_size, max_size))
    }

    pub fn with_config(config: HeapConfig) -> Self {
        Self::try_with_memory(config, SystemMemory).unwrap_or_else(|err| fatal(err))
    }

    pub fn try_new(config: HeapConfig) -> Result<Self, HeapError> {
        Self::try_with_memory(config, SystemMemory)
    }
}

impl<M: VirtualMemory> HeapManager<M> {
    /// Builds the heap on top of a given [`VirtualMemory`].
    pub fn try_with_memory(config: HeapConfig, mut memory: M) -> Result<Self, HeapError> {
        let page_size = memory.page_size();
        config.validate(page_size)?;

        let bounds = HeapError::InvalidBounds { min_size: config.min_size, max_size: config.max_size };
        let (Some(reserved_size), Some(committed_size)) = (
            align_nonzero(config.max_size, page_size),
            align_nonzero(config.min_size, page_size),
        ) else {
            return Err(bounds);
        };

        let base = unsafe { memory.reserve(reserved_size)? };

        if let Err(err) = unsafe { memory.commit(base, committed_size) } {
            if let Err(release) = unsafe { memory.release(base, reserved_size) } {
                error!("{release}");
            }
            return Err(err.into());
        }

        let mut committed = FreeBlockIndex::new();
        let mut reserved = FreeBlockIndex::new();

        let (prefix, rest) = Block::new(Offset::ZERO, reserved_size).split(committed_size);
        committed.insert(prefix);
        if let Some(rest) = rest {
            reserved.insert(rest);
        }

        debug!(
            "heap at {:p}: reserved {reserved_size} bytes, committed {committed_size} bytes, page size {page_size}",
            base
        );

        Ok(Self {
            memory,
            space: AddressSpace::new(base, reserved_size),
            page_size,
            granularity: config.granularity,
            guard_policy: config.guard_policy,
            committed,
            reserved,
            allocated: AllocationTable::new(),
            pages: PageUsageTracker::new(reserved_size / page_size),
        })
    }

    /// Fatal version of [`HeapManager::try_with_memory`].
    pub fn with_memory(config: HeapConfig, memory: M) -> Self {
        Self::try_with_memory(config, memory).unwrap_or_else(|err| fatal(err))
    }

    /// Returns a pointer to `size` writable bytes. Running out of address space or
    /// being refused memory by the OS is fatal, this never returns null.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        self.try_allocate(size).unwrap_or_else(|err| fatal(err))
    }

    /// Gives back a pointer returned by [`HeapManager::allocate`]. Anything else,
    /// a double free included, is fatal. So is an overwritten guard word under
    /// [`GuardPolicy::Abort`].
    pub fn free(&mut self, ptr: NonNull<u8>) {
        self.try_free(ptr).unwrap_or_else(|err| fatal(err))
    }

    /// Non fatal version of [`HeapManager::allocate`]. On error nothing changed.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let real_size = size
            .checked_add(2 * GUARD_SIZE)
            .and_then(|needed| checked_align(needed, self.granularity))
            .ok_or(HeapError::Exhausted {
                requested: size,
                largest_free: self.committed.largest().max(self.reserved.largest()),
            })?;

        let block = match self.committed.find(real_size) {
            Some(found) => {
                self.committed.remove(found);
                let (block, rest) = found.split(real_size);
                if let Some(rest) = rest {
                    self.committed.insert(rest);
                }
                block
            }
            None => self.take_from_reserved(size, real_size)?,
        };

        let span = self.span(block);
        self.pages.mark(span);
        self.allocated.insert(block.offset, Allocation { real_size, requested_size: size });

        let ptr = self.space.ptr(block.offset);
        unsafe {
            ptr.cast::<usize>().write_unaligned(GUARD_VALUE);
            ptr.add(GUARD_SIZE + size).cast::<usize>().write_unaligned(GUARD_VALUE);
        }

        let payload = unsafe { ptr.add(GUARD_SIZE) };
        debug!("allocate {size} bytes at {payload:p} (block {} real size {real_size})", block.offset);

        Ok(payload)
    }

    /// Commits the start of the smallest reserved block that fits `real_size`.
    ///
    /// Whole pages are committed, so whatever the block doesn't use of its last
    /// page becomes committed-free.
    fn take_from_reserved(&mut self, requested: usize, real_size: usize) -> Result<Block, HeapError> {
        let found = self.reserved.find(real_size).ok_or(HeapError::Exhausted {
            requested,
            largest_free: self.committed.largest().max(self.reserved.largest()),
        })?;

        // Reserved blocks are page aligned, so this never goes past `found`.
        let commit_len = align(real_size, self.page_size);
        debug_assert!(commit_len <= found.size);

        trace!("commit {commit_len} bytes at {}", found.offset);
        unsafe { self.memory.commit(self.space.ptr(found.offset), commit_len)? };

        self.reserved.remove(found);
        let (committed, rest) = found.split(commit_len);
        if let Some(rest) = rest {
            self.reserved.insert(rest);
        }

        let (block, slack) = committed.split(real_size);
        if let Some(slack) = slack {
            self.committed.release(slack);
        }

        Ok(block)
    }

    /// Non fatal version of [`HeapManager::free`].
    ///
    /// Invalid pointers and, under [`GuardPolicy::Abort`], corrupted guards are
    /// reported before anything changes. If the OS refuses to decommit, the block
    /// is still freed (it just stays committed) and the error is returned.
    pub fn try_free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let invalid = HeapError::InvalidFree { address: ptr.as_ptr() as usize };

        let Some(offset) = self.space.offset_of(ptr).and_then(|offset| offset.checked_sub(GUARD_SIZE)) else {
            return Err(invalid);
        };
        let Some(allocation) = self.allocated.get(offset) else {
            return Err(invalid);
        };

        self.check_guards(offset, allocation)?;

        let block = Block::new(offset, allocation.real_size);
        let span = self.span(block);
        self.pages.unmark(span)?;
        self.allocated.remove(offset);

        debug!(
            "free {} bytes at {ptr:p} (block {offset} real size {})",
            allocation.requested_size, allocation.real_size
        );

        let merged = self.committed.coalesce(block);
        self.decommit(merged)
    }

    fn check_guards(&self, offset: Offset, allocation: Allocation) -> Result<(), HeapError> {
        let ptr = self.space.ptr(offset);

        let (head, tail) = unsafe {
            (
                ptr.cast::<usize>().read_unaligned(),
                ptr.add(GUARD_SIZE + allocation.requested_size).cast::<usize>().read_unaligned(),
            )
        };

        if head == GUARD_VALUE && tail == GUARD_VALUE {
            return Ok(());
        }

        let err = HeapError::BoundaryCorruption {
            address: unsafe { ptr.add(GUARD_SIZE) }.as_ptr() as usize,
            requested: allocation.requested_size,
        };

        match self.guard_policy {
            GuardPolicy::Abort => Err(err),
            GuardPolicy::Report => {
                error!("{err}");
                Ok(())
            }
        }
    }

    /// Places a free, already coalesced `block` back: the pages nobody else uses
    /// go to reserved-free, the rest stays committed-free.
    ///
    /// ```text
    ///         page 0          page 1          page 2          page 3
    ///     +---------------+---------------+---------------+---------------+
    ///     |  live |          free block (merged)                  | live  |
    ///     +---------------+---------------+---------------+---------------+
    ///             <------><------------------------------><------>
    ///            committed          decommitted          committed
    /// ```
    fn decommit(&mut self, block: Block) -> Result<(), HeapError> {
        let span = self.span(block);

        // Boundary pages still referenced are shared with a live neighbour.
        let first = span.first + usize::from(!self.pages.is_free(span.first));
        let last = match self.pages.is_free(span.last) {
            true => Some(span.last),
            false => span.last.checked_sub(1),
        };

        let Some(last) = last.filter(|&last| last >= first) else {
            self.committed.insert(block);
            return Ok(());
        };

        let hole = Block::new(Offset::new(first * self.page_size), (last - first + 1) * self.page_size);
        debug_assert!(block.offset <= hole.offset && hole.end() <= block.end());

        trace!("decommit {} bytes at {}", hole.size, hole.offset);
        if let Err(err) = unsafe { self.memory.decommit(self.space.ptr(hole.offset), hole.size) } {
            self.committed.insert(block);
            return Err(err.into());
        }

        if block.offset < hole.offset {
            self.committed.insert(Block::new(block.offset, hole.offset.distance_from(block.offset)));
        }
        if hole.end() < block.end() {
            self.committed.insert(Block::new(hole.end(), block.end().distance_from(hole.end())));
        }
        self.reserved.release(hole);

        Ok(())
    }

    #[inline]
    fn span(&self, block: Block) -> PageSpan {
        PageSpan::of(block, self.page_size)
    }

    /// Live allocations in address order.
    pub fn live_allocations(&self) -> impl Iterator<Item = LiveAllocation> + '_ {
        self.allocated.iter().map(|(block, allocation)| LiveAllocation {
            address: self.space.ptr(block.offset + GUARD_SIZE),
            real_size: allocation.real_size,
            requested_size: allocation.requested_size,
        })
    }

    /// Logs every live allocation and returns how many there are.
    pub fn report_live_allocations(&self) -> usize {
        let mut count = 0;
        for live in self.live_allocations() {
            info!(
                "address: [{:p}] real size: {} size: {}",
                live.address, live.real_size, live.requested_size
            );
            count += 1;
        }

        count
    }

    pub fn stats(&self) -> HeapStats {
        let (allocated, requested) = self
            .allocated
            .iter()
            .fold((0, 0), |(real, requested), (_, allocation)| {
                (real + allocation.real_size, requested + allocation.requested_size)
            });

        HeapStats {
            page_size: self.page_size,
            reserved_size: self.space.len(),
            committed_free: self.committed.total(),
            reserved_free: self.reserved.total(),
            allocated,
            requested,
            live_allocations: self.allocated.len(),
        }
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Base of the reservation.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.space.base()
    }

    /// Checks that the bookkeeping describes the address space:
    ///
    /// - Free and allocated blocks tile the whole reservation.
    /// - No two free blocks of the same class touch.
    /// - Both orderings of each index agree.
    /// - Reserved blocks are page aligned.
    /// - Page counters match the boundaries of the live blocks.
    pub fn validate(&self) -> Result<(), HeapError> {
        #[derive(PartialEq, Clone, Copy, Debug)]
        enum Class {
            Committed,
            Reserved,
            Allocated,
        }

        let violation = |msg: String| Err(HeapError::InvariantViolation(msg));

        self.committed.check_consistency()?;
        self.reserved.check_consistency()?;

        let mut blocks: Vec<(Block, Class)> = self
            .committed
            .iter()
            .map(|block| (block, Class::Committed))
            .chain(self.reserved.iter().map(|block| (block, Class::Reserved)))
            .chain(self.allocated.iter().map(|(block, _)| (block, Class::Allocated)))
            .collect();
        blocks.sort_by_key(|(block, _)| block.offset);

        let mut cursor = Offset::ZERO;
        let mut previous: Option<Class> = None;
        for &(block, class) in &blocks {
            if block.size == 0 {
                return violation(format!("empty {class:?} block at {}", block.offset));
            }
            if block.offset != cursor {
                return violation(format!("{class:?} block at {} but expected {cursor}", block.offset));
            }
            if class != Class::Allocated && previous == Some(class) {
                return violation(format!("unmerged {class:?} blocks at {}", block.offset));
            }
            if class == Class::Reserved
                && (block.offset.get() % self.page_size != 0 || block.size % self.page_size != 0)
            {
                return violation(format!("reserved block at {} is not page aligned", block.offset));
            }

            cursor = block.end();
            previous = Some(class);
        }

        if cursor.get() != self.space.len() {
            return violation(format!("blocks end at {cursor}, reservation at {:#x}", self.space.len()));
        }

        let mut expected = PageUsageTracker::new(self.pages.len());
        for (block, _) in self.allocated.iter() {
            expected.mark(self.span(block));
        }
        if let Some(page) = (0..self.pages.len()).find(|&page| expected.count(page) != self.pages.count(page)) {
            return violation(format!(
                "page {page} counted {} times, live blocks touch it {} times",
                self.pages.count(page),
                expected.count(page)
            ));
        }

        Ok(())
    }
}

impl<M: VirtualMemory> Drop for HeapManager<M> {
    fn drop(&mut self) {
        for live in self.live_allocations() {
            warn!(
                "leaked allocation: address: [{:p}] real size: {} size: {}",
                live.address, live.real_size, live.requested_size
            );
        }

        if let Err(err) = unsafe { self.memory.release(self.space.base(), self.space.len()) } {
            error!("{err}");
        }
    }
}
