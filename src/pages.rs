use crate::{block::Block, error::HeapError};

/// Inclusive range of page indices touched by a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageSpan {
    pub first: usize,
    pub last: usize,
}

impl PageSpan {
    /// Pages holding the first and the last byte of `block`.
    pub fn of(block: Block, page_size: usize) -> Self {
        debug_assert!(block.size > 0);

        Self {
            first: block.offset.get() / page_size,
            last: (block.end().get() - 1) / page_size,
        }
    }
}

/// Reference count of allocated block boundaries per page.
///
/// Only the page where a block starts and the page where it ends are counted,
/// pages in between belong to that block alone. A page whose counter is zero holds
/// no part of any allocation that also reaches outside of it, so if it is covered by
/// a free block it can be handed back to the OS.
///
/// ```text
///   page 0          page 1          page 2
/// +---------------+---------------+---------------+
/// |  A  |  B      |      |            C           |
/// +---------------+---------------+---------------+
///   3 (A, A, B)     2 (B, C)        1 (C)
/// ```
pub(crate) struct PageUsageTracker {
    counts: Vec<u32>,
}

impl PageUsageTracker {
    /// Creates a tracker for `pages` pages, none of them in use.
    pub fn new(pages: usize) -> Self {
        Self { counts: vec![0; pages] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Records that an allocation starts on `span.first` and ends on `span.last`.
    pub fn mark(&mut self, span: PageSpan) {
        self.counts[span.first] += 1;
        self.counts[span.last] += 1;
    }

    /// Inverse of [`PageUsageTracker::mark`]. Nothing is changed if either counter
    /// would drop below zero.
    pub fn unmark(&mut self, span: PageSpan) -> Result<(), HeapError> {
        let needed_on_first = if span.first == span.last { 2 } else { 1 };

        if self.counts[span.first] < needed_on_first {
            return Err(HeapError::PageUnderflow { page: span.first });
        }
        if self.counts[span.last] == 0 {
            return Err(HeapError::PageUnderflow { page: span.last });
        }

        self.counts[span.first] -= 1;
        self.counts[span.last] -= 1;

        Ok(())
    }

    #[inline]
    pub fn is_free(&self, page: usize) -> bool {
        self.counts[page] == 0
    }

    #[inline]
    pub fn count(&self, page: usize) -> u32 {
        self.counts[page]
    }
}
