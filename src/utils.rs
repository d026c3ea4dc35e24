//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`.
///
/// This method is used to align the reservation to be a multiple of the page size
/// and block sizes to be a multiple of the block granularity. `aligment` must be a
/// power of two.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    debug_assert!(aligment.is_power_of_two());
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of overflowing.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    debug_assert!(aligment.is_power_of_two());
    to_be_aligned
        .checked_add(aligment - 1)
        .map(|size| size & !(aligment - 1))
}

/// Like [`checked_align`], but zero rounds up to one full `aligment`.
///
/// The heap bounds are computed this way so that an empty minimum still
/// commits one page.
pub fn align_nonzero(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    checked_align(to_be_aligned.max(1), aligment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, mem::size_of::<u64>()));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn zero_rounds_to_one_unit() {
        assert_eq!(Some(4096), align_nonzero(0, 4096));
        assert_eq!(Some(4096), align_nonzero(4096, 4096));
        assert_eq!(Some(0), checked_align(0, 4096));
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(None, checked_align(usize::MAX - 2, 4));
        assert_eq!(Some(usize::MAX - 3), checked_align(usize::MAX - 4, 4));
    }
}
