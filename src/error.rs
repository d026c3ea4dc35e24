use std::{fmt, io};

use log::error;

/// Failures reported by the operating system through [`crate::kernel::VirtualMemory`].
#[derive(Debug)]
pub enum MemoryError {
    Reserve(io::Error),
    Commit(io::Error),
    Decommit(io::Error),
    Release(io::Error),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Reserve(e) => write!(f, "address space reservation failed: {e}"),
            MemoryError::Commit(e) => write!(f, "commit failed: {e}"),
            MemoryError::Decommit(e) => write!(f, "decommit failed: {e}"),
            MemoryError::Release(e) => write!(f, "address space release failed: {e}"),
        }
    }
}

impl std::error::Error for MemoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemoryError::Reserve(e)
            | MemoryError::Commit(e)
            | MemoryError::Decommit(e)
            | MemoryError::Release(e) => Some(e),
        }
    }
}

/// Everything that can go wrong inside a [`crate::HeapManager`].
///
/// None of these are meant to be recovered from by a well behaved program. The
/// panicking entry points turn them into a diagnostic through [`fatal`], the `try_`
/// variants hand them back without having touched the heap's bookkeeping.
#[derive(Debug)]
pub enum HeapError {
    /// `min_size` was larger than `max_size`, or the rounded bounds overflow.
    InvalidBounds { min_size: usize, max_size: usize },
    /// Block granularity is not a power of two or exceeds the page size.
    InvalidGranularity { granularity: usize, page_size: usize },
    /// No free block is large enough for the request.
    Exhausted { requested: usize, largest_free: usize },
    /// The address was not returned by a still outstanding allocation.
    InvalidFree { address: usize },
    /// A guard word around the payload was overwritten.
    BoundaryCorruption { address: usize, requested: usize },
    /// A page reference count would have dropped below zero.
    PageUnderflow { page: usize },
    /// The bookkeeping no longer describes the address space.
    InvariantViolation(String),
    Memory(MemoryError),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::InvalidBounds { min_size, max_size } => {
                write!(f, "invalid heap bounds: min {min_size} max {max_size}")
            }
            HeapError::InvalidGranularity { granularity, page_size } => write!(
                f,
                "invalid block granularity {granularity} for page size {page_size}"
            ),
            HeapError::Exhausted { requested, largest_free } => write!(
                f,
                "address space exhausted: requested {requested} bytes, largest free block is {largest_free} bytes"
            ),
            HeapError::InvalidFree { address } => {
                write!(f, "invalid free of {address:#x}: not an outstanding allocation")
            }
            HeapError::BoundaryCorruption { address, requested } => write!(
                f,
                "memory bound error at {address:#x}: guard words around {requested} bytes overwritten"
            ),
            HeapError::PageUnderflow { page } => {
                write!(f, "page {page} released more often than it was used")
            }
            HeapError::InvariantViolation(msg) => write!(f, "heap invariant violated: {msg}"),
            HeapError::Memory(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeapError::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MemoryError> for HeapError {
    fn from(err: MemoryError) -> Self {
        HeapError::Memory(err)
    }
}

/// Terminates with a diagnostic. The allocator is the lowest layer there is,
/// so there is nobody to hand the error to.
#[cold]
#[track_caller]
pub(crate) fn fatal(err: HeapError) -> ! {
    error!("fatal heap error: {err}");
    panic!("{err}")
}
