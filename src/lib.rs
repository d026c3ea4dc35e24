//! A sub-allocator that manages one big range of virtual memory.
//!
//! The range is reserved once when the [`HeapManager`] is created and only its first
//! `min_size` bytes are backed by physical memory. Requests are served from the
//! committed part first. When that isn't enough, more pages are committed from the
//! reserved part, and pages that freeing leaves completely unused are decommitted
//! again, so the OS is only called when crossing that boundary.
//!
//! ```
//! use vheap::HeapManager;
//!
//! let mut heap = HeapManager::new(4096, 1 << 20);
//!
//! let ptr = heap.allocate(128);
//! unsafe { ptr.as_ptr().write_bytes(0, 128) };
//! heap.free(ptr);
//!
//! assert_eq!(0, heap.report_live_allocations());
//! ```
//!
//! The allocator is single threaded and every failure is fatal through
//! [`HeapManager::allocate`] and [`HeapManager::free`]. The `try_` variants return a
//! [`HeapError`] instead.

mod block;
mod config;
mod error;
mod freelist;
mod heap;
mod kernel;
mod pages;
mod table;
mod utils;

pub use block::Offset;
pub use config::{GuardPolicy, HeapConfig, MIN_BLOCK_SIZE};
pub use error::{HeapError, MemoryError};
pub use heap::{GUARD_SIZE, GUARD_VALUE, HeapManager, HeapStats, LiveAllocation};
pub use kernel::{SystemMemory, VirtualMemory};
