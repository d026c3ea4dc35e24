use std::ptr::NonNull;

use crate::{block::Offset, error::MemoryError};

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
///
/// Addresses and lengths given to `commit`, `decommit` and `release` are always
/// page aligned and lie inside a range previously returned by `reserve`.
pub trait VirtualMemory {
    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size(&self) -> usize;

    /// Reserves `len` bytes of address space without physical backing.
    ///
    /// # Safety
    /// `len` must be a non zero multiple of [`VirtualMemory::page_size`].
    unsafe fn reserve(&mut self, len: usize) -> Result<NonNull<u8>, MemoryError>;

    /// Backs `len` bytes starting at `addr` with physical memory, readable and writable.
    ///
    /// # Safety
    /// The range must be page aligned and inside a live reservation.
    unsafe fn commit(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError>;

    /// Drops the physical backing of the range but keeps it reserved.
    ///
    /// # Safety
    /// The range must be page aligned, inside a live reservation and not
    /// referenced by anyone anymore.
    unsafe fn decommit(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError>;

    /// Returns the whole reservation of `len` bytes starting at `addr` to the kernel.
    ///
    /// # Safety
    /// `addr` and `len` must be exactly what `reserve` returned and was given.
    unsafe fn release(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError>;
}

/// The [`VirtualMemory`] of the platform we are running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

#[cfg(unix)]
mod unix {
    use super::{SystemMemory, VirtualMemory};
    use crate::error::MemoryError;

    use libc::{c_int, c_void, mmap, mprotect, munmap, off_t, size_t};

    use std::{io, ptr::NonNull};

    impl VirtualMemory for SystemMemory {
        fn page_size(&self) -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }

        unsafe fn reserve(&mut self, len: usize) -> Result<NonNull<u8>, MemoryError> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // No access until committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => Err(MemoryError::Reserve(io::Error::last_os_error())),
                    addr => NonNull::new(addr.cast::<u8>())
                        .ok_or_else(|| MemoryError::Reserve(io::Error::other("mmap returned null"))),
                }
            }
        }

        unsafe fn commit(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError> {
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            match unsafe { mprotect(addr.as_ptr().cast(), len as size_t, PROT) } {
                0 => Ok(()),
                _ => Err(MemoryError::Commit(io::Error::last_os_error())),
            }
        }

        unsafe fn decommit(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError> {
            unsafe {
                // Private anonymous pages are dropped right away and read back as zeroes.
                if libc::madvise(addr.as_ptr().cast(), len as size_t, libc::MADV_DONTNEED) != 0 {
                    return Err(MemoryError::Decommit(io::Error::last_os_error()));
                }

                if mprotect(addr.as_ptr().cast(), len as size_t, libc::PROT_NONE) != 0 {
                    return Err(MemoryError::Decommit(io::Error::last_os_error()));
                }
            }

            Ok(())
        }

        unsafe fn release(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError> {
            match unsafe { munmap(addr.as_ptr().cast(), len as size_t) } {
                0 => Ok(()),
                _ => Err(MemoryError::Release(io::Error::last_os_error())),
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{SystemMemory, VirtualMemory};
    use crate::error::MemoryError;

    use windows::Win32::System::{Memory, SystemInformation};

    impl VirtualMemory for SystemMemory {
        fn page_size(&self) -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }

        unsafe fn reserve(&mut self, len: usize) -> Result<NonNull<u8>, MemoryError> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_READWRITE);

                NonNull::new(addr.cast()).ok_or_else(|| MemoryError::Reserve(io::Error::last_os_error()))
            }
        }

        unsafe fn commit(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError> {
            unsafe {
                let committed = Memory::VirtualAlloc(
                    Some(addr.as_ptr() as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                match committed.is_null() {
                    true => Err(MemoryError::Commit(io::Error::last_os_error())),
                    false => Ok(()),
                }
            }
        }

        unsafe fn decommit(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), MemoryError> {
            unsafe {
                Memory::VirtualFree(addr.as_ptr() as *mut c_void, len, Memory::MEM_DECOMMIT)
                    .map_err(|_| MemoryError::Decommit(io::Error::last_os_error()))
            }
        }

        unsafe fn release(&mut self, addr: NonNull<u8>, _len: usize) -> Result<(), MemoryError> {
            unsafe {
                Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE)
                    .map_err(|_| MemoryError::Release(io::Error::last_os_error()))
            }
        }
    }
}

/// The reserved range `[base, base + len)`.
///
/// This is the only place where an [`Offset`] becomes a pointer and the other way
/// around.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AddressSpace {
    base: NonNull<u8>,
    len: usize,
}

impl AddressSpace {
    pub fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pointer to `offset`. Offsets past the end are a bug in the allocator.
    #[inline]
    pub fn ptr(&self, offset: Offset) -> NonNull<u8> {
        assert!(offset.get() <= self.len, "offset {offset} outside of the address space");

        unsafe { self.base.add(offset.get()) }
    }

    /// Offset of `ptr`, or `None` if it doesn't point inside the reservation.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<Offset> {
        let base = self.base.as_ptr() as usize;

        (ptr.as_ptr() as usize)
            .checked_sub(base)
            .filter(|&offset| offset < self.len)
            .map(Offset::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(SystemMemory.page_size().is_power_of_two());
    }

    #[test]
    fn committed_pages_are_writable() {
        let mut memory = SystemMemory;
        let page = memory.page_size();

        unsafe {
            let base = memory.reserve(4 * page).unwrap();
            let second = base.add(page);

            memory.commit(second, page).unwrap();
            second.as_ptr().write(42);
            assert_eq!(42, second.as_ptr().read());

            memory.decommit(second, page).unwrap();
            memory.commit(second, page).unwrap();
            second.as_ptr().write(7);
            assert_eq!(7, second.as_ptr().read());

            memory.release(base, 4 * page).unwrap();
        }
    }

    #[test]
    fn offsets_round_trip_inside_the_space() {
        let mut memory = SystemMemory;
        let page = memory.page_size();

        unsafe {
            let base = memory.reserve(page).unwrap();
            let space = AddressSpace::new(base, page);

            let ptr = space.ptr(Offset::new(100));
            assert_eq!(Some(Offset::new(100)), space.offset_of(ptr));
            assert_eq!(None, space.offset_of(space.ptr(Offset::new(page))));

            memory.release(base, page).unwrap();
        }
    }
}
