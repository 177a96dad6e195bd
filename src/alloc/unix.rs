use core::{ptr::NonNull, slice};
use std::io;

use libc::{PROT_READ, PROT_WRITE};
use zeroize::Zeroize;

use super::{
    ffi::{self, unix as sys},
    ProtectedMemory, ProtectedMemoryMut,
};
use crate::config::MemoryLock;

/// An anonymous mapping that is excluded from core dumps and, depending on
/// the locking policy, pinned into RAM.
///
/// Dropping the region wipes every mapped byte before unmapping it.
struct Region {
    ptr: NonNull<u8>,
    len: usize,
    size: usize,
    locked: bool,
}

// The mapping is exclusively owned by its `Region`
// and only reachable through `&self`/`&mut self`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn map(len: usize, lock: MemoryLock) -> io::Result<Self> {
        super::check_length(len)?;
        let size = ffi::page_aligned(len);
        let ptr = sys::mmap_anonymous(size, PROT_READ | PROT_WRITE)?;

        // From here on `Drop` takes care of the mapping.
        let mut region = Self {
            ptr,
            len,
            size,
            locked: false,
        };

        region.locked = super::apply_lock(lock, size, || sys::mlock(ptr, size))?;
        sys::exclude_from_dump(ptr, size)?;

        log::trace!("mapped {size} bytes of protected memory");
        Ok(region)
    }

    fn protect(&self, prot: i32) -> io::Result<()> {
        sys::mprotect(self.ptr, self.size, prot)
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(err) = self.protect(PROT_READ | PROT_WRITE) {
            // Writing to a read-only page would fault, release it as-is.
            log::error!("could not make protected memory writable before wiping: {err}");
        } else {
            unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }.zeroize();
        }

        // May fail (unchecked)
        let _ = sys::include_in_dump(self.ptr, self.size);
        if self.locked {
            let _ = sys::munlock(self.ptr, self.size);
        }

        match sys::munmap(self.ptr, self.size) {
            Ok(()) => log::trace!("released {} bytes of protected memory", self.size),
            Err(err) => log::error!("could not unmap protected memory: {err}"),
        }
    }
}

/// A mutable protected memory allocation on Unix systems.
///
/// The memory is mapped with `mmap`, locked with `mlock` and excluded from
/// core dumps. Once filled it can be converted into [`UnixMemory`].
pub struct UnixMemoryMut {
    region: Region,
}

impl ProtectedMemory for UnixMemoryMut {}

impl ProtectedMemoryMut for UnixMemoryMut {
    type ReadOnly = UnixMemory;

    fn with_length(len: usize, lock: MemoryLock) -> io::Result<Self> {
        Region::map(len, lock).map(|region| Self { region })
    }
}

impl AsRef<[u8]> for UnixMemoryMut {
    fn as_ref(&self) -> &[u8] {
        self.region.as_slice()
    }
}

impl AsMut<[u8]> for UnixMemoryMut {
    fn as_mut(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }
}

/// A read-only protected memory allocation on Unix systems.
///
/// The pages are `PROT_READ`, any write attempt faults.
pub struct UnixMemory {
    region: Region,
}

impl ProtectedMemory for UnixMemory {}

impl AsRef<[u8]> for UnixMemory {
    fn as_ref(&self) -> &[u8] {
        self.region.as_slice()
    }
}

impl TryFrom<UnixMemoryMut> for UnixMemory {
    type Error = io::Error;

    fn try_from(value: UnixMemoryMut) -> Result<Self, Self::Error> {
        let region = value.region;
        // On failure `region` is dropped, wiping and unmapping it.
        region.protect(PROT_READ)?;
        Ok(Self { region })
    }
}
