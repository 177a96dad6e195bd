use core::{ptr::NonNull, slice};
use std::io;

use windows_sys::Win32::System::Memory::{PAGE_READONLY, PAGE_READWRITE};
use zeroize::Zeroize;

use super::{
    ffi::{self, windows as sys},
    ProtectedMemory, ProtectedMemoryMut,
};
use crate::config::MemoryLock;

/// A committed `VirtualAlloc` region, optionally locked with `VirtualLock`.
///
/// Dropping the region wipes every committed byte before freeing it.
struct Region {
    ptr: NonNull<u8>,
    len: usize,
    size: usize,
    locked: bool,
}

// The allocation is exclusively owned by its `Region`
// and only reachable through `&self`/`&mut self`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn alloc(len: usize, lock: MemoryLock) -> io::Result<Self> {
        super::check_length(len)?;
        let size = ffi::page_aligned(len);
        let ptr = sys::virtual_alloc(size)?;

        let mut region = Self {
            ptr,
            len,
            size,
            locked: false,
        };

        region.locked = super::apply_lock(lock, size, || sys::virtual_lock(ptr, size))?;

        log::trace!("allocated {size} bytes of protected memory");
        Ok(region)
    }

    fn protect(&self, prot: u32) -> io::Result<()> {
        sys::virtual_protect(self.ptr, self.size, prot).map(|_| ())
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
        if let Err(err) = self.protect(PAGE_READWRITE) {
            log::error!("could not make protected memory writable before wiping: {err}");
        } else {
            unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }.zeroize();
        }

        if self.locked {
            let _ = sys::virtual_unlock(self.ptr, self.size);
        }

        match sys::virtual_free(self.ptr) {
            Ok(()) => log::trace!("released {} bytes of protected memory", self.size),
            Err(err) => log::error!("could not free protected memory: {err}"),
        }
    }
}

/// A mutable protected memory allocation on Windows systems.
///
/// The memory is secured using `VirtualAlloc` and `VirtualLock`.
/// Once filled it can be converted into [`WindowsMemory`].
pub struct WindowsMemoryMut {
    region: Region,
}

impl ProtectedMemory for WindowsMemoryMut {}

impl ProtectedMemoryMut for WindowsMemoryMut {
    type ReadOnly = WindowsMemory;

    fn with_length(len: usize, lock: MemoryLock) -> io::Result<Self> {
        Region::alloc(len, lock).map(|region| Self { region })
    }
}

impl AsRef<[u8]> for WindowsMemoryMut {
    fn as_ref(&self) -> &[u8] {
        self.region.as_slice()
    }
}

impl AsMut<[u8]> for WindowsMemoryMut {
    fn as_mut(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }
}

/// A read-only protected memory allocation on Windows systems.
pub struct WindowsMemory {
    region: Region,
}

impl ProtectedMemory for WindowsMemory {}

impl AsRef<[u8]> for WindowsMemory {
    fn as_ref(&self) -> &[u8] {
        self.region.as_slice()
    }
}

impl TryFrom<WindowsMemoryMut> for WindowsMemory {
    type Error = io::Error;

    fn try_from(value: WindowsMemoryMut) -> Result<Self, Self::Error> {
        let region = value.region;
        // On failure `region` is dropped, wiping and freeing it.
        region.protect(PAGE_READONLY)?;
        Ok(Self { region })
    }
}
