use std::io;

use crate::config::MemoryLock;

mod ffi;
#[cfg(target_family = "unix")]
pub mod unix;
#[cfg(target_family = "windows")]
pub mod windows;

/// The mutable protected memory type of the current platform.
#[cfg(target_family = "unix")]
pub type PlatformMemoryMut = unix::UnixMemoryMut;
/// The mutable protected memory type of the current platform.
#[cfg(target_family = "windows")]
pub type PlatformMemoryMut = windows::WindowsMemoryMut;

/// The read-only protected memory type of the current platform.
pub type PlatformMemory = <PlatformMemoryMut as ProtectedMemoryMut>::ReadOnly;

/// Trait representing protected memory that allows read-only access.
///
/// Implementors keep the region out of swap and core dumps where the
/// platform allows it, and overwrite it with zeros before releasing it.
pub trait ProtectedMemory: AsRef<[u8]> {
    /// Provides a byte slice view of the protected memory.
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Trait representing protected memory that allows mutable access.
///
/// Memory allocated via this trait is meant to be filled once and then
/// converted into its read-only form.
pub trait ProtectedMemoryMut: AsMut<[u8]> + ProtectedMemory + Sized {
    /// Associated immutable memory type to convert
    /// to when read-only access is required.
    type ReadOnly: ProtectedMemory + TryFrom<Self, Error = io::Error>;

    /// Allocates a new zero-filled region with the specified length.
    ///
    /// # Arguments
    /// * `len` - Length of the memory allocation in bytes, must not be zero.
    /// * `lock` - Whether the region has to be locked into RAM.
    fn with_length(len: usize, lock: MemoryLock) -> io::Result<Self>;

    /// Converts the region into its read-only version, consuming the original.
    ///
    /// On failure the region is wiped and released.
    #[inline]
    fn into_read_only(self) -> io::Result<Self::ReadOnly> {
        Self::ReadOnly::try_from(self)
    }

    /// Provides a mutable byte slice view of the protected memory.
    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut()
    }
}

/// Copies `bytes` into a fresh read-only protected region.
pub fn protected_copy(bytes: &[u8], lock: MemoryLock) -> io::Result<PlatformMemory> {
    let mut memory = PlatformMemoryMut::with_length(bytes.len(), lock)?;
    memory.as_bytes_mut().copy_from_slice(bytes);
    memory.into_read_only()
}

/// Applies the memory locking policy to a freshly mapped region.
///
/// # Returns
/// Whether the region ended up locked and must be unlocked on release.
fn apply_lock<F>(policy: MemoryLock, len: usize, lock: F) -> io::Result<bool>
where
    F: FnOnce() -> io::Result<()>,
{
    match policy {
        MemoryLock::Disabled => Ok(false),
        MemoryLock::Required => lock().map(|()| true),
        MemoryLock::BestEffort => match lock() {
            Ok(()) => Ok(true),
            Err(err) => {
                log::warn!("could not lock {len} bytes of protected memory, continuing unlocked: {err}");
                Ok(false)
            }
        },
    }
}

fn check_length(len: usize) -> io::Result<()> {
    if len > 0 && len <= isize::MAX as usize {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "length out of bounds",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_copy() {
        let memory =
            protected_copy(&[7, 8, 9], MemoryLock::BestEffort).expect("Failed to copy bytes");
        assert_eq!(memory.as_bytes(), &[7, 8, 9]);
    }

    #[test]
    fn test_zero_length_is_rejected() {
        let err = PlatformMemoryMut::with_length(0, MemoryLock::Disabled)
            .err()
            .expect("Zero-length allocation should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_apply_lock_policies() {
        let failing = || Err(io::Error::new(io::ErrorKind::Other, "no lock"));

        assert!(!apply_lock(MemoryLock::Disabled, 1, failing).expect("Disabled never fails"));
        assert!(!apply_lock(MemoryLock::BestEffort, 1, failing).expect("Best effort never fails"));
        assert!(apply_lock(MemoryLock::Required, 1, failing).is_err());
        assert!(apply_lock(MemoryLock::Required, 1, || Ok(())).expect("Lock succeeded"));
    }
}
