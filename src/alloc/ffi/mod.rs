use std::sync::OnceLock;

#[cfg(target_family = "unix")]
pub mod unix;
#[cfg(target_family = "windows")]
pub mod windows;

/// Retrieves the system's page size, cached after the first call.
///
/// # Platform-specific behavior
/// - **Unix-based systems:** `libc::vm_page_size` on macOS, `sysconf` elsewhere.
/// - **Windows:** the `dwPageSize` field of `GetSystemInfo`.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    #[cfg(target_family = "unix")]
    {
        *PAGE_SIZE.get_or_init(self::unix::page_size)
    }
    #[cfg(target_family = "windows")]
    {
        *PAGE_SIZE.get_or_init(self::windows::page_size)
    }
}

/// Rounds `len` up to a whole number of pages.
#[inline]
pub fn page_aligned(len: usize) -> usize {
    let page_size = self::page_size();
    (len + page_size - 1) / page_size * page_size
}
