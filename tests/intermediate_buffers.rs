//! Checks that no heap block holding plaintext is released without being
//! wiped first, on the sealing and revealing paths.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    slice,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use sealed_mem::{Config, Error, MemoryLock, MemoryProtection, SealError, Sealer, Zeroizing};

const MARKER: &[u8; 16] = b"Zq7!sealed#mark3";

/// `MARKER` as it sits in memory once collected into a `Vec<char>`.
const CHAR_MARKER: [u8; 64] = {
    let mut out = [0u8; 64];
    let mut i = 0;
    while i < MARKER.len() {
        let at = if cfg!(target_endian = "little") { i * 4 } else { i * 4 + 3 };
        out[at] = MARKER[i];
        i += 1;
    }
    out
};

static ARMED: AtomicBool = AtomicBool::new(false);
static LEAKS: AtomicUsize = AtomicUsize::new(0);
static SERIAL: Mutex<()> = Mutex::new(());

/// Counts released blocks that still contain a marker.
struct ScanningAlloc;

fn contains(block: &[u8], pattern: &[u8]) -> bool {
    block.windows(pattern.len()).any(|w| w == pattern)
}

unsafe impl GlobalAlloc for ScanningAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ARMED.load(Ordering::SeqCst) {
            let block = slice::from_raw_parts(ptr, layout.size());
            if contains(block, MARKER) || contains(block, &CHAR_MARKER) {
                LEAKS.fetch_add(1, Ordering::SeqCst);
            }
        }
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: ScanningAlloc = ScanningAlloc;

/// Runs `f` and returns how many plaintext blocks it released unwiped.
fn leaks_during(f: impl FnOnce()) -> usize {
    let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);

    LEAKS.store(0, Ordering::SeqCst);
    ARMED.store(true, Ordering::SeqCst);
    f();
    ARMED.store(false, Ordering::SeqCst);

    LEAKS.load(Ordering::SeqCst)
}

fn protection() -> MemoryProtection {
    MemoryProtection::with_config(Config::default().with_memory_lock(MemoryLock::Disabled))
        .expect("Failed to create memory protection")
}

fn marker_chars() -> Vec<char> {
    MARKER.iter().map(|&b| char::from(b)).collect()
}

struct FailingSealer;

impl Sealer for FailingSealer {
    fn seal(&self, _: &[u8]) -> Result<Vec<u8>, SealError> {
        Err(SealError::Crypto)
    }

    fn unseal(&self, _: &[u8]) -> Result<Zeroizing<Vec<u8>>, SealError> {
        Err(SealError::Crypto)
    }
}

/// Stores the plaintext as-is.
struct PlainSealer;

impl Sealer for PlainSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        Ok(plaintext.to_vec())
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, SealError> {
        Ok(Zeroizing::new(sealed.to_vec()))
    }
}

#[test]
fn unwiped_plaintext_is_detected() {
    let leaks = leaks_during(|| {
        let mut data = MARKER.to_vec();
        let secret = protection().secure_data(&mut data).expect("Failed to secure");

        let detached = sealed_mem::get_data::<Vec<u8>>(&secret)
            .expect("Failed to reveal")
            .detach();
        assert_eq!(detached.as_slice(), MARKER);
    });

    assert!(leaks > 0);
}

#[test]
fn byte_round_trip_leaves_no_plaintext() {
    let leaks = leaks_during(|| {
        let mut data = MARKER.to_vec();
        let secret = protection().secure_data(&mut data).expect("Failed to secure");

        let revealed = sealed_mem::get_data::<Vec<u8>>(&secret).expect("Failed to reveal");
        assert_eq!(revealed.as_slice(), MARKER);
    });

    assert_eq!(leaks, 0);
}

#[test]
fn char_round_trip_leaves_no_plaintext() {
    let leaks = leaks_during(|| {
        let mut data = marker_chars();
        let secret = protection().secure_data(&mut data).expect("Failed to secure");

        let chars = sealed_mem::get_data::<Vec<char>>(&secret).expect("Failed to reveal");
        assert!(chars.iter().copied().eq(MARKER.iter().map(|&b| char::from(b))));

        let bytes = sealed_mem::get_data::<Vec<u8>>(&secret).expect("Failed to reveal");
        assert_eq!(bytes.as_slice(), MARKER);
    });

    assert_eq!(leaks, 0);
}

#[test]
fn sealing_failure_leaves_no_plaintext() {
    let leaks = leaks_during(|| {
        let protection = MemoryProtection::with_sealer(FailingSealer, Config::default());

        let mut chars = marker_chars();
        assert!(matches!(
            protection.secure_data(&mut chars),
            Err(Error::SealingFailure(SealError::Crypto))
        ));

        let mut bytes = MARKER.to_vec();
        assert!(matches!(
            protection.secure_data(&mut bytes),
            Err(Error::SealingFailure(SealError::Crypto))
        ));
    });

    assert_eq!(leaks, 0);
}

#[test]
fn invalid_utf8_reveal_leaves_no_plaintext() {
    let leaks = leaks_during(|| {
        let protection = MemoryProtection::with_sealer(PlainSealer, Config::default());

        let mut data = Vec::with_capacity(MARKER.len() + 2);
        data.push(0xff);
        data.extend_from_slice(MARKER);
        data.push(0xc3);
        let secret = protection.secure_data(&mut data).expect("Failed to secure");

        let chars = MemoryProtection::get_data::<Vec<char>>(&secret).expect("Failed to reveal");
        assert_eq!(chars.len(), MARKER.len() + 2);
        assert_eq!(chars[0], char::REPLACEMENT_CHARACTER);
        assert_eq!(chars[MARKER.len() + 1], char::REPLACEMENT_CHARACTER);
    });

    assert_eq!(leaks, 0);
}
