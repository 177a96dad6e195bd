use core::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::{
    alloc::{self, PlatformMemory, ProtectedMemory},
    config::Config,
    error::{Error, Result, SealError},
    sealer::Sealer,
};

/// An opaque container for sealed sensitive data.
///
/// A `Secret` owns its sealed blob exclusively; the blob lives in protected
/// memory and is never exposed. Only the plaintext length and
/// [`unseal_into`](Secret::unseal_into) are available.
///
/// A secret is either *sealed* or *disposed*. [`dispose`](Secret::dispose)
/// (or dropping the secret) overwrites the blob with zeros and releases it;
/// any later [`length`](Secret::length) or `unseal_into` call fails with
/// [`Error::InvalidState`].
///
/// `unseal_into` only needs `&self`, disposal needs `&mut self`: sharing a
/// secret across threads is safe, disposal is serialized by the borrow
/// checker.
pub struct Secret {
    sealer: Arc<dyn Sealer>,
    blob: Option<PlatformMemory>,
    len: usize,
}

impl Secret {
    /// Seals `plaintext` with `sealer` and moves the blob into protected memory.
    pub(crate) fn seal(sealer: Arc<dyn Sealer>, plaintext: &[u8], config: &Config) -> Result<Self> {
        let sealed = Zeroizing::new(sealer.seal(plaintext)?);
        let blob = alloc::protected_copy(&sealed, config.memory_lock)?;

        log::debug!(
            "sealed {} bytes into a {} bytes blob",
            plaintext.len(),
            sealed.len()
        );

        Ok(Self {
            sealer,
            blob: Some(blob),
            len: plaintext.len(),
        })
    }

    /// Returns the length in bytes of the sealed plaintext.
    ///
    /// This is the plaintext length, not the length of the sealed blob.
    pub fn length(&self) -> Result<usize> {
        self.blob.as_ref().map(|_| self.len).ok_or(Error::InvalidState)
    }

    /// Whether the secret has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.blob.is_none()
    }

    /// Unseals the plaintext into `buffer`.
    ///
    /// The secret is left untouched and can be unsealed again.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] if the secret has been disposed.
    /// * [`Error::SizeMismatch`] if `buffer` is not exactly [`length`](Secret::length) bytes long.
    /// * [`Error::SealingFailure`] if the sealer fails.
    pub fn unseal_into(&self, buffer: &mut [u8]) -> Result<()> {
        let blob = self.blob.as_ref().ok_or(Error::InvalidState)?;

        if buffer.len() != self.len {
            return Err(Error::SizeMismatch {
                expected: self.len,
                actual: buffer.len(),
            });
        }

        let plaintext = self.sealer.unseal(blob.as_bytes())?;
        if plaintext.len() != self.len {
            return Err(SealError::LengthMismatch {
                expected: self.len,
                actual: plaintext.len(),
            }
            .into());
        }

        buffer.copy_from_slice(&plaintext);
        log::debug!("unsealed {} bytes", self.len);
        Ok(())
    }

    /// Wipes and releases the sealed blob.
    ///
    /// Calling it on an already disposed secret is a no-op.
    pub fn dispose(&mut self) {
        if let Some(blob) = self.blob.take() {
            // Dropping the region zeroes it before releasing it.
            drop(blob);
            log::debug!("disposed secret of {} bytes", self.len);
        }
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.len)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{config::MemoryLock, sealer::AeadSealer};

    fn config() -> Config {
        Config::default().with_memory_lock(MemoryLock::Disabled)
    }

    fn seal(plaintext: &[u8]) -> Secret {
        let sealer = AeadSealer::new(&config()).expect("Failed to create sealer");
        Secret::seal(Arc::new(sealer), plaintext, &config()).expect("Failed to seal")
    }

    /// Reverses the plaintext and counts unseal calls.
    #[derive(Default)]
    struct ReverseSealer {
        unseals: AtomicUsize,
    }

    impl Sealer for ReverseSealer {
        fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, SealError> {
            Ok(plaintext.iter().rev().copied().collect())
        }

        fn unseal(&self, sealed: &[u8]) -> std::result::Result<Zeroizing<Vec<u8>>, SealError> {
            self.unseals.fetch_add(1, Ordering::SeqCst);
            Ok(Zeroizing::new(sealed.iter().rev().copied().collect()))
        }
    }

    /// Returns one byte too many when unsealing.
    struct LongSealer;

    impl Sealer for LongSealer {
        fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, SealError> {
            Ok(plaintext.to_vec())
        }

        fn unseal(&self, sealed: &[u8]) -> std::result::Result<Zeroizing<Vec<u8>>, SealError> {
            let mut plaintext = sealed.to_vec();
            plaintext.push(0);
            Ok(Zeroizing::new(plaintext))
        }
    }

    #[test]
    fn test_length_is_plaintext_length() {
        let secret = seal(&[1, 2, 3]);
        assert_eq!(secret.length().expect("Secret is sealed"), 3);
        assert!(!secret.is_disposed());
    }

    #[test]
    fn test_unseal_into_is_repeatable() {
        let secret = seal(b"swordfish");

        for _ in 0..3 {
            let mut buffer = [0u8; 9];
            secret.unseal_into(&mut buffer).expect("Failed to unseal");
            assert_eq!(&buffer, b"swordfish");
        }
    }

    #[test]
    fn test_unseal_into_rejects_every_mismatched_length() {
        let secret = seal(&[9; 8]);

        for len in (0..32).filter(|&len| len != 8) {
            let mut buffer = vec![0u8; len];
            match secret.unseal_into(&mut buffer) {
                Err(Error::SizeMismatch { expected, actual }) => {
                    assert_eq!(expected, 8);
                    assert_eq!(actual, len);
                }
                other => panic!("Unexpected result for length {len}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_dispose_is_terminal_and_idempotent() {
        let mut secret = seal(&[1, 2, 3]);
        secret.dispose();
        secret.dispose();

        assert!(secret.is_disposed());
        assert!(matches!(secret.length(), Err(Error::InvalidState)));

        let mut buffer = [0u8; 3];
        assert!(matches!(
            secret.unseal_into(&mut buffer),
            Err(Error::InvalidState)
        ));
        // Disposed state takes precedence over a size mismatch.
        assert!(matches!(
            secret.unseal_into(&mut []),
            Err(Error::InvalidState)
        ));
    }

    #[test]
    fn test_unseal_goes_through_the_sealer() {
        let sealer = Arc::new(ReverseSealer::default());
        let secret = Secret::seal(sealer.clone(), b"abc", &config()).expect("Failed to seal");

        let mut buffer = [0u8; 3];
        secret.unseal_into(&mut buffer).expect("Failed to unseal");
        secret.unseal_into(&mut buffer).expect("Failed to unseal");

        assert_eq!(&buffer, b"abc");
        assert_eq!(sealer.unseals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unexpected_unsealed_length_fails() {
        let secret = Secret::seal(Arc::new(LongSealer), b"abc", &config()).expect("Failed to seal");

        let mut buffer = [0u8; 3];
        assert!(matches!(
            secret.unseal_into(&mut buffer),
            Err(Error::SealingFailure(SealError::LengthMismatch {
                expected: 3,
                actual: 4
            }))
        ));
        assert_eq!(buffer, [0u8; 3]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = seal(b"topsecret");
        let debug = format!("{secret:?}");
        assert!(debug.contains("len: 9"));
        assert!(!debug.contains("topsecret"));
    }
}
