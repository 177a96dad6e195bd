use core::{fmt, mem};

use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, MAX_TAG_LEN, NONCE_LEN},
    rand::{SecureRandom, SystemRandom},
};
use zeroize::Zeroizing;

use crate::{
    alloc::{PlatformMemory, PlatformMemoryMut, ProtectedMemory, ProtectedMemoryMut},
    config::Config,
    error::SealError,
};

/// Length of the per-process ChaCha20-Poly1305 key.
const KEY_LEN: usize = 32;

/// A primitive that encrypts plaintext at rest in memory.
///
/// Implementations must be deterministic for the lifetime of the process
/// (`unseal` always recovers exactly what `seal` was given) and must not
/// keep references to their inputs.
pub trait Sealer: Send + Sync {
    /// Seals `plaintext` into an opaque blob.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError>;

    /// Recovers the plaintext of a blob produced by [`Sealer::seal`].
    ///
    /// The plaintext is returned in a buffer that wipes itself on drop.
    fn unseal(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, SealError>;
}

/// Default [`Sealer`] backed by ChaCha20-Poly1305.
///
/// The key is drawn from the system CSPRNG when the sealer is built and is
/// kept in read-only protected memory until the sealer is dropped.
/// Each blob is laid out as `nonce || ciphertext || tag`.
pub struct AeadSealer {
    key: PlatformMemory,
    rng: SystemRandom,
}

impl AeadSealer {
    /// Number of bytes a sealed blob carries on top of its plaintext.
    pub const OVERHEAD: usize = NONCE_LEN + MAX_TAG_LEN;

    /// Creates a sealer with a fresh random key.
    pub fn new(config: &Config) -> Result<Self, SealError> {
        let rng = SystemRandom::new();

        let mut key = PlatformMemoryMut::with_length(KEY_LEN, config.memory_lock)?;
        rng.fill(key.as_bytes_mut())?;
        let key = key.into_read_only()?;

        log::debug!("created AEAD sealer (memory lock: {})", config.memory_lock);
        Ok(Self { key, rng })
    }

    fn cipher(&self) -> Result<LessSafeKey, SealError> {
        let key = UnboundKey::new(&CHACHA20_POLY1305, self.key.as_bytes())?;
        Ok(LessSafeKey::new(key))
    }
}

impl Sealer for AeadSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let cipher = self.cipher()?;

        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce)?;

        // Sized upfront so the plaintext never lingers in a reallocated buffer.
        let mut sealed = Zeroizing::new(Vec::with_capacity(plaintext.len() + Self::OVERHEAD));
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(plaintext);

        let tag = cipher.seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut sealed[NONCE_LEN..],
        )?;
        sealed.extend_from_slice(tag.as_ref());

        Ok(mem::take(&mut *sealed))
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, SealError> {
        if sealed.len() < Self::OVERHEAD {
            return Err(SealError::Malformed("shorter than nonce and tag"));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)?;

        let mut plaintext = Zeroizing::new(ciphertext.to_vec());
        let len = self
            .cipher()?
            .open_in_place(nonce, Aad::empty(), &mut plaintext)?
            .len();
        plaintext.truncate(len);

        Ok(plaintext)
    }
}

impl fmt::Debug for AeadSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadSealer").finish_non_exhaustive()
    }
}
