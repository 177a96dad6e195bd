use core::{
    any::{type_name, Any, TypeId},
    fmt, mem,
};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    config::Config,
    error::{Error, Result},
    revealed::Revealed,
    sealer::{AeadSealer, Sealer},
    secret::Secret,
};

/// Caller-owned plaintext handed to [`MemoryProtection::secure_data`].
///
/// Only raw bytes and characters are supported; the buffer is borrowed
/// mutably because it gets wiped once sealed.
pub enum SecretData<'a> {
    /// Raw bytes, sealed as they are.
    Bytes(&'a mut [u8]),
    /// Characters, sealed as their UTF-8 encoding.
    Chars(&'a mut [char]),
}

impl SecretData<'_> {
    /// Number of elements (bytes or chars) held by the buffer.
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Chars(chars) => chars.len(),
        }
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reborrow(&mut self) -> SecretData<'_> {
        match self {
            Self::Bytes(bytes) => SecretData::Bytes(&mut **bytes),
            Self::Chars(chars) => SecretData::Chars(&mut **chars),
        }
    }
}

impl Zeroize for SecretData<'_> {
    fn zeroize(&mut self) {
        match self {
            Self::Bytes(bytes) => bytes.zeroize(),
            Self::Chars(chars) => chars.zeroize(),
        }
    }
}

impl<'a> From<&'a mut [u8]> for SecretData<'a> {
    fn from(bytes: &'a mut [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for SecretData<'a> {
    fn from(bytes: &'a mut [u8; N]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a mut Vec<u8>> for SecretData<'a> {
    fn from(bytes: &'a mut Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a mut [char]> for SecretData<'a> {
    fn from(chars: &'a mut [char]) -> Self {
        Self::Chars(chars)
    }
}

impl<'a, const N: usize> From<&'a mut [char; N]> for SecretData<'a> {
    fn from(chars: &'a mut [char; N]) -> Self {
        Self::Chars(chars)
    }
}

impl<'a> From<&'a mut Vec<char>> for SecretData<'a> {
    fn from(chars: &'a mut Vec<char>) -> Self {
        Self::Chars(chars)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for Vec<u8> {}
    impl Sealed for Vec<char> {}
}

/// Representations a secret can be revealed as: `Vec<u8>` or `Vec<char>`.
///
/// This trait is sealed and cannot be implemented outside of this crate.
pub trait Reveal: Zeroize + Default + private::Sealed + Sized {
    /// Builds the representation from the unsealed bytes.
    ///
    /// `plaintext` is wiped when dropped; implementations either move out
    /// of it or copy from it.
    #[doc(hidden)]
    fn from_plaintext(plaintext: Zeroizing<Vec<u8>>) -> Self;
}

impl Reveal for Vec<u8> {
    fn from_plaintext(mut plaintext: Zeroizing<Vec<u8>>) -> Self {
        mem::take(&mut *plaintext)
    }
}

impl Reveal for Vec<char> {
    fn from_plaintext(plaintext: Zeroizing<Vec<u8>>) -> Self {
        let mut len = 0;
        decode_utf8_lossy(&plaintext, |_| len += 1);

        let mut chars = Vec::with_capacity(len);
        decode_utf8_lossy(&plaintext, |c| chars.push(c));
        chars
    }
}

/// Feeds the characters of `bytes` to `sink`, replacing each invalid
/// sequence with U+FFFD.
///
/// Decodes in place: no intermediate string is allocated.
fn decode_utf8_lossy(mut bytes: &[u8], mut sink: impl FnMut(char)) {
    loop {
        match core::str::from_utf8(bytes) {
            Ok(valid) => {
                valid.chars().for_each(&mut sink);
                return;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                if let Ok(valid) = core::str::from_utf8(valid) {
                    valid.chars().for_each(&mut sink);
                }
                sink(char::REPLACEMENT_CHARACTER);

                // `None` means the input ends mid-sequence.
                match err.error_len() {
                    Some(invalid) => bytes = &rest[invalid..],
                    None => return,
                }
            }
        }
    }
}

/// Seals plaintext into [`Secret`]s and reveals it back.
///
/// Every entry point wipes the caller's buffer and its own intermediate
/// buffers before returning, whether the call succeeds or fails.
///
/// # Examples
///
/// ```rust
/// use sealed_mem::MemoryProtection;
///
/// let protection = MemoryProtection::new().unwrap();
///
/// let mut password = vec!['h', 'u', 'n', 't', 'e', 'r', '2'];
/// let secret = protection.secure_data(&mut password).unwrap();
/// assert!(password.iter().all(|&c| c == '\0'));
///
/// let revealed = MemoryProtection::get_data::<Vec<char>>(&secret).unwrap();
/// assert_eq!(revealed.iter().collect::<String>(), "hunter2");
/// ```
#[derive(Clone)]
pub struct MemoryProtection {
    sealer: Arc<dyn Sealer>,
    config: Config,
}

impl MemoryProtection {
    /// Creates a facade with the default configuration and a fresh [`AeadSealer`].
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a facade with a fresh [`AeadSealer`] built from `config`.
    pub fn with_config(config: Config) -> Result<Self> {
        let sealer = AeadSealer::new(&config)?;
        Ok(Self::with_sealer(sealer, config))
    }

    /// Creates a facade around a custom sealing primitive.
    pub fn with_sealer<S>(sealer: S, config: Config) -> Self
    where
        S: Sealer + 'static,
    {
        Self {
            sealer: Arc::new(sealer),
            config,
        }
    }

    /// Returns the process-wide facade, configured from the environment
    /// on first use.
    pub fn global() -> Result<&'static Self> {
        static GLOBAL: OnceCell<MemoryProtection> = OnceCell::new();
        GLOBAL.get_or_try_init(|| Self::with_config(Config::from_env()))
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Seals `data` into a new [`Secret`] and wipes `data`.
    ///
    /// Characters are sealed as UTF-8, so the secret length is the encoded
    /// byte length. `data` is all zeros once this returns, on success and
    /// on every error path.
    ///
    /// # Errors
    /// * [`Error::EmptyInput`] if `data` is empty.
    /// * [`Error::SealingFailure`] if the sealer fails.
    pub fn secure_data<'a, D>(&self, data: D) -> Result<Secret>
    where
        D: Into<SecretData<'a>>,
    {
        let data = Zeroizing::new(data.into());

        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        match &*data {
            SecretData::Bytes(bytes) => Secret::seal(self.sealer.clone(), &**bytes, &self.config),
            SecretData::Chars(chars) => {
                let encoded = encode_utf8(&**chars);
                Secret::seal(self.sealer.clone(), &encoded, &self.config)
            }
        }
    }

    /// Seals a value whose representation is only known at runtime.
    ///
    /// `T` must be `Vec<u8>` or `Vec<char>`; supported values are wiped
    /// exactly as with [`secure_data`](MemoryProtection::secure_data).
    ///
    /// # Errors
    /// * [`Error::NullInput`] if `data` is `None`.
    /// * [`Error::UnsupportedType`] if `T` is neither bytes nor chars.
    pub fn secure_value<T: Any>(&self, data: Option<&mut T>) -> Result<Secret> {
        let data = data.ok_or(Error::NullInput)? as &mut dyn Any;

        if let Some(bytes) = data.downcast_mut::<Vec<u8>>() {
            return self.secure_data(bytes);
        }
        match data.downcast_mut::<Vec<char>>() {
            Some(chars) => self.secure_data(chars),
            None => Err(Error::UnsupportedType(type_name::<T>())),
        }
    }

    /// Unseals `secret` into a fresh buffer of the requested representation.
    ///
    /// Every call returns a new, unaliased buffer, wiped when the returned
    /// [`Revealed`] is dropped. Intermediate buffers are wiped before
    /// returning.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] if the secret has been disposed.
    /// * [`Error::EmptyInput`] if the secret holds no bytes.
    /// * [`Error::SealingFailure`] if the sealer fails.
    pub fn get_data<T: Reveal>(secret: &Secret) -> Result<Revealed<T>> {
        let len = secret.length()?;
        if len == 0 {
            return Err(Error::EmptyInput);
        }

        let mut plaintext = Zeroizing::new(vec![0u8; len]);
        secret.unseal_into(&mut plaintext)?;

        Ok(Revealed::new(T::from_plaintext(plaintext)))
    }

    /// Unseals `secret` into a representation only known at runtime.
    ///
    /// The requested type is checked before anything is unsealed.
    ///
    /// # Errors
    /// * [`Error::NullInput`] if `secret` is `None`.
    /// * [`Error::UnsupportedType`] if `T` is neither `Vec<u8>` nor `Vec<char>`.
    /// * Any error of [`get_data`](MemoryProtection::get_data).
    pub fn get_value<T>(secret: Option<&Secret>) -> Result<Revealed<T>>
    where
        T: Any + Zeroize + Default,
    {
        let secret = secret.ok_or(Error::NullInput)?;

        let revealed: Box<dyn Any> = match TypeId::of::<T>() {
            id if id == TypeId::of::<Vec<u8>>() => {
                Box::new(Self::get_data::<Vec<u8>>(secret)?.detach())
            }
            id if id == TypeId::of::<Vec<char>>() => {
                Box::new(Self::get_data::<Vec<char>>(secret)?.detach())
            }
            _ => return Err(Error::UnsupportedType(type_name::<T>())),
        };

        revealed
            .downcast::<T>()
            .map(|value| Revealed::new(*value))
            .map_err(|_| Error::UnsupportedType(type_name::<T>()))
    }
}

impl fmt::Debug for MemoryProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProtection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Encodes `chars` as UTF-8 into a buffer that wipes itself on drop.
fn encode_utf8(chars: &[char]) -> Zeroizing<Vec<u8>> {
    let len = chars.iter().map(|c| c.len_utf8()).sum();
    // Sized upfront, a reallocation would leave plaintext behind.
    let mut encoded = Zeroizing::new(Vec::with_capacity(len));

    let mut scratch = Zeroizing::new([0u8; 4]);
    for c in chars {
        encoded.extend_from_slice(c.encode_utf8(&mut *scratch).as_bytes());
    }

    encoded
}

/// Seals `data` with the process-wide [`MemoryProtection`].
///
/// See [`MemoryProtection::secure_data`].
pub fn secure_data<'a, D>(data: D) -> Result<Secret>
where
    D: Into<SecretData<'a>>,
{
    // The caller's buffer must be wiped even if the global facade
    // cannot be built.
    let mut data = Zeroizing::new(data.into());
    MemoryProtection::global()?.secure_data(data.reborrow())
}

/// Seals a runtime-typed value with the process-wide [`MemoryProtection`].
///
/// See [`MemoryProtection::secure_value`].
pub fn secure_value<T: Any>(data: Option<&mut T>) -> Result<Secret> {
    MemoryProtection::global()?.secure_value(data)
}

/// Reveals `secret` as `T`. See [`MemoryProtection::get_data`].
pub fn get_data<T: Reveal>(secret: &Secret) -> Result<Revealed<T>> {
    MemoryProtection::get_data(secret)
}

/// Reveals `secret` as a runtime-chosen `T`. See [`MemoryProtection::get_value`].
pub fn get_value<T>(secret: Option<&Secret>) -> Result<Revealed<T>>
where
    T: Any + Zeroize + Default,
{
    MemoryProtection::get_value(secret)
}
