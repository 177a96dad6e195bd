//! Sealing of short-lived sensitive data held in process memory.
//!
//! A plaintext buffer (bytes or characters) is turned into an opaque
//! [`Secret`] with [`secure_data`]; the buffer is wiped before the call
//! returns, whatever the outcome. [`get_data`] unseals a secret into a fresh
//! [`Revealed`] buffer that wipes itself on drop.
//!
//! ```rust
//! let mut key = [10u8, 33, 42, 95, 2];
//! let secret = sealed_mem::secure_data(&mut key).unwrap();
//! assert_eq!(key, [0; 5]);
//!
//! let revealed = sealed_mem::get_data::<Vec<u8>>(&secret).unwrap();
//! assert_eq!(revealed.as_slice(), &[10, 33, 42, 95, 2]);
//! ```

mod alloc;
mod config;
mod error;
mod protection;
mod revealed;
mod sealer;
mod secret;

pub use config::{Config, MemoryLock, UnknownMemoryLock, MEMORY_LOCK_ENV};
pub use error::{Error, Result, SealError};
pub use protection::{
    get_data, get_value, secure_data, secure_value, MemoryProtection, Reveal, SecretData,
};
pub use revealed::Revealed;
pub use sealer::{AeadSealer, Sealer};
pub use secret::Secret;
pub use zeroize::Zeroizing;
