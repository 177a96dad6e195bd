use core::{fmt, mem, ops::Deref};

use zeroize::Zeroize;

/// Plaintext recovered from a [`Secret`](crate::Secret).
///
/// The value is wiped when the wrapper is dropped. Use
/// [`detach`](Revealed::detach) to take the raw value out, after which
/// wiping it is up to the caller.
///
/// Only the elements can be modified in place: growing the buffer would
/// release its old allocation without wiping it.
///
/// ```rust
/// let mut key = [1u8, 2, 3];
/// let secret = sealed_mem::secure_data(&mut key).unwrap();
///
/// let mut revealed = sealed_mem::get_data::<Vec<u8>>(&secret).unwrap();
/// revealed.as_mut_slice()[0] = 9;
/// assert_eq!(revealed.as_slice(), &[9, 2, 3]);
/// ```
///
/// ```rust,compile_fail
/// let mut key = [1u8, 2, 3];
/// let secret = sealed_mem::secure_data(&mut key).unwrap();
///
/// let mut revealed = sealed_mem::get_data::<Vec<u8>>(&secret).unwrap();
/// revealed.push(4);
/// ```
pub struct Revealed<T: Zeroize + Default> {
    inner: T,
}

impl<T: Zeroize + Default> Revealed<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Takes the plaintext out of the wrapper without wiping it.
    ///
    /// The caller now owns the plaintext and must zeroize it once done.
    #[must_use = "the detached plaintext has to be wiped by the caller"]
    pub fn detach(mut self) -> T {
        mem::take(&mut self.inner)
    }
}

impl<T: Zeroize + Default> Deref for Revealed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<E> Revealed<Vec<E>>
where
    Vec<E>: Zeroize,
{
    /// Returns the plaintext elements for in-place modification.
    pub fn as_mut_slice(&mut self) -> &mut [E] {
        self.inner.as_mut_slice()
    }
}

impl<E> AsMut<[E]> for Revealed<Vec<E>>
where
    Vec<E>: Zeroize,
{
    fn as_mut(&mut self) -> &mut [E] {
        self.as_mut_slice()
    }
}

impl<T: Zeroize + Default> Drop for Revealed<T> {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl<T: Zeroize + Default> fmt::Debug for Revealed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Revealed([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_keeps_contents() {
        let revealed = Revealed::new(vec![1u8, 2, 3]);
        assert_eq!(revealed.detach(), vec![1, 2, 3]);
    }

    #[test]
    fn test_as_mut_slice_keeps_allocation() {
        let mut revealed = Revealed::new(vec!['a', 'b']);
        let before = (revealed.as_ptr(), revealed.capacity());

        revealed.as_mut_slice()[0] = 'z';
        revealed.as_mut()[1] = 'y';

        assert_eq!(revealed.as_slice(), &['z', 'y']);
        assert_eq!((revealed.as_ptr(), revealed.capacity()), before);
    }

    #[test]
    fn test_debug_is_redacted() {
        let revealed = Revealed::new(b"password".to_vec());
        assert_eq!(format!("{revealed:?}"), "Revealed([REDACTED])");
    }
}
