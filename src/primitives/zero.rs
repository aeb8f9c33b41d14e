use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::ops::Deref;

use zeroize::Zeroize;

/// Wraps key material or a derived subkey so it is zeroized on every exit path,
/// including error paths, rather than relying on the holder to remember to wipe it.
#[derive(Clone)]
pub struct Protected<T>
where
    T: Zeroize,
{
    data: T,
}

impl<T> Deref for Protected<T>
where
    T: Zeroize,
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> Protected<T>
where
    T: Zeroize,
{
    pub fn new(value: T) -> Self {
        Protected { data: value }
    }

    pub fn expose(&self) -> &T {
        &self.data
    }
}

impl<T> Drop for Protected<T>
where
    T: Zeroize,
{
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl<T> Debug for Protected<T>
where
    T: Zeroize,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_leaks() {
        let p = Protected::new(vec![1u8, 2, 3]);
        assert_eq!(format!("{p:?}"), "[REDACTED]");
    }

    #[test]
    fn deref_exposes_value() {
        let p = Protected::new([0xAAu8; 4]);
        assert_eq!(*p, [0xAA; 4]);
        assert_eq!(p.expose(), &[0xAA; 4]);
    }
}
