//! Cryptographic primitives: key derivation, message authentication, and secure zeroing.
//!
//! Block ciphers, the stream cipher, and the AEAD constructions live under
//! [`crate::ciphers`] next to the codec that uses each one — they're not shared primitives,
//! they're the per-scheme contract itself. This module holds the pieces every codec needs
//! regardless of which cipher it wraps.

pub mod kdf;
pub mod mac;
pub mod zero;

pub use mac::DigestAlgorithm;
pub use zero::Protected;

use zeroize::Zeroize;

/// Zeroizes a scratch buffer in place. Exists as a free function (rather than requiring
/// every scratch buffer to be wrapped in [`Protected`]) for the hot page-buffer path in
/// the codec facade, where wrapping and unwrapping on every page would cost an allocation.
#[inline]
pub fn secure_zero(buf: &mut [u8]) {
    buf.zeroize();
}
