//! PBKDF2 key derivation, parameterised at runtime by the HMAC digest (or, for the
//! ASCON-128 codec, by the ASCON sponge used as the PBKDF2 PRF).
//!
//! Every derivation here produces raw key bytes into a caller-supplied fixed-size buffer;
//! callers wrap the result in [`crate::primitives::zero::Protected`] immediately.

use ascon_hash::AsconHash;
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::{Result, ShimError};
use crate::primitives::mac::DigestAlgorithm;

/// Runs PBKDF2-HMAC-`algorithm` of `password` and `salt` for `iterations` rounds, filling
/// `out` (whose length determines the derived key size).
pub fn pbkdf2_derive(algorithm: DigestAlgorithm, password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) -> Result<()> {
    if iterations == 0 {
        return Err(ShimError::Parameter("kdf_iter must be at least 1".into()));
    }
    match algorithm {
        DigestAlgorithm::Sha1 => pbkdf2_hmac::<Sha1>(password, salt, iterations, out),
        DigestAlgorithm::Sha256 => pbkdf2_hmac::<Sha256>(password, salt, iterations, out),
        DigestAlgorithm::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, iterations, out),
        DigestAlgorithm::Md5 => return Err(ShimError::Parameter("md5 is not a supported kdf_algorithm".into())),
    }
    Ok(())
}

/// ASCON-PBKDF2: PBKDF2 with ASCON-HASH standing in for the HMAC compression function,
/// used only by the ASCON-128 codec's key derivation.
pub fn ascon_pbkdf2_derive(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) -> Result<()> {
    if iterations == 0 {
        return Err(ShimError::Parameter("kdf_iter must be at least 1".into()));
    }
    pbkdf2_hmac::<AsconHash>(password, salt, iterations, out);
    Ok(())
}

/// XORs `mask` into every byte of `salt`, producing the salt used for the SQLCipher-style
/// HMAC-subkey derivation pass (`hmac_salt_mask`, default `0x3A`).
pub fn mask_salt(salt: &[u8], mask: u8) -> Vec<u8> {
    salt.iter().map(|b| b ^ mask).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_deterministic_key() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        pbkdf2_derive(DigestAlgorithm::Sha256, b"secret", &[0u8; 16], 1000, &mut a).unwrap();
        pbkdf2_derive(DigestAlgorithm::Sha256, b"secret", &[0u8; 16], 1000, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_salt_different_key() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        pbkdf2_derive(DigestAlgorithm::Sha1, b"secret", &[0u8; 16], 100, &mut a).unwrap();
        pbkdf2_derive(DigestAlgorithm::Sha1, b"secret", &[1u8; 16], 100, &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mask_salt_xors_each_byte() {
        let salt = [0x00u8, 0xFF, 0x3A];
        let masked = mask_salt(&salt, 0x3A);
        assert_eq!(masked, [0x3A, 0xC5, 0x00]);
    }

    #[test]
    fn rejects_zero_iterations() {
        let mut out = [0u8; 16];
        assert!(pbkdf2_derive(DigestAlgorithm::Sha256, b"x", b"y", 0, &mut out).is_err());
    }
}
