//! Legacy RC4 page codec.
//!
//! No KDF, no MAC, no nonce: the password bytes key the stream cipher directly, with no
//! per-page folding of the key or keystream position. Kept only for reading files written
//! by very old installations; never the default and never recommended by the registry's
//! parameter schema.

use aes::cipher::generic_array::typenum::U32;
use aes::cipher::generic_array::GenericArray;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::ciphers::{CipherFactory, CipherParameter, CipherState};
use crate::error::{Result, ShimError};
use crate::primitives::Protected;

pub struct Rc4State {
    key: Option<Protected<Vec<u8>>>,
}

impl Rc4State {
    fn new() -> Self {
        Self { key: None }
    }

    fn require_key(&self) -> Result<&[u8]> {
        self.key.as_ref().map(|k| k.expose().as_slice()).ok_or_else(|| ShimError::Misuse("rc4: no key set".into()))
    }

    /// Keys the stream cipher with the password directly, with no derivation: `Rc4`'s key
    /// length is a type-level constant, so a password shorter than it is cycled to fill the
    /// array, which is exactly what the classic RC4 key-scheduling algorithm does with
    /// short keys — not a hash, just repetition. The keystream always starts at position 0,
    /// so (as with real legacy RC4-encrypted databases) identical plaintext pages under the
    /// same key produce identical ciphertext; there is no nonce to prevent that.
    fn page_keystream(key: &[u8], len: usize) -> Vec<u8> {
        let mut key_bytes = GenericArray::<u8, U32>::default();
        for (i, b) in key_bytes.iter_mut().enumerate() {
            *b = key[i % key.len()];
        }
        let mut cipher = Rc4::new(&key_bytes);
        let mut out = vec![0u8; len];
        cipher.apply_keystream(&mut out);
        out
    }
}

impl CipherState for Rc4State {
    fn legacy(&self) -> bool {
        true
    }

    fn page_size(&self) -> u32 {
        0
    }

    fn reserved_bytes(&self) -> u8 {
        0
    }

    fn salt(&self) -> Option<[u8; 16]> {
        None
    }

    fn generate_key(&mut self, password: &[u8], _rekey: bool, _salt_override: Option<[u8; 16]>) -> Result<()> {
        if password.is_empty() {
            return Err(ShimError::KeyDerivation("empty key not accepted".into()));
        }
        self.key = Some(Protected::new(password.to_vec()));
        Ok(())
    }

    fn encrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to rc4 codec".into()));
        }
        let key = self.require_key()?;
        let offset = if page_no == 1 { crate::config::PAGE1_OFFSET_LEGACY } else { 0 };
        let body_end = buffer.len().saturating_sub(reserved as usize);
        let keystream = Self::page_keystream(key, body_end - offset);
        for (b, k) in buffer[offset..body_end].iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
        Ok(())
    }

    fn decrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8, _verify_mac: bool) -> Result<()> {
        // RC4 is its own inverse: XOR with the identical keystream undoes encryption.
        // `verify_mac` is accepted for trait-contract uniformity but there's nothing to verify.
        self.encrypt_page(page_no, buffer, reserved)
    }

    fn box_clone(&self) -> Box<dyn CipherState> {
        Box::new(Rc4State { key: self.key.clone() })
    }
}

pub struct Rc4Factory;

impl CipherFactory for Rc4Factory {
    fn name(&self) -> &'static str {
        "rc4"
    }

    fn allocate(&self) -> Box<dyn CipherState> {
        Box::new(Rc4State::new())
    }

    fn parameters(&self) -> Vec<CipherParameter> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> Rc4State {
        let mut s = Rc4State::new();
        s.generate_key(b"secret", false, None).unwrap();
        s
    }

    #[test]
    fn roundtrip() {
        let state = keyed();
        let mut page = vec![0x42u8; 1024];
        let original = page.clone();
        state.encrypt_page(3, &mut page, 0).unwrap();
        assert_ne!(page, original);
        state.decrypt_page(3, &mut page, 0, true).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn page1_header_left_untouched() {
        let state = keyed();
        let mut page = vec![0u8; 512];
        page[..16].copy_from_slice(crate::config::FILE_MAGIC);
        state.encrypt_page(1, &mut page, 0).unwrap();
        assert_eq!(&page[..16], crate::config::FILE_MAGIC);
    }

    #[test]
    fn identical_plaintext_pages_produce_identical_ciphertext() {
        // No KDF, no nonce: the keystream is the same for every page under one key, so
        // this is the expected (weak) behavior of the legacy cipher, not a bug.
        let state = keyed();
        let mut p2 = vec![0x11u8; 512];
        let mut p3 = vec![0x11u8; 512];
        state.encrypt_page(2, &mut p2, 0).unwrap();
        state.encrypt_page(3, &mut p3, 0).unwrap();
        assert_eq!(p2, p3);
    }
}
