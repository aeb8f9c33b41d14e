//! ChaCha20-Poly1305 page codec.
//!
//! Deliberately does not use the `chacha20poly1305` crate's combined AEAD: the per-page
//! construction here derives a *one-time* Poly1305 key from a raw ChaCha20 keystream
//! block rather than the RFC 8439 "first block, counter 0" convention, and needs direct
//! access to the keystream to do it. `chacha20` and `poly1305` are used as the two
//! primitives they wrap.
//!
//! # Page-1 offset
//!
//! The source material this codec is modelled on is inconsistent about how many leading
//! bytes of page 1 stay plaintext for the non-legacy variant — 0 in some descriptions, 24
//! in others, interacting with an unrelated `plaintext_header_size` setting that belongs
//! to the SQLCipher codec, not this one. This implementation fixes one rule and enforces
//! it: **legacy ChaCha20 uses a 16-byte page-1 offset** (consistent with every other
//! legacy scheme); **non-legacy ChaCha20 uses a 24-byte page-1 offset** (16 bytes of
//! key-salt plus the first 8 bytes of this page's own nonce, so an unaware reader sees
//! neither). A page-1 write under any other boundary is rejected rather than silently
//! producing a file only some readers can open — see `DESIGN.md`.

use chacha20::cipher::generic_array::GenericArray;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use poly1305::universal_hash::UniversalHash;
use poly1305::{Key as Poly1305Key, Poly1305};
use rand::RngCore;

use crate::ciphers::{CipherFactory, CipherParameter, CipherState};
use crate::config::{CHACHA20_KDF_ITER_DEFAULT, CHACHA20_KDF_ITER_LEGACY, CHACHA20_PAGE_SIZE_LEGACY, CHACHA20_RESERVED_BYTES, KEY_SALT_SIZE, KEY_SIZE, PAGE1_OFFSET_LEGACY, PAGE1_OFFSET_NONLEGACY};
use crate::error::{Result, ShimError};
use crate::primitives::kdf::pbkdf2_derive;
use crate::primitives::mac::DigestAlgorithm;
use crate::primitives::Protected;

const NONCE_SIZE: usize = 16;
const TAG_SIZE: usize = 16;

/// Runs the ChaCha20 block function at `counter`, returning 64 bytes of keystream.
fn keystream_block(key: &[u8; KEY_SIZE], nonce12: &[u8; 12], counter: u32) -> [u8; 64] {
    let mut cipher = ChaCha20::new(GenericArray::from_slice(key), GenericArray::from_slice(nonce12));
    cipher.seek(u64::from(counter) * 64);
    let mut block = [0u8; 64];
    cipher.apply_keystream(&mut block);
    block
}

/// Derives the per-page one-time key pair from the 64-byte keystream block at
/// `counter = LE32(nonce[12..16]) XOR page_no`: bytes `[0,32)` are the Poly1305 one-time
/// key, bytes `[32,64)` seed the page-body keystream starting at `counter + 1`.
fn one_time_key(key: &[u8; KEY_SIZE], nonce16: &[u8; NONCE_SIZE], page_no: u32) -> (Poly1305Key, [u8; 12], u32) {
    let nonce12: [u8; 12] = nonce16[..12].try_into().expect("12 of 16 bytes");
    let counter_seed = u32::from_le_bytes(nonce16[12..16].try_into().expect("4 bytes"));
    let counter = counter_seed ^ page_no;
    let block = keystream_block(key, &nonce12, counter);
    let mut poly_key = Poly1305Key::default();
    poly_key.copy_from_slice(&block[..32]);
    (poly_key, nonce12, counter + 1)
}

fn body_keystream(key: &[u8; KEY_SIZE], nonce12: &[u8; 12], start_counter: u32, len: usize) -> Vec<u8> {
    let mut cipher = ChaCha20::new(GenericArray::from_slice(key), GenericArray::from_slice(nonce12));
    cipher.seek(u64::from(start_counter) * 64);
    let mut out = vec![0u8; len];
    cipher.apply_keystream(&mut out);
    out
}

fn poly1305_tag(poly_key: &Poly1305Key, ciphertext: &[u8], nonce16: &[u8; NONCE_SIZE]) -> [u8; TAG_SIZE] {
    let mut mac = Poly1305::new(poly_key);
    mac.update_padded(ciphertext);
    mac.update_padded(nonce16);
    mac.finalize().into()
}

pub struct ChaCha20Poly1305State {
    key: Option<Protected<[u8; KEY_SIZE]>>,
    legacy: bool,
    kdf_iter: u32,
    salt: Option<[u8; KEY_SALT_SIZE]>,
}

impl ChaCha20Poly1305State {
    fn new() -> Self {
        Self { key: None, legacy: false, kdf_iter: CHACHA20_KDF_ITER_DEFAULT, salt: None }
    }

    fn page1_offset(&self) -> usize {
        if self.legacy { PAGE1_OFFSET_LEGACY } else { PAGE1_OFFSET_NONLEGACY }
    }

    fn require_key(&self) -> Result<&[u8; KEY_SIZE]> {
        self.key.as_ref().map(Protected::expose).ok_or_else(|| ShimError::Misuse("chacha20: no key set".into()))
    }
}

impl CipherState for ChaCha20Poly1305State {
    fn legacy(&self) -> bool {
        self.legacy
    }

    fn page_size(&self) -> u32 {
        if self.legacy { CHACHA20_PAGE_SIZE_LEGACY } else { 0 }
    }

    fn reserved_bytes(&self) -> u8 {
        CHACHA20_RESERVED_BYTES
    }

    fn salt(&self) -> Option<[u8; 16]> {
        self.salt
    }

    fn generate_key(&mut self, password: &[u8], _rekey: bool, salt_override: Option<[u8; 16]>) -> Result<()> {
        if password.is_empty() {
            return Err(ShimError::KeyDerivation("empty key not accepted".into()));
        }
        let iterations = if self.legacy { CHACHA20_KDF_ITER_LEGACY } else { self.kdf_iter };
        let salt = match salt_override {
            Some(s) => s,
            None => {
                let mut s = [0u8; KEY_SALT_SIZE];
                rand::thread_rng().fill_bytes(&mut s);
                s
            }
        };
        let mut derived = [0u8; KEY_SIZE];
        pbkdf2_derive(DigestAlgorithm::Sha256, password, &salt, iterations, &mut derived)?;
        self.key = Some(Protected::new(derived));
        self.salt = Some(salt);
        Ok(())
    }

    fn encrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to chacha20 codec".into()));
        }
        let key = self.require_key()?;
        let offset = if page_no == 1 { self.page1_offset() } else { 0 };
        let body_end = buffer.len().checked_sub(reserved as usize).ok_or_else(|| ShimError::Corrupt("page shorter than reserved bytes".into()))?;
        if offset > body_end {
            return Err(ShimError::Corrupt("page too small for header offset".into()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let (poly_key, nonce12, body_counter) = one_time_key(key, &nonce, page_no);
        let body = &mut buffer[offset..body_end];
        let keystream = body_keystream(key, &nonce12, body_counter, body.len());
        for (b, k) in body.iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
        let tag = poly1305_tag(&poly_key, &buffer[offset..body_end], &nonce);

        let trailer = &mut buffer[body_end..];
        trailer[..NONCE_SIZE].copy_from_slice(&nonce);
        trailer[NONCE_SIZE..NONCE_SIZE + TAG_SIZE].copy_from_slice(&tag);
        Ok(())
    }

    fn decrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8, verify_mac: bool) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to chacha20 codec".into()));
        }
        let key = self.require_key()?;
        let offset = if page_no == 1 { self.page1_offset() } else { 0 };
        let body_end = buffer.len().checked_sub(reserved as usize).ok_or_else(|| ShimError::Corrupt("page shorter than reserved bytes".into()))?;
        if offset > body_end || reserved as usize != NONCE_SIZE + TAG_SIZE {
            return Err(ShimError::Corrupt("page too small for header offset".into()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buffer[body_end..body_end + NONCE_SIZE]);
        let stored_tag: [u8; TAG_SIZE] = buffer[body_end + NONCE_SIZE..body_end + NONCE_SIZE + TAG_SIZE].try_into().expect("16 bytes");

        let (poly_key, nonce12, body_counter) = one_time_key(key, &nonce, page_no);

        if verify_mac {
            let tag = poly1305_tag(&poly_key, &buffer[offset..body_end], &nonce);
            if tag != stored_tag {
                let kind = if page_no == 1 { crate::error::MacFailureKind::Page1 } else { crate::error::MacFailureKind::OtherPage };
                return Err(ShimError::mac_failure(kind, page_no));
            }
        }

        let body = &mut buffer[offset..body_end];
        let keystream = body_keystream(key, &nonce12, body_counter, body.len());
        for (b, k) in body.iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn CipherState> {
        Box::new(ChaCha20Poly1305State { key: self.key.clone(), legacy: self.legacy, kdf_iter: self.kdf_iter, salt: self.salt })
    }
}

pub struct ChaCha20Poly1305Factory;

impl CipherFactory for ChaCha20Poly1305Factory {
    fn name(&self) -> &'static str {
        "chacha20"
    }

    fn allocate(&self) -> Box<dyn CipherState> {
        Box::new(ChaCha20Poly1305State::new())
    }

    fn parameters(&self) -> Vec<CipherParameter> {
        vec![
            CipherParameter::new("kdf_iter", i64::from(CHACHA20_KDF_ITER_DEFAULT), 1, i64::from(crate::config::KDF_ITER_MAX)),
            CipherParameter::new("legacy", 0, 0, 1),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> ChaCha20Poly1305State {
        let mut s = ChaCha20Poly1305State::new();
        s.kdf_iter = 10; // keep tests fast
        s.generate_key(b"secret", false, Some([0u8; 16])).unwrap();
        s
    }

    #[test]
    fn roundtrip_non_page1() {
        let state = keyed();
        let mut page = vec![0x55u8; 4096];
        let original = page.clone();
        state.encrypt_page(5, &mut page, CHACHA20_RESERVED_BYTES).unwrap();
        assert_ne!(page[..4096 - 32], original[..4096 - 32]);
        state.decrypt_page(5, &mut page, CHACHA20_RESERVED_BYTES, true).unwrap();
        assert_eq!(&page[..4096 - 32], &original[..4096 - 32]);
    }

    #[test]
    fn page1_offset_untouched_nonlegacy() {
        let state = keyed();
        let mut page = vec![0xAAu8; 4096];
        page[..24].copy_from_slice(&[0u8; 24]);
        state.encrypt_page(1, &mut page, CHACHA20_RESERVED_BYTES).unwrap();
        assert_eq!(&page[..24], &[0u8; 24]);
    }

    #[test]
    fn tamper_detected() {
        let state = keyed();
        let mut page = vec![0x10u8; 512];
        state.encrypt_page(2, &mut page, CHACHA20_RESERVED_BYTES).unwrap();
        let body_end = 512 - CHACHA20_RESERVED_BYTES as usize;
        page[body_end - 1] ^= 1;
        assert!(state.decrypt_page(2, &mut page, CHACHA20_RESERVED_BYTES, true).is_err());
    }

    #[test]
    fn hmac_check_disabled_skips_verification() {
        let state = keyed();
        let mut page = vec![0x10u8; 512];
        state.encrypt_page(2, &mut page, CHACHA20_RESERVED_BYTES).unwrap();
        let body_end = 512 - CHACHA20_RESERVED_BYTES as usize;
        page[body_end - 1] ^= 1;
        assert!(state.decrypt_page(2, &mut page, CHACHA20_RESERVED_BYTES, false).is_ok());
    }

    #[test]
    fn legacy_uses_sixteen_byte_offset() {
        let mut state = keyed();
        state.legacy = true;
        assert_eq!(state.page1_offset(), PAGE1_OFFSET_LEGACY);
    }

    #[test]
    fn legacy_forces_four_kib_page_size() {
        let mut state = keyed();
        assert_eq!(state.page_size(), 0);
        state.legacy = true;
        assert_eq!(state.page_size(), CHACHA20_PAGE_SIZE_LEGACY);
    }
}
