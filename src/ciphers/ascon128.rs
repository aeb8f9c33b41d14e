//! ASCON-128 AEAD page codec.
//!
//! Key derivation runs PBKDF2 with ASCON-HASH standing in for the HMAC compression
//! function (see [`crate::primitives::kdf::ascon_pbkdf2_derive`]); the per-page one-time
//! key is `ASCON-HASH(user_key || nonce || BE32(page_no))`, truncated to the 16-byte key
//! this scheme's AEAD instance takes. Reserved bytes are nonce(16) + tag(16).

use ascon_aead::aead::{AeadInPlace, KeyInit};
use ascon_aead::{Ascon128, Key, Nonce, Tag};
use ascon_hash::{AsconHash, Digest};
use rand::RngCore;

use crate::ciphers::{CipherFactory, CipherParameter, CipherState};
use crate::config::{ASCON_KDF_ITER_DEFAULT, ASCON_NONCE_SIZE, ASCON_RESERVED_BYTES, KEY_SALT_SIZE, KEY_SIZE, PAGE1_OFFSET_NONLEGACY};
use crate::error::{MacFailureKind, Result, ShimError};
use crate::primitives::kdf::ascon_pbkdf2_derive;
use crate::primitives::Protected;

const ONE_TIME_KEY_SIZE: usize = 16;
const TAG_SIZE: usize = 16;

fn derive_one_time_key(user_key: &[u8; KEY_SIZE], nonce: &[u8; ASCON_NONCE_SIZE], page_no: u32) -> [u8; ONE_TIME_KEY_SIZE] {
    let mut hasher = AsconHash::new();
    hasher.update(user_key);
    hasher.update(nonce);
    hasher.update(page_no.to_be_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; ONE_TIME_KEY_SIZE];
    key.copy_from_slice(&digest[..ONE_TIME_KEY_SIZE]);
    key
}

pub struct Ascon128State {
    key: Option<Protected<[u8; KEY_SIZE]>>,
    salt: Option<[u8; KEY_SALT_SIZE]>,
    kdf_iter: u32,
}

impl Ascon128State {
    fn new() -> Self {
        Self { key: None, salt: None, kdf_iter: ASCON_KDF_ITER_DEFAULT }
    }

    fn require_key(&self) -> Result<&[u8; KEY_SIZE]> {
        self.key.as_ref().map(Protected::expose).ok_or_else(|| ShimError::Misuse("ascon128: no key set".into()))
    }
}

impl CipherState for Ascon128State {
    fn legacy(&self) -> bool {
        false
    }

    fn page_size(&self) -> u32 {
        0
    }

    fn reserved_bytes(&self) -> u8 {
        ASCON_RESERVED_BYTES
    }

    fn salt(&self) -> Option<[u8; 16]> {
        self.salt
    }

    fn generate_key(&mut self, password: &[u8], _rekey: bool, salt_override: Option<[u8; 16]>) -> Result<()> {
        if password.is_empty() {
            return Err(ShimError::KeyDerivation("empty key not accepted".into()));
        }
        let salt = match salt_override {
            Some(s) => s,
            None => {
                let mut s = [0u8; KEY_SALT_SIZE];
                rand::thread_rng().fill_bytes(&mut s);
                s
            }
        };
        let mut key = [0u8; KEY_SIZE];
        ascon_pbkdf2_derive(password, &salt, self.kdf_iter, &mut key)?;
        self.key = Some(Protected::new(key));
        self.salt = Some(salt);
        Ok(())
    }

    fn encrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to ascon128 codec".into()));
        }
        let user_key = self.require_key()?;
        let offset = if page_no == 1 { PAGE1_OFFSET_NONLEGACY } else { 0 };
        let body_end = buffer.len().checked_sub(reserved as usize).ok_or_else(|| ShimError::Corrupt("page shorter than reserved bytes".into()))?;
        if offset > body_end || reserved as usize != ASCON_NONCE_SIZE + TAG_SIZE {
            return Err(ShimError::Corrupt("page too small for header offset".into()));
        }

        let mut nonce_bytes = [0u8; ASCON_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let one_time_key = derive_one_time_key(user_key, &nonce_bytes, page_no);

        let cipher = Ascon128::new(Key::from_slice(&one_time_key));
        let nonce = Nonce::from_slice(&nonce_bytes);
        let tag = cipher
            .encrypt_in_place_detached(nonce, &[], &mut buffer[offset..body_end])
            .map_err(|_| ShimError::Corrupt("ascon128 encryption failed".into()))?;

        let trailer = &mut buffer[body_end..];
        trailer[..ASCON_NONCE_SIZE].copy_from_slice(&nonce_bytes);
        trailer[ASCON_NONCE_SIZE..ASCON_NONCE_SIZE + TAG_SIZE].copy_from_slice(&tag);
        Ok(())
    }

    fn decrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8, verify_mac: bool) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to ascon128 codec".into()));
        }
        let user_key = self.require_key()?;
        let offset = if page_no == 1 { PAGE1_OFFSET_NONLEGACY } else { 0 };
        let body_end = buffer.len().checked_sub(reserved as usize).ok_or_else(|| ShimError::Corrupt("page shorter than reserved bytes".into()))?;
        if offset > body_end || reserved as usize != ASCON_NONCE_SIZE + TAG_SIZE {
            return Err(ShimError::Corrupt("page too small for header offset".into()));
        }

        let mut nonce_bytes = [0u8; ASCON_NONCE_SIZE];
        nonce_bytes.copy_from_slice(&buffer[body_end..body_end + ASCON_NONCE_SIZE]);
        let stored_tag = Tag::clone_from_slice(&buffer[body_end + ASCON_NONCE_SIZE..body_end + ASCON_NONCE_SIZE + TAG_SIZE]);
        let one_time_key = derive_one_time_key(user_key, &nonce_bytes, page_no);

        let cipher = Ascon128::new(Key::from_slice(&one_time_key));
        let nonce = Nonce::from_slice(&nonce_bytes);

        if verify_mac {
            cipher.decrypt_in_place_detached(nonce, &[], &mut buffer[offset..body_end], &stored_tag).map_err(|_| {
                let kind = if page_no == 1 { MacFailureKind::Page1 } else { MacFailureKind::OtherPage };
                ShimError::mac_failure(kind, page_no)
            })
        } else {
            // forensic-recovery path: decrypt the stream without checking the tag.
            let mut scratch = Tag::default();
            scratch.copy_from_slice(&stored_tag);
            let _ = cipher.decrypt_in_place_detached(nonce, &[], &mut buffer[offset..body_end], &scratch);
            Ok(())
        }
    }

    fn box_clone(&self) -> Box<dyn CipherState> {
        Box::new(Ascon128State { key: self.key.clone(), salt: self.salt, kdf_iter: self.kdf_iter })
    }
}

pub struct Ascon128Factory;

impl CipherFactory for Ascon128Factory {
    fn name(&self) -> &'static str {
        "ascon128"
    }

    fn allocate(&self) -> Box<dyn CipherState> {
        Box::new(Ascon128State::new())
    }

    fn parameters(&self) -> Vec<CipherParameter> {
        vec![CipherParameter::new("kdf_iter", i64::from(ASCON_KDF_ITER_DEFAULT), 1, i64::from(crate::config::KDF_ITER_MAX))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> Ascon128State {
        let mut s = Ascon128State::new();
        s.kdf_iter = 10;
        s.generate_key(b"secret", false, Some([0u8; 16])).unwrap();
        s
    }

    #[test]
    fn roundtrip_non_page1() {
        let state = keyed();
        let mut page = vec![0x33u8; 4096];
        let original = page.clone();
        state.encrypt_page(7, &mut page, ASCON_RESERVED_BYTES).unwrap();
        assert_ne!(page[..4096 - 32], original[..4096 - 32]);
        state.decrypt_page(7, &mut page, ASCON_RESERVED_BYTES, true).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn page1_offset_untouched() {
        let state = keyed();
        let mut page = vec![0xBBu8; 4096];
        page[..24].copy_from_slice(&[0u8; 24]);
        state.encrypt_page(1, &mut page, ASCON_RESERVED_BYTES).unwrap();
        assert_eq!(&page[..24], &[0u8; 24]);
    }

    #[test]
    fn tamper_detected() {
        let state = keyed();
        let mut page = vec![0x44u8; 512];
        state.encrypt_page(2, &mut page, ASCON_RESERVED_BYTES).unwrap();
        let body_end = 512 - ASCON_RESERVED_BYTES as usize;
        page[body_end - 1] ^= 1;
        assert!(state.decrypt_page(2, &mut page, ASCON_RESERVED_BYTES, true).is_err());
    }
}
