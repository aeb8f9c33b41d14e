//! SQLCipher-compatible codec (versions 1-4).
//!
//! Layout per page: `AES-256-CBC(derived_key, iv, body)` where `body` is the page minus
//! its reserved trailer (and, for v4 with a configured `plaintext_header_size`, minus a
//! leading plaintext header on page 1 only); the trailer is a fresh random 16-byte IV
//! followed by an HMAC of `body || iv || page_no` under a derived subkey.
//!
//! Grounded on the two-stage PBKDF2 key schedule (main key, then a fast low-iteration
//! pass over the main key to derive the HMAC subkey from a masked salt) and the
//! `body || iv || LE32(page_no)` HMAC input order used by every from-scratch SQLCipher
//! reader in the wild.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::RngCore;

use crate::ciphers::{CipherFactory, CipherParameter, CipherState};
use crate::config::{
    KEY_SALT_SIZE, KEY_SIZE, PAGE1_OFFSET_LEGACY, RAW_KEY_HEX_LEN, RAW_KEY_PREFIX, RAW_KEY_SALT_HEX_LEN, SQLCIPHER_FAST_KDF_ITER_DEFAULT, SQLCIPHER_HMAC_SALT_MASK_DEFAULT, SQLCIPHER_IV_SIZE,
    SQLCIPHER_KDF_ITER_V4,
};
use crate::error::{MacFailureKind, Result, ShimError};
use crate::primitives::kdf::{mask_salt, pbkdf2_derive};
use crate::primitives::mac::{compute_hmac, verify_hmac, DigestAlgorithm};
use crate::primitives::Protected;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgnoEndian {
    Little,
    Big,
}

fn encode_pgno(page_no: u32, endian: PgnoEndian) -> [u8; 4] {
    match endian {
        PgnoEndian::Little => page_no.to_le_bytes(),
        PgnoEndian::Big => page_no.to_be_bytes(),
    }
}

/// Parses the `x'<hex>'`-wrapped raw-key bypass syntax: `x'<64 hex>'` is the derived key
/// directly, `x'<96 hex>'` is key followed by a 16-byte salt override. Returns `None` if
/// `password` is not in this text form (the binary equivalents — a bare 32- or 48-byte
/// password — are handled directly in [`SqlCipherState::generate_key`], not here).
fn parse_raw_key(password: &[u8]) -> Result<Option<(Vec<u8>, Option<[u8; KEY_SALT_SIZE]>)>> {
    let Ok(text) = std::str::from_utf8(password) else { return Ok(None) };
    if !text.starts_with(RAW_KEY_PREFIX) || !text.ends_with('\'') {
        return Ok(None);
    }
    let hex_body = &text[RAW_KEY_PREFIX.len()..text.len() - 1];
    match hex_body.len() {
        RAW_KEY_HEX_LEN => {
            let bytes = hex::decode(hex_body).map_err(|_| ShimError::MalformedHex)?;
            Ok(Some((bytes, None)))
        }
        RAW_KEY_SALT_HEX_LEN => {
            let bytes = hex::decode(hex_body).map_err(|_| ShimError::MalformedHex)?;
            let key = bytes[..32].to_vec();
            let salt: [u8; KEY_SALT_SIZE] = bytes[32..].try_into().expect("16 bytes");
            Ok(Some((key, Some(salt))))
        }
        _ => Err(ShimError::MalformedHex),
    }
}

/// Splits a bare (non-`x'...'`-wrapped) raw-key password into key bytes and an optional
/// salt override: 32 bytes is the derived key alone, 48 bytes is key followed by a 16-byte
/// salt. Any other length is not a raw key in binary form.
fn raw_key_from_binary(password: &[u8]) -> Option<(Vec<u8>, Option<[u8; KEY_SALT_SIZE]>)> {
    match password.len() {
        32 => Some((password.to_vec(), None)),
        48 => {
            let key = password[..32].to_vec();
            let salt: [u8; KEY_SALT_SIZE] = password[32..].try_into().expect("16 bytes");
            Some((key, Some(salt)))
        }
        _ => None,
    }
}

pub struct SqlCipherState {
    key: Option<Protected<[u8; KEY_SIZE]>>,
    hmac_key: Option<Protected<Vec<u8>>>,
    salt: Option<[u8; KEY_SALT_SIZE]>,
    kdf_iter: u32,
    fast_kdf_iter: u32,
    hmac_salt_mask: u8,
    kdf_algorithm: DigestAlgorithm,
    hmac_algorithm: DigestAlgorithm,
    hmac_use: bool,
    pgno_endian: PgnoEndian,
    plaintext_header_size: u32,
    reserved_bytes: u8,
}

impl SqlCipherState {
    fn new() -> Self {
        Self {
            key: None,
            hmac_key: None,
            salt: None,
            kdf_iter: SQLCIPHER_KDF_ITER_V4,
            fast_kdf_iter: SQLCIPHER_FAST_KDF_ITER_DEFAULT,
            hmac_salt_mask: SQLCIPHER_HMAC_SALT_MASK_DEFAULT,
            kdf_algorithm: DigestAlgorithm::Sha512,
            hmac_algorithm: DigestAlgorithm::Sha512,
            hmac_use: true,
            pgno_endian: PgnoEndian::Little,
            plaintext_header_size: 0,
            reserved_bytes: mac_len_reserved(DigestAlgorithm::Sha512),
        }
    }

    fn require_key(&self) -> Result<&[u8; KEY_SIZE]> {
        self.key.as_ref().map(Protected::expose).ok_or_else(|| ShimError::Misuse("sqlcipher: no key set".into()))
    }

    fn require_hmac_key(&self) -> Result<&[u8]> {
        self.hmac_key.as_ref().map(|k| k.expose().as_slice()).ok_or_else(|| ShimError::Misuse("sqlcipher: no key set".into()))
    }

    fn header_len(&self, page_no: u32) -> usize {
        if page_no == 1 {
            if self.plaintext_header_size > 0 {
                self.plaintext_header_size as usize
            } else {
                PAGE1_OFFSET_LEGACY
            }
        } else {
            0
        }
    }
}

fn mac_len_reserved(algorithm: DigestAlgorithm) -> u8 {
    (SQLCIPHER_IV_SIZE + algorithm.mac_len()) as u8
}

impl CipherState for SqlCipherState {
    fn legacy(&self) -> bool {
        false
    }

    fn page_size(&self) -> u32 {
        0
    }

    fn reserved_bytes(&self) -> u8 {
        self.reserved_bytes
    }

    fn salt(&self) -> Option<[u8; 16]> {
        self.salt
    }

    fn generate_key(&mut self, password: &[u8], _rekey: bool, salt_override: Option<[u8; 16]>) -> Result<()> {
        self.reserved_bytes = mac_len_reserved(self.hmac_algorithm);

        let raw = match raw_key_from_binary(password) {
            Some(raw) => Some(raw),
            None => parse_raw_key(password)?,
        };

        if let Some((raw_key, raw_salt)) = raw {
            let salt = salt_override.or(raw_salt).unwrap_or([0u8; KEY_SALT_SIZE]);
            let key: [u8; KEY_SIZE] = raw_key.try_into().map_err(|_| ShimError::KeyDerivation("raw key must be 32 bytes".into()))?;
            self.derive_hmac_subkey(&key, &salt)?;
            self.key = Some(Protected::new(key));
            self.salt = Some(salt);
            return Ok(());
        }

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
        pbkdf2_derive(self.kdf_algorithm, password, &salt, self.kdf_iter, &mut key)?;
        self.derive_hmac_subkey(&key, &salt)?;
        self.key = Some(Protected::new(key));
        self.salt = Some(salt);
        Ok(())
    }

    fn encrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to sqlcipher codec".into()));
        }
        let key = self.require_key()?;
        let header = self.header_len(page_no);
        let body_end = buffer.len().checked_sub(reserved as usize).ok_or_else(|| ShimError::Corrupt("page shorter than reserved bytes".into()))?;
        if header > body_end {
            return Err(ShimError::Corrupt("page too small for plaintext header".into()));
        }

        let mut iv = [0u8; SQLCIPHER_IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let key_ga = GenericArray::from_slice(key.as_slice());
        let iv_ga = GenericArray::from_slice(&iv);
        let mut cipher = Aes256CbcEnc::new(key_ga, iv_ga);
        let body = &mut buffer[header..body_end];
        for chunk in body.chunks_exact_mut(16) {
            let block = GenericArray::from_mut_slice(chunk);
            cipher.encrypt_block_mut(block);
        }

        if self.hmac_use {
            let hmac_key = self.require_hmac_key()?;
            let pgno_bytes = encode_pgno(page_no, self.pgno_endian);
            let tag = compute_hmac(self.hmac_algorithm, hmac_key, &[&buffer[header..body_end], &iv, &pgno_bytes])?;
            let trailer = &mut buffer[body_end..];
            trailer[..SQLCIPHER_IV_SIZE].copy_from_slice(&iv);
            trailer[SQLCIPHER_IV_SIZE..SQLCIPHER_IV_SIZE + tag.len()].copy_from_slice(&tag);
        } else {
            buffer[body_end..body_end + SQLCIPHER_IV_SIZE].copy_from_slice(&iv);
        }
        Ok(())
    }

    fn decrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8, verify_mac: bool) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to sqlcipher codec".into()));
        }
        let key = self.require_key()?;
        let header = self.header_len(page_no);
        let body_end = buffer.len().checked_sub(reserved as usize).ok_or_else(|| ShimError::Corrupt("page shorter than reserved bytes".into()))?;
        if header > body_end {
            return Err(ShimError::Corrupt("page too small for plaintext header".into()));
        }

        let iv: [u8; SQLCIPHER_IV_SIZE] = buffer[body_end..body_end + SQLCIPHER_IV_SIZE].try_into().expect("iv size");

        if verify_mac && self.hmac_use {
            let hmac_key = self.require_hmac_key()?;
            let pgno_bytes = encode_pgno(page_no, self.pgno_endian);
            let tag_len = self.hmac_algorithm.mac_len();
            let stored_tag = &buffer[body_end + SQLCIPHER_IV_SIZE..body_end + SQLCIPHER_IV_SIZE + tag_len];
            let check = verify_hmac(self.hmac_algorithm, hmac_key, &[&buffer[header..body_end], &iv, &pgno_bytes], stored_tag);
            if check.is_err() {
                let kind = if page_no == 1 { MacFailureKind::Page1 } else { MacFailureKind::OtherPage };
                return Err(ShimError::mac_failure(kind, page_no));
            }
        }

        let key_ga = GenericArray::from_slice(key.as_slice());
        let iv_ga = GenericArray::from_slice(&iv);
        let mut cipher = Aes256CbcDec::new(key_ga, iv_ga);
        let body = &mut buffer[header..body_end];
        for chunk in body.chunks_exact_mut(16) {
            let block = GenericArray::from_mut_slice(chunk);
            cipher.decrypt_block_mut(block);
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn CipherState> {
        Box::new(SqlCipherState {
            key: self.key.clone(),
            hmac_key: self.hmac_key.clone(),
            salt: self.salt,
            kdf_iter: self.kdf_iter,
            fast_kdf_iter: self.fast_kdf_iter,
            hmac_salt_mask: self.hmac_salt_mask,
            kdf_algorithm: self.kdf_algorithm,
            hmac_algorithm: self.hmac_algorithm,
            hmac_use: self.hmac_use,
            pgno_endian: self.pgno_endian,
            plaintext_header_size: self.plaintext_header_size,
            reserved_bytes: self.reserved_bytes,
        })
    }
}

impl SqlCipherState {
    fn derive_hmac_subkey(&mut self, key: &[u8; KEY_SIZE], salt: &[u8; KEY_SALT_SIZE]) -> Result<()> {
        let masked = mask_salt(salt, self.hmac_salt_mask);
        let mut subkey = vec![0u8; KEY_SIZE];
        pbkdf2_derive(self.hmac_algorithm, key, &masked, self.fast_kdf_iter, &mut subkey)?;
        self.hmac_key = Some(Protected::new(subkey));
        Ok(())
    }
}

pub struct SqlCipherFactory;

impl CipherFactory for SqlCipherFactory {
    fn name(&self) -> &'static str {
        "sqlcipher"
    }

    fn allocate(&self) -> Box<dyn CipherState> {
        Box::new(SqlCipherState::new())
    }

    fn parameters(&self) -> Vec<CipherParameter> {
        vec![
            CipherParameter::new("kdf_iter", i64::from(SQLCIPHER_KDF_ITER_V4), 1, i64::from(crate::config::KDF_ITER_MAX)),
            CipherParameter::new("fast_kdf_iter", i64::from(SQLCIPHER_FAST_KDF_ITER_DEFAULT), 1, i64::from(crate::config::KDF_ITER_MAX)),
            CipherParameter::new("hmac_use", 1, 0, 1),
            CipherParameter::new("plaintext_header_size", 0, 0, i64::from(crate::config::SQLCIPHER_PLAINTEXT_HEADER_MAX)),
            CipherParameter::new("legacy", 0, 0, 4),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> SqlCipherState {
        let mut s = SqlCipherState::new();
        s.kdf_iter = 10;
        s.fast_kdf_iter = 2;
        s.generate_key(b"old", false, Some([0u8; 16])).unwrap();
        s
    }

    #[test]
    fn roundtrip_non_page1() {
        let state = keyed();
        let mut page = vec![0x20u8; 4096];
        let original = page.clone();
        let reserved = state.reserved_bytes();
        state.encrypt_page(2, &mut page, reserved).unwrap();
        assert_ne!(page, original);
        state.decrypt_page(2, &mut page, reserved, true).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn page1_plaintext_header_preserved() {
        let state = keyed();
        let mut page = vec![0x20u8; 4096];
        page[..16].copy_from_slice(crate::config::FILE_MAGIC);
        let reserved = state.reserved_bytes();
        state.encrypt_page(1, &mut page, reserved).unwrap();
        assert_eq!(&page[..16], crate::config::FILE_MAGIC);
    }

    #[test]
    fn tamper_detected() {
        let state = keyed();
        let mut page = vec![0x20u8; 4096];
        let reserved = state.reserved_bytes();
        state.encrypt_page(5, &mut page, reserved).unwrap();
        page[10] ^= 1;
        assert!(state.decrypt_page(5, &mut page, reserved, true).is_err());
    }

    #[test]
    fn hmac_check_disabled_skips_verification() {
        let state = keyed();
        let mut page = vec![0x20u8; 4096];
        let reserved = state.reserved_bytes();
        state.encrypt_page(5, &mut page, reserved).unwrap();
        page[10] ^= 1;
        assert!(state.decrypt_page(5, &mut page, reserved, false).is_ok());
    }

    #[test]
    fn raw_key_64_hex_bypasses_kdf() {
        let mut a = SqlCipherState::new();
        let hex64 = "00".repeat(32);
        let pw = format!("x'{hex64}'");
        a.generate_key(pw.as_bytes(), false, Some([0u8; 16])).unwrap();
        assert_eq!(*a.key.as_ref().unwrap().expose(), [0u8; 32]);
    }

    #[test]
    fn raw_key_96_hex_overrides_salt() {
        let mut a = SqlCipherState::new();
        let hex_key = "11".repeat(32);
        let hex_salt = "22".repeat(16);
        let pw = format!("x'{hex_key}{hex_salt}'");
        a.generate_key(pw.as_bytes(), false, None).unwrap();
        assert_eq!(a.salt.unwrap(), [0x22u8; 16]);
    }

    #[test]
    fn malformed_raw_key_rejected() {
        let mut a = SqlCipherState::new();
        let pw = "x'nothex'";
        assert!(a.generate_key(pw.as_bytes(), false, None).is_err());
    }

    #[test]
    fn raw_key_32_bytes_binary_bypasses_kdf() {
        let mut a = SqlCipherState::new();
        let pw = [0x07u8; 32];
        a.generate_key(&pw, false, Some([0u8; 16])).unwrap();
        assert_eq!(*a.key.as_ref().unwrap().expose(), pw);
    }

    #[test]
    fn raw_key_48_bytes_binary_overrides_salt() {
        let mut a = SqlCipherState::new();
        let mut pw = [0x09u8; 48];
        pw[32..].copy_from_slice(&[0xABu8; 16]);
        a.generate_key(&pw, false, None).unwrap();
        assert_eq!(*a.key.as_ref().unwrap().expose(), [0x09u8; 32]);
        assert_eq!(a.salt.unwrap(), [0xABu8; 16]);
    }
}
