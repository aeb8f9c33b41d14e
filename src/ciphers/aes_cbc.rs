//! Legacy AES-128/256-CBC page codec.
//!
//! No KDF, no MAC: the "reserved=0" deterministic-IV mode described in the per-cipher
//! codec contract. The per-page key and IV are both derived from the page number alone,
//! so `decrypt(encrypt(x)) == x` holds but a corrupted page is never detected — this
//! cipher exists for read compatibility with very old encrypted databases, not for new
//! writes that need tamper evidence.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use md5::{Digest, Md5};
use sha2::Sha256;

use crate::ciphers::{CipherFactory, CipherParameter, CipherState};
use crate::config::{AES128_KEY_SIZE, AES_BLOCK_SIZE, KEY_SIZE, LEGACY_AES_SALT, PAGE1_OFFSET_LEGACY};
use crate::error::{Result, ShimError};
use crate::primitives::Protected;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWidth {
    Aes128,
    Aes256,
}

/// Derives the per-page key: `MD5(key || LE32(page_no) || "sAlT")` for AES-128,
/// `SHA-256(...)` for AES-256.
fn derive_page_key(width: KeyWidth, key: &[u8], page_no: u32) -> Vec<u8> {
    match width {
        KeyWidth::Aes128 => {
            let mut h = Md5::new();
            h.update(key);
            h.update(page_no.to_le_bytes());
            h.update(LEGACY_AES_SALT);
            h.finalize().to_vec()
        }
        KeyWidth::Aes256 => {
            use sha2::Digest as _;
            let mut h = Sha256::new();
            h.update(key);
            h.update(page_no.to_le_bytes());
            h.update(LEGACY_AES_SALT);
            h.finalize().to_vec()
        }
    }
}

/// Derives the per-page IV: MD5 of a 16-byte pseudo-random stream seeded by the page
/// number (the page number repeated to fill 16 bytes, per the historical scheme).
fn derive_page_iv(page_no: u32) -> [u8; 16] {
    let mut seed = [0u8; 16];
    let pgno_bytes = page_no.to_le_bytes();
    for (i, b) in seed.iter_mut().enumerate() {
        *b = pgno_bytes[i % 4];
    }
    let digest = Md5::digest(seed);
    digest.into()
}

fn xor_into(block: &mut [u8; AES_BLOCK_SIZE], other: &[u8]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}

/// Manually-chained CBC encryption with ciphertext stealing (CS3) for the trailing
/// partial block, generic over the raw ECB block cipher.
fn cbc_cts_encrypt<C: BlockEncrypt>(cipher: &C, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) {
    if data.is_empty() {
        return;
    }
    let whole_len = (data.len() / AES_BLOCK_SIZE) * AES_BLOCK_SIZE;
    let remainder = data.len() - whole_len;
    let mut prev = *iv;

    let chained_len = if remainder == 0 { whole_len } else { whole_len - AES_BLOCK_SIZE };
    for block in data[..chained_len].chunks_exact_mut(AES_BLOCK_SIZE) {
        let mut buf = [0u8; AES_BLOCK_SIZE];
        buf.copy_from_slice(block);
        xor_into(&mut buf, &prev);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut buf));
        block.copy_from_slice(&buf);
        prev = buf;
    }

    if remainder == 0 {
        return;
    }

    let stolen_start = chained_len;
    let mut last_full = [0u8; AES_BLOCK_SIZE];
    last_full.copy_from_slice(&data[stolen_start..stolen_start + AES_BLOCK_SIZE]);
    xor_into(&mut last_full, &prev);
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut last_full));
    // `last_full` is now C_{n-1} as it would be without stealing.

    let mut stolen_block = [0u8; AES_BLOCK_SIZE];
    stolen_block[..remainder].copy_from_slice(&data[whole_len..]);
    stolen_block[remainder..].copy_from_slice(&last_full[remainder..]);
    xor_into(&mut stolen_block, &last_full);
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut stolen_block));

    data[stolen_start..stolen_start + AES_BLOCK_SIZE].copy_from_slice(&stolen_block);
    data[whole_len..].copy_from_slice(&last_full[..remainder]);
}

/// Inverse of [`cbc_cts_encrypt`].
fn cbc_cts_decrypt<C: BlockEncrypt + BlockDecrypt>(cipher: &C, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) {
    if data.is_empty() {
        return;
    }
    let whole_len = (data.len() / AES_BLOCK_SIZE) * AES_BLOCK_SIZE;
    let remainder = data.len() - whole_len;
    let mut prev = *iv;

    let chained_len = if remainder == 0 { whole_len } else { whole_len - AES_BLOCK_SIZE };
    for block in data[..chained_len].chunks_exact_mut(AES_BLOCK_SIZE) {
        let ciphertext: [u8; AES_BLOCK_SIZE] = block.try_into().expect("exact block");
        let mut buf = ciphertext;
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut buf));
        xor_into(&mut buf, &prev);
        block.copy_from_slice(&buf);
        prev = ciphertext;
    }

    if remainder == 0 {
        return;
    }

    let stolen_start = chained_len;
    // data[stolen_start..+16] holds C_{n-1} (the swapped full block); data[whole_len..]
    // holds the first `remainder` bytes of the original (unswapped) C_{n-1}.
    let c_swapped: [u8; AES_BLOCK_SIZE] = data[stolen_start..stolen_start + AES_BLOCK_SIZE].try_into().expect("exact block");
    let mut dn = c_swapped;
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut dn));

    let mut c_original_full = [0u8; AES_BLOCK_SIZE];
    c_original_full[..remainder].copy_from_slice(&data[whole_len..]);
    c_original_full[remainder..].copy_from_slice(&dn[remainder..]);

    let mut p_last = dn;
    xor_into(&mut p_last, &c_original_full);

    let mut p_second_last = c_original_full;
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut p_second_last));
    xor_into(&mut p_second_last, &prev);

    data[whole_len..].copy_from_slice(&p_last[..remainder]);
    data[stolen_start..whole_len].copy_from_slice(&p_second_last);
}

pub struct AesCbcState {
    width: KeyWidth,
    key: Option<Protected<Vec<u8>>>,
}

impl AesCbcState {
    fn new(width: KeyWidth) -> Self {
        Self { width, key: None }
    }

    fn require_key(&self) -> Result<&[u8]> {
        self.key.as_ref().map(|k| k.expose().as_slice()).ok_or_else(|| ShimError::Misuse("aes-cbc: no key set".into()))
    }

    fn transform(&self, page_no: u32, buffer: &mut [u8], reserved: u8, encrypt: bool) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to aes-cbc codec".into()));
        }
        let user_key = self.require_key()?;
        let offset = if page_no == 1 { PAGE1_OFFSET_LEGACY } else { 0 };
        let body_end = buffer.len().saturating_sub(reserved as usize);
        if offset > body_end {
            return Err(ShimError::Corrupt("page too small for header offset".into()));
        }
        let page_key = derive_page_key(self.width, user_key, page_no);
        let iv = derive_page_iv(page_no);
        let body = &mut buffer[offset..body_end];
        match self.width {
            KeyWidth::Aes128 => {
                let key: [u8; AES128_KEY_SIZE] = page_key[..AES128_KEY_SIZE].try_into().expect("md5 digest is 16 bytes");
                let cipher = Aes128::new(GenericArray::from_slice(&key));
                if encrypt { cbc_cts_encrypt(&cipher, &iv, body) } else { cbc_cts_decrypt(&cipher, &iv, body) }
            }
            KeyWidth::Aes256 => {
                let key: [u8; KEY_SIZE] = page_key[..KEY_SIZE].try_into().expect("sha256 digest is 32 bytes");
                let cipher = Aes256::new(GenericArray::from_slice(&key));
                if encrypt { cbc_cts_encrypt(&cipher, &iv, body) } else { cbc_cts_decrypt(&cipher, &iv, body) }
            }
        }
        Ok(())
    }
}

impl CipherState for AesCbcState {
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
        self.transform(page_no, buffer, reserved, true)
    }

    fn decrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8, _verify_mac: bool) -> Result<()> {
        self.transform(page_no, buffer, reserved, false)
    }

    fn box_clone(&self) -> Box<dyn CipherState> {
        Box::new(AesCbcState { width: self.width, key: self.key.clone() })
    }
}

pub struct Aes128CbcFactory;
pub struct Aes256CbcFactory;

impl CipherFactory for Aes128CbcFactory {
    fn name(&self) -> &'static str {
        "aes128cbc"
    }

    fn allocate(&self) -> Box<dyn CipherState> {
        Box::new(AesCbcState::new(KeyWidth::Aes128))
    }

    fn parameters(&self) -> Vec<CipherParameter> {
        vec![CipherParameter::new("legacy", 1, 0, 1)]
    }
}

impl CipherFactory for Aes256CbcFactory {
    fn name(&self) -> &'static str {
        "aes256cbc"
    }

    fn allocate(&self) -> Box<dyn CipherState> {
        Box::new(AesCbcState::new(KeyWidth::Aes256))
    }

    fn parameters(&self) -> Vec<CipherParameter> {
        vec![CipherParameter::new("legacy", 1, 0, 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(width: KeyWidth) -> AesCbcState {
        let mut s = AesCbcState::new(width);
        s.generate_key(b"correct horse battery staple", false, None).unwrap();
        s
    }

    #[test]
    fn roundtrip_block_aligned_128() {
        let state = keyed(KeyWidth::Aes128);
        let mut page = vec![0x42u8; 4096];
        let original = page.clone();
        state.encrypt_page(7, &mut page, 0).unwrap();
        assert_ne!(page, original);
        state.decrypt_page(7, &mut page, 0, true).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn roundtrip_block_aligned_256() {
        let state = keyed(KeyWidth::Aes256);
        let mut page = (0u16..4096).map(|i| i as u8).collect::<Vec<_>>();
        let original = page.clone();
        state.encrypt_page(3, &mut page, 0).unwrap();
        assert_ne!(page, original);
        state.decrypt_page(3, &mut page, 0, true).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn roundtrip_unaligned_triggers_cts() {
        let state = keyed(KeyWidth::Aes128);
        let mut page = (0u16..513).map(|i| i as u8).collect::<Vec<_>>();
        let original = page.clone();
        state.encrypt_page(2, &mut page, 0).unwrap();
        assert_ne!(page[..16], original[..16]);
        state.decrypt_page(2, &mut page, 0, true).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn page1_header_left_untouched() {
        let state = keyed(KeyWidth::Aes128);
        let mut page = vec![0xABu8; 4096];
        page[..16].copy_from_slice(b"SQLite format 3\0");
        state.encrypt_page(1, &mut page, 0).unwrap();
        assert_eq!(&page[..16], b"SQLite format 3\0");
    }

    #[test]
    fn page_zero_rejected() {
        let state = keyed(KeyWidth::Aes128);
        let mut page = vec![0u8; 512];
        assert!(state.encrypt_page(0, &mut page, 0).is_err());
    }

    #[test]
    fn different_page_numbers_give_different_ciphertext() {
        let state = keyed(KeyWidth::Aes256);
        let mut a = vec![0x11u8; 512];
        let mut b = a.clone();
        state.encrypt_page(10, &mut a, 0).unwrap();
        state.encrypt_page(11, &mut b, 0).unwrap();
        assert_ne!(a, b);
    }
}
