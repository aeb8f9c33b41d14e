//! The codec facade: owns a connection's read/write cipher pair and the scratch page
//! buffer used to transform pages without mutating the pager's own memory on the write
//! path.
//!
//! The read/write split exists for exactly one reason: **during rekey, rollback-journal
//! writes must use the read cipher, not the write cipher** (see [`crate::rekey`]). A
//! normal (non-rekeying) connection has `read_cipher == write_cipher` (the same boxed
//! state, cloned), so this distinction is invisible outside a rekey.

use crate::error::{Result, ShimError};
use crate::primitives::secure_zero;
use crate::types::CodecMode;

/// Per-database-file codec. One instance per main-DB file, shared by its journal/WAL
/// handles through the main-file registry (see [`crate::vfs`]).
pub struct Codec {
    read_cipher: Option<Box<dyn crate::ciphers::CipherState>>,
    write_cipher: Option<Box<dyn crate::ciphers::CipherState>>,
    page_size: u32,
    reserved_bytes: u8,
    is_encrypted: bool,
    hmac_check: bool,
    scratch: Vec<u8>,
}

impl Codec {
    pub fn new(page_size: u32) -> Self {
        Self { read_cipher: None, write_cipher: None, page_size, reserved_bytes: 0, is_encrypted: false, hmac_check: true, scratch: Vec::new() }
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    pub fn has_read_cipher(&self) -> bool {
        self.read_cipher.is_some()
    }

    pub fn has_write_cipher(&self) -> bool {
        self.write_cipher.is_some()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn reserved_bytes(&self) -> u8 {
        self.reserved_bytes
    }

    pub fn set_hmac_check(&mut self, enabled: bool) {
        self.hmac_check = enabled;
    }

    /// Installs a cipher as both read and write cipher — the normal `set_key` shape. Also
    /// updates the codec's bookkeeping page size / reserved-bytes to match the cipher's,
    /// which is an invariant: the write cipher determines the on-disk page layout.
    pub fn set_both_ciphers(&mut self, cipher: Box<dyn crate::ciphers::CipherState>) {
        self.reserved_bytes = cipher.reserved_bytes();
        self.is_encrypted = true;
        self.write_cipher = Some(cipher.box_clone());
        self.read_cipher = Some(cipher);
    }

    pub fn set_read_cipher(&mut self, cipher: Option<Box<dyn crate::ciphers::CipherState>>) {
        self.read_cipher = cipher;
    }

    pub fn set_write_cipher(&mut self, cipher: Option<Box<dyn crate::ciphers::CipherState>>) {
        if let Some(ref c) = cipher {
            self.reserved_bytes = c.reserved_bytes();
        }
        self.is_encrypted = cipher.is_some();
        self.write_cipher = cipher;
    }

    pub fn take_write_cipher(&mut self) -> Option<Box<dyn crate::ciphers::CipherState>> {
        self.write_cipher.take()
    }

    pub fn read_cipher(&self) -> Option<&dyn crate::ciphers::CipherState> {
        self.read_cipher.as_deref()
    }

    pub fn write_cipher(&self) -> Option<&dyn crate::ciphers::CipherState> {
        self.write_cipher.as_deref()
    }

    /// Clones this codec's cipher pair for a newly ATTACHed schema that doesn't provide
    /// its own key — the inherit-from-main-DB path in [`crate::rekey::attach`].
    pub fn clone_ciphers(&self) -> (Option<Box<dyn crate::ciphers::CipherState>>, Option<Box<dyn crate::ciphers::CipherState>>) {
        (self.read_cipher.clone(), self.write_cipher.clone())
    }

    /// Transforms one page in place. `page_no == 0` is never valid — callers must not
    /// pass the file header region through here.
    pub fn encrypt_or_decrypt(&mut self, page_no: u32, buffer: &mut [u8], mode: CodecMode) -> Result<()> {
        if page_no == 0 {
            return Err(ShimError::Misuse("page number 0 passed to codec facade".into()));
        }
        if !self.is_encrypted {
            return Ok(());
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(buffer);

        let result = match mode {
            CodecMode::DecryptOnLoad => {
                let cipher = self.read_cipher.as_deref().ok_or_else(|| ShimError::Misuse("decrypt requested with no read cipher".into()))?;
                cipher.decrypt_page(page_no, &mut self.scratch, self.reserved_bytes, self.hmac_check)
            }
            CodecMode::EncryptForMain => {
                let cipher = self.write_cipher.as_deref().ok_or_else(|| ShimError::Misuse("encrypt requested with no write cipher".into()))?;
                cipher.encrypt_page(page_no, &mut self.scratch, self.reserved_bytes)
            }
            // Rollback-journal writes use the READ cipher: during rekey, the journal must
            // remain readable under the pre-rekey key in case of a crash/rollback before
            // the new key is committed.
            CodecMode::EncryptForJournal => {
                let cipher = self.read_cipher.as_deref().ok_or_else(|| ShimError::Misuse("journal encrypt requested with no read cipher".into()))?;
                cipher.encrypt_page(page_no, &mut self.scratch, self.reserved_bytes)
            }
        };

        if result.is_ok() {
            buffer.copy_from_slice(&self.scratch);
        }
        secure_zero(&mut self.scratch);
        result
    }
}

impl Drop for Codec {
    fn drop(&mut self) {
        secure_zero(&mut self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn encrypted_codec() -> Codec {
        let mut cipher = registry::allocate("aes256cbc").unwrap();
        cipher.generate_key(b"secret", false, None).unwrap();
        let mut codec = Codec::new(4096);
        codec.set_both_ciphers(cipher);
        codec
    }

    #[test]
    fn unencrypted_codec_passes_through() {
        let mut codec = Codec::new(4096);
        let mut page = vec![0xAAu8; 4096];
        let original = page.clone();
        codec.encrypt_or_decrypt(1, &mut page, CodecMode::EncryptForMain).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn roundtrip_through_facade() {
        let mut codec = encrypted_codec();
        let mut page = vec![0x11u8; 4096];
        let original = page.clone();
        codec.encrypt_or_decrypt(2, &mut page, CodecMode::EncryptForMain).unwrap();
        assert_ne!(page, original);
        codec.encrypt_or_decrypt(2, &mut page, CodecMode::DecryptOnLoad).unwrap();
        assert_eq!(page, original);
    }

    #[test]
    fn page_zero_rejected() {
        let mut codec = encrypted_codec();
        let mut page = vec![0u8; 4096];
        assert!(codec.encrypt_or_decrypt(0, &mut page, CodecMode::EncryptForMain).is_err());
    }

    #[test]
    fn journal_write_uses_read_cipher_during_rekey() {
        let mut old_cipher = registry::allocate("aes256cbc").unwrap();
        old_cipher.generate_key(b"old", false, None).unwrap();
        let mut new_cipher = registry::allocate("aes256cbc").unwrap();
        new_cipher.generate_key(b"new", false, None).unwrap();

        let mut codec = Codec::new(4096);
        codec.set_read_cipher(Some(old_cipher.box_clone()));
        codec.set_write_cipher(Some(new_cipher));
        codec.is_encrypted = true;

        let mut page = vec![0x55u8; 4096];
        codec.encrypt_or_decrypt(3, &mut page, CodecMode::EncryptForJournal).unwrap();

        // Decrypting with the OLD cipher (not the new write cipher) must recover the page:
        // proves the journal write really went through the read cipher.
        old_cipher.decrypt_page(3, &mut page, codec.reserved_bytes(), true).unwrap();
        assert_eq!(page, vec![0x55u8; 4096]);
    }
}
