//! Per-page re-encryption pipeline driving the VACUUM-for-rekey rebuild.
//!
//! Each [`PageTask`] the reader produces already holds plaintext (decrypted with the old
//! cipher as it was read off disk); the pipeline's only job is to encrypt it again under
//! the new cipher so the writer can lay it down at the same offset in the rebuilt file.

use crate::ciphers::CipherState;
use crate::types::{PageResult, PageTask};

/// Read-only once constructed: `process` takes `&self` so many executor threads can share
/// one pipeline behind an `Arc` without cloning the cipher per call.
pub struct Pipeline {
    write_cipher: Box<dyn CipherState>,
    reserved_bytes: u8,
}

impl Pipeline {
    pub fn new(write_cipher: Box<dyn CipherState>, reserved_bytes: u8) -> Self {
        Self { write_cipher, reserved_bytes }
    }

    pub fn process(&self, task: &PageTask) -> PageResult {
        let mut buffer = task.data.clone();
        match self.write_cipher.encrypt_page(task.page_no, &mut buffer, self.reserved_bytes) {
            Ok(()) => PageResult::ok(task.page_no, buffer),
            Err(err) => PageResult::err(task.page_no, &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    #[test]
    fn process_encrypts_page_under_new_cipher() {
        let mut cipher = registry::allocate("aes256cbc").unwrap();
        cipher.generate_key(b"new-key", false, None).unwrap();
        let reserved = cipher.reserved_bytes();
        let pipeline = Pipeline::new(cipher, reserved);

        let task = PageTask { page_no: 2, data: vec![0x22u8; 4096] };
        let result = pipeline.process(&task);

        assert!(result.error.is_none());
        assert_ne!(result.data, task.data);
        assert_eq!(result.data.len(), task.data.len());
    }
}
