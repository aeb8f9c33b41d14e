//! Page reader driving the VACUUM-for-rekey rebuild.
//!
//! Reads the source database one page at a time and decrypts each page with the
//! connection's *read* cipher before handing it to the executor pool — by the time a
//! [`PageTask`] reaches the pipeline its data is plaintext, regardless of what cipher (if
//! any) protected it on disk.

use std::io::Read;
use std::sync::{Arc, Mutex};

use flume::Sender;

use crate::codec::Codec;
use crate::error::{Result, ShimError};
use crate::types::{CodecMode, PageTask};

pub struct Reader {
    codec: Arc<Mutex<Codec>>,
    page_size: u32,
}

impl Reader {
    pub fn new(codec: Arc<Mutex<Codec>>, page_size: u32) -> Self {
        Self { codec, page_size }
    }

    /// Reads every full page from `input` in order, decrypts it in place, and sends it
    /// downstream. Stops cleanly at EOF; a trailing short page (shorter than `page_size`)
    /// is an `IOERR_SHORT_READ` condition, not a silent truncation.
    pub fn read_all<R: Read>(&self, mut input: R, sender: &Sender<PageTask>) -> Result<()> {
        let mut page_no = 1u32;
        loop {
            let mut buffer = vec![0u8; self.page_size as usize];
            let mut filled = 0usize;
            while filled < buffer.len() {
                let n = input.read(&mut buffer[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            if filled == 0 {
                break;
            }
            if filled < buffer.len() {
                return Err(ShimError::ShortRead { expected: buffer.len(), got: filled });
            }

            self.codec.lock().expect("codec mutex poisoned").encrypt_or_decrypt(page_no, &mut buffer, CodecMode::DecryptOnLoad)?;

            sender.send(PageTask { page_no, data: buffer }).map_err(|_| ShimError::Misuse("rekey channel closed early".into()))?;
            page_no += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::registry;

    fn codec_with_key(page_size: u32, password: &[u8]) -> Arc<Mutex<Codec>> {
        let mut cipher = registry::allocate("aes256cbc").unwrap();
        cipher.generate_key(password, false, None).unwrap();
        let mut codec = Codec::new(page_size);
        codec.set_both_ciphers(cipher);
        Arc::new(Mutex::new(codec))
    }

    #[test]
    fn reads_and_decrypts_every_page() {
        let page_size = 512u32;
        let codec = codec_with_key(page_size, b"old-key");

        // Build two encrypted pages by round-tripping plaintext through the same codec.
        let mut page1 = vec![0x11u8; page_size as usize];
        let mut page2 = vec![0x22u8; page_size as usize];
        codec.lock().unwrap().encrypt_or_decrypt(1, &mut page1, CodecMode::EncryptForMain).unwrap();
        codec.lock().unwrap().encrypt_or_decrypt(2, &mut page2, CodecMode::EncryptForMain).unwrap();

        let mut source = Vec::new();
        source.extend_from_slice(&page1);
        source.extend_from_slice(&page2);

        let reader = Reader::new(codec, page_size);
        let (tx, rx) = flume::unbounded();
        reader.read_all(Cursor::new(source), &tx).unwrap();
        drop(tx);

        let t1 = rx.recv().unwrap();
        let t2 = rx.recv().unwrap();
        assert_eq!(t1.page_no, 1);
        assert_eq!(t1.data, vec![0x11u8; page_size as usize]);
        assert_eq!(t2.page_no, 2);
        assert_eq!(t2.data, vec![0x22u8; page_size as usize]);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn trailing_short_page_is_an_error() {
        let page_size = 512u32;
        let codec = codec_with_key(page_size, b"old-key");
        let reader = Reader::new(codec, page_size);
        let (tx, _rx) = flume::unbounded();
        let short = vec![0u8; 100];
        assert!(reader.read_all(Cursor::new(short), &tx).is_err());
    }
}
