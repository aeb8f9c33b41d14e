//! Concurrent page re-encryption for the VACUUM-for-rekey rebuild.
//!
//! Orchestrates three stages across plain OS threads — no async runtime, since every
//! stage here is either blocking file I/O or CPU-bound cipher work, and the engine that
//! embeds this shim is itself synchronous.
//!
//! # Architecture
//!
//! 1. **Reader thread**: reads the source file page by page, decrypts with the read
//!    cipher, sends each page to the executor.
//! 2. **Executor pool**: re-encrypts pages in parallel via Rayon, keyed by the new write
//!    cipher.
//! 3. **Writer (calling thread)**: reassembles pages into page-number order and writes
//!    them to the destination.

pub mod buffer;
pub mod executor;
pub mod pipeline;
pub mod reader;
pub mod writer;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use flume::bounded;

use crate::ciphers::CipherState;
use crate::codec::Codec;
use crate::error::{Result, ShimError};
use crate::worker::executor::Executor;
use crate::worker::pipeline::Pipeline;
use crate::worker::reader::Reader;
use crate::worker::writer::Writer;

/// Drives one full source-to-destination page rewrite under a new cipher. Used by
/// [`crate::rekey::rekey`] whenever the new cipher's reserved-bytes footprint differs
/// from the old one, since that forces every page to be relocated rather than rewritten
/// in place.
pub struct RekeyWorker {
    read_codec: Arc<Mutex<Codec>>,
    write_cipher: Box<dyn CipherState>,
    page_size: u32,
    reserved_bytes: u8,
}

impl RekeyWorker {
    pub fn new(read_codec: Arc<Mutex<Codec>>, write_cipher: Box<dyn CipherState>, page_size: u32, reserved_bytes: u8) -> Self {
        Self { read_codec, write_cipher, page_size, reserved_bytes }
    }

    /// Streams every page from `input` to `output`, decrypted with the old cipher and
    /// re-encrypted with the new one. Spawns a reader thread and lets Rayon fan the
    /// executor stage across available cores; writing happens on the calling thread.
    pub fn process<R, W>(self, input: R, output: W) -> Result<()>
    where
        R: Read + Send + 'static,
        W: Write,
    {
        let concurrency = thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4);
        let channel_size = concurrency * 2;

        let (task_tx, task_rx) = bounded(channel_size);
        let (result_tx, result_rx) = bounded(channel_size);

        let reader = Reader::new(self.read_codec, self.page_size);
        let reader_handle = thread::spawn(move || reader.read_all(input, &task_tx));

        let executor = Executor::new(Pipeline::new(self.write_cipher, self.reserved_bytes));
        let executor_handle = thread::spawn(move || {
            executor.process(&task_rx, &result_tx);
        });

        let mut writer = Writer::new();
        let write_result = writer.write_all(output, result_rx);

        let read_result = reader_handle.join().map_err(|_| ShimError::Misuse("reader thread panicked".into()))?;
        executor_handle.join().map_err(|_| ShimError::Misuse("executor thread panicked".into()))?;

        read_result?;
        write_result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::registry;
    use crate::types::CodecMode;

    #[test]
    fn rewrites_every_page_under_the_new_cipher() {
        let page_size = 512u32;

        let mut old_cipher = registry::allocate("aes256cbc").unwrap();
        old_cipher.generate_key(b"old", false, None).unwrap();
        let mut source_codec = Codec::new(page_size);
        source_codec.set_both_ciphers(old_cipher.box_clone());

        let mut plain_pages = Vec::new();
        let mut source = Vec::new();
        for page_no in 1..=3u32 {
            let page = vec![page_no as u8; page_size as usize];
            plain_pages.push(page.clone());
            let mut encrypted = page;
            source_codec.encrypt_or_decrypt(page_no, &mut encrypted, CodecMode::EncryptForMain).unwrap();
            source.extend_from_slice(&encrypted);
        }

        let mut new_cipher = registry::allocate("aes256cbc").unwrap();
        new_cipher.generate_key(b"new", false, None).unwrap();
        let reserved = new_cipher.reserved_bytes();

        let read_codec = Arc::new(Mutex::new(source_codec));
        let worker = RekeyWorker::new(read_codec, new_cipher.box_clone(), page_size, reserved);

        let mut rebuilt = Vec::new();
        worker.process(Cursor::new(source), &mut rebuilt).unwrap();

        assert_eq!(rebuilt.len(), 3 * page_size as usize);
        for (i, plain) in plain_pages.iter().enumerate() {
            let page_no = i as u32 + 1;
            let mut page = rebuilt[i * page_size as usize..(i + 1) * page_size as usize].to_vec();
            new_cipher.decrypt_page(page_no, &mut page, reserved, true).unwrap();
            assert_eq!(&page, plain);
        }
    }
}
