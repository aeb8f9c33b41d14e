//! Encrypting VFS shim.
//!
//! Wraps an underlying file-I/O abstraction by reference and intercepts only the
//! operations that touch page bytes: `open` substitutes shim-owned read/write logic,
//! everything else (delete, access-check, full-pathname, randomness, sleep,
//! current-time, syscall passthrough) delegates straight through. File-control requests
//! are forwarded, except the shim appends its own name to a `VFSNAME` query.

pub mod registry;

use std::sync::{Arc, Mutex};

use crate::codec::Codec;
use crate::error::{Result, ShimError};
use crate::types::{CodecMode, FileClass};
use crate::uri::find_database_param;

/// Flags the engine passes to `open`, reduced to what the shim's classification table
/// needs — the rest of SQLite's open-flag surface is irrelevant to page encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub main_db: bool,
    pub temp_db: bool,
    pub main_journal: bool,
    pub temp_journal: bool,
    pub subjournal: bool,
    pub master_journal: bool,
    pub wal: bool,
}

/// Classifies an open request into the file category the read/write interception tables
/// branch on.
pub fn classify(flags: OpenFlags) -> FileClass {
    if flags.main_db {
        FileClass::MainDb
    } else if flags.temp_db {
        FileClass::TempDb
    } else if flags.main_journal {
        FileClass::MainJournal
    } else if flags.temp_journal {
        FileClass::TempJournal
    } else if flags.subjournal {
        FileClass::SubJournal
    } else if flags.master_journal {
        FileClass::MasterJournal
    } else if flags.wal {
        FileClass::Wal
    } else {
        FileClass::Other
    }
}

/// Underlying byte-addressable file abstraction the shim wraps. Real integration code
/// implements this over the engine's own VFS file methods; tests implement it directly
/// over a `Vec<u8>` or a `std::fs::File`.
pub trait RawFile: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
    fn file_size(&mut self) -> Result<u64>;
}

/// Per-open-file shim state layered over a [`RawFile`]. Holds the scratch state journal
/// and WAL reads need to remember a page number between two consecutive short reads.
pub struct ShimFile<F: RawFile> {
    inner: F,
    class: FileClass,
    codec: Option<Arc<Mutex<Codec>>>,
    legacy_wal: bool,
    /// Page number stashed by a preceding 4-byte journal/subjournal read or write,
    /// consumed by the read/write that immediately follows it.
    pending_pgno: Option<u32>,
}

impl<F: RawFile> ShimFile<F> {
    pub fn new(inner: F, class: FileClass, codec: Option<Arc<Mutex<Codec>>>, legacy_wal: bool) -> Self {
        Self { inner, class, codec, legacy_wal, pending_pgno: None }
    }

    pub fn class(&self) -> FileClass {
        self.class
    }

    /// Page size used to page-align non-journal reads; 0 (unencrypted / not yet known)
    /// disables page-aligned decryption and falls back to passthrough.
    fn page_size(&self) -> u32 {
        self.codec.as_ref().map(|c| c.lock().expect("codec mutex poisoned").page_size()).unwrap_or(0)
    }

    fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.class.is_always_plaintext() || !self.has_codec() {
            return self.inner.read_at(offset, buf);
        }

        match self.class {
            FileClass::MainDb => self.read_main_db(offset, buf),
            FileClass::MainJournal | FileClass::SubJournal => self.read_journal(offset, buf),
            FileClass::Wal => self.read_wal(offset, buf),
            _ => self.inner.read_at(offset, buf),
        }
    }

    fn read_main_db(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        // The first 16 bytes of page 1 (file magic or key-salt) are always passed
        // through untouched — this is the one read that never goes through the codec.
        if offset == 0 && buf.len() == 16 {
            return self.inner.read_at(offset, buf);
        }

        let page_size = self.page_size();
        if page_size == 0 {
            return self.inner.read_at(offset, buf);
        }

        let page_no = (offset / u64::from(page_size)) as u32 + 1;
        let page_start = u64::from(page_no - 1) * u64::from(page_size);

        // Full-page read: decrypt in place.
        if offset == page_start && buf.len() as u32 == page_size {
            let n = self.inner.read_at(offset, buf)?;
            self.decrypt_page(page_no, &mut buf[..n])?;
            return Ok(n);
        }

        // Partial read (e.g. the pager reading just the header): satisfy via a full-page
        // read, decrypt, then slice out the requested range.
        let mut full = vec![0u8; page_size as usize];
        let n = self.inner.read_at(page_start, &mut full)?;
        if n < full.len() {
            return Err(ShimError::ShortRead { expected: full.len(), got: n });
        }
        self.decrypt_page(page_no, &mut full)?;
        let start = (offset - page_start) as usize;
        let end = start + buf.len();
        if end > full.len() {
            return Err(ShimError::ShortRead { expected: end, got: full.len() });
        }
        buf.copy_from_slice(&full[start..end]);
        Ok(buf.len())
    }

    fn read_journal(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        // A journal frame is [4-byte page number][page body]. The pager issues these as
        // two separate reads; the shim stashes the page number from the first and uses
        // it to decrypt the second.
        if buf.len() == 4 {
            let n = self.inner.read_at(offset, buf)?;
            if n == 4 {
                self.pending_pgno = Some(u32::from_le_bytes(buf.try_into().expect("4 bytes")));
            }
            return Ok(n);
        }

        let page_size = self.page_size();
        if buf.len() as u32 == page_size {
            if let Some(page_no) = self.pending_pgno.take() {
                let n = self.inner.read_at(offset, buf)?;
                self.decrypt_page(page_no, &mut buf[..n])?;
                return Ok(n);
            }
        }

        self.inner.read_at(offset, buf)
    }

    fn read_wal(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let page_size = self.page_size();

        // Legacy mode permits a single combined 24-byte-header + page-size read with the
        // page number taken from the first 4 bytes of the buffer itself.
        if self.legacy_wal && buf.len() as u64 == 24 + u64::from(page_size) {
            let n = self.inner.read_at(offset, buf)?;
            let page_no = u32::from_be_bytes(buf[0..4].try_into().expect("4 bytes"));
            self.decrypt_page(page_no, &mut buf[24..n])?;
            return Ok(n);
        }

        if buf.len() as u32 == page_size && offset >= 24 {
            let mut header = [0u8; 24];
            self.inner.read_at(offset - 24, &mut header)?;
            let page_no = u32::from_be_bytes(header[0..4].try_into().expect("4 bytes"));
            let n = self.inner.read_at(offset, buf)?;
            self.decrypt_page(page_no, &mut buf[..n])?;
            return Ok(n);
        }

        self.inner.read_at(offset, buf)
    }

    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.class.is_always_plaintext() || !self.has_codec() {
            return self.inner.write_at(offset, buf);
        }

        match self.class {
            FileClass::MainDb => self.write_main_db(offset, buf),
            FileClass::MainJournal | FileClass::SubJournal => self.write_journal(offset, buf),
            FileClass::Wal => self.write_wal(offset, buf),
            _ => self.inner.write_at(offset, buf),
        }
    }

    fn write_main_db(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let page_size = self.page_size();
        if page_size == 0 || buf.len() as u32 != page_size {
            return self.inner.write_at(offset, buf);
        }
        let page_no = (offset / u64::from(page_size)) as u32 + 1;
        let mut scratch = buf.to_vec();
        self.encrypt_page(page_no, &mut scratch, CodecMode::EncryptForMain)?;
        self.inner.write_at(offset, &scratch)
    }

    fn write_journal(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if buf.len() == 4 {
            self.pending_pgno = Some(u32::from_le_bytes(buf.try_into().expect("4 bytes")));
            return self.inner.write_at(offset, buf);
        }

        let page_size = self.page_size();
        if buf.len() as u32 == page_size {
            if let Some(page_no) = self.pending_pgno.take() {
                let mut scratch = buf.to_vec();
                // Rollback-journal writes use the READ cipher so the journal stays
                // readable under the pre-rekey key if a rekey is rolled back.
                self.encrypt_page(page_no, &mut scratch, CodecMode::EncryptForJournal)?;
                return self.inner.write_at(offset, &scratch);
            }
        }

        self.inner.write_at(offset, buf)
    }

    fn write_wal(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let page_size = self.page_size();

        if self.legacy_wal && buf.len() as u64 == 24 + u64::from(page_size) {
            let page_no = u32::from_be_bytes(buf[0..4].try_into().expect("4 bytes"));
            let mut scratch = buf.to_vec();
            self.encrypt_page(page_no, &mut scratch[24..], CodecMode::EncryptForMain)?;
            return self.inner.write_at(offset, &scratch);
        }

        if buf.len() as u32 == page_size && offset >= 24 {
            let mut header = [0u8; 24];
            self.inner.read_at(offset - 24, &mut header)?;
            let page_no = u32::from_be_bytes(header[0..4].try_into().expect("4 bytes"));
            let mut scratch = buf.to_vec();
            self.encrypt_page(page_no, &mut scratch, CodecMode::EncryptForMain)?;
            return self.inner.write_at(offset, &scratch);
        }

        self.inner.write_at(offset, buf)
    }

    fn decrypt_page(&self, page_no: u32, buf: &mut [u8]) -> Result<()> {
        let codec = self.codec.as_ref().expect("has_codec checked by caller");
        codec.lock().expect("codec mutex poisoned").encrypt_or_decrypt(page_no, buf, CodecMode::DecryptOnLoad)
    }

    fn encrypt_page(&self, page_no: u32, buf: &mut [u8], mode: CodecMode) -> Result<()> {
        let codec = self.codec.as_ref().expect("has_codec checked by caller");
        codec.lock().expect("codec mutex poisoned").encrypt_or_decrypt(page_no, buf, mode)
    }
}

/// Resolves the codec a non-MAIN_DB file should use, by reading its `database=` URI
/// parameter and looking the owning main-DB file up in the registry. Returns `None` (not
/// an error) if the parameter is absent or the main DB isn't registered — the shim treats
/// a missing codec as pass-through, never as a fault.
pub fn resolve_journal_codec(registry: &registry::MainFileRegistry, uri_query: &str) -> Option<Arc<Mutex<Codec>>> {
    let main_path = find_database_param(uri_query)?;
    registry.lookup(&main_path)
}
