//! Shared type definitions used across the codec, VFS shim, and rekey pipeline.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::ShimError;

/// Classification of a file the shim's VFS has opened, derived from the engine's open
/// flags. Determines which read/write interception rules in [`crate::vfs`] apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    MainDb,
    TempDb,
    MainJournal,
    TempJournal,
    SubJournal,
    MasterJournal,
    Wal,
    /// Anything else the engine opens (transient files): always passed through.
    Other,
}

impl FileClass {
    /// Files that are never touched by a cipher regardless of classification rules below.
    #[inline]
    pub fn is_always_plaintext(self) -> bool {
        matches!(self, Self::MasterJournal | Self::Other)
    }
}

impl Display for FileClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::MainDb => "main-db",
            Self::TempDb => "temp-db",
            Self::MainJournal => "main-journal",
            Self::TempJournal => "temp-journal",
            Self::SubJournal => "sub-journal",
            Self::MasterJournal => "master-journal",
            Self::Wal => "wal",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// The three modes the codec facade's `encrypt_or_decrypt` operates in. Rollback-journal
/// writes deliberately reuse the **read** cipher — see [`crate::codec::Codec`] docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    DecryptOnLoad,
    EncryptForMain,
    EncryptForJournal,
}

impl CodecMode {
    #[inline]
    pub fn is_decrypt(self) -> bool {
        matches!(self, Self::DecryptOnLoad)
    }
}

/// One page of work handed from the VACUUM-for-rekey reader to the executor pool.
pub struct PageTask {
    /// 1-based page number within the database.
    pub page_no: u32,
    /// Page body as read through the old (read) cipher: plaintext by the time the
    /// executor sees it.
    pub data: Vec<u8>,
}

/// Result of re-encrypting one [`PageTask`] under the new (write) cipher.
pub struct PageResult {
    pub page_no: u32,
    /// Re-encrypted page body, empty if `error.is_some()`.
    pub data: Vec<u8>,
    pub error: Option<Box<str>>,
}

impl PageResult {
    #[inline]
    pub fn ok(page_no: u32, data: Vec<u8>) -> Self {
        Self { page_no, data, error: None }
    }

    #[inline]
    pub fn err(page_no: u32, error: &ShimError) -> Self {
        Self { page_no, data: Vec::new(), error: Some(error.to_string().into_boxed_str()) }
    }
}
