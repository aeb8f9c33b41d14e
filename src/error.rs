//! Error taxonomy for the encrypting storage shim.
//!
//! Every fallible path in this crate returns [`ShimError`]. The variants mirror the
//! propagated-error-code surface an embedding engine expects (`NOTADB`, `CORRUPT`,
//! `IOERR_SHORT_READ`, ...) rather than a generic opaque error, because callers above
//! the VFS boundary branch on *which* failure occurred.

use thiserror::Error;

/// Distinguishes a MAC failure on page 1 (wrong key / not a database) from a MAC
/// failure on any other page (in-place corruption). The engine needs this distinction
/// to report `NOTADB` vs `CORRUPT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacFailureKind {
    /// Failure while verifying page 1 — ambiguous between wrong key and file damage.
    Page1,
    /// Failure on any page other than page 1 — treated as corruption.
    OtherPage,
}

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("misuse: {0}")]
    Misuse(String),

    #[error("out of memory")]
    NoMem,

    #[error("database authentication failed (wrong key or damaged header)")]
    NotADb,

    #[error("page corruption detected: {0}")]
    Corrupt(String),

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("connection is read-only")]
    ReadOnly,

    #[error("unknown parameter: {0}")]
    NotFound(String),

    #[error("unsupported key length: {0}")]
    KeyDerivation(String),

    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("malformed hex string")]
    MalformedHex,

    #[error("rekey already in progress")]
    RekeyInProgress,

    #[error("cipher {0:?} rejected: {1}")]
    CipherRejected(String, String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShimError {
    /// Builds the page-authentication error for the given page, applying the
    /// page-1-vs-rest distinction from the error taxonomy.
    pub fn mac_failure(kind: MacFailureKind, page_no: u32) -> Self {
        match kind {
            MacFailureKind::Page1 => Self::NotADb,
            MacFailureKind::OtherPage => Self::Corrupt(format!("mac verification failed on page {page_no}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, ShimError>;
