//! pagevault - a page-level encrypting storage shim for an embedded relational database
//! engine.
//!
//! This crate sits between the pager and the OS file layer: it does not parse SQL,
//! execute queries, or manage B-trees, transactions, or the WAL index. It classifies the
//! files an embedded engine opens, transparently encrypts and decrypts the fixed-size
//! pages (and journal/WAL frames) that cross that boundary, and manages the key
//! lifecycle — `set_key`, `attach`, `rekey` — that decides which cipher protects them.

pub mod ciphers;
pub mod codec;
pub mod config;
pub mod error;
pub mod params;
pub mod primitives;
pub mod registry;
pub mod rekey;
pub mod types;
pub mod uri;
pub mod vfs;
pub mod worker;

pub use error::{Result, ShimError};

/// Installs a `tracing` subscriber appropriate for an embedding application. The shim
/// itself only emits events through `tracing`'s macros; it never initialises a global
/// subscriber on its own, since a library has no business deciding how its host logs —
/// this is here for binaries and integration tests that embed the shim standalone.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}
