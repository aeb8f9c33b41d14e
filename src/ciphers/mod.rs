//! Per-cipher page codecs and the descriptor contract they all implement.
//!
//! The cipher set is a closed variant: AES-128/256-CBC, ChaCha20-Poly1305, the
//! SQLCipher-compatible scheme, ASCON-128, and legacy RC4. Rather than an inheritance
//! hierarchy, each cipher owns its own state record and is reached through two trait
//! objects — [`CipherFactory`] (the immutable descriptor registered once) and
//! [`CipherState`] (the per-connection, possibly keyed, mutable instance it allocates).

pub mod aes_cbc;
pub mod ascon128;
pub mod chacha20_poly1305;
pub mod rc4;
pub mod sqlcipher;

use crate::error::Result;

/// A tunable cipher parameter: current/default/min/max, selectable by name prefix
/// (`default:name`, `min:name`, `max:name`) at the registry layer.
#[derive(Debug, Clone)]
pub struct CipherParameter {
    pub name: &'static str,
    pub current: i64,
    pub default: i64,
    pub min: i64,
    pub max: i64,
}

impl CipherParameter {
    pub fn new(name: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self { name, current: default, default, min, max }
    }

    /// Validates `min <= default <= max` and `min <= current <= max`, as the registry
    /// requires of every parameter table before a cipher is accepted.
    pub fn validate(&self) -> Result<()> {
        if !(self.min <= self.default && self.default <= self.max) {
            return Err(crate::error::ShimError::Parameter(format!("{}: min <= default <= max violated", self.name)));
        }
        if !(self.min <= self.current && self.current <= self.max) {
            return Err(crate::error::ShimError::Parameter(format!("{}: current value out of range", self.name)));
        }
        Ok(())
    }

    pub fn set_current(&mut self, value: i64) -> Result<()> {
        if value < self.min || value > self.max {
            return Err(crate::error::ShimError::Parameter(format!("{}: {value} out of range [{}, {}]", self.name, self.min, self.max)));
        }
        self.current = value;
        Ok(())
    }
}

/// Per-connection cipher state: keyed, possibly legacy-flagged, ready to transform pages.
///
/// `encrypt_page`/`decrypt_page` operate on the full on-disk page buffer (body +
/// reserved trailer) in place; the codec facade is responsible for handing the codec a
/// scratch buffer so the pager's own memory is never mutated on the write path.
pub trait CipherState: Send {
    fn legacy(&self) -> bool;

    /// 0 means "follow the database's configured page size".
    fn page_size(&self) -> u32;

    fn reserved_bytes(&self) -> u8;

    /// The 16-byte key-salt, once known (after the first `generate_key` call that didn't
    /// receive an explicit override, or after reading it back from an existing page 1).
    fn salt(&self) -> Option<[u8; 16]>;

    /// Derives subkeys from `password`. `rekey` distinguishes "first key on this
    /// connection" from "replacing an existing key" (matters for which salt is kept).
    /// `salt_override` is used for the SQLCipher raw-key bypass and explicit
    /// `cipher_salt=` URI parameters.
    fn generate_key(&mut self, password: &[u8], rekey: bool, salt_override: Option<[u8; 16]>) -> Result<()>;

    /// Encrypts `buffer[..page_len]` in place; `reserved` of those bytes are the trailer.
    fn encrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8) -> Result<()>;

    /// Decrypts `buffer[..page_len]` in place. `verify_mac = false` skips authentication
    /// (the `hmac_check=0` forensic-recovery escape hatch) and always succeeds.
    fn decrypt_page(&self, page_no: u32, buffer: &mut [u8], reserved: u8, verify_mac: bool) -> Result<()>;

    fn box_clone(&self) -> Box<dyn CipherState>;
}

impl Clone for Box<dyn CipherState> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// The immutable descriptor registered once per cipher name: a factory for state plus
/// the parameter schema the registry validates at registration time.
pub trait CipherFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn allocate(&self) -> Box<dyn CipherState>;
    fn parameters(&self) -> Vec<CipherParameter>;
}
