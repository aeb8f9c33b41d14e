//! Compile-time constants shared by every cipher codec, the registry, and the VFS shim.
//!
//! Centralising these here keeps the per-scheme reserved-byte and KDF-default bookkeeping
//! in one auditable place rather than scattered as magic numbers through the codecs.

/// The plaintext file-magic written at the start of an unencrypted page 1.
pub const FILE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Length, in bytes, of the random key-salt stored at the start of page 1 when the page
/// is encrypted and the cipher does not use a plaintext header.
pub const KEY_SALT_SIZE: usize = 16;

/// Page-1 header offset for legacy ciphers (AES-CBC legacy, ChaCha20 `legacy=1`, RC4): the
/// first 16 bytes of page 1 are never touched by the cipher.
pub const PAGE1_OFFSET_LEGACY: usize = 16;

/// Page-1 header offset for non-legacy ChaCha20-Poly1305 and ASCON-128. The source material
/// treats this boundary inconsistently (0 vs 24); this crate fixes it at 24 for every
/// non-legacy AEAD scheme and refuses to write a page-1 layout that would disagree — see
/// the [`crate::ciphers::chacha20_poly1305`] module docs and `DESIGN.md` for the reasoning.
pub const PAGE1_OFFSET_NONLEGACY: usize = 24;

/// Every page size this shim is willing to operate a cipher over.
pub const SUPPORTED_PAGE_SIZES: [u32; 8] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];

/// AES-128 key length in bytes.
pub const AES128_KEY_SIZE: usize = 16;
/// AES-256, ChaCha20, and ASCON-128 key length in bytes.
pub const KEY_SIZE: usize = 32;
/// AES block size / CBC IV length.
pub const AES_BLOCK_SIZE: usize = 16;

/// The 4-byte legacy AES-CBC salt constant mixed into the page-number-keyed per-page key.
pub const LEGACY_AES_SALT: &[u8; 4] = b"sAlT";

/// Default ChaCha20-Poly1305 PBKDF2 iteration count (non-legacy).
pub const CHACHA20_KDF_ITER_DEFAULT: u32 = 64_007;
/// Forced PBKDF2 iteration count when `legacy=1` is requested for the ChaCha20 codec.
pub const CHACHA20_KDF_ITER_LEGACY: u32 = 12_345;
/// Forced page size when `legacy=1` is requested for the ChaCha20 codec.
pub const CHACHA20_PAGE_SIZE_LEGACY: u32 = 4096;
/// Reserved-bytes footprint for ChaCha20-Poly1305: 16-byte nonce + 16-byte Poly1305 tag.
pub const CHACHA20_RESERVED_BYTES: u8 = 32;

/// Default PBKDF2 iteration count for SQLCipher-compatible codec version 4.
pub const SQLCIPHER_KDF_ITER_V4: u32 = 256_000;
/// Default PBKDF2 iteration count for SQLCipher-compatible codec versions 1-3.
pub const SQLCIPHER_KDF_ITER_V1_V3: u32 = 64_000;
/// Default iteration count for the fast HMAC-subkey derivation pass.
pub const SQLCIPHER_FAST_KDF_ITER_DEFAULT: u32 = 2;
/// Default byte XORed into the salt before deriving the HMAC subkey.
pub const SQLCIPHER_HMAC_SALT_MASK_DEFAULT: u8 = 0x3A;
/// Maximum `plaintext_header_size` (v4 only): must be a multiple of 16, at most this value.
pub const SQLCIPHER_PLAINTEXT_HEADER_MAX: u32 = 100;
/// IV length written per page for the SQLCipher-compatible codec.
pub const SQLCIPHER_IV_SIZE: usize = 16;

/// Default PBKDF2 (ASCON-PRF) iteration count for the ASCON-128 codec's key derivation.
pub const ASCON_KDF_ITER_DEFAULT: u32 = 64_007;
/// Reserved-bytes footprint for ASCON-128: 16-byte nonce + 16-byte tag.
pub const ASCON_RESERVED_BYTES: u8 = 32;
/// Nonce length used by the ASCON-128 codec.
pub const ASCON_NONCE_SIZE: usize = 16;

/// Minimum allowed PBKDF2 iteration count across every KDF-backed cipher.
pub const KDF_ITER_MIN: u32 = 1;
/// Maximum allowed PBKDF2 iteration count (2^31 - 1), matching the parameter contract.
pub const KDF_ITER_MAX: u32 = i32::MAX as u32;

/// Maximum length of a cipher descriptor name.
pub const MAX_CIPHER_NAME_LEN: usize = 63;
/// Compile-time bound on the number of ciphers the registry will hold.
pub const MAX_REGISTERED_CIPHERS: usize = 16;

/// Prefix marking a raw-key (bypass-KDF) password string, e.g. `x'0123...'`.
pub const RAW_KEY_PREFIX: &str = "x'";
/// Hex digit count of a raw 256-bit key (no salt override).
pub const RAW_KEY_HEX_LEN: usize = 64;
/// Hex digit count of a raw key plus a 16-byte salt override.
pub const RAW_KEY_SALT_HEX_LEN: usize = 96;
