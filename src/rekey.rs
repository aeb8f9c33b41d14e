//! Key lifecycle: `set_key`, `attach`, and `rekey`.
//!
//! This is the only place connection-level key state changes. The codec facade
//! ([`crate::codec::Codec`]) just holds whatever cipher pair it's told to hold; the
//! decisions about *which* cipher, *when* a rekey needs a full rebuild instead of an
//! in-place page rewrite, and what to roll back to on failure all live here.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use crate::ciphers::CipherState;
use crate::codec::Codec;
use crate::error::{Result, ShimError};
use crate::registry;
use crate::worker::RekeyWorker;

/// Applies a key to a database that has no cipher installed yet, or replaces the key on
/// one that already has one (in which case this *is* a rekey by another name — SQLCipher
/// and SEE both treat `set_key` on an already-keyed connection as "key this connection
/// with this key", distinct from the `rekey`-pragma path which re-encrypts existing data).
///
/// An empty `key` on an unencrypted database is a no-op: there's nothing to key and
/// nothing to undo.
pub fn set_key(codec: &mut Codec, cipher_name: Option<&str>, key: &[u8]) -> Result<()> {
    if key.is_empty() && !codec.is_encrypted() {
        return Ok(());
    }
    if key.is_empty() {
        return Err(ShimError::Misuse("empty key rejected on an already-encrypted database".into()));
    }

    let name = cipher_name.map(str::to_string).or_else(registry::default_cipher_name).ok_or_else(|| ShimError::Misuse("no cipher available and none specified".into()))?;

    let mut cipher = registry::allocate(&name)?;
    cipher.generate_key(key, false, None)?;
    codec.set_both_ciphers(cipher);
    Ok(())
}

/// Resolves the cipher an ATTACHed schema should use. Three cases, matching the three
/// ways SQLCipher lets `ATTACH ... KEY` be satisfied:
///
/// - An explicit key was supplied in the `ATTACH` statement or its URI: derive fresh.
/// - No key, but the main connection is itself encrypted: inherit its cipher pair.
/// - No key and the main connection is unencrypted: the attached schema stays plaintext.
pub fn attach(main: &Codec, cipher_name: Option<&str>, explicit_key: Option<&[u8]>) -> Result<Codec> {
    let page_size = main.page_size();
    let mut attached = Codec::new(page_size);

    match explicit_key {
        Some(key) if !key.is_empty() => {
            let name = cipher_name.map(str::to_string).or_else(registry::default_cipher_name).ok_or_else(|| ShimError::Misuse("no cipher available and none specified".into()))?;
            let mut cipher = registry::allocate(&name)?;
            cipher.generate_key(key, false, None)?;
            attached.set_both_ciphers(cipher);
        }
        _ => {
            if main.is_encrypted() {
                let (read, write) = main.clone_ciphers();
                attached.set_read_cipher(read);
                attached.set_write_cipher(write);
            }
        }
    }

    Ok(attached)
}

/// Outcome of [`rekey`]: whether the on-disk page layout changed shape, since the caller
/// (the connection layer) needs to know whether it must also rewrite the journal/WAL or
/// just commit normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyOutcome {
    /// Reserved-bytes footprint was unchanged: pages were rewritten in place.
    InPlace,
    /// Reserved-bytes footprint changed: every page was relocated via a full rebuild.
    Rebuilt,
}

/// Implements `PRAGMA rekey` / `PRAGMA hexrekey`.
///
/// Steps (matching the documented 8-step algorithm):
/// 1. Reject if this connection is on a WAL that hasn't been checkpointed, or if the
///    database is in-memory/temporary (the caller is responsible for that check before
///    calling in — this function only knows about the codec, not the connection).
/// 2. Empty new key on an unencrypted DB: no-op.
/// 3. Empty new key on an encrypted DB: install no write cipher (decrypting rekey).
/// 4. Non-empty new key: allocate and key a new cipher as the write cipher.
/// 5. If the new write cipher's page size disagrees with the existing one, reject — a
///    rekey never changes the page size.
/// 6. If reserved-bytes differs from the current codec, the page layout changes shape:
///    drive a full rebuild through [`crate::worker::RekeyWorker`].
/// 7. Otherwise, the caller rewrites each page in place through its own pager; this
///    function only flips the cipher pointers before/after that happens.
/// 8. On success, promote the write cipher to the read-cipher slot too (the rekey is
///    committed); on failure, restore the previous write cipher so the connection is left
///    exactly as it was.
pub fn rekey<R, W>(codec: &mut Codec, cipher_name: Option<&str>, new_key: &[u8], rebuild_io: Option<(R, W)>) -> Result<RekeyOutcome>
where
    R: Read + Seek + Send + 'static,
    W: Write + Seek,
{
    if new_key.is_empty() && !codec.is_encrypted() {
        return Ok(RekeyOutcome::InPlace);
    }

    let previous_write = codec.take_write_cipher();

    let new_write: Option<Box<dyn CipherState>> = if new_key.is_empty() {
        // Decrypting rekey: drop the write cipher, keep the read cipher so any
        // in-flight rollback journal written before commit stays readable.
        None
    } else {
        let name = cipher_name.map(str::to_string).or_else(registry::default_cipher_name).ok_or_else(|| ShimError::Misuse("no cipher available and none specified".into()))?;
        let mut cipher = registry::allocate(&name)?;
        cipher.generate_key(new_key, true, None)?;

        if cipher.page_size() != 0 && cipher.page_size() != codec.page_size() {
            // Restore before rejecting: rekey must never leave the codec half-mutated.
            codec.set_write_cipher(previous_write);
            return Err(ShimError::Parameter("rekey cipher requires a different page size".into()));
        }
        Some(cipher)
    };

    let old_reserved = codec.reserved_bytes();
    let new_reserved = new_write.as_ref().map_or(0, |c| c.reserved_bytes());
    let layout_changed = old_reserved != new_reserved;

    codec.set_write_cipher(new_write);

    let rebuild_result = if layout_changed {
        run_rebuild(codec, rebuild_io)
    } else {
        Ok(())
    };

    match rebuild_result {
        Ok(()) => {
            let write = codec.write_cipher().map(crate::ciphers::CipherState::box_clone);
            codec.set_read_cipher(write);
            Ok(if layout_changed { RekeyOutcome::Rebuilt } else { RekeyOutcome::InPlace })
        }
        Err(err) => {
            codec.set_write_cipher(previous_write);
            Err(err)
        }
    }
}

fn run_rebuild<R, W>(codec: &Codec, rebuild_io: Option<(R, W)>) -> Result<()>
where
    R: Read + Seek + Send + 'static,
    W: Write + Seek,
{
    let (mut input, mut output) = rebuild_io.ok_or_else(|| ShimError::Misuse("rebuild requires source and destination handles".into()))?;

    let write_cipher = codec.write_cipher().map(crate::ciphers::CipherState::box_clone).ok_or_else(|| ShimError::Misuse("rebuild requested with no write cipher installed".into()))?;
    let new_reserved = codec.write_cipher().map_or(0, crate::ciphers::CipherState::reserved_bytes);

    // Source pages are read through whatever cipher (if any) currently protects them. A
    // database going from unencrypted to encrypted for the first time has no read
    // cipher, so `read_codec` stays unencrypted and the reader passes pages through
    // untouched — exactly "no decryption needed" for plaintext source pages.
    let mut read_codec = Codec::new(codec.page_size());
    if let Some(existing) = codec.read_cipher().map(crate::ciphers::CipherState::box_clone) {
        // `set_both_ciphers` also installs `existing` as the write cipher, which this
        // read-only codec never exercises (the reader only ever calls `DecryptOnLoad`).
        read_codec.set_both_ciphers(existing);
    }
    let read_codec = Arc::new(Mutex::new(read_codec));

    input.seek(SeekFrom::Start(0))?;
    let worker = RekeyWorker::new(read_codec, write_cipher, codec.page_size(), new_reserved);
    worker.process(input, &mut output)
}
