//! Process-wide cipher descriptor registry.
//!
//! Mirrors the main-file registry's mutex-guarded-list shape (see [`crate::vfs`]) but for
//! cipher *descriptors* rather than open files: a single static table, guarded by one
//! mutex held only across registration and lookup, bounded to a compile-time maximum.

use std::sync::{Mutex, OnceLock};

use hashbrown::HashMap;

use crate::ciphers::{ascon128, aes_cbc, chacha20_poly1305, rc4, sqlcipher, CipherFactory};
use crate::config::{MAX_CIPHER_NAME_LEN, MAX_REGISTERED_CIPHERS};
use crate::error::{Result, ShimError};

struct Entry {
    factory: Box<dyn CipherFactory>,
}

/// The static table. A plain `Mutex<HashMap>` rather than `RwLock`: registration is rare
/// and lookups are cheap, so there's no reader/writer split worth the extra type.
struct Registry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    default_cipher: Option<String>,
}

impl Registry {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: Vec::new(), default_cipher: None }
    }
}

fn table() -> &'static Mutex<Registry> {
    static TABLE: OnceLock<Mutex<Registry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut reg = Registry::new();
        // Built-in ciphers, registered in the order a fresh connection should try them
        // when no `cipher=` parameter is given.
        register_builtin(&mut reg, Box::new(sqlcipher::SqlCipherFactory), true);
        register_builtin(&mut reg, Box::new(chacha20_poly1305::ChaCha20Poly1305Factory), false);
        register_builtin(&mut reg, Box::new(ascon128::Ascon128Factory), false);
        register_builtin(&mut reg, Box::new(aes_cbc::Aes128CbcFactory), false);
        register_builtin(&mut reg, Box::new(aes_cbc::Aes256CbcFactory), false);
        register_builtin(&mut reg, Box::new(rc4::Rc4Factory), false);
        Mutex::new(reg)
    })
}

fn register_builtin(reg: &mut Registry, factory: Box<dyn CipherFactory>, make_default: bool) {
    let name = factory.name().to_ascii_lowercase();
    reg.order.push(name.clone());
    if make_default {
        reg.default_cipher = Some(name.clone());
    }
    reg.entries.insert(name, Entry { factory });
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_CIPHER_NAME_LEN {
        return Err(ShimError::Parameter(format!("cipher name length out of bounds: {}", name.len())));
    }
    Ok(())
}

/// Registers a new cipher descriptor. Rejects a duplicate name (case-insensitive) and a
/// parameter table that fails [`crate::ciphers::CipherParameter::validate`]. `make_default`
/// updates the global `cipher` parameter that a bare `set_key` without `cipher=` resolves
/// against.
pub fn register(factory: Box<dyn CipherFactory>, make_default: bool) -> Result<()> {
    validate_name(factory.name())?;
    for param in factory.parameters() {
        param.validate()?;
    }

    let mut reg = table().lock().expect("cipher registry mutex poisoned");
    let name = factory.name().to_ascii_lowercase();
    if reg.entries.contains_key(&name) {
        return Err(ShimError::Misuse(format!("cipher '{name}' already registered")));
    }
    if reg.order.len() >= MAX_REGISTERED_CIPHERS {
        return Err(ShimError::NoMem);
    }

    reg.order.push(name.clone());
    if make_default {
        reg.default_cipher = Some(name.clone());
    }
    reg.entries.insert(name, Entry { factory });
    Ok(())
}

/// Looks up a cipher by case-insensitive name and allocates fresh per-connection state.
pub fn allocate(name: &str) -> Result<Box<dyn crate::ciphers::CipherState>> {
    let reg = table().lock().expect("cipher registry mutex poisoned");
    let key = name.to_ascii_lowercase();
    reg.entries.get(&key).map(|e| e.factory.allocate()).ok_or_else(|| ShimError::NotFound(name.to_string()))
}

/// Returns the parameter schema a cipher was registered with, for seeding the global
/// [`crate::params::ParamTable`] the first time it's needed.
pub fn parameters_for(name: &str) -> Result<Vec<crate::ciphers::CipherParameter>> {
    let reg = table().lock().expect("cipher registry mutex poisoned");
    let key = name.to_ascii_lowercase();
    reg.entries.get(&key).map(|e| e.factory.parameters()).ok_or_else(|| ShimError::NotFound(name.to_string()))
}

/// Looks up a cipher by 1-based registration-order index.
pub fn allocate_by_index(index: usize) -> Result<Box<dyn crate::ciphers::CipherState>> {
    let reg = table().lock().expect("cipher registry mutex poisoned");
    let name = reg.order.get(index.wrapping_sub(1)).ok_or_else(|| ShimError::NotFound(format!("cipher index {index}")))?;
    reg.entries.get(name).map(|e| e.factory.allocate()).ok_or_else(|| ShimError::NotFound(name.clone()))
}

/// The name of the global default cipher, applied when a connection sets a key without
/// specifying `cipher=`.
pub fn default_cipher_name() -> Option<String> {
    table().lock().expect("cipher registry mutex poisoned").default_cipher.clone()
}

/// Lists every registered cipher name in registration order.
pub fn registered_names() -> Vec<String> {
    table().lock().expect("cipher registry mutex poisoned").order.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let names = registered_names();
        assert!(names.contains(&"sqlcipher".to_string()));
        assert!(names.contains(&"chacha20".to_string()));
        assert!(names.contains(&"ascon128".to_string()));
        assert!(names.contains(&"aes128cbc".to_string()));
        assert!(names.contains(&"aes256cbc".to_string()));
        assert!(names.contains(&"rc4".to_string()));
    }

    #[test]
    fn default_cipher_is_sqlcipher() {
        assert_eq!(default_cipher_name().as_deref(), Some("sqlcipher"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(allocate("ChaCha20").is_ok());
    }

    #[test]
    fn unknown_name_rejected() {
        assert!(allocate("no-such-cipher").is_err());
    }

    #[test]
    fn index_lookup_matches_registration_order() {
        let names = registered_names();
        assert!(allocate_by_index(1).is_ok());
        assert!(names[0] == "sqlcipher");
    }
}
