//! Three-tier parameter precedence: compile-time defaults < global table < per-connection
//! table (cloned from the global table on first use).
//!
//! A parameter value resolves by walking these tiers from most to least specific; setting
//! a value at the per-connection tier never mutates the global tier, and vice versa,
//! except through the explicit `make_default` path in [`crate::registry`].

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::ciphers::CipherParameter;
use crate::error::{Result, ShimError};

/// Selects which of a parameter's four fields a lookup resolves to, driven by the
/// `default:`/`min:`/`max:` name prefixes the PRAGMA and URI surfaces accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamView {
    Current,
    Default,
    Min,
    Max,
}

/// Splits a parameter name like `default:kdf_iter` into its view and bare name.
pub fn parse_prefixed_name(raw: &str) -> (ParamView, &str) {
    if let Some(rest) = raw.strip_prefix("default:") {
        (ParamView::Default, rest)
    } else if let Some(rest) = raw.strip_prefix("min:") {
        (ParamView::Min, rest)
    } else if let Some(rest) = raw.strip_prefix("max:") {
        (ParamView::Max, rest)
    } else {
        (ParamView::Current, raw)
    }
}

impl ParamView {
    fn read(self, param: &CipherParameter) -> i64 {
        match self {
            Self::Current => param.current,
            Self::Default => param.default,
            Self::Min => param.min,
            Self::Max => param.max,
        }
    }
}

/// A per-connection or global table of cipher parameters, keyed by `(cipher, param)` name
/// pairs so distinct ciphers never collide on a shared parameter name like `kdf_iter`.
#[derive(Clone, Default)]
pub struct ParamTable {
    values: HashMap<(String, String), CipherParameter>,
    /// `hmac_check` may only be set at the default (global) scope, and only before any
    /// connection has cloned the table — this records whether that window has closed.
    hmac_check_locked: bool,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cipher: &str, param: CipherParameter) {
        self.values.insert((cipher.to_ascii_lowercase(), param.name.to_ascii_lowercase()), param);
    }

    pub fn get(&self, cipher: &str, name: &str) -> Result<i64> {
        let (view, bare) = parse_prefixed_name(name);
        let key = (cipher.to_ascii_lowercase(), bare.to_ascii_lowercase());
        self.values.get(&key).map(|p| view.read(p)).ok_or_else(|| ShimError::NotFound(name.to_string()))
    }

    pub fn set(&mut self, cipher: &str, name: &str, value: i64) -> Result<()> {
        if name.eq_ignore_ascii_case("hmac_check") && self.hmac_check_locked {
            return Err(ShimError::Misuse("hmac_check can only be set at default scope before first use".into()));
        }
        let key = (cipher.to_ascii_lowercase(), name.to_ascii_lowercase());
        let param = self.values.get_mut(&key).ok_or_else(|| ShimError::NotFound(name.to_string()))?;
        param.set_current(value)
    }

    /// Clones the global table for a new connection, locking `hmac_check` from further
    /// global-scope changes: once any connection exists, the write-once window is closed.
    pub fn fork_for_connection(&mut self) -> Self {
        self.hmac_check_locked = true;
        self.clone()
    }
}

fn global() -> &'static Mutex<ParamTable> {
    static GLOBAL: std::sync::OnceLock<Mutex<ParamTable>> = std::sync::OnceLock::new();
    GLOBAL.get_or_init(|| {
        let mut table = ParamTable::new();
        for cipher in crate::registry::registered_names() {
            if let Ok(params) = crate::registry::parameters_for(&cipher) {
                for param in params {
                    table.insert(&cipher, param);
                }
            }
        }
        Mutex::new(table)
    })
}

/// Reads a parameter at global scope.
pub fn get_global(cipher: &str, name: &str) -> Result<i64> {
    global().lock().expect("param table mutex poisoned").get(cipher, name)
}

/// Sets a parameter at global scope.
pub fn set_global(cipher: &str, name: &str, value: i64) -> Result<()> {
    global().lock().expect("param table mutex poisoned").set(cipher, name, value)
}

/// Clones the global table into a fresh per-connection table.
pub fn fork_connection_table() -> ParamTable {
    global().lock().expect("param table mutex poisoned").fork_for_connection()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParamTable {
        let mut t = ParamTable::new();
        t.insert("chacha20", CipherParameter::new("kdf_iter", 64007, 1, i64::from(i32::MAX)));
        t
    }

    #[test]
    fn current_defaults_to_default_value() {
        let t = sample();
        assert_eq!(t.get("chacha20", "kdf_iter").unwrap(), 64007);
    }

    #[test]
    fn set_changes_current_not_default() {
        let mut t = sample();
        t.set("chacha20", "kdf_iter", 100).unwrap();
        assert_eq!(t.get("chacha20", "kdf_iter").unwrap(), 100);
        assert_eq!(t.get("chacha20", "default:kdf_iter").unwrap(), 64007);
    }

    #[test]
    fn min_max_views_resolve() {
        let t = sample();
        assert_eq!(t.get("chacha20", "min:kdf_iter").unwrap(), 1);
        assert_eq!(t.get("chacha20", "max:kdf_iter").unwrap(), i64::from(i32::MAX));
    }

    #[test]
    fn unknown_parameter_not_found() {
        let t = sample();
        assert!(t.get("chacha20", "no_such_param").is_err());
    }

    #[test]
    fn fork_then_global_hmac_check_is_locked() {
        let mut t = sample();
        t.insert("sqlcipher", CipherParameter::new("hmac_check", 1, 0, 1));
        let _forked = t.fork_for_connection();
        assert!(t.set("sqlcipher", "hmac_check", 0).is_err());
    }
}
