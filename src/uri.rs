//! URI query parameter parsing and PRAGMA statement dispatch.
//!
//! URI params are read once, at `sqlite3_open_v2`-equivalent time; PRAGMA statements are
//! the same surface re-exposed at runtime over an already-open connection. Both funnel
//! into [`ConnectionConfig`] so `attach`/`set_key`/`rekey` in [`crate::rekey`] see one
//! consistent shape regardless of which path set a value.

use crate::error::{Result, ShimError};

/// A parsed, not-yet-applied key configuration for one connection or ATTACHed schema.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub cipher: Option<String>,
    pub kdf_iter: Option<u32>,
    pub legacy: Option<u32>,
    pub hmac_use: Option<bool>,
    pub mc_legacy_wal: Option<bool>,
    pub key: Option<Vec<u8>>,
    pub cipher_salt: Option<[u8; 16]>,
}

/// Decodes a hex string, returning the exact error text the PRAGMA surface promises
/// (`"Malformed hex string"`) on odd length or non-hex digits.
pub fn decode_hex(input: &str) -> Result<Vec<u8>> {
    if input.len() % 2 != 0 {
        return Err(ShimError::MalformedHex);
    }
    hex::decode(input).map_err(|_| ShimError::MalformedHex)
}

fn decode_salt(input: &str) -> Result<[u8; 16]> {
    let bytes = decode_hex(input)?;
    bytes.try_into().map_err(|_| ShimError::Parameter("cipher_salt must be exactly 32 hex digits".into()))
}

/// Parses the query-string portion of a `file:` URI (the part after `?`, without the `?`).
/// Unrecognised keys are ignored — the shim only understands the keys it documents, and a
/// forward-compatible engine may pass others through to the core VFS.
pub fn parse_uri_params(query: &str) -> Result<ConnectionConfig> {
    let mut cfg = ConnectionConfig::default();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        apply_param(&mut cfg, key, value)?;
    }
    Ok(cfg)
}

/// Extracts the `database=` parameter used by journal/WAL filenames to name their owning
/// main-database file, without parsing the rest of the query string.
pub fn find_database_param(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| pair.strip_prefix("database=").map(str::to_string))
}

fn apply_param(cfg: &mut ConnectionConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "cipher" => cfg.cipher = Some(value.to_string()),
        "kdf_iter" => cfg.kdf_iter = Some(parse_u32(value)?),
        "legacy" => cfg.legacy = Some(parse_u32(value)?),
        "hmac_use" => cfg.hmac_use = Some(parse_bool(value)?),
        "mc_legacy_wal" => cfg.mc_legacy_wal = Some(parse_bool(value)?),
        "hexkey" => cfg.key = Some(decode_hex(value)?),
        "key" => cfg.key = Some(value.as_bytes().to_vec()),
        "textkey" => cfg.key = Some(value.as_bytes().to_vec()),
        "cipher_salt" => cfg.cipher_salt = Some(decode_salt(value)?),
        // database= is consumed separately by find_database_param; every other unknown
        // key is left to the underlying VFS.
        _ => {}
    }
    Ok(())
}

fn parse_u32(value: &str) -> Result<u32> {
    value.parse().map_err(|_| ShimError::Parameter(format!("not an integer: {value}")))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ShimError::Parameter(format!("expected 0 or 1: {value}"))),
    }
}

/// A single `PRAGMA name = value` or `PRAGMA name` statement, already split by the
/// engine's SQL front end (parsing SQL itself is out of scope here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaStatement<'a> {
    pub name: &'a str,
    pub value: Option<&'a str>,
}

/// The result of dispatching one PRAGMA statement against a connection's cipher state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PragmaOutcome {
    /// A plain cipher parameter was read or written.
    Parameter(i64),
    /// `PRAGMA key = ...` / `hexkey` / `textkey` applied a key immediately.
    KeyApplied,
    /// `PRAGMA rekey = ...` / `hexrekey` was accepted; caller drives the rekey engine.
    RekeyRequested(Vec<u8>),
    /// `PRAGMA cipher = NAME` selected a cipher for this connection.
    CipherSelected(String),
}

/// Dispatches one PRAGMA statement. This does not itself touch any codec or connection
/// state — it classifies the statement and hands back what the caller (the connection
/// layer, which owns the codec and the param table) should do with it.
pub fn classify_pragma(stmt: &PragmaStatement<'_>) -> Result<PragmaIntent> {
    let name = stmt.name.to_ascii_lowercase();
    match name.as_str() {
        "key" => Ok(PragmaIntent::SetKey(stmt.value.unwrap_or_default().as_bytes().to_vec())),
        "hexkey" => Ok(PragmaIntent::SetKey(decode_hex(stmt.value.unwrap_or_default())?)),
        "rekey" => Ok(PragmaIntent::Rekey(stmt.value.unwrap_or_default().as_bytes().to_vec())),
        "hexrekey" => Ok(PragmaIntent::Rekey(decode_hex(stmt.value.unwrap_or_default())?)),
        "cipher" => Ok(PragmaIntent::SelectCipher(stmt.value.unwrap_or_default().to_string())),
        "hmac_check" => match stmt.value {
            Some(v) => Ok(PragmaIntent::SetGlobalParameter("hmac_check".to_string(), parse_bool(v)? as i64)),
            None => Ok(PragmaIntent::ReadParameter("hmac_check".to_string())),
        },
        "mc_legacy_wal" => match stmt.value {
            Some(v) => Ok(PragmaIntent::SetConnectionParameter("mc_legacy_wal".to_string(), parse_bool(v)? as i64)),
            None => Ok(PragmaIntent::ReadParameter("mc_legacy_wal".to_string())),
        },
        other => match stmt.value {
            Some(v) => Ok(PragmaIntent::SetConnectionParameter(other.to_string(), parse_u32(v)? as i64)),
            None => Ok(PragmaIntent::ReadParameter(other.to_string())),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PragmaIntent {
    SetKey(Vec<u8>),
    Rekey(Vec<u8>),
    SelectCipher(String),
    SetGlobalParameter(String, i64),
    SetConnectionParameter(String, i64),
    ReadParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_params() {
        let cfg = parse_uri_params("cipher=chacha20&kdf_iter=1000&legacy=4&hmac_use=0").unwrap();
        assert_eq!(cfg.cipher.as_deref(), Some("chacha20"));
        assert_eq!(cfg.kdf_iter, Some(1000));
        assert_eq!(cfg.legacy, Some(4));
        assert_eq!(cfg.hmac_use, Some(false));
    }

    #[test]
    fn hexkey_valid_64_digits() {
        let hex64 = "a".repeat(64);
        let cfg = parse_uri_params(&format!("hexkey={hex64}")).unwrap();
        assert_eq!(cfg.key.unwrap().len(), 32);
    }

    #[test]
    fn hexkey_malformed_63_digits_rejected() {
        let hex63 = "a".repeat(63);
        let err = parse_uri_params(&format!("hexkey={hex63}")).unwrap_err();
        assert_eq!(err.to_string(), "malformed hex string");
    }

    #[test]
    fn finds_database_param_for_journal_files() {
        assert_eq!(find_database_param("database=/tmp/main.db&cipher=chacha20"), Some("/tmp/main.db".to_string()));
        assert_eq!(find_database_param("cipher=chacha20"), None);
    }

    #[test]
    fn cipher_salt_must_be_32_hex_digits() {
        let good = "0f".repeat(16);
        let cfg = parse_uri_params(&format!("cipher_salt={good}")).unwrap();
        assert!(cfg.cipher_salt.is_some());

        let short = "0f".repeat(8);
        assert!(parse_uri_params(&format!("cipher_salt={short}")).is_err());
    }

    #[test]
    fn pragma_hexkey_dispatches_set_key() {
        let stmt = PragmaStatement { name: "hexkey", value: Some(&"b".repeat(64)) };
        assert!(matches!(classify_pragma(&stmt).unwrap(), PragmaIntent::SetKey(_)));
    }

    #[test]
    fn pragma_unknown_name_reads_as_cipher_parameter() {
        let stmt = PragmaStatement { name: "kdf_iter", value: Some("2000") };
        assert_eq!(classify_pragma(&stmt).unwrap(), PragmaIntent::SetConnectionParameter("kdf_iter".to_string(), 2000));
    }
}
