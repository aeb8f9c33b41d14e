//! Main-file registry: the mutex-guarded list of open MAIN_DB handles that journal and
//! WAL handles resolve their owning codec through.
//!
//! Journal/WAL nodes hold a name-based reference to their main-DB node, not a pointer —
//! avoiding the cyclic-reference problem the main-DB node would otherwise have (it has no
//! back-reference to its dependents). A stale reference (main DB already closed) resolves
//! to `None`, and every caller of [`MainFileRegistry::lookup`] is required to treat that
//! as "pass through, don't fail" per the shim's defensive-against-stale-pointers design.

use std::sync::{Arc, Mutex};

use crate::codec::Codec;

struct Node {
    path: String,
    codec: Arc<Mutex<Codec>>,
}

/// Process-wide registry of open main-database files, keyed by canonical path.
#[derive(Default)]
pub struct MainFileRegistry {
    nodes: Mutex<Vec<Node>>,
}

impl MainFileRegistry {
    pub fn new() -> Self {
        Self { nodes: Mutex::new(Vec::new()) }
    }

    /// Registers a freshly opened MAIN_DB file's codec. Replaces any existing entry for
    /// the same path (the engine closed and reopened without the shim hearing about it,
    /// which the shim tolerates rather than treating as a bug).
    pub fn register(&self, path: &str, codec: Arc<Mutex<Codec>>) {
        let mut nodes = self.nodes.lock().expect("main-file registry mutex poisoned");
        nodes.retain(|n| n.path != path);
        nodes.push(Node { path: path.to_string(), codec });
    }

    /// Removes the entry for `path` when its MAIN_DB file handle closes. Journal/WAL
    /// handles that still reference it afterward simply get `None` from `lookup` — they
    /// do not hold the `Arc` themselves, only the path.
    pub fn unregister(&self, path: &str) {
        let mut nodes = self.nodes.lock().expect("main-file registry mutex poisoned");
        nodes.retain(|n| n.path != path);
    }

    /// Resolves a main-DB path (from a journal/WAL file's `database=` URI parameter) to
    /// its codec, or `None` if the main DB was never registered or already closed.
    pub fn lookup(&self, path: &str) -> Option<Arc<Mutex<Codec>>> {
        let nodes = self.nodes.lock().expect("main-file registry mutex poisoned");
        nodes.iter().find(|n| n.path == path).map(|n| Arc::clone(&n.codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup() {
        let reg = MainFileRegistry::new();
        let codec = Arc::new(Mutex::new(Codec::new(4096)));
        reg.register("/tmp/main.db", Arc::clone(&codec));
        assert!(reg.lookup("/tmp/main.db").is_some());
    }

    #[test]
    fn unregister_removes_entry() {
        let reg = MainFileRegistry::new();
        let codec = Arc::new(Mutex::new(Codec::new(4096)));
        reg.register("/tmp/main.db", codec);
        reg.unregister("/tmp/main.db");
        assert!(reg.lookup("/tmp/main.db").is_none());
    }

    #[test]
    fn stale_lookup_returns_none_not_error() {
        let reg = MainFileRegistry::new();
        assert!(reg.lookup("/never/registered.db").is_none());
    }

    #[test]
    fn reregistering_same_path_replaces_entry() {
        let reg = MainFileRegistry::new();
        let first = Arc::new(Mutex::new(Codec::new(4096)));
        let second = Arc::new(Mutex::new(Codec::new(8192)));
        reg.register("/tmp/main.db", first);
        reg.register("/tmp/main.db", Arc::clone(&second));
        let found = reg.lookup("/tmp/main.db").unwrap();
        assert_eq!(found.lock().unwrap().page_size(), 8192);
    }
}
