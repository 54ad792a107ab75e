//! State tree - the last-known-good robot snapshot
//!
//! One tree per connection, owned by the session, never a process-wide
//! singleton; several robot connections can coexist in one process.

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::merge::deep_merge;

/// In-memory hierarchical snapshot of the robot's reported state.
///
/// Single writer (the session dispatch path), any readers. A merge holds
/// the write lock for its whole duration, so `snapshot` observes either the
/// pre-merge or post-merge tree, never a half-applied update.
#[derive(Debug)]
pub struct StateTree {
    root: RwLock<Value>,
}

impl StateTree {
    /// Empty tree; state builds up from the live stream after connect.
    pub fn new() -> Self {
        StateTree {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Merge a partial update, returning the changed leaf paths.
    pub fn merge(&self, update: &Value) -> Vec<String> {
        let mut changed = Vec::new();
        let mut root = self.root.write();
        deep_merge(&mut root, update, &mut changed);
        changed
    }

    /// Full copy for safe external consumption.
    pub fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    /// Drop everything (fresh connection to a different robot).
    pub fn clear(&self) {
        *self.root.write() = Value::Object(Map::new());
    }

    /// Look up a `/`-separated key path in the current tree.
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.root.read();
        let mut cursor = &*root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cursor = cursor.get(part)?;
        }
        Some(cursor.clone())
    }

    pub fn is_empty(&self) -> bool {
        match &*self.root.read() {
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl Default for StateTree {
    fn default() -> Self {
        StateTree::new()
    }
}
