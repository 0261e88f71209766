//! The backing key-value map. Deliberately trivial — `spec.md` §1 calls it
//! out as an external collaborator, not part of the hard problem.

use std::collections::HashMap;

/// An in-memory key-value container. Values are opaque JSON.
#[derive(Clone, Debug, Default)]
pub struct KvStore {
    data: HashMap<String, serde_json::Value>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, key: &str) -> Option<serde_json::Value> {
        self.data.get(key).cloned()
    }

    pub fn write(&mut self, key: String, value: serde_json::Value) {
        self.data.insert(key, value);
    }

    /// Compare-and-swap: succeeds iff `key` currently holds a value equal to
    /// `from`, in which case it is replaced with `to`.
    pub fn cas(&mut self, key: &str, from: &serde_json::Value, to: serde_json::Value) -> Result<(), CasError> {
        match self.data.get(key) {
            None => Err(CasError::KeyNotFound),
            Some(current) if current != from => Err(CasError::Mismatch),
            Some(_) => {
                self.data.insert(key.to_string(), to);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasError {
    KeyNotFound,
    Mismatch,
}
