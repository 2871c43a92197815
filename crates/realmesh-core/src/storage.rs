//! Persistent storage contract
//!
//! The node persists its identity through a namespaced key/value blob store.
//! Writes are staged and become durable only on `commit`; a crash before
//! commit leaves the previously committed state intact. The concrete backing
//! store (flash, file, NVS) lives outside this crate; `MemoryStore`
//! implements the contract for tests and simulations.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage namespace unavailable: {0}")]
    NamespaceUnavailable(String),
    #[error("commit failed")]
    CommitFailed,
    #[error("write failed for key {0}")]
    WriteFailed(String),
}

/// Namespaced key/value blob store with transactional commit
pub trait Storage {
    /// Read a committed or staged value
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;

    /// Stage a value; not durable until [`commit`](Storage::commit)
    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Make all staged writes durable
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Erase a whole namespace (staged and committed)
    fn clear(&mut self, namespace: &str) -> Result<(), StorageError>;

    fn get_u32(&self, namespace: &str, key: &str) -> Option<u32> {
        let bytes = self.get(namespace, key)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn put_u32(&mut self, namespace: &str, key: &str, value: u32) -> Result<(), StorageError> {
        self.put(namespace, key, &value.to_le_bytes())
    }

    fn get_string(&self, namespace: &str, key: &str) -> Option<String> {
        String::from_utf8(self.get(namespace, key)?).ok()
    }

    fn put_string(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(namespace, key, value.as_bytes())
    }
}

/// In-memory store with commit semantics
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: HashMap<(String, String), Vec<u8>>,
    staged: HashMap<(String, String), Vec<u8>>,
    /// When set, the next commit fails; for exercising crash paths
    pub fail_commits: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard staged writes, modeling a crash before commit
    pub fn drop_staged(&mut self) {
        self.staged.clear();
    }

    /// Snapshot of the committed state, for handing to a "rebooted" node
    pub fn committed_snapshot(&self) -> MemoryStore {
        MemoryStore {
            committed: self.committed.clone(),
            staged: HashMap::new(),
            fail_commits: false,
        }
    }
}

impl Storage for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let key = (namespace.to_string(), key.to_string());
        self.staged
            .get(&key)
            .or_else(|| self.committed.get(&key))
            .cloned()
    }

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.staged
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_commits {
            return Err(StorageError::CommitFailed);
        }
        for (key, value) in self.staged.drain() {
            self.committed.insert(key, value);
        }
        Ok(())
    }

    fn clear(&mut self, namespace: &str) -> Result<(), StorageError> {
        self.staged.retain(|(ns, _), _| ns != namespace);
        self.committed.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}

/// A [`MemoryStore`] handle that survives the node that owns it
///
/// Simulated reboots hand the same committed state to a fresh `Node`; every
/// clone sees the same data. Single-threaded, like everything else here.
#[derive(Debug, Clone, Default)]
pub struct SharedStore(Rc<RefCell<MemoryStore>>);

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the underlying store, for test assertions
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryStore) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl Storage for SharedStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.0.borrow().get(namespace, key)
    }

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.0.borrow_mut().put(namespace, key, value)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.0.borrow_mut().commit()
    }

    fn clear(&mut self, namespace: &str) -> Result<(), StorageError> {
        self.0.borrow_mut().clear(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_commit() {
        let mut store = MemoryStore::new();
        store.put_string("rm", "node_id", "alpha").unwrap();
        assert_eq!(store.get_string("rm", "node_id").as_deref(), Some("alpha"));

        store.commit().unwrap();
        assert_eq!(store.get_string("rm", "node_id").as_deref(), Some("alpha"));
    }

    #[test]
    fn test_crash_before_commit_loses_staged() {
        let mut store = MemoryStore::new();
        store.put_string("rm", "node_id", "alpha").unwrap();
        store.commit().unwrap();

        store.put_string("rm", "node_id", "beta").unwrap();
        store.drop_staged(); // crash

        assert_eq!(store.get_string("rm", "node_id").as_deref(), Some("alpha"));
    }

    #[test]
    fn test_commit_failure() {
        let mut store = MemoryStore::new();
        store.fail_commits = true;
        store.put_string("rm", "node_id", "alpha").unwrap();
        assert_eq!(store.commit(), Err(StorageError::CommitFailed));
    }

    #[test]
    fn test_clear_namespace() {
        let mut store = MemoryStore::new();
        store.put_string("rm", "node_id", "alpha").unwrap();
        store.put_string("other", "key", "kept").unwrap();
        store.commit().unwrap();

        store.clear("rm").unwrap();
        assert!(store.get_string("rm", "node_id").is_none());
        assert_eq!(store.get_string("other", "key").as_deref(), Some("kept"));
    }

    #[test]
    fn test_u32_round_trip() {
        let mut store = MemoryStore::new();
        store.put_u32("rm", "boot_count", 7).unwrap();
        assert_eq!(store.get_u32("rm", "boot_count"), Some(7));
    }
}
