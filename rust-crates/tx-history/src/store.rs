// Key-value backends for the persisted transaction history.
use anyhow::Context;
use sled::{
    Config,
    Tree,
};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc,
        Mutex,
    },
};

/// Minimal key-value surface the ledger persists through. The ledger only ever reads and
/// writes one serialized list under a fixed key.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SledStore {
    tree: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = Config::default()
            .path(path)
            .open()
            .context("open sled database")?;
        let tree = db
            .open_tree("tx_history")
            .context("open tx_history tree")?;
        Ok(Self { tree })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let value = self
            .tree
            .get(key.as_bytes())
            .with_context(|| format!("read {key} from sled"))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.tree
            .insert(key.as_bytes(), value)
            .with_context(|| format!("write {key} to sled"))?;
        self.tree
            .flush()
            .with_context(|| format!("flush {key} to sled"))?;
        Ok(())
    }
}

/// Shared in-memory store. Clones observe the same entries, so a test can keep a handle
/// and inspect what the ledger persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &[u8]) -> Self {
        let store = Self::default();
        store.lock().insert(key.to_owned(), value.to_vec());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.lock().insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}
