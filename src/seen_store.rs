use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sha2::Digest as _;

/// Durable, synchronous key/value substrate for client-side state.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsKvStore {
    base_dir: PathBuf,
}

impl LocalFsKvStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = sha2::Sha256::digest(key.as_bytes());
        let name = hex::encode(&digest[..12]);
        self.base_dir.join("kv").join(format!("{name}.json"))
    }
}

impl KvStore for LocalFsKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.entry_path(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.entry_path(key);
        write_atomic(&path, value.as_bytes()).with_context(|| format!("persist {key}"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: &str, value: &str) -> Self {
        lock(&self.entries).insert(key.to_owned(), value.to_owned());
        self
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        lock(&self.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeenNamespace {
    Sites,
    Pages,
}

impl SeenNamespace {
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::Sites => "sitewatch:lastSeen:sites",
            Self::Pages => "sitewatch:lastSeen:pages",
        }
    }
}

type Baselines = HashMap<String, i64>;

/// Last-acknowledged timestamps (epoch millis) per site and per page.
///
/// Reads are served from memory; every `mark_seen` rewrites the namespace's
/// persisted record before returning.
pub struct SeenStore {
    kv: Box<dyn KvStore>,
    sites: Mutex<Baselines>,
    pages: Mutex<Baselines>,
}

impl SeenStore {
    pub fn load(kv: impl KvStore + 'static) -> Self {
        let sites = load_namespace(&kv, SeenNamespace::Sites);
        let pages = load_namespace(&kv, SeenNamespace::Pages);
        Self {
            kv: Box::new(kv),
            sites: Mutex::new(sites),
            pages: Mutex::new(pages),
        }
    }

    pub fn in_memory() -> Self {
        Self::load(MemoryKvStore::new())
    }

    pub fn get(&self, namespace: SeenNamespace, key: &str) -> Option<i64> {
        lock(self.namespace(namespace)).get(key).copied()
    }

    /// Records `now` as the baseline for `key`. The in-memory value is updated
    /// even when persisting fails.
    pub fn mark_seen(
        &self,
        namespace: SeenNamespace,
        key: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut map = lock(self.namespace(namespace));
        map.insert(key.to_owned(), now.timestamp_millis());
        let data = serde_json::to_string(&*map).context("serialize seen baselines")?;
        self.kv
            .set(namespace.storage_key(), &data)
            .with_context(|| format!("persist {}", namespace.storage_key()))
    }

    pub fn len(&self, namespace: SeenNamespace) -> usize {
        lock(self.namespace(namespace)).len()
    }

    fn namespace(&self, namespace: SeenNamespace) -> &Mutex<Baselines> {
        match namespace {
            SeenNamespace::Sites => &self.sites,
            SeenNamespace::Pages => &self.pages,
        }
    }
}

fn load_namespace(kv: &dyn KvStore, namespace: SeenNamespace) -> Baselines {
    let key = namespace.storage_key();
    let raw = match kv.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Baselines::new(),
        Err(err) => {
            tracing::warn!(key, ?err, "seen baselines unreadable; starting empty");
            return Baselines::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(err) => {
            tracing::warn!(key, %err, "seen baselines corrupt; starting empty");
            Baselines::new()
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp_path, data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
