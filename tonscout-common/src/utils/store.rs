use std::{
    fmt::Debug,
    hash::Hash,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::{mapref::multiple::RefMulti, DashMap};
use futures_util::lock::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A store that keeps every value in memory and persists the whole map to a JSON file.
///
/// Every mutation is written through before it returns, there is no write-behind
/// buffer. Edits of the same key are serialized by a per-key lock, and file writes are
/// serialized by a store-wide lock and replace the file atomically, so two racing
/// edits can't lose each other's updates.
///
/// This structure does not allow writing to the file outside of the program, or using
/// multiple instances of the same store name.
pub struct PersistentCachedStore<
    K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static + Eq + Hash,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
> {
    locks: DashMap<K, Arc<Mutex<()>>>,
    cache: DashMap<K, V>,
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl<
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static + Eq + Hash,
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    > Debug for PersistentCachedStore<K, V>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCachedStore")
            .field("path", &self.path)
            .field("cache", &self.cache.len())
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
}

impl<
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static + Eq + Hash,
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    > PersistentCachedStore<K, V>
{
    pub async fn new(data_dir: &Path, name: &str) -> Result<Self, anyhow::Error> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(format!("{name}.json"));
        let cache = DashMap::<K, V>::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let entries: Vec<CacheEntry<K, V>> = serde_json::from_slice(&bytes)?;
                for entry in entries {
                    cache.insert(entry.key, entry.value);
                }
                log::debug!("Loaded {} entries from {}", cache.len(), path.display());
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(Self {
            locks: DashMap::new(),
            cache,
            path,
            file_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).map(|value| value.clone())
    }

    pub async fn insert_if_not_exists(&self, key: K, value: V) -> Result<bool, anyhow::Error> {
        if self.cache.contains_key(&key) {
            return Ok(false);
        }
        self.cache.insert(key, value);
        self.save().await?;
        Ok(true)
    }

    fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Edits the value of the key, and returns the result of the edit function.
    pub async fn edit<R>(
        &self,
        key: K,
        edit: impl FnOnce(&mut V) -> R,
        default: Option<V>,
    ) -> Result<R, anyhow::Error> {
        let lock = self.lock_for(&key);
        let guard = lock.lock().await;
        let mut value = self
            .get(&key)
            .await
            .or(default)
            .ok_or_else(|| anyhow::anyhow!("No value found for key"))?;
        let r = edit(&mut value);
        self.insert_or_update(key, value).await?;
        drop(guard);
        Ok(r)
    }

    pub async fn insert_or_update(&self, key: K, value: V) -> Result<(), anyhow::Error> {
        self.cache.insert(key, value);
        self.save().await
    }

    pub async fn remove(&self, key: &K) -> Result<Option<V>, anyhow::Error> {
        let removed = self.cache.remove(key).map(|(_, value)| value);
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn values(&self) -> Result<impl Iterator<Item = RefMulti<K, V>>, anyhow::Error> {
        Ok(self.cache.iter())
    }

    pub async fn contains_key(&self, key: &K) -> Result<bool, anyhow::Error> {
        Ok(self.cache.contains_key(key))
    }

    async fn save(&self) -> Result<(), anyhow::Error> {
        let guard = self.file_lock.lock().await;
        let entries: Vec<CacheEntry<K, V>> = self
            .cache
            .iter()
            .map(|entry| CacheEntry {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect();
        let json = serde_json::to_vec_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        drop(guard);
        Ok(())
    }
}
