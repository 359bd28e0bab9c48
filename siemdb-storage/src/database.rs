use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::collection::Collection;
use crate::StorageError;

/// A directory of collections guarded by one mutex. The mutex is owned by
/// value here, inside the `Arc<Database>` the registry hands out, so callers
/// never hold a pointer that can outlive it.
pub struct Database {
    name: String,
    dir: PathBuf,
    collections: DashMap<String, Arc<Collection>>,
    lock: Mutex<()>,
}

impl Database {
    pub fn new(name: impl Into<String>, data_root: &std::path::Path) -> Self {
        let name = name.into();
        let dir = data_root.join(&name);
        Self {
            name,
            dir,
            collections: DashMap::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mutex callers must hold while inserting into or deleting from any
    /// collection in this database, serializing writes per database rather
    /// than globally.
    pub fn lock(&self) -> &Mutex<()> {
        &self.lock
    }

    /// Returns the named collection, creating its directory and loading (or
    /// initializing) it on first access. Subsequent calls return the same
    /// `Arc`.
    pub async fn get_or_create_collection(&self, name: &str) -> Result<Arc<Collection>, StorageError> {
        if let Some(existing) = self.collections.get(name) {
            return Ok(existing.clone());
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::Persistence(e.to_string()))?;
        let collection = Arc::new(Collection::load_or_create(name, &self.dir).await?);
        debug!(database = %self.name, collection = %name, "collection ready");
        Ok(self
            .collections
            .entry(name.to_string())
            .or_insert(collection)
            .clone())
    }

    /// Returns the named collection only if it has already been created.
    /// Used by find/delete dispatch, which must not silently create
    /// databases or collections that don't yet exist.
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.get(name).map(|e| e.clone())
    }
}
