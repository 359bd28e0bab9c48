use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::document::{DocFields, Document};
use crate::StorageError;
use siemdb_query::Condition;

/// A named, file-backed set of documents. Persisted as a single JSON array
/// in `<collection-name>.json`. In memory, documents are held in an
/// `_id -> fields` map; insertion order is not preserved across reload.
pub struct Collection {
    name: String,
    path: PathBuf,
    docs: RwLock<HashMap<String, DocFields>>,
    next_id: AtomicU64,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loads a collection from `<dir>/<name>.json` if present, otherwise
    /// starts empty. Seeds the id counter from `1 + max(existing doc_<n>
    /// suffix)` so ids stay monotonic and collision-free across restarts.
    pub async fn load_or_create(name: impl Into<String>, dir: &Path) -> Result<Self, StorageError> {
        let name = name.into();
        let path = dir.join(format!("{name}.json"));
        let mut docs = HashMap::new();
        let mut max_seen: u64 = 0;
        let mut fallback_counter: u64 = 0;

        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            let parsed: Value = serde_json::from_str(&content).map_err(|e| {
                StorageError::Persistence(format!("corrupt collection file {}: {e}", path.display()))
            })?;
            if let Some(arr) = parsed.as_array() {
                for item in arr {
                    if let Some(obj) = item.as_object() {
                        let mut fields = obj.clone();
                        let id = match fields.remove("_id").and_then(|v| v.as_str().map(str::to_string)) {
                            Some(id) => {
                                if let Some(n) = id.strip_prefix("doc_").and_then(|s| s.parse::<u64>().ok()) {
                                    max_seen = max_seen.max(n);
                                }
                                id
                            }
                            None => {
                                fallback_counter += 1;
                                format!("doc_{fallback_counter}")
                            }
                        };
                        docs.insert(id, fields);
                    }
                }
            }
            debug!(collection = %name, count = docs.len(), "loaded collection from disk");
        }

        Ok(Self {
            name,
            path,
            docs: RwLock::new(docs),
            next_id: AtomicU64::new(max_seen.max(fallback_counter) + 1),
        })
    }

    /// Inserts a document, assigns its id, and synchronously rewrites the
    /// collection file. On persistence failure the in-memory insert is
    /// rolled back before the error is surfaced.
    pub async fn insert(&self, fields: DocFields) -> Result<String, StorageError> {
        let id = format!("doc_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut docs = self.docs.write().await;
            docs.insert(id.clone(), fields);
        }
        if let Err(e) = self.persist().await {
            let mut docs = self.docs.write().await;
            docs.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    pub async fn find(&self, condition: &Condition) -> Vec<Document> {
        let docs = self.docs.read().await;
        docs.iter()
            .filter(|(_, fields)| condition.matches(fields))
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect()
    }

    /// Same matching set as [`Collection::find`], sliced to one page.
    /// Out-of-range pages return an empty result, not an error.
    pub async fn find_page(&self, condition: &Condition, page: u32, limit: u32) -> Vec<Document> {
        let all = self.find(condition).await;
        let start = (page.max(1) as usize - 1).saturating_mul(limit as usize);
        if start >= all.len() || limit == 0 {
            return Vec::new();
        }
        let end = (start + limit as usize).min(all.len());
        all[start..end].to_vec()
    }

    pub async fn count(&self, condition: &Condition) -> usize {
        let docs = self.docs.read().await;
        docs.values().filter(|fields| condition.matches(fields)).count()
    }

    /// Removes every document matching `condition`. An empty match set
    /// short-circuits without touching disk.
    pub async fn remove(&self, condition: &Condition) -> Result<usize, StorageError> {
        let ids: Vec<String> = {
            let docs = self.docs.read().await;
            docs.iter()
                .filter(|(_, fields)| condition.matches(fields))
                .map(|(id, _)| id.clone())
                .collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }
        {
            let mut docs = self.docs.write().await;
            for id in &ids {
                docs.remove(id);
            }
        }
        self.persist().await?;
        Ok(ids.len())
    }

    /// Writes the full collection to a temp file in the same directory and
    /// renames it into place, so a crash mid-write never corrupts the
    /// previously-good file.
    async fn persist(&self) -> Result<(), StorageError> {
        let docs = self.docs.read().await;
        let values: Vec<Value> = docs
            .iter()
            .map(|(id, fields)| {
                let mut obj = fields.clone();
                obj.insert("_id".to_string(), Value::String(id.clone()));
                Value::Object(obj)
            })
            .collect();
        drop(docs);

        let content = serde_json::to_string_pretty(&Value::Array(values))
            .map_err(|e| StorageError::Persistence(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Persistence(e.to_string()))?;
        }
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| StorageError::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            warn!(collection = %self.name, error = %e, "rename-into-place failed");
            StorageError::Persistence(e.to_string())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> DocFields {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn insert_then_find_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let coll = Collection::load_or_create("c", dir.path()).await.unwrap();
        let id = coll.insert(fields(json!({"name": "alice", "age": 30}))).await.unwrap();

        let cond = Condition::parse_str(r#"{"name":"alice"}"#).unwrap();
        let found = coll.find(&cond).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        let reloaded = Collection::load_or_create("c", dir.path()).await.unwrap();
        let found_again = reloaded.find(&cond).await;
        assert_eq!(found_again.len(), 1);
        assert_eq!(found_again[0].id, id);
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_seeded_from_disk_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let coll = Collection::load_or_create("c", dir.path()).await.unwrap();
        let id1 = coll.insert(fields(json!({"a": 1}))).await.unwrap();
        let id2 = coll.insert(fields(json!({"a": 2}))).await.unwrap();
        assert_ne!(id1, id2);

        let reloaded = Collection::load_or_create("c", dir.path()).await.unwrap();
        let id3 = reloaded.insert(fields(json!({"a": 3}))).await.unwrap();
        assert_ne!(id3, id1);
        assert_ne!(id3, id2);
    }

    #[tokio::test]
    async fn pagination_slices_and_returns_empty_past_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let coll = Collection::load_or_create("c", dir.path()).await.unwrap();
        for i in 0..25 {
            coll.insert(fields(json!({"n": i}))).await.unwrap();
        }
        let cond = Condition::parse_str(r#"{}"#).unwrap();
        let page2 = coll.find_page(&cond, 2, 10).await;
        assert_eq!(page2.len(), 10);
        assert_eq!(coll.count(&cond).await, 25);

        let past_end = coll.find_page(&cond, 99, 10).await;
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn delete_then_find_reflects_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let coll = Collection::load_or_create("c", dir.path()).await.unwrap();
        coll.insert(fields(json!({"name": "alice"}))).await.unwrap();
        coll.insert(fields(json!({"name": "bob"}))).await.unwrap();

        let cond = Condition::parse_str(r#"{"name":"alice"}"#).unwrap();
        let removed = coll.remove(&cond).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(coll.find(&cond).await.len(), 0);

        let reloaded = Collection::load_or_create("c", dir.path()).await.unwrap();
        assert_eq!(reloaded.find(&cond).await.len(), 0);
        let all = Condition::parse_str(r#"{}"#).unwrap();
        assert_eq!(reloaded.count(&all).await, 1);
    }

    #[tokio::test]
    async fn remove_with_no_matches_short_circuits_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let coll = Collection::load_or_create("c", dir.path()).await.unwrap();
        let cond = Condition::parse_str(r#"{"name":"nobody"}"#).unwrap();
        assert_eq!(coll.remove(&cond).await.unwrap(), 0);
    }
}
