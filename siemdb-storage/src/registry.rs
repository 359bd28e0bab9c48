use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::database::Database;

/// Top-level map of database name to [`Database`], rooted at a single data
/// directory on disk. Each database gets its own subdirectory, created
/// lazily on first use.
pub struct DatabaseRegistry {
    data_root: PathBuf,
    databases: DashMap<String, Arc<Database>>,
}

impl DatabaseRegistry {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            databases: DashMap::new(),
        }
    }

    /// Returns the named database, creating it (in memory; its directory is
    /// created lazily by its first collection) if it doesn't exist yet.
    /// Inserts are the only operation allowed to implicitly create a
    /// database.
    pub fn get_or_create(&self, name: &str) -> Arc<Database> {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Database::new(name, &self.data_root)))
            .clone()
    }

    /// Returns the named database only if it already exists. Find and
    /// delete dispatch on this so they error out against a database that
    /// was never inserted into.
    pub fn get(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.get(name).map(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_before_get_or_create() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());
        assert!(registry.get("db1").is_none());
    }

    #[test]
    fn get_or_create_memoizes_same_database() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());
        let d1 = registry.get_or_create("db1");
        let d2 = registry.get_or_create("db1");
        assert!(Arc::ptr_eq(&d1, &d2));
        assert!(registry.get("db1").is_some());
    }

    #[test]
    fn distinct_names_yield_distinct_databases() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());
        let d1 = registry.get_or_create("db1");
        let d2 = registry.get_or_create("db2");
        assert!(!Arc::ptr_eq(&d1, &d2));
    }
}
