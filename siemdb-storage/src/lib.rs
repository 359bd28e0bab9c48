//! Collection engine and database registry.
//!
//! A [`Collection`] is a named, file-backed set of documents; a
//! [`Database`] is a directory of collections guarded by one mutex; a
//! [`DatabaseRegistry`] maps database name to `Database`, creating
//! directories lazily on first use. Each `Database` owns its
//! `tokio::sync::Mutex` by value inside an `Arc` stored in a
//! `DashMap`, so there is no pointer that can outlive the mutex it
//! refers to.

mod collection;
mod database;
mod document;
mod registry;

pub use collection::Collection;
pub use database::Database;
pub use document::{DocFields, Document};
pub use registry::DatabaseRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database lock timeout for database: {0}")]
    LockTimeout(String),
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
}
