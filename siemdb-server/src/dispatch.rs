//! Request dispatch: turns a parsed [`Request`] into a [`Response`] by
//! driving the database registry and collection engine. Insert is the
//! only operation that implicitly creates a database; find and delete
//! error out against one that was never inserted into. Insert/delete
//! take a timed lock on the target database; find takes an untimed
//! exclusive lock.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use siemdb_protocol::{Operation, Request, Response};
use siemdb_query::Condition;
use siemdb_storage::{DatabaseRegistry, StorageError};

const DB_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn handle(registry: &DatabaseRegistry, request: Request) -> Response {
    match request.operation {
        Operation::Insert => insert(registry, request).await,
        Operation::Find => find(registry, request).await,
        Operation::Delete => delete(registry, request).await,
    }
}

/// Single place where a [`StorageError`] becomes the wire-level error
/// response; dispatch functions never hand-format these messages themselves.
fn storage_error_response(error: StorageError) -> Response {
    Response::error(error.to_string())
}

async fn insert(registry: &DatabaseRegistry, request: Request) -> Response {
    let db = registry.get_or_create(&request.database);

    let _guard = match tokio::time::timeout(DB_LOCK_TIMEOUT, db.lock().lock()).await {
        Ok(guard) => guard,
        Err(_elapsed) => {
            return storage_error_response(StorageError::LockTimeout(request.database.clone()));
        }
    };

    let collection = match db.get_or_create_collection(&request.collection).await {
        Ok(c) => c,
        Err(e) => return Response::error(format!("failed to open collection: {e}")),
    };

    let mut inserted = Vec::with_capacity(request.data.len());
    for doc in request.data {
        let Some(fields) = doc.as_object() else {
            warn!(database = %request.database, "skipping non-object document in insert batch");
            continue;
        };
        match collection.insert(fields.clone()).await {
            Ok(id) => inserted.push(Value::String(id)),
            Err(e) => warn!(database = %request.database, error = %e, "insert failed for one document"),
        }
    }

    Response::inserted(inserted)
}

async fn find(registry: &DatabaseRegistry, request: Request) -> Response {
    let Some(db) = registry.get(&request.database) else {
        return storage_error_response(StorageError::DatabaseNotFound(request.database.clone()));
    };

    let _guard = db.lock().lock().await;

    let Some(collection) = db.get_collection(&request.collection) else {
        return storage_error_response(StorageError::DatabaseNotFound(request.database.clone()));
    };

    let condition = match parse_condition(request.query) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let total_count = collection.count(&condition).await;
    let page = collection.find_page(&condition, request.page, request.limit).await;
    let data = page.iter().map(|d| d.to_value()).collect();

    Response::paginated(data, total_count, request.page, request.limit)
}

async fn delete(registry: &DatabaseRegistry, request: Request) -> Response {
    let Some(db) = registry.get(&request.database) else {
        return storage_error_response(StorageError::DatabaseNotFound(request.database.clone()));
    };

    let _guard = match tokio::time::timeout(DB_LOCK_TIMEOUT, db.lock().lock()).await {
        Ok(guard) => guard,
        Err(_elapsed) => {
            return storage_error_response(StorageError::LockTimeout(request.database.clone()));
        }
    };

    let Some(collection) = db.get_collection(&request.collection) else {
        return storage_error_response(StorageError::DatabaseNotFound(request.database.clone()));
    };

    let condition = match parse_condition(request.query) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match collection.remove(&condition).await {
        Ok(count) => Response::deleted(count),
        Err(e) => Response::error(format!("delete failed: {e}")),
    }
}

fn parse_condition(query: Option<Value>) -> Result<Condition, Response> {
    let query = query.unwrap_or_else(|| Value::Object(Default::default()));
    siemdb_query::parse(&query).map_err(|e| Response::error(format!("invalid query: {e}")))
}
