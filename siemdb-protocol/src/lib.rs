//! Wire codec for the siemdb document protocol.
//!
//! A connection exchanges JSON objects: one [`Request`] per client message,
//! one [`Response`] per server reply. There is no length prefix — completeness
//! is detected by tracking brace balance while honoring string quoting and
//! backslash escapes (see [`FrameReader`]). Document field values and query
//! conditions are carried as [`serde_json::Value`] so nested objects and
//! arrays keep their JSON type instead of being re-encoded as escaped text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod frame;
pub use frame::FrameReader;

/// Operations a [`Request`] may carry out against a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Find,
    Delete,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

/// A single client request frame.
///
/// `query` is required for `find`/`delete` and ignored for `insert`; `data`
/// carries the documents to insert and is ignored otherwise. `page` is
/// 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub database: String,
    pub operation: Operation,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Value>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Request {
    pub fn insert(database: impl Into<String>, collection: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            database: database.into(),
            operation: Operation::Insert,
            collection: collection.into(),
            query: None,
            data,
            page: default_page(),
            limit: default_limit(),
        }
    }

    pub fn find(database: impl Into<String>, collection: impl Into<String>, query: Value) -> Self {
        Self {
            database: database.into(),
            operation: Operation::Find,
            collection: collection.into(),
            query: Some(query),
            data: Vec::new(),
            page: default_page(),
            limit: default_limit(),
        }
    }

    pub fn delete(database: impl Into<String>, collection: impl Into<String>, query: Value) -> Self {
        Self {
            database: database.into(),
            operation: Operation::Delete,
            collection: collection.into(),
            query: Some(query),
            data: Vec::new(),
            page: default_page(),
            limit: default_limit(),
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_frame(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A single server response frame.
///
/// `total_pages = ceil(total_count / per_page)`, computed by
/// [`Response::paginated`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Value>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub total_pages: usize,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub per_page: u32,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            count: 0,
            data: Vec::new(),
            total_count: 0,
            total_pages: 0,
            current_page: 0,
            per_page: 0,
        }
    }

    pub fn inserted(data: Vec<Value>) -> Self {
        Self {
            status: Status::Success,
            message: String::new(),
            count: data.len(),
            data,
            total_count: 0,
            total_pages: 0,
            current_page: 0,
            per_page: 0,
        }
    }

    pub fn deleted(count: usize) -> Self {
        Self {
            status: Status::Success,
            message: String::new(),
            count,
            data: Vec::new(),
            total_count: 0,
            total_pages: 0,
            current_page: 0,
            per_page: 0,
        }
    }

    /// Builds a `find` response, computing `total_pages` from `total_count`
    /// and `per_page` (1 page when `per_page` is zero, to avoid a division
    /// by zero on a malformed request).
    pub fn paginated(data: Vec<Value>, total_count: usize, current_page: u32, per_page: u32) -> Self {
        let total_pages = if per_page == 0 {
            1
        } else {
            (total_count + per_page as usize - 1) / per_page as usize
        };
        Self {
            status: Status::Success,
            message: String::new(),
            count: data.len(),
            data,
            total_count,
            total_pages,
            current_page,
            per_page,
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_frame(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = Request::find("d", "c", serde_json::json!({"name": "alice"}));
        let frame = req.to_frame().unwrap();
        let parsed = Request::from_frame(&frame).unwrap();
        assert_eq!(parsed.database, "d");
        assert_eq!(parsed.collection, "c");
        assert_eq!(parsed.operation, Operation::Find);
        assert_eq!(parsed.page, 1);
        assert_eq!(parsed.limit, 50);
    }

    #[test]
    fn request_defaults_page_and_limit_when_absent() {
        let raw = br#"{"database":"d","operation":"insert","collection":"c","data":[{"a":1}]}"#;
        let req = Request::from_frame(raw).unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, 50);
        assert_eq!(req.data.len(), 1);
    }

    #[test]
    fn response_paginated_computes_total_pages() {
        let resp = Response::paginated(vec![serde_json::json!({})], 25, 2, 10);
        assert_eq!(resp.total_pages, 3);
        assert_eq!(resp.current_page, 2);
    }

    #[test]
    fn response_paginated_handles_zero_per_page() {
        let resp = Response::paginated(vec![], 0, 1, 0);
        assert_eq!(resp.total_pages, 1);
    }

    #[test]
    fn nested_values_preserve_json_type() {
        let doc = serde_json::json!({"name": "alice", "tags": ["a", "b"], "meta": {"k": 1}});
        let req = Request::insert("d", "c", vec![doc.clone()]);
        let frame = req.to_frame().unwrap();
        let parsed = Request::from_frame(&frame).unwrap();
        assert_eq!(parsed.data[0], doc);
        assert!(parsed.data[0]["tags"].is_array());
        assert!(parsed.data[0]["meta"].is_object());
    }
}
