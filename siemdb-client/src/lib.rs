//! Single-connection client for the document protocol: connect once,
//! send one request, read until a complete frame arrives (reusing
//! [`siemdb_protocol::FrameReader`]'s brace-balance scanning),
//! deserialize, return. Failures are surfaced as a locally-built error
//! [`Response`], never as a `Result` err from `send_request` — the
//! caller always gets something to print or forward. This client never
//! retries; retry policy belongs to whatever drives it.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use siemdb_protocol::{FrameReader, Request, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK_SIZE: usize = 8192;

/// Failure connecting to the server. Everything past the connect step
/// (send/receive failures) is instead surfaced as an error [`Response`]
/// so the caller always has something to print or forward; only the
/// one-shot connect attempt gets a typed error, since nothing downstream
/// of a successful connect needs to distinguish failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectError {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to {host}:{port}")]
    Timeout { host: String, port: u16 },
}

pub struct DbClient {
    host: String,
    port: u16,
    database: String,
    stream: Option<TcpStream>,
}

impl DbClient {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            stream: None,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), ClientError> {
        info!(host = %self.host, port = self.port, "connecting to server");
        let connect_result = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await;

        let stream = match connect_result {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::ConnectError {
                    host: self.host.clone(),
                    port: self.port,
                    source,
                });
            }
            Err(_elapsed) => {
                return Err(ClientError::Timeout {
                    host: self.host.clone(),
                    port: self.port,
                });
            }
        };
        self.stream = Some(stream);
        info!("connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    pub async fn insert(&mut self, collection: impl Into<String>, documents: Vec<Value>) -> Response {
        let request = Request::insert(self.database.clone(), collection, documents);
        self.send_request(request).await
    }

    pub async fn find(&mut self, collection: impl Into<String>, query: Value) -> Response {
        let request = Request::find(self.database.clone(), collection, query);
        self.send_request(request).await
    }

    pub async fn remove(&mut self, collection: impl Into<String>, query: Value) -> Response {
        let request = Request::delete(self.database.clone(), collection, query);
        self.send_request(request).await
    }

    /// Serializes `request`, writes it fully, then reads until a complete
    /// response frame arrives. Any failure along the way drops the
    /// connection and returns a locally-built error response.
    pub async fn send_request(&mut self, request: Request) -> Response {
        let Some(stream) = self.stream.as_mut() else {
            return Response::error("Not connected to server");
        };

        let frame = match request.to_frame() {
            Ok(f) => f,
            Err(e) => return Response::error(format!("failed to serialize request: {e}")),
        };

        debug!(bytes = frame.len(), "sending request");
        match tokio::time::timeout(IO_TIMEOUT, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.disconnect();
                return Response::error(format!("Failed to send request to server: {e}"));
            }
            Err(_elapsed) => {
                self.disconnect();
                return Response::error("send timed out");
            }
        }

        self.read_response().await
    }

    async fn read_response(&mut self) -> Response {
        let mut reader = FrameReader::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        let result = tokio::time::timeout(IO_TIMEOUT, async {
            loop {
                let stream = self.stream.as_mut().expect("checked by caller");
                match stream.read(&mut buf).await {
                    Ok(0) => return None,
                    Ok(n) => {
                        let frames = reader.feed(&buf[..n]);
                        if let Some(first) = frames.into_iter().next() {
                            return Some(first);
                        }
                    }
                    Err(_) => return None,
                }
            }
        })
        .await;

        match result {
            Ok(Some(frame)) => match Response::from_frame(&frame) {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(error = %e, "failed to parse server response");
                    Response::error(format!("Failed to parse server response: {e}"))
                }
            },
            Ok(None) => {
                self.disconnect();
                Response::error("No response from server")
            }
            Err(_elapsed) => {
                self.disconnect();
                Response::error("No response from server")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_request_without_connecting_errors_locally() {
        let mut client = DbClient::new("127.0.0.1", 0, "db");
        let resp = client.find("events", json!({})).await;
        assert!(!resp.is_success());
        assert_eq!(resp.message, "Not connected to server");
    }

    #[tokio::test]
    async fn round_trips_against_an_echo_style_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _req = Request::from_frame(&buf[..n]).unwrap();
            let resp = Response::inserted(vec![json!({"_id": "doc_1"})]);
            socket.write_all(&resp.to_frame().unwrap()).await.unwrap();
        });

        let mut client = DbClient::new("127.0.0.1", addr.port(), "db");
        client.connect().await.unwrap();
        let resp = client.insert("events", vec![json!({"name": "alice"})]).await;
        assert!(resp.is_success());
        assert_eq!(resp.count, 1);
    }
}
