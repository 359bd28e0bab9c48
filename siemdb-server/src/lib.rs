//! TCP connection manager: accept loop, per-connection reader, bounded
//! work queue, worker pool, and request dispatch against the storage
//! layer. Each database's lock is a `tokio::sync::Mutex` owned by the
//! `Database` itself and acquired with `tokio::time::timeout`, so a
//! stuck lock surfaces as a clean per-request timeout error rather than
//! blocking the whole server.

mod dispatch;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use siemdb_protocol::{FrameReader, Request, Response};
use siemdb_storage::DatabaseRegistry;

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);
const READ_BUFFER_SIZE: usize = 64 * 1024;

struct WorkItem {
    request: Request,
    respond_to: oneshot::Sender<Response>,
}

/// Owns the listening socket, the bounded work queue, and the worker pool.
/// One [`ConnectionManager`] serves one port for its entire lifetime.
pub struct ConnectionManager {
    registry: Arc<DatabaseRegistry>,
    queue_tx: mpsc::Sender<WorkItem>,
}

impl ConnectionManager {
    /// Spawns `num_workers` worker tasks draining a channel of capacity
    /// `max(16, 2*num_workers)`. A full channel makes the reader task wait
    /// rather than drop a frame.
    pub fn new(data_root: impl Into<std::path::PathBuf>, num_workers: usize) -> Arc<Self> {
        let registry = Arc::new(DatabaseRegistry::new(data_root));
        let capacity = (2 * num_workers).max(16);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);

        let manager = Arc::new(Self { registry, queue_tx });
        manager.clone().spawn_workers(num_workers, queue_rx);
        manager
    }

    fn spawn_workers(self: Arc<Self>, num_workers: usize, queue_rx: mpsc::Receiver<WorkItem>) {
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for id in 0..num_workers {
            let manager = self.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = queue_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else {
                        debug!(worker = id, "work queue closed, worker exiting");
                        break;
                    };
                    let response = dispatch::handle(&manager.registry, item.request).await;
                    let _ = item.respond_to.send(response);
                }
            });
        }
    }

    /// Binds `port` and runs the accept loop until the process is killed.
    /// The accept call times out every second purely so a future shutdown
    /// signal would be noticed promptly; there is currently no signal to
    /// check.
    pub async fn run(self: Arc<Self>, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding listener on port {port}"))?;
        info!(port, "siemdb-server listening");

        loop {
            match tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let manager = self.clone();
                    tokio::spawn(async move {
                        manager.handle_connection(stream, addr).await;
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "accept failed");
                }
                Err(_elapsed) => {
                    // accept timeout; loop around and try again
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr) {
        info!(%addr, "client connected");
        let mut reader = FrameReader::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read_result = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await;
            let n = match read_result {
                Ok(Ok(0)) => {
                    info!(%addr, "client disconnected");
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!(%addr, error = %e, "read failed");
                    break;
                }
                Err(_elapsed) => {
                    debug!(%addr, "read timed out, closing idle connection");
                    break;
                }
            };

            let frames = reader.feed(&buf[..n]);
            for frame in frames {
                let request = match Request::from_frame(&frame) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!(%addr, error = %e, "malformed request frame");
                        let resp = Response::error(format!("malformed request: {e}"));
                        if self.send_response(&mut stream, &resp).await.is_err() {
                            return;
                        }
                        continue;
                    }
                };

                let (respond_to, response_rx) = oneshot::channel();
                if self
                    .queue_tx
                    .send(WorkItem { request, respond_to })
                    .await
                    .is_err()
                {
                    error!(%addr, "work queue closed, dropping connection");
                    return;
                }
                let response = match response_rx.await {
                    Ok(resp) => resp,
                    Err(_) => Response::error("internal server error"),
                };
                if self.send_response(&mut stream, &response).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn send_response(&self, stream: &mut TcpStream, response: &Response) -> Result<()> {
        let bytes = match response.to_frame() {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                return Err(e.into());
            }
        };
        match tokio::time::timeout(SEND_TIMEOUT, stream.write_all(&bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "partial or failed send");
                Err(e.into())
            }
            Err(_elapsed) => {
                error!("send timed out");
                Err(anyhow::anyhow!("send timed out"))
            }
        }
    }
}
