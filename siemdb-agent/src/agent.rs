//! Agent orchestrator: runs a monitor loop (tails configured sources,
//! enriches raw lines, buffers the results) and a sender loop (drains
//! the buffer to the server) as two cooperative tasks, coordinated by a
//! shared `running` flag and joined cleanly on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use siemdb_client::DbClient;

use crate::buffer::PersistentBuffer;
use crate::collector::{LogCollector, PositionStore};
use crate::processor::EventProcessor;
use crate::types::{AgentConfig, SourceConfig};

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const SENDER_IDLE_INTERVAL: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const SHUTDOWN_DRAIN_BATCH: usize = 1000;
const SENDER_BATCH_CAP: usize = 500;

pub struct Agent {
    config: AgentConfig,
    running: Arc<AtomicBool>,
    processor: Arc<EventProcessor>,
    buffer: Arc<PersistentBuffer>,
    positions: Arc<PositionStore>,
    collectors: Vec<Arc<LogCollector>>,
}

impl Agent {
    pub async fn new(config: AgentConfig) -> Self {
        let processor = Arc::new(EventProcessor::new(
            config.sources.iter().flat_map(|s| s.exclude_patterns.clone()).collect(),
        ));
        let buffer = Arc::new(PersistentBuffer::new(
            config.buffer.max_memory_events,
            config.buffer.disk_path.clone(),
        ));
        let positions = Arc::new(PositionStore::load(config.positions_path.clone()).await);
        let collectors = build_collectors(&config);

        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            processor,
            buffer,
            positions,
            collectors,
        }
    }

    /// Starts both loops, waits for a shutdown signal, stops them, and
    /// drains whatever is left in the buffer before returning.
    pub async fn run_until_shutdown(&self, mut shutdown: mpsc::Receiver<()>) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(agent_id = %self.config.agent.id, "starting agent");

        let monitor = self.spawn_monitor_loop();
        let sender = self.spawn_sender_loop();

        shutdown.recv().await;
        info!("shutdown signal received, stopping gracefully");
        self.running.store(false, Ordering::SeqCst);

        let _ = tokio::join!(monitor, sender);
        self.drain_buffer_on_shutdown().await;
        Ok(())
    }

    fn spawn_monitor_loop(&self) -> tokio::task::JoinHandle<()> {
        let running = self.running.clone();
        let collectors = self.collectors.clone();
        let positions = self.positions.clone();
        let processor = self.processor.clone();
        let buffer = self.buffer.clone();
        let agent_id = self.config.agent.id.clone();

        tokio::spawn(async move {
            let mut watcher = build_watcher(&collectors);
            let mut interval = tokio::time::interval(Duration::from_millis(1000));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_sweep = tokio::time::Instant::now();

            info!("monitoring loop started");
            while running.load(Ordering::SeqCst) {
                let fired = watcher
                    .as_mut()
                    .map(|(rx, _watcher)| rx.try_recv().is_ok())
                    .unwrap_or(false);
                let elapsed = last_sweep.elapsed() >= SWEEP_INTERVAL;

                if fired || elapsed {
                    for collector in &collectors {
                        let raw_events = collector.collect_new_events(&positions).await;
                        if raw_events.is_empty() {
                            continue;
                        }
                        info!(source = collector.source_name(), count = raw_events.len(), "collected raw events");
                        for raw in raw_events {
                            if let Some(event) = processor.process(&raw, &agent_id) {
                                if let Err(e) = buffer.add_event(event).await {
                                    error!(error = %e, "failed to buffer event");
                                }
                            }
                        }
                    }
                    last_sweep = tokio::time::Instant::now();
                }

                interval.tick().await;
            }
            info!("monitoring loop ended");
        })
    }

    fn spawn_sender_loop(&self) -> tokio::task::JoinHandle<()> {
        let running = self.running.clone();
        let buffer = self.buffer.clone();
        let config = self.config.clone_for_client();

        tokio::spawn(async move {
            let mut client = DbClient::new(config.0, config.1, config.2);

            info!("sending loop started");
            while running.load(Ordering::SeqCst) {
                let current_size = buffer.size().await;
                if current_size > 0 {
                    if !client.is_connected() && client.connect().await.is_err() {
                        warn!("reconnect failed, waiting before retry");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue;
                    }
                    let batch = buffer.get_batch(SENDER_BATCH_CAP.min(current_size)).await;
                    if !batch.is_empty() {
                        send_batch(&mut client, &buffer, &config.3, batch).await;
                    }
                }
                tokio::time::sleep(SENDER_IDLE_INTERVAL).await;
            }
            info!("sending loop ended");
        })
    }

    async fn drain_buffer_on_shutdown(&self) {
        self.buffer.flush().await.ok();
        if self.buffer.is_empty().await {
            return;
        }
        info!("flushing remaining buffered events before exit");
        let mut client = DbClient::new(
            self.config.server.host.clone(),
            self.config.server.port,
            self.config.database.clone(),
        );
        while !self.buffer.is_empty().await {
            if !client.is_connected() && client.connect().await.is_err() {
                error!("cannot reconnect during shutdown drain, giving up");
                break;
            }
            let size = self.buffer.size().await;
            let batch = self.buffer.get_batch(SHUTDOWN_DRAIN_BATCH.min(size)).await;
            if batch.is_empty() {
                break;
            }
            send_batch(&mut client, &self.buffer, &self.config.collection, batch).await;
        }
        client.disconnect();
    }
}

async fn send_batch(
    client: &mut DbClient,
    buffer: &PersistentBuffer,
    collection: &str,
    batch: Vec<crate::types::SecurityEvent>,
) {
    let documents = batch.iter().map(|e| e.to_document()).collect::<Vec<_>>();
    let response = client.insert(collection, documents).await;
    if response.is_success() {
        info!(count = response.count, "sent events to server");
    } else {
        warn!(error = %response.message, "send failed, returning batch to buffer");
        if let Err(e) = buffer.add_events(batch).await {
            error!(error = %e, "failed to re-buffer undelivered batch");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

impl AgentConfig {
    /// Bundles the handful of fields the sender loop needs into an owned
    /// tuple so the spawned task doesn't borrow from `self`. The sender
    /// batch cap is a fixed constant, not `self.sender.batch_size` —
    /// see [`SENDER_BATCH_CAP`].
    fn clone_for_client(&self) -> (String, u16, String, String) {
        (
            self.server.host.clone(),
            self.server.port,
            self.database.clone(),
            self.collection.clone(),
        )
    }
}

fn build_collectors(config: &AgentConfig) -> Vec<Arc<LogCollector>> {
    config
        .enabled_sources()
        .map(|source: &SourceConfig| {
            if let Some(pattern) = &source.path_pattern {
                Arc::new(LogCollector::pattern(source.name.clone(), pattern.clone()))
            } else {
                let path = source.path.clone().unwrap_or_default();
                Arc::new(LogCollector::static_path(source.name.clone(), path))
            }
        })
        .collect()
}

type WatchChannel = (std::sync::mpsc::Receiver<notify::Result<notify::Event>>, RecommendedWatcher);

/// Installs a `notify` watch on every static (non-pattern) collector
/// path. Returns `None` if no static paths exist or the watcher can't
/// be created; the monitor loop then falls back entirely to its
/// 10-second sweep.
fn build_watcher(collectors: &[Arc<LogCollector>]) -> Option<WatchChannel> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .ok()?;

    let mut any = false;
    for collector in collectors {
        if let Some(path) = collector.watch_path() {
            if path.exists() && watcher.watch(path, RecursiveMode::NonRecursive).is_ok() {
                any = true;
            }
        }
    }
    if any {
        Some((rx, watcher))
    } else {
        None
    }
}
