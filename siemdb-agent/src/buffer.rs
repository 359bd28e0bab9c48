//! Two-tier FIFO event buffer: an in-memory queue backed by a
//! JSON-lines spill file once the queue fills up. `disk_cursor` tracks
//! a monotone byte offset into the spill file so repeated `get_batch`
//! calls never re-read the same disk-backed event twice within a
//! process's lifetime; the spill file is truncated and the cursor
//! reset to 0 once fully drained.

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::types::SecurityEvent;

struct BufferState {
    memory: VecDeque<SecurityEvent>,
    disk_cursor: u64,
    total_stored: u64,
}

pub struct PersistentBuffer {
    spill_path: PathBuf,
    max_memory: usize,
    state: Mutex<BufferState>,
}

impl PersistentBuffer {
    /// `storage_path` is a path prefix; the spill file lands at
    /// `<storage_path>_data.json`.
    pub fn new(max_memory: usize, storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();
        let mut spill_path = storage_path.into_os_string();
        spill_path.push("_data.json");
        Self {
            spill_path: PathBuf::from(spill_path),
            max_memory: max_memory.max(1),
            state: Mutex::new(BufferState {
                memory: VecDeque::new(),
                disk_cursor: 0,
                total_stored: 0,
            }),
        }
    }

    pub async fn add_event(&self, event: SecurityEvent) -> anyhow::Result<()> {
        self.add_events(vec![event]).await
    }

    pub async fn add_events(&self, events: Vec<SecurityEvent>) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if state.memory.len() + events.len() > self.max_memory {
            self.spill_locked(&mut state).await?;
        }
        state.total_stored += events.len() as u64;
        state.memory.extend(events);
        Ok(())
    }

    /// Spills the entire in-memory tier to the append-only spill file and
    /// clears it.
    async fn spill_locked(&self, state: &mut BufferState) -> anyhow::Result<()> {
        if state.memory.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.spill_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spill_path)
            .await?;
        let mut payload = String::new();
        for event in &state.memory {
            payload.push_str(&event.to_json_line());
            payload.push('\n');
        }
        file.write_all(payload.as_bytes()).await?;
        state.memory.clear();
        Ok(())
    }

    /// Takes up to `n` events in FIFO order, draining memory first and
    /// topping up from the disk tier's unconsumed tail.
    pub async fn get_batch(&self, n: usize) -> Vec<SecurityEvent> {
        let mut state = self.state.lock().await;
        let mut batch = Vec::with_capacity(n);
        while batch.len() < n {
            match state.memory.pop_front() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        if batch.len() < n {
            let remaining = n - batch.len();
            match self.read_disk_batch(&mut state, remaining).await {
                Ok(mut disk_events) => batch.append(&mut disk_events),
                Err(e) => error!(error = %e, "failed to read spill file"),
            }
        }
        batch
    }

    async fn read_disk_batch(
        &self,
        state: &mut BufferState,
        n: usize,
    ) -> anyhow::Result<Vec<SecurityEvent>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let Ok(mut file) = tokio::fs::File::open(&self.spill_path).await else {
            return Ok(Vec::new());
        };
        file.seek(std::io::SeekFrom::Start(state.disk_cursor)).await?;
        let mut reader = BufReader::new(file);
        let mut events = Vec::with_capacity(n);
        let mut cursor = state.disk_cursor;
        loop {
            if events.len() >= n {
                break;
            }
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break;
            }
            cursor += bytes_read as u64;
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<SecurityEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "dropping unparsable spilled event"),
            }
        }
        state.disk_cursor = cursor;

        if self.disk_fully_drained(&state).await? {
            self.truncate_spill(state).await?;
        }
        Ok(events)
    }

    async fn disk_fully_drained(&self, state: &BufferState) -> anyhow::Result<bool> {
        match tokio::fs::metadata(&self.spill_path).await {
            Ok(meta) => Ok(state.disk_cursor >= meta.len()),
            Err(_) => Ok(true),
        }
    }

    async fn truncate_spill(&self, state: &mut BufferState) -> anyhow::Result<()> {
        let _ = tokio::fs::remove_file(&self.spill_path).await;
        state.disk_cursor = 0;
        Ok(())
    }

    pub async fn size(&self) -> usize {
        let state = self.state.lock().await;
        state.memory.len() + self.disk_event_count(&state).await
    }

    async fn disk_event_count(&self, state: &BufferState) -> usize {
        let Ok(text) = tokio::fs::read_to_string(&self.spill_path).await else {
            return 0;
        };
        let consumed_bytes = state.disk_cursor as usize;
        let remaining = text.get(consumed_bytes.min(text.len())..).unwrap_or("");
        remaining.lines().filter(|l| !l.is_empty()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.memory.clear();
        state.disk_cursor = 0;
        state.total_stored = 0;
        let _ = tokio::fs::remove_file(&self.spill_path).await;
    }

    /// Flushes the in-memory tier to disk without waiting for it to fill,
    /// used on shutdown so no buffered event is memory-only when the
    /// process exits.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        self.spill_locked(&mut state).await
    }
}
