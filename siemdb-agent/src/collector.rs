//! Log tailing. A [`LogCollector`] reads new lines appended to a source
//! since its last recorded position, detecting rotation (inode change)
//! and truncation (size shrinks below the recorded offset) along the
//! way. Positions are owned by an explicit [`PositionStore`] passed
//! into each collector, so multiple collectors in the same process
//! never share hidden state. Static paths are watched with `notify`;
//! pattern paths (containing a glob) are expanded with `glob` on every
//! collection tick instead of being watched directly.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::types::SecurityEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Position {
    offset: u64,
    inode: u64,
}

/// Persists `(source, path) -> (offset, inode)` to a sidecar JSON file.
/// Keys are `source\x00path` so the same path tailed under two source
/// names never collides.
pub struct PositionStore {
    sidecar_path: PathBuf,
    positions: RwLock<HashMap<String, Position>>,
}

fn key(source: &str, path: &Path) -> String {
    format!("{source}\u{0}{}", path.display())
}

impl PositionStore {
    pub async fn load(sidecar_path: impl Into<PathBuf>) -> Self {
        let sidecar_path = sidecar_path.into();
        let positions = match tokio::fs::read_to_string(&sidecar_path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Self {
            sidecar_path,
            positions: RwLock::new(positions),
        }
    }

    async fn get(&self, source: &str, path: &Path) -> Option<(u64, u64)> {
        self.positions
            .read()
            .await
            .get(&key(source, path))
            .map(|p| (p.offset, p.inode))
    }

    async fn set(&self, source: &str, path: &Path, offset: u64, inode: u64) {
        self.positions
            .write()
            .await
            .insert(key(source, path), Position { offset, inode });
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist log positions");
        }
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let positions = self.positions.read().await;
        let text = serde_json::to_string_pretty(&*positions)?;
        if let Some(parent) = self.sidecar_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.sidecar_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.sidecar_path).await?;
        Ok(())
    }
}

#[cfg(unix)]
fn inode_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).ok().map(|m| m.ino())
}

#[cfg(not(unix))]
fn inode_of(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

pub struct LogCollector {
    source_name: String,
    path: Option<PathBuf>,
    pattern: Option<String>,
}

impl LogCollector {
    pub fn static_path(source_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_name: source_name.into(),
            path: Some(path.into()),
            pattern: None,
        }
    }

    pub fn pattern(source_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            path: None,
            pattern: Some(pattern.into()),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The single static path to `notify`-watch, if this collector isn't
    /// pattern-based.
    pub fn watch_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn collect_new_events(&self, positions: &PositionStore) -> Vec<SecurityEvent> {
        let paths = self.candidate_paths();
        let mut events = Vec::new();
        for path in paths {
            events.extend(self.read_from_path(&path, positions).await);
        }
        events
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        match (&self.path, &self.pattern) {
            (Some(p), _) => vec![p.clone()],
            (None, Some(pattern)) => glob::glob(pattern)
                .into_iter()
                .flatten()
                .filter_map(Result::ok)
                .collect(),
            (None, None) => Vec::new(),
        }
    }

    async fn read_from_path(&self, path: &Path, positions: &PositionStore) -> Vec<SecurityEvent> {
        let Some(current_inode) = inode_of(path) else {
            return Vec::new();
        };
        let Ok(metadata) = fs::metadata(path) else {
            return Vec::new();
        };
        let size = metadata.len();

        let (mut start_offset, _) = positions.get(&self.source_name, path).await.unwrap_or((0, current_inode));
        let last_inode = positions.get(&self.source_name, path).await.map(|(_, i)| i);

        if let Some(last_inode) = last_inode {
            if last_inode != current_inode {
                info!(path = %path.display(), "log rotation detected, resetting position");
                start_offset = 0;
            }
        }
        if size < start_offset {
            info!(path = %path.display(), "log truncation detected, resetting position");
            start_offset = 0;
        }
        if start_offset == size {
            return Vec::new();
        }

        let events = match self.read_lines_from(path, start_offset) {
            Ok((lines, new_offset)) => {
                let events = self.lines_to_events(path, lines);
                positions.set(&self.source_name, path, new_offset, current_inode).await;
                events
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to tail log file");
                Vec::new()
            }
        };
        events
    }

    fn read_lines_from(&self, path: &Path, offset: u64) -> std::io::Result<(Vec<String>, u64)> {
        let mut file = fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = std::io::BufReader::new(file);
        let mut lines = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        let new_offset = reader.stream_position().unwrap_or(offset);
        Ok((lines, new_offset))
    }

    fn lines_to_events(&self, path: &Path, lines: Vec<String>) -> Vec<SecurityEvent> {
        if self.source_name.contains("bash_history") {
            let user = extract_user_from_home_path(path);
            let mtime = fs::metadata(path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let timestamp = mtime.format("%Y-%m-%dT%H:%M:%SZ").to_string();
            lines
                .into_iter()
                .map(|line| SecurityEvent {
                    source: self.source_name.clone(),
                    raw_log: line,
                    user: user.clone(),
                    timestamp: timestamp.clone(),
                    ..Default::default()
                })
                .collect()
        } else {
            lines
                .into_iter()
                .map(|line| SecurityEvent {
                    source: self.source_name.clone(),
                    raw_log: line,
                    ..Default::default()
                })
                .collect()
        }
    }
}

/// Pulls `<user>` out of a `/home/<user>/...` path.
fn extract_user_from_home_path(path: &Path) -> String {
    let components: Vec<_> = path.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
    for (i, component) in components.iter().enumerate() {
        if component == "home" {
            if let Some(user) = components.get(i + 1) {
                return user.clone();
            }
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn collects_new_lines_since_last_position() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("syslog");
        std::fs::write(&log_path, "line one\nline two\n").unwrap();

        let positions = PositionStore::load(dir.path().join("positions.json")).await;
        let collector = LogCollector::static_path("syslog", &log_path);

        let events = collector.collect_new_events(&positions).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].raw_log, "line one");

        let events_again = collector.collect_new_events(&positions).await;
        assert!(events_again.is_empty());

        let mut file = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
        writeln!(file, "line three").unwrap();
        let events_more = collector.collect_new_events(&positions).await;
        assert_eq!(events_more.len(), 1);
        assert_eq!(events_more[0].raw_log, "line three");
    }

    #[tokio::test]
    async fn rotation_resets_position_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("syslog");
        std::fs::write(&log_path, "l1\nl2\nl3\nl4\nl5\n").unwrap();

        let positions = PositionStore::load(dir.path().join("positions.json")).await;
        let collector = LogCollector::static_path("syslog", &log_path);
        let first = collector.collect_new_events(&positions).await;
        assert_eq!(first.len(), 5);

        let rotated_path = dir.path().join("syslog.1");
        std::fs::rename(&log_path, &rotated_path).unwrap();
        std::fs::write(&log_path, "l6\n").unwrap();

        let second = collector.collect_new_events(&positions).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].raw_log, "l6");
    }

    #[tokio::test]
    async fn truncation_resets_position_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("syslog");
        std::fs::write(&log_path, "line one\nline two\nline three\n").unwrap();

        let positions = PositionStore::load(dir.path().join("positions.json")).await;
        let collector = LogCollector::static_path("syslog", &log_path);
        let _ = collector.collect_new_events(&positions).await;

        std::fs::write(&log_path, "new\n").unwrap();
        let events = collector.collect_new_events(&positions).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_log, "new");
    }

    #[tokio::test]
    async fn bash_history_collector_fills_user_from_home_path_and_timestamp_from_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let home_dir = dir.path().join("home").join("alice");
        std::fs::create_dir_all(&home_dir).unwrap();
        let history_path = home_dir.join(".bash_history");
        std::fs::write(&history_path, "ls -la\n").unwrap();

        let positions = PositionStore::load(dir.path().join("positions.json")).await;
        let collector = LogCollector::static_path("bash_history", &history_path);
        let events = collector.collect_new_events(&positions).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user, "alice");
        assert!(!events[0].timestamp.is_empty());
    }

    #[tokio::test]
    async fn pattern_collector_expands_glob_on_each_tick() {
        let dir = tempfile::tempdir().unwrap();
        for user in ["alice", "bob"] {
            let home_dir = dir.path().join("home").join(user);
            std::fs::create_dir_all(&home_dir).unwrap();
            std::fs::write(home_dir.join(".bash_history"), "whoami\n").unwrap();
        }
        let positions = PositionStore::load(dir.path().join("positions.json")).await;
        let pattern = dir.path().join("home").join("*").join(".bash_history");
        let collector = LogCollector::pattern("bash_history", pattern.to_string_lossy().to_string());
        let events = collector.collect_new_events(&positions).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn position_store_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("syslog");
        std::fs::write(&log_path, "l1\n").unwrap();
        let sidecar = dir.path().join("positions.json");

        {
            let positions = PositionStore::load(&sidecar).await;
            let collector = LogCollector::static_path("syslog", &log_path);
            let _ = collector.collect_new_events(&positions).await;
        }

        let reloaded = PositionStore::load(&sidecar).await;
        let collector = LogCollector::static_path("syslog", &log_path);
        let events = collector.collect_new_events(&reloaded).await;
        assert!(events.is_empty());
    }
}
