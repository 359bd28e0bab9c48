//! Agent configuration and the security-event record. Every config
//! field carries a default so a missing or partial config file still
//! produces a usable agent; unknown keys are ignored rather than
//! rejected.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database() -> String {
    "security_db".to_string()
}
fn default_collection() -> String {
    "security_events".to_string()
}
fn default_agent_id() -> String {
    let host = local_hostname();
    format!("agent-{host}-01")
}
fn default_log_file() -> String {
    "/var/log/siem_agent.log".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_send_interval() -> u64 {
    30
}
fn default_max_memory_events() -> usize {
    1000
}
fn default_disk_path() -> String {
    "/var/lib/siem_agent/buffer".to_string()
}
fn default_positions_path() -> String {
    "/tmp/siem_positions.json".to_string()
}
fn default_enabled() -> bool {
    true
}

/// This machine's hostname, used both as the default `agent_id` suffix
/// and to fill `SecurityEvent.hostname` when a collector didn't set one.
/// `HOSTNAME` is set in the environment on most Linux distributions and
/// inside containers; falls back to a sentinel rather than failing.
pub(crate) fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    #[serde(default = "default_agent_id")]
    pub id: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self { id: default_agent_id() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Accepted for config-file compatibility but not read by the sender
    /// loop, which caps each batch at a fixed 500 events regardless of
    /// this value.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_send_interval")]
    pub send_interval: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_interval: default_send_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_memory_events")]
    pub max_memory_events: usize,
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_memory_events: default_max_memory_events(),
            disk_path: default_disk_path(),
        }
    }
}

/// One entry of the `sources[]` config array. Either `path` (static,
/// watched) or `path_pattern` (glob, expanded on every tick) is set,
/// never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub path_pattern: Option<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentIdentity,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default = "default_positions_path")]
    pub positions_path: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            agent: AgentIdentity::default(),
            database: default_database(),
            collection: default_collection(),
            log_file: default_log_file(),
            log_level: default_log_level(),
            sender: SenderConfig::default(),
            buffer: BufferConfig::default(),
            positions_path: default_positions_path(),
            sources: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Reads and parses a config file. A missing or empty file yields
    /// defaults rather than an error, so a fresh install can start
    /// before an operator writes a config. Unreadable JSON is still a
    /// hard error, since that almost always signals a typo the
    /// operator should see immediately.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AgentConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// A structured record derived from one raw log line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityEvent {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub process: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub agent_id: String,
}

impl SecurityEvent {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
