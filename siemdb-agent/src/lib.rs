//! Host log collection agent: tails configured log sources, turns raw
//! lines into structured security events, buffers them durably, and
//! ships batches to a siemdb server.

pub mod agent;
pub mod buffer;
pub mod collector;
pub mod processor;
pub mod types;

pub use agent::Agent;
pub use buffer::PersistentBuffer;
pub use collector::{LogCollector, PositionStore};
pub use processor::EventProcessor;
pub use types::{AgentConfig, SecurityEvent, SourceConfig};
