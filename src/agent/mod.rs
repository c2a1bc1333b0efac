//! Agent core
//!
//! An `Agent` wraps a type-specific `Strategy` with the behavior every agent
//! shares: lifecycle state machine, per-cycle metrics, bounded logs and
//! contained failures.

pub mod base;
pub mod config;
pub mod logs;
pub mod metrics;
pub mod traits;
pub mod types;

pub use base::{Agent, AgentInfo};
pub use config::AgentConfig;
pub use logs::{AgentLogBuffer, LogEntry, LogLevel, DEFAULT_LOG_CAPACITY};
pub use metrics::{AgentMetrics, MetricValue};
pub use traits::{ActionOutcome, CycleContext, Strategy};
pub use types::{
    ActionResult, AgentAction, AgentStatus, AgentType, CyclePriority, CycleResult,
};
