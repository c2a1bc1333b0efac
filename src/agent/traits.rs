//! Strategy trait, the hooks every agent type implements
//!
//! The base `Agent` owns lifecycle, metrics, logging and serialization; a
//! `Strategy` only supplies the type-specific work. The scheduler never
//! sees strategy details.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use super::config::AgentConfig;
use super::logs::AgentLogBuffer;
use super::metrics::{AgentMetrics, MetricValue};
use super::types::AgentAction;
use crate::error::Result;
use crate::resources::ResourceLease;

/// What an action handler did with a request
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Handled; `config_patch` keys are merged into the agent config
    Completed {
        message: String,
        data: Option<Value>,
        config_patch: Option<Map<String, Value>>,
    },
    /// The strategy has no handler for this action type
    Unsupported,
}

impl ActionOutcome {
    pub fn completed(message: impl Into<String>) -> Self {
        ActionOutcome::Completed {
            message: message.into(),
            data: None,
            config_patch: None,
        }
    }

    pub fn with_data(self, data: Value) -> Self {
        match self {
            ActionOutcome::Completed {
                message,
                config_patch,
                ..
            } => ActionOutcome::Completed {
                message,
                data: Some(data),
                config_patch,
            },
            other => other,
        }
    }

    pub fn with_config_patch(self, key: &str, value: Value) -> Self {
        match self {
            ActionOutcome::Completed {
                message,
                data,
                config_patch,
            } => {
                let mut patch = config_patch.unwrap_or_default();
                patch.insert(key.to_string(), value);
                ActionOutcome::Completed {
                    message,
                    data,
                    config_patch: Some(patch),
                }
            }
            other => other,
        }
    }
}

/// Everything a strategy may touch during one cycle.
///
/// Borrowed for the duration of the cycle only, so nothing in it (the
/// resource lease in particular) can outlive the cycle.
pub struct CycleContext<'a> {
    pub agent_id: &'a str,
    pub cycle_id: Uuid,
    pub config: &'a AgentConfig,
    lease: &'a ResourceLease,
    metrics: &'a AgentMetrics,
    logs: &'a AgentLogBuffer,
}

impl<'a> CycleContext<'a> {
    pub(crate) fn new(
        agent_id: &'a str,
        cycle_id: Uuid,
        config: &'a AgentConfig,
        lease: &'a ResourceLease,
        metrics: &'a AgentMetrics,
        logs: &'a AgentLogBuffer,
    ) -> Self {
        Self {
            agent_id,
            cycle_id,
            config,
            lease,
            metrics,
            logs,
        }
    }

    /// The resource slot this cycle runs under
    pub fn lease(&self) -> &ResourceLease {
        self.lease
    }

    pub fn logs(&self) -> &AgentLogBuffer {
        self.logs
    }

    /// Bump a strategy-specific counter
    pub fn increment(&self, name: &str, by: u64) -> u64 {
        self.metrics.increment(name, by)
    }

    /// Overwrite a strategy-specific gauge
    pub fn set_metric(&self, name: &str, value: impl Into<MetricValue>) {
        self.metrics.set(name, value);
    }
}

/// Type-specific behavior of an agent.
///
/// All hooks are called with the agent's strategy lock held, so they are
/// serialized against each other and against control calls.
#[async_trait]
pub trait Strategy: Send + 'static {
    /// Cadence used when the config has no `interval_seconds`
    fn default_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Validate config and build derived state. Failing here means the agent
    /// is never created.
    async fn initialize(&mut self, config: &AgentConfig) -> Result<()>;

    async fn on_start(&mut self, _logs: &AgentLogBuffer) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&mut self, _logs: &AgentLogBuffer) -> Result<()> {
        Ok(())
    }

    /// One unit of work. The returned payload becomes the cycle's `results`.
    async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value>;

    /// Recompute derived state after a config change; an error rejects the
    /// change and the previous config stays in force.
    async fn on_config_update(&mut self, _old: &AgentConfig, new: &AgentConfig) -> Result<()> {
        self.initialize(new).await
    }

    async fn execute_action(
        &mut self,
        _action: &AgentAction,
        _logs: &AgentLogBuffer,
    ) -> Result<ActionOutcome> {
        Ok(ActionOutcome::Unsupported)
    }

    /// Strategy state exposed through `get_status`
    fn snapshot(&self) -> Value {
        Value::Null
    }
}
