//! Base Agent: lifecycle state machine and instrumented cycle wrapper
//!
//! Lock discipline:
//! - `strategy` (async mutex) is held for every hook call: cycles, start,
//!   stop, config updates and actions. This is what serializes control calls
//!   against an in-flight cycle.
//! - `state`, metrics and logs sit behind short synchronous locks that are
//!   never held across an await, so read-only snapshots never wait for a
//!   cycle to finish.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::config::AgentConfig;
use super::logs::{AgentLogBuffer, LogEntry, LogLevel};
use super::metrics::{AgentMetrics, MetricValue};
use super::traits::{ActionOutcome, CycleContext, Strategy};
use super::types::{ActionResult, AgentAction, AgentStatus, AgentType, CyclePriority, CycleResult};
use crate::error::{FleetError, Result};
use crate::resources::{ResourceLease, ResourcePool};

/// Point-in-time view of an agent, safe to hand to any caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub priority: CyclePriority,
    pub interval_seconds: f64,
    pub config: AgentConfig,
    /// Strategy-specific state
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct AgentState {
    status: AgentStatus,
    config: AgentConfig,
    interval: Duration,
    priority: CyclePriority,
    details: Value,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

/// One configured, recurring strategy instance
pub struct Agent {
    id: String,
    agent_type: AgentType,
    created_at: DateTime<Utc>,
    strategy: Mutex<Box<dyn Strategy>>,
    state: RwLock<AgentState>,
    metrics: AgentMetrics,
    logs: AgentLogBuffer,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("agent_type", &self.agent_type)
            .field("status", &self.status())
            .finish()
    }
}

impl Agent {
    /// Run the strategy's setup and return the agent in `Initialized`.
    ///
    /// No agent exists if setup fails.
    pub async fn create(
        agent_id: &str,
        agent_type: AgentType,
        config: AgentConfig,
        mut strategy: Box<dyn Strategy>,
        log_capacity: usize,
    ) -> Result<Self> {
        config.validate_reserved()?;
        strategy.initialize(&config).await?;

        let interval = config
            .interval()?
            .unwrap_or_else(|| strategy.default_interval());
        let priority = config.priority()?;
        let details = strategy.snapshot();

        let logs = AgentLogBuffer::new(agent_id, log_capacity);
        logs.info(format!(
            "{agent_type} agent initialized (interval={:.3}s, priority={priority})",
            interval.as_secs_f64()
        ));

        Ok(Self {
            id: agent_id.to_string(),
            agent_type,
            created_at: Utc::now(),
            strategy: Mutex::new(strategy),
            state: RwLock::new(AgentState {
                status: AgentStatus::Initialized,
                config,
                interval,
                priority,
                details,
                started_at: None,
                stopped_at: None,
            }),
            metrics: AgentMetrics::new(),
            logs,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }

    pub fn status(&self) -> AgentStatus {
        self.state.read().status
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn interval(&self) -> Duration {
        self.state.read().interval
    }

    pub fn priority(&self) -> CyclePriority {
        self.state.read().priority
    }

    pub fn config(&self) -> AgentConfig {
        self.state.read().config.clone()
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn logs(&self) -> &AgentLogBuffer {
        &self.logs
    }

    /// `Initialized`/`Stopped` → `Running`, after the start hook succeeds
    pub async fn start(&self) -> Result<()> {
        let mut strategy = self.strategy.lock().await;
        let current = self.status();
        if !current.can_start() {
            return Err(FleetError::InvalidStateTransition {
                from: current.to_string(),
                to: AgentStatus::Running.to_string(),
            });
        }

        guarded(strategy.on_start(&self.logs)).await?;

        {
            let mut state = self.state.write();
            state.status = AgentStatus::Running;
            state.started_at = Some(Utc::now());
            state.details = strategy.snapshot();
        }
        self.logs.info("agent started");
        Ok(())
    }

    /// `Running` → `Stopped`, after the cleanup hook.
    ///
    /// Waits for an in-flight cycle to finish before cleaning up.
    pub async fn stop(&self) -> Result<()> {
        let mut strategy = self.strategy.lock().await;
        let current = self.status();
        if !current.is_running() {
            return Err(FleetError::InvalidStateTransition {
                from: current.to_string(),
                to: AgentStatus::Stopped.to_string(),
            });
        }

        let cleanup = guarded(strategy.on_stop(&self.logs)).await;

        {
            let mut state = self.state.write();
            state.status = AgentStatus::Stopped;
            state.stopped_at = Some(Utc::now());
            state.details = strategy.snapshot();
        }

        match cleanup {
            Ok(()) => {
                self.logs.info("agent stopped");
                Ok(())
            }
            Err(e) => {
                // the agent is stopped either way; report the cleanup problem
                self.logs.error(format!("agent stopped, cleanup failed: {e}"));
                Err(e)
            }
        }
    }

    /// Uniform cycle entry point: acquires a lease from `pool`, then runs one
    /// cycle under it.
    pub async fn run_cycle(&self, pool: &ResourcePool) -> CycleResult {
        if !self.is_running() {
            return CycleResult::not_running();
        }

        let requested = Instant::now();
        match pool.acquire().await {
            Ok(lease) => self.run_cycle_with_lease(lease).await,
            Err(e) => self.record_lease_failure(requested.elapsed(), &e),
        }
    }

    /// Run one cycle under a lease the caller already holds.
    ///
    /// The lease is released when this returns, on every path.
    pub async fn run_cycle_with_lease(&self, lease: ResourceLease) -> CycleResult {
        let mut strategy = self.strategy.lock().await;
        if !self.is_running() {
            return CycleResult::not_running();
        }

        let config = self.config();
        let cycle_id = Uuid::new_v4();
        let ctx = CycleContext::new(
            &self.id,
            cycle_id,
            &config,
            &lease,
            &self.metrics,
            &self.logs,
        );

        let started = Instant::now();
        let outcome = AssertUnwindSafe(strategy.run_cycle(&ctx))
            .catch_unwind()
            .await;
        let duration = started.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(Ok(results)) => {
                self.metrics.record_success(duration, Utc::now());
                self.logs
                    .debug(format!("cycle {cycle_id} completed in {duration:.3}s"));
                CycleResult::succeeded(cycle_id, duration, results)
            }
            Ok(Err(e)) => {
                let error = e.to_string();
                self.metrics.record_failure(duration, &error);
                self.logs
                    .error(format!("cycle {cycle_id} failed after {duration:.3}s: {error}"));
                CycleResult::failed(cycle_id, duration, error)
            }
            Err(panic) => {
                let error = format!("cycle panicked: {}", panic_message(panic.as_ref()));
                self.metrics.record_failure(duration, &error);
                self.logs.error(format!("cycle {cycle_id} {error}"));
                return CycleResult::failed(cycle_id, duration, error);
            }
        };

        self.state.write().details = strategy.snapshot();
        result
    }

    /// Count a cycle that never got a resource slot as a failed cycle
    pub(crate) fn record_lease_failure(&self, waited: Duration, error: &FleetError) -> CycleResult {
        if !self.is_running() {
            return CycleResult::not_running();
        }
        let duration = waited.as_secs_f64();
        let error = error.to_string();
        self.metrics.record_failure(duration, &error);
        self.logs.warning(format!("cycle skipped: {error}"));
        CycleResult::failed(Uuid::new_v4(), duration, error)
    }

    /// Merge `patch` into the config and let the strategy recompute derived
    /// state. A rejected update leaves the previous config in force; the
    /// lifecycle status never changes.
    pub async fn update_config(&self, patch: &Map<String, Value>) -> Result<AgentConfig> {
        let mut strategy = self.strategy.lock().await;
        let old = self.config();
        let new = old.merged(patch);

        let applied = async {
            new.validate_reserved()?;
            guarded(strategy.on_config_update(&old, &new)).await?;
            let interval = new
                .interval()?
                .unwrap_or_else(|| strategy.default_interval());
            Ok::<_, FleetError>((interval, new.priority()?))
        }
        .await;

        match applied {
            Ok((interval, priority)) => {
                {
                    let mut state = self.state.write();
                    state.config = new.clone();
                    state.interval = interval;
                    state.priority = priority;
                    state.details = strategy.snapshot();
                }
                let keys: Vec<&str> = patch.keys().map(String::as_str).collect();
                self.logs.info(format!("config updated: {}", keys.join(", ")));
                Ok(new)
            }
            Err(e) => {
                self.logs.warning(format!("config update rejected: {e}"));
                Err(e)
            }
        }
    }

    /// Route a free-form action to the strategy's handler
    pub async fn execute_action(&self, action: &AgentAction) -> ActionResult {
        let action_type = action.action_type.trim();
        if action_type.is_empty() {
            return ActionResult::failed("action type is required");
        }

        let mut strategy = self.strategy.lock().await;
        match guarded(strategy.execute_action(action, &self.logs)).await {
            Ok(ActionOutcome::Unsupported) => ActionResult::not_supported(action_type),
            Ok(ActionOutcome::Completed {
                message,
                data,
                config_patch,
            }) => {
                {
                    let mut state = self.state.write();
                    if let Some(patch) = config_patch {
                        state.config = state.config.merged(&patch);
                    }
                    state.details = strategy.snapshot();
                }
                self.logs.info(format!("action {action_type}: {message}"));
                ActionResult::ok(message, data)
            }
            Err(e) => {
                self.logs.warning(format!("action {action_type} failed: {e}"));
                ActionResult::failed(e.to_string())
            }
        }
    }

    pub fn get_status(&self) -> AgentInfo {
        let state = self.state.read();
        AgentInfo {
            agent_id: self.id.clone(),
            agent_type: self.agent_type.clone(),
            status: state.status,
            priority: state.priority,
            interval_seconds: state.interval.as_secs_f64(),
            config: state.config.clone(),
            details: state.details.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
        }
    }

    pub fn get_metrics(&self) -> BTreeMap<String, MetricValue> {
        self.metrics.snapshot()
    }

    pub fn get_logs(&self, limit: usize, level: Option<LogLevel>) -> Vec<LogEntry> {
        self.logs.recent(limit, level)
    }
}

/// Run a hook, turning a panic into an ordinary strategy error
async fn guarded<T, F>(hook: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(FleetError::strategy(format!(
            "hook panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
