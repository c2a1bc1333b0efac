//! Execution Engine - recurring cycle scheduler
//!
//! The dispatch loop uses `tokio::select!` to:
//! - wake when a cycle is scheduled or cancelled
//! - wake when the next waiting cycle becomes eligible
//! - wake when a resource lease is released
//! - collect finished cycles and reschedule them at completion + interval
//! - exit on shutdown, draining in-flight cycles

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{deadline_after, Completion, TaskQueue, Ticket};
use crate::agent::{Agent, CycleResult};
use crate::error::{FleetError, Result};
use crate::resources::{PoolStats, ResourceLease, ResourcePool};

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A ready cycle is promoted one priority class per this much waiting
    pub starvation_threshold_ms: u64,
    /// Grace period for in-flight cycles on stop before they are aborted
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starvation_threshold_ms: 30_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn starvation_threshold(&self) -> Duration {
        Duration::from_millis(self.starvation_threshold_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Never started; cycles may be queued but nothing dispatches
    Idle,
    Running,
    /// Stopped; scheduling is rejected until started again
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Default)]
struct EngineCounters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    lease_timeouts: AtomicU64,
    dropped: AtomicU64,
}

/// Engine statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub state: EngineState,
    pub queued: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub lease_timeouts: u64,
    pub dropped: u64,
    pub pool: PoolStats,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine[{}, queued={}, ready={}, in_flight={}, dispatched={}, ok={}, failed={}, lease_timeouts={}, dropped={}] {}",
            self.state,
            self.queued,
            self.ready,
            self.in_flight,
            self.dispatched,
            self.succeeded,
            self.failed,
            self.lease_timeouts,
            self.dropped,
            self.pool
        )
    }
}

struct FinishedCycle {
    agent: Arc<Agent>,
    generation: u64,
    result: CycleResult,
}

struct Shared {
    config: EngineConfig,
    pool: Arc<ResourcePool>,
    queue: Mutex<TaskQueue>,
    wake: Notify,
    state: RwLock<EngineState>,
    counters: EngineCounters,
}

struct RunHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Runs every scheduled agent's cycles at its interval, under priority
/// ordering and resource pool availability
pub struct ExecutionEngine {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, pool: Arc<ResourcePool>) -> Self {
        let queue = TaskQueue::new(config.starvation_threshold());
        Self {
            shared: Arc::new(Shared {
                config,
                pool,
                queue: Mutex::new(queue),
                wake: Notify::new(),
                state: RwLock::new(EngineState::Idle),
                counters: EngineCounters::default(),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.shared.pool
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Spawn the dispatch loop on the current runtime
    pub fn start(&self) -> Result<()> {
        let mut run = self.run.lock();
        match run.as_ref() {
            Some(handle) if !handle.task.is_finished() => {
                warn!("execution engine already running");
                return Ok(());
            }
            Some(_) => error!("execution engine dispatch loop had exited, restarting"),
            None => {}
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FleetError::Engine(format!("no async runtime: {e}")))?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        *self.shared.state.write() = EngineState::Running;
        let task = runtime.spawn(self.shared.clone().run(shutdown_rx));
        *run = Some(RunHandle { shutdown_tx, task });

        info!(
            starvation_threshold_ms = self.shared.config.starvation_threshold_ms,
            shutdown_timeout_ms = self.shared.config.shutdown_timeout_ms,
            pool_capacity = self.shared.pool.capacity(),
            "execution engine started"
        );
        Ok(())
    }

    /// Cancel all queued cycles and wait (bounded) for in-flight ones.
    ///
    /// Agents keep their status; only scheduling stops.
    pub async fn stop(&self) -> Result<()> {
        *self.shared.state.write() = EngineState::Stopped;
        let cancelled = self.shared.queue.lock().clear();

        let handle = self.run.lock().take();
        let Some(handle) = handle else {
            debug!(cancelled, "execution engine stop: loop not running");
            return Ok(());
        };

        info!(cancelled, "execution engine stopping");
        let _ = handle.shutdown_tx.send(());
        handle
            .task
            .await
            .map_err(|e| FleetError::Engine(format!("dispatch loop failed: {e}")))?;

        info!("execution engine stopped");
        Ok(())
    }

    /// Queue `agent`'s next cycle, eligible immediately.
    ///
    /// Returns `Ok(false)` when nothing new was queued: the agent already
    /// has a cycle queued or in flight, or is not running.
    pub fn schedule_agent_cycle(&self, agent: Arc<Agent>) -> Result<bool> {
        if self.state() == EngineState::Stopped {
            return Err(FleetError::EngineStopped);
        }
        if !agent.is_running() {
            debug!(agent_id = %agent.id(), status = %agent.status(), "not scheduling agent that is not running");
            return Ok(false);
        }

        let agent_id = agent.id().to_string();
        let queued = self.shared.queue.lock().schedule(agent, Instant::now());
        if queued {
            debug!(agent_id = %agent_id, "first cycle scheduled");
        }
        self.shared.wake.notify_one();
        Ok(queued)
    }

    /// Drop an agent's pending scheduling; an in-flight cycle still finishes
    pub fn cancel_agent(&self, agent_id: &str) -> bool {
        let cancelled = self.shared.queue.lock().cancel(agent_id);
        if cancelled {
            self.shared.wake.notify_one();
        }
        cancelled
    }

    pub fn is_scheduled(&self, agent_id: &str) -> bool {
        self.shared.queue.lock().is_scheduled(agent_id)
    }

    pub fn scheduled_agents(&self) -> Vec<String> {
        self.shared.queue.lock().scheduled_ids()
    }

    pub fn stats(&self) -> EngineStats {
        let queue = self.shared.queue.lock().stats();
        let counters = &self.shared.counters;
        EngineStats {
            state: self.state(),
            queued: queue.queued,
            ready: queue.ready,
            in_flight: queue.in_flight,
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            lease_timeouts: counters.lease_timeouts.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            pool: self.shared.pool.stats(),
        }
    }
}

impl Shared {
    /// Main dispatch loop; returns after shutdown and drain
    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("execution engine starting dispatch loop");
        let mut cycles: JoinSet<FinishedCycle> = JoinSet::new();

        loop {
            let next_wake = self.dispatch(&mut cycles);
            let deadline = next_wake.unwrap_or_else(Instant::now);

            tokio::select! {
                // --- Shutdown signal (or engine dropped) ---
                _ = shutdown_rx.recv() => {
                    info!("execution engine: shutdown signal received");
                    break;
                }

                // --- Finished cycles ---
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    self.on_joined(joined);
                }

                // --- Schedule changes ---
                _ = self.wake.notified() => {}

                // --- A lease came back ---
                _ = self.pool.released() => {}

                // --- Next eligible cycle or lease deadline ---
                _ = tokio::time::sleep_until(deadline), if next_wake.is_some() => {}
            }
        }

        self.drain(&mut cycles).await;
        info!("execution engine: dispatch loop exited");
    }

    /// Start every ready cycle a lease is available for.
    ///
    /// Returns when the loop next needs to wake for time-driven work.
    fn dispatch(&self, cycles: &mut JoinSet<FinishedCycle>) -> Option<Instant> {
        let now = Instant::now();
        let mut queue = self.queue.lock();
        queue.promote_due(now);

        while queue.has_ready() && self.pool.available() > 0 {
            let Some(ticket) = queue.pop_ready(now) else {
                break;
            };

            if !ticket.agent.is_running() {
                queue.complete(ticket.agent_id(), ticket.generation, None);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(agent_id = %ticket.agent_id(), "agent no longer running, dropped from schedule");
                continue;
            }

            match self.pool.try_acquire() {
                Ok(Some(lease)) => self.spawn_cycle(cycles, ticket, lease, now),
                Ok(None) => {
                    queue.restore(ticket);
                    break;
                }
                Err(e) => {
                    queue.restore(ticket);
                    warn!(error = %e, "resource pool unavailable, dispatch paused");
                    break;
                }
            }
        }

        // whatever is still ready has no slot; fail the ones that waited too long
        if let Some(limit) = self.pool.acquire_timeout() {
            for ticket in queue.take_overdue(now, limit) {
                let agent = ticket.agent.clone();
                if !agent.is_running() {
                    queue.complete(agent.id(), ticket.generation, None);
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                let waited = ticket.waited(now);
                let waited_ms = waited.as_millis() as u64;
                self.pool.record_timeout();
                self.counters.lease_timeouts.fetch_add(1, Ordering::Relaxed);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                agent.record_lease_failure(waited, &FleetError::ResourceTimeout { waited_ms });
                queue.complete(agent.id(), ticket.generation, Some(deadline_after(now, agent.interval())));
                warn!(agent_id = %agent.id(), waited_ms, "cycle skipped: no resource slot in time");
            }
        }

        queue.next_wake(self.pool.acquire_timeout())
    }

    fn spawn_cycle(
        &self,
        cycles: &mut JoinSet<FinishedCycle>,
        ticket: Ticket,
        lease: ResourceLease,
        now: Instant,
    ) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(
            agent_id = %ticket.agent_id(),
            priority = %ticket.priority,
            waited_ms = ticket.waited(now).as_millis() as u64,
            "dispatching cycle"
        );

        let agent = ticket.agent;
        let generation = ticket.generation;
        cycles.spawn(async move {
            let result = AssertUnwindSafe(agent.run_cycle_with_lease(lease))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| CycleResult::failed(Uuid::new_v4(), 0.0, "cycle task panicked"));
            FinishedCycle {
                agent,
                generation,
                result,
            }
        });
    }

    fn on_joined(&self, joined: std::result::Result<FinishedCycle, JoinError>) {
        match joined {
            Ok(finished) => self.on_finished(finished),
            Err(e) if e.is_cancelled() => debug!("cycle task aborted"),
            Err(e) => error!(error = %e, "cycle task failed"),
        }
    }

    fn on_finished(&self, finished: FinishedCycle) {
        let FinishedCycle {
            agent,
            generation,
            result,
        } = finished;

        if !result.was_skipped() {
            let counter = if result.success {
                &self.counters.succeeded
            } else {
                &self.counters.failed
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let next = agent
            .is_running()
            .then(|| deadline_after(Instant::now(), agent.interval()));
        let completion = self.queue.lock().complete(agent.id(), generation, next);

        match completion {
            Completion::Rescheduled(_) => debug!(
                agent_id = %agent.id(),
                success = result.success,
                next_in_ms = agent.interval().as_millis() as u64,
                "cycle finished, rescheduled"
            ),
            Completion::Dropped => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                info!(agent_id = %agent.id(), status = %agent.status(), "agent no longer running, dropped from schedule");
            }
            Completion::Stale => debug!(agent_id = %agent.id(), "cycle finished after its schedule was cancelled"),
        }
    }

    /// Wait for in-flight cycles up to the shutdown timeout, then abort the rest
    async fn drain(&self, cycles: &mut JoinSet<FinishedCycle>) {
        if cycles.is_empty() {
            return;
        }
        info!(in_flight = cycles.len(), "waiting for in-flight cycles");

        let grace = self.config.shutdown_timeout();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = cycles.join_next().await {
                self.on_joined(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = cycles.len(),
                grace_ms = grace.as_millis() as u64,
                "shutdown timeout, aborting in-flight cycles"
            );
            cycles.abort_all();
            while let Some(joined) = cycles.join_next().await {
                self.on_joined(joined);
            }
        }
    }
}
