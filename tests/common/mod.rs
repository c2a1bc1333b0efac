#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet::agent::{AgentConfig, CycleContext, Strategy};
use fleet::engine::EngineConfig;
use fleet::error::{FleetError, Result};
use fleet::factory::{AgentFactory, StrategyDeps};
use fleet::registry::AgentRegistry;
use fleet::resources::{ResourcePool, ResourcePoolConfig};

pub const TRACER: &str = "tracer";

/// Observations shared by every tracer agent of one registry
#[derive(Default)]
pub struct TracerState {
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    cycles: AtomicU64,
    started: Mutex<Vec<String>>,
}

impl TracerState {
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn in_cycle(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Agent ids in the order their cycles began
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn cycles_of(&self, agent_id: &str) -> usize {
        self.started.lock().iter().filter(|id| *id == agent_id).count()
    }
}

/// Sleeps `delay_ms` per cycle and fails when `fail` is set
pub struct TracerStrategy {
    state: Arc<TracerState>,
    delay: Duration,
    fail: bool,
}

impl TracerStrategy {
    pub fn new(state: Arc<TracerState>) -> Self {
        Self {
            state,
            delay: Duration::ZERO,
            fail: false,
        }
    }
}

#[async_trait]
impl Strategy for TracerStrategy {
    async fn initialize(&mut self, config: &AgentConfig) -> Result<()> {
        self.delay = Duration::from_millis(config.get_u64("delay_ms")?.unwrap_or(0));
        self.fail = config.get_bool("fail")?.unwrap_or(false);
        Ok(())
    }

    async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value> {
        let now = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.state.started.lock().push(ctx.agent_id.to_string());

        tokio::time::sleep(self.delay).await;

        self.state.current.fetch_sub(1, Ordering::SeqCst);
        self.state.cycles.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(FleetError::strategy("scripted failure"));
        }
        Ok(json!({"agent": ctx.agent_id}))
    }
}

/// Registry with the tracer type registered, sharing one `TracerState`
pub fn tracer_registry(capacity: usize, starvation_threshold_ms: u64) -> (AgentRegistry, Arc<TracerState>) {
    tracer_registry_with_pool(
        ResourcePoolConfig {
            capacity,
            acquire_timeout_ms: None,
        },
        starvation_threshold_ms,
    )
}

pub fn tracer_registry_with_pool(
    pool: ResourcePoolConfig,
    starvation_threshold_ms: u64,
) -> (AgentRegistry, Arc<TracerState>) {
    let state = Arc::new(TracerState::default());
    let factory = AgentFactory::new(StrategyDeps::paper());
    let shared = state.clone();
    factory.register(TRACER, "Test tracer", move |_| {
        Box::new(TracerStrategy::new(shared.clone()))
    });

    let engine = EngineConfig {
        starvation_threshold_ms,
        shutdown_timeout_ms: 2_000,
    };
    let registry = AgentRegistry::new(factory, engine, Arc::new(ResourcePool::new(&pool)));
    (registry, state)
}

/// Poll `cond` every few milliseconds until it holds or `within` passes
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
