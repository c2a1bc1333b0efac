//! Agent Registry - the process-wide directory of agents
//!
//! Owns every agent, builds them through the factory, and hands running ones
//! to the execution engine. It never runs agent logic itself.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::agent::{ActionResult, Agent, AgentAction, AgentConfig, AgentStatus, AgentType};
use crate::config::{AgentDeclaration, AppConfig};
use crate::engine::{EngineConfig, EngineState, EngineStats, ExecutionEngine};
use crate::error::{FleetError, Result};
use crate::factory::{AgentFactory, AgentTypeInfo, StrategyDeps};
use crate::resources::{ResourcePool, ResourcePoolConfig};

static GLOBAL: OnceLock<Arc<AgentRegistry>> = OnceLock::new();

/// Result of a control call, safe to hand to any caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    /// Agent status after the call, or `"error"`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(status: AgentStatus) -> Self {
        Self {
            success: true,
            status: status.to_string(),
            error: None,
        }
    }

    pub fn error(err: &FleetError) -> Self {
        Self {
            success: false,
            status: "error".to_string(),
            error: Some(err.to_string()),
        }
    }

    fn from_result(result: Result<AgentStatus>) -> Self {
        match result {
            Ok(status) => Self::ok(status),
            Err(e) => Self::error(&e),
        }
    }
}

/// Fleet overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total_agents: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub engine: EngineStats,
}

impl std::fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let statuses: Vec<String> = self
            .by_status
            .iter()
            .map(|(status, n)| format!("{status}={n}"))
            .collect();
        write!(
            f,
            "Agents[{} total, {}] {}",
            self.total_agents,
            statuses.join(", "),
            self.engine
        )
    }
}

pub struct AgentRegistry {
    agents: DashMap<String, Arc<Agent>>,
    factory: AgentFactory,
    engine: ExecutionEngine,
}

impl AgentRegistry {
    pub fn new(factory: AgentFactory, engine_config: EngineConfig, pool: Arc<ResourcePool>) -> Self {
        Self {
            agents: DashMap::new(),
            factory,
            engine: ExecutionEngine::new(engine_config, pool),
        }
    }

    /// Registry wired from application config
    pub fn from_config(config: &AppConfig, deps: StrategyDeps) -> Self {
        let factory = AgentFactory::new(deps).with_log_capacity(config.agent_log_capacity);
        let pool = Arc::new(ResourcePool::new(&config.pool));
        Self::new(factory, config.engine.clone(), pool)
    }

    /// The process-wide registry, created with defaults on first use
    pub fn global() -> Arc<AgentRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(AgentRegistry::default()))
            .clone()
    }

    /// Install `registry` as the process-wide instance; fails if one exists
    pub fn install_global(registry: AgentRegistry) -> Result<Arc<AgentRegistry>> {
        let registry = Arc::new(registry);
        GLOBAL
            .set(registry.clone())
            .map_err(|_| FleetError::Internal("global agent registry already initialized".into()))?;
        Ok(registry)
    }

    pub fn factory(&self) -> &AgentFactory {
        &self.factory
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        self.engine.pool()
    }

    pub fn available_types(&self) -> Vec<AgentTypeInfo> {
        self.factory.available_types()
    }

    /// Build an agent and add it to the directory, in `Initialized`.
    ///
    /// Nothing is stored unless construction succeeds.
    pub async fn register_agent(
        &self,
        agent_type: &str,
        agent_id: &str,
        config: Value,
    ) -> Result<Arc<Agent>> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(FleetError::invalid_config("agent_id must not be empty"));
        }
        if self.agents.contains_key(agent_id) {
            return Err(FleetError::AgentAlreadyExists(agent_id.to_string()));
        }

        let agent_type = AgentType::from_name(agent_type);
        if !self.factory.supports(&agent_type) {
            return Err(FleetError::UnknownAgentType(agent_type.to_string()));
        }

        let config = AgentConfig::from_value(config)?;
        let agent = Arc::new(self.factory.create(&agent_type, agent_id, config).await?);

        // a concurrent registration may have won while we were constructing
        match self.agents.entry(agent_id.to_string()) {
            Entry::Occupied(_) => Err(FleetError::AgentAlreadyExists(agent_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(agent.clone());
                info!(agent_id = %agent_id, agent_type = %agent_type, "agent registered");
                Ok(agent)
            }
        }
    }

    /// Remove an agent and cancel its pending cycles.
    ///
    /// Callers should stop the agent first.
    pub fn unregister_agent(&self, agent_id: &str) -> Result<Arc<Agent>> {
        let (_, agent) = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| FleetError::AgentNotFound(agent_id.to_string()))?;

        self.engine.cancel_agent(agent_id);
        if agent.is_running() {
            warn!(agent_id = %agent_id, "unregistered an agent that is still running");
        }
        info!(agent_id = %agent_id, "agent unregistered");
        Ok(agent)
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.get(agent_id).map(|entry| entry.value().clone())
    }

    /// All agents, sorted by id
    pub fn get_all_agents(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<Arc<Agent>> = self.agents.iter().map(|e| e.value().clone()).collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Transition to `Running` and schedule the first cycle
    pub async fn start_agent(&self, agent_id: &str) -> ControlResponse {
        ControlResponse::from_result(self.try_start_agent(agent_id).await)
    }

    /// Cancel pending cycles and transition to `Stopped`.
    ///
    /// Waits for an in-flight cycle to finish.
    pub async fn stop_agent(&self, agent_id: &str) -> ControlResponse {
        ControlResponse::from_result(self.try_stop_agent(agent_id).await)
    }

    pub async fn start_all_agents(&self) -> BTreeMap<String, ControlResponse> {
        let agents = self.get_all_agents();
        let results = join_all(agents.iter().map(|a| self.start_agent(a.id()))).await;
        agents
            .iter()
            .map(|a| a.id().to_string())
            .zip(results)
            .collect()
    }

    pub async fn stop_all_agents(&self) -> BTreeMap<String, ControlResponse> {
        let agents = self.get_all_agents();
        let results = join_all(agents.iter().map(|a| self.stop_agent(a.id()))).await;
        agents
            .iter()
            .map(|a| a.id().to_string())
            .zip(results)
            .collect()
    }

    /// Merge `patch` into an agent's config
    pub async fn update_agent_config(&self, agent_id: &str, patch: Value) -> ControlResponse {
        let result = async {
            let agent = self.require(agent_id)?;
            let Value::Object(patch) = patch else {
                return Err(FleetError::invalid_config("config update must be a mapping"));
            };
            agent.update_config(&patch).await?;
            Ok(agent.status())
        }
        .await;
        ControlResponse::from_result(result)
    }

    pub async fn execute_agent_action(&self, agent_id: &str, action: &AgentAction) -> ActionResult {
        match self.get_agent(agent_id) {
            Some(agent) => agent.execute_action(action).await,
            None => ActionResult::failed(FleetError::AgentNotFound(agent_id.to_string()).to_string()),
        }
    }

    /// Start the execution engine and schedule every running agent
    pub fn start(&self) -> Result<()> {
        self.engine.start()?;
        for agent in self.get_all_agents() {
            if agent.is_running() {
                self.engine.schedule_agent_cycle(agent)?;
            }
        }
        info!(agents = self.agents.len(), "agent registry started");
        Ok(())
    }

    /// Stop scheduling; agents keep their status
    pub async fn stop(&self) -> Result<()> {
        self.engine.stop().await?;
        info!("agent registry stopped");
        Ok(())
    }

    /// Stop the engine, stop every running agent and close the pool
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await?;
        for (agent_id, response) in self.stop_all_agents().await {
            if !response.success && self.get_agent(&agent_id).map_or(false, |a| a.is_running()) {
                warn!(agent_id = %agent_id, error = ?response.error, "agent did not stop cleanly");
            }
        }
        self.pool().close();
        Ok(())
    }

    /// Register declared agents and start those marked `autostart`
    pub async fn bootstrap(&self, declarations: &[AgentDeclaration]) -> BTreeMap<String, ControlResponse> {
        let mut results = BTreeMap::new();
        for decl in declarations {
            let registered = self
                .register_agent(&decl.agent_type, &decl.id, decl.config.clone())
                .await;

            let response = match registered {
                Err(e) => {
                    warn!(agent_id = %decl.id, error = %e, "declared agent not registered");
                    ControlResponse::error(&e)
                }
                Ok(_) if decl.autostart => self.start_agent(&decl.id).await,
                Ok(agent) => ControlResponse::ok(agent.status()),
            };
            results.insert(decl.id.clone(), response);
        }
        results
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut by_status = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for agent in self.get_all_agents() {
            *by_status.entry(agent.status().to_string()).or_insert(0) += 1;
            *by_type.entry(agent.agent_type().to_string()).or_insert(0) += 1;
        }

        RegistrySummary {
            total_agents: self.agents.len(),
            by_status,
            by_type,
            engine: self.engine.stats(),
        }
    }

    fn require(&self, agent_id: &str) -> Result<Arc<Agent>> {
        self.get_agent(agent_id)
            .ok_or_else(|| FleetError::AgentNotFound(agent_id.to_string()))
    }

    async fn try_start_agent(&self, agent_id: &str) -> Result<AgentStatus> {
        let agent = self.require(agent_id)?;
        if self.engine.state() == EngineState::Stopped {
            return Err(FleetError::EngineStopped);
        }

        agent.start().await?;
        if let Err(e) = self.engine.schedule_agent_cycle(agent.clone()) {
            warn!(agent_id = %agent_id, error = %e, "agent started but not scheduled");
        }
        Ok(agent.status())
    }

    async fn try_stop_agent(&self, agent_id: &str) -> Result<AgentStatus> {
        let agent = self.require(agent_id)?;
        self.engine.cancel_agent(agent_id);
        agent.stop().await?;
        Ok(agent.status())
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(
            AgentFactory::default(),
            EngineConfig::default(),
            Arc::new(ResourcePool::new(&ResourcePoolConfig::default())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_duplicate_registration_leaves_first_intact() {
        let registry = AgentRegistry::default();
        let first = registry
            .register_agent("scanner", "s1", json!({"watchlist": ["ETH"]}))
            .await
            .unwrap();

        let err = registry
            .register_agent("sniper", "s1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::AgentAlreadyExists(_)));

        let stored = registry.get_agent("s1").unwrap();
        assert!(Arc::ptr_eq(&first, &stored));
        assert_eq!(stored.agent_type(), &AgentType::Scanner);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_leaves_directory_unchanged() {
        let registry = AgentRegistry::default();
        let err = registry
            .register_agent("bogus", "b1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UnknownAgentType(_)));
        assert!(registry.is_empty());
        assert!(registry.get_agent("b1").is_none());
    }

    #[tokio::test]
    async fn test_failed_setup_not_registered() {
        let registry = AgentRegistry::default();
        let err = registry
            .register_agent("copy_trading", "c1", json!({"tracked_wallets": "w1"}))
            .await
            .unwrap_err();
        assert!(err.is_rejected_request());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_control_responses() {
        let registry = AgentRegistry::default();
        registry
            .register_agent("sniper", "sn1", json!({}))
            .await
            .unwrap();

        let started = registry.start_agent("sn1").await;
        assert_eq!(started, ControlResponse::ok(AgentStatus::Running));
        assert!(registry.engine().is_scheduled("sn1"));

        let again = registry.start_agent("sn1").await;
        assert!(!again.success);
        assert_eq!(again.status, "error");
        assert!(again.error.unwrap().contains("Invalid state transition"));

        let stopped = registry.stop_agent("sn1").await;
        assert_eq!(stopped.status, "stopped");
        assert!(!registry.engine().is_scheduled("sn1"));

        let missing = registry.stop_agent("nope").await;
        assert!(missing.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = AgentRegistry::default();
        registry
            .register_agent("sniper", "sn1", json!({}))
            .await
            .unwrap();
        registry.start_agent("sn1").await;

        registry.unregister_agent("sn1").unwrap();
        assert!(registry.get_agent("sn1").is_none());
        assert!(!registry.engine().is_scheduled("sn1"));
        assert!(matches!(
            registry.unregister_agent("sn1"),
            Err(FleetError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_and_summary() {
        let registry = AgentRegistry::default();
        let declarations: Vec<AgentDeclaration> = serde_json::from_value(json!([
            {"id": "scan", "type": "scanner", "autostart": true, "config": {"watchlist": ["ETH"]}},
            {"id": "snipe", "type": "sniper"},
            {"id": "bad", "type": "market_maker"},
        ]))
        .unwrap();

        let results = registry.bootstrap(&declarations).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results["scan"].status, "running");
        assert_eq!(results["snipe"].status, "initialized");
        assert!(!results["bad"].success);

        let summary = registry.summary();
        assert_eq!(summary.total_agents, 2);
        assert_eq!(summary.by_status["running"], 1);
        assert_eq!(summary.by_status["initialized"], 1);
        assert_eq!(summary.engine.queued, 1);
        assert!(summary.to_string().contains("2 total"));
    }

    #[tokio::test]
    async fn test_stopped_registry_rejects_agent_start() {
        let registry = AgentRegistry::default();
        registry
            .register_agent("sniper", "sn1", json!({}))
            .await
            .unwrap();
        registry.start().unwrap();
        registry.stop().await.unwrap();

        let response = registry.start_agent("sn1").await;
        assert!(!response.success);
        assert_eq!(registry.get_agent("sn1").unwrap().status(), AgentStatus::Initialized);
    }
}
