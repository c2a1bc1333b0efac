//! Agent Factory - resolves an agent type name to a strategy constructor

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::{Agent, AgentConfig, AgentType, Strategy, DEFAULT_LOG_CAPACITY};
use crate::error::{FleetError, Result};
use crate::strategies::{
    CopyTradingStrategy, LiquidationHunterStrategy, MarketFeed, PaperFeed, ScannerStrategy,
    SniperStrategy,
};

/// Collaborators injected into every strategy the factory builds
#[derive(Clone)]
pub struct StrategyDeps {
    pub feed: Arc<dyn MarketFeed>,
}

impl StrategyDeps {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self { feed }
    }

    /// Backed by an empty in-memory feed
    pub fn paper() -> Self {
        Self::new(Arc::new(PaperFeed::new()))
    }
}

pub type StrategyConstructor = Arc<dyn Fn(&StrategyDeps) -> Box<dyn Strategy> + Send + Sync>;

/// Information about an available agent type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTypeInfo {
    pub name: String,
    pub description: String,
}

struct Registration {
    description: String,
    constructor: StrategyConstructor,
}

pub struct AgentFactory {
    deps: StrategyDeps,
    types: RwLock<BTreeMap<String, Registration>>,
    log_capacity: usize,
}

impl AgentFactory {
    /// Factory with the built-in types registered
    pub fn new(deps: StrategyDeps) -> Self {
        let factory = Self {
            deps,
            types: RwLock::new(BTreeMap::new()),
            log_capacity: DEFAULT_LOG_CAPACITY,
        };

        factory.register(
            AgentType::CopyTrading.as_str(),
            "Mirror trades from tracked wallets, scaled by copy_ratio and capped at max_copy_amount",
            |deps| Box::new(CopyTradingStrategy::new(deps.feed.clone())),
        );
        factory.register(
            AgentType::LiquidationHunter.as_str(),
            "Find lending positions below the health factor threshold worth liquidating",
            |deps| Box::new(LiquidationHunterStrategy::new(deps.feed.clone())),
        );
        factory.register(
            AgentType::Scanner.as_str(),
            "Alert on watchlist tokens moving more than price_change_threshold percent",
            |deps| Box::new(ScannerStrategy::new(deps.feed.clone())),
        );
        factory.register(
            AgentType::Sniper.as_str(),
            "Buy into newly listed pairs with enough liquidity, skipping blacklisted tokens",
            |deps| Box::new(SniperStrategy::new(deps.feed.clone())),
        );

        factory
    }

    /// Ring buffer size for agents built from now on
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    /// Register (or replace) a constructor under `name`
    pub fn register<F>(&self, name: &str, description: &str, constructor: F)
    where
        F: Fn(&StrategyDeps) -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        let key = AgentType::from_name(name).as_str().to_string();
        let replaced = self
            .types
            .write()
            .insert(
                key.clone(),
                Registration {
                    description: description.to_string(),
                    constructor: Arc::new(constructor),
                },
            )
            .is_some();
        if replaced {
            tracing::warn!(agent_type = %key, "agent type constructor replaced");
        }
    }

    pub fn supports(&self, agent_type: &AgentType) -> bool {
        self.types.read().contains_key(agent_type.as_str())
    }

    /// Construct and initialize an agent of `agent_type`
    pub async fn create(
        &self,
        agent_type: &AgentType,
        agent_id: &str,
        config: AgentConfig,
    ) -> Result<Agent> {
        let constructor = self
            .types
            .read()
            .get(agent_type.as_str())
            .map(|r| r.constructor.clone())
            .ok_or_else(|| FleetError::UnknownAgentType(agent_type.to_string()))?;

        let strategy = constructor(&self.deps);
        Agent::create(agent_id, agent_type.clone(), config, strategy, self.log_capacity).await
    }

    /// Get list of available agent types
    pub fn available_types(&self) -> Vec<AgentTypeInfo> {
        self.types
            .read()
            .iter()
            .map(|(name, r)| AgentTypeInfo {
                name: name.clone(),
                description: r.description.clone(),
            })
            .collect()
    }
}

impl Default for AgentFactory {
    fn default() -> Self {
        Self::new(StrategyDeps::paper())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentStatus, CycleContext};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Strategy for Echo {
        async fn initialize(&mut self, _config: &AgentConfig) -> Result<()> {
            Ok(())
        }

        async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value> {
            Ok(ctx.config.to_value())
        }
    }

    #[test]
    fn test_builtin_types_listed() {
        let factory = AgentFactory::default();
        let names: Vec<String> = factory.available_types().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["copy_trading", "liquidation_hunter", "scanner", "sniper"]
        );
        assert!(factory
            .available_types()
            .iter()
            .all(|t| !t.description.is_empty()));
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let factory = AgentFactory::default();
        let err = factory
            .create(&AgentType::from_name("bogus"), "a1", AgentConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UnknownAgentType(name) if name == "bogus"));
    }

    #[tokio::test]
    async fn test_custom_type_registration() {
        let factory = AgentFactory::default();
        factory.register("Echo-Bot", "Returns its config", |_| Box::new(Echo));
        assert!(factory.supports(&AgentType::from_name("echo_bot")));

        let agent = factory
            .create(&AgentType::from_name("echo-bot"), "e1", AgentConfig::new().with("k", 1))
            .await
            .unwrap();
        assert_eq!(agent.status(), AgentStatus::Initialized);
        assert_eq!(agent.config().get("k"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_setup_failure_propagates() {
        let factory = AgentFactory::default();
        // copy trading requires tracked_wallets
        let err = factory
            .create(&AgentType::CopyTrading, "c1", AgentConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidConfig(_)));
    }
}
