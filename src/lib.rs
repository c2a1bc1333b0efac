pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod registry;
pub mod resources;
pub mod strategies;

pub use agent::{
    ActionOutcome, ActionResult, Agent, AgentAction, AgentConfig, AgentInfo, AgentStatus,
    AgentType, CycleContext, CyclePriority, CycleResult, Strategy,
};
pub use config::{AgentDeclaration, AppConfig, LoggingConfig};
pub use engine::{EngineConfig, EngineState, EngineStats, ExecutionEngine};
pub use error::{FleetError, Result};
pub use factory::{AgentFactory, AgentTypeInfo, StrategyDeps};
pub use registry::{AgentRegistry, ControlResponse, RegistrySummary};
pub use resources::{PoolStats, ResourceLease, ResourcePool, ResourcePoolConfig};
