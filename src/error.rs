use thiserror::Error;

/// Main error type for the agent fleet
#[derive(Error, Debug)]
pub enum FleetError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid agent config: {0}")]
    InvalidConfig(String),

    // Registry errors (rejected requests)
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already exists: {0}")]
    AgentAlreadyExists(String),

    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Strategy errors (setup, hooks, actions)
    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Resource pool errors
    #[error("Resource lease timed out after {waited_ms}ms")]
    ResourceTimeout { waited_ms: u64 },

    #[error("Resource pool is closed")]
    PoolClosed,

    // Engine errors
    #[error("Execution engine error: {0}")]
    Engine(String),

    #[error("Execution engine is stopped")]
    EngineStopped,

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// Errors caused by the caller's request rather than by the system.
    ///
    /// These are reported synchronously and never have a process-wide effect.
    pub fn is_rejected_request(&self) -> bool {
        matches!(
            self,
            FleetError::AgentNotFound(_)
                | FleetError::AgentAlreadyExists(_)
                | FleetError::UnknownAgentType(_)
                | FleetError::InvalidStateTransition { .. }
                | FleetError::InvalidConfig(_)
                | FleetError::EngineStopped
        )
    }

    pub fn strategy(msg: impl Into<String>) -> Self {
        FleetError::Strategy(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        FleetError::InvalidConfig(msg.into())
    }
}

/// Result type alias for FleetError
pub type Result<T> = std::result::Result<T, FleetError>;
