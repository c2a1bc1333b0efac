//! Core agent types: lifecycle status, type names, priority classes and the
//! structured results returned across the agent boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FleetError;

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Constructed and set up, never started
    Initialized,
    /// Cycles are being scheduled
    Running,
    /// Stopped by a control call
    Stopped,
}

impl AgentStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, AgentStatus::Running)
    }

    /// `start()` is only valid from these states
    pub fn can_start(&self) -> bool {
        matches!(self, AgentStatus::Initialized | AgentStatus::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initialized => "initialized",
            AgentStatus::Running => "running",
            AgentStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy type an agent runs.
///
/// Built-in types map to the reference strategies; any other name is kept as
/// `Custom` and resolved by whatever constructor was registered with the
/// factory under that name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentType {
    CopyTrading,
    LiquidationHunter,
    Scanner,
    Sniper,
    Custom(String),
}

impl AgentType {
    pub const BUILTIN: [AgentType; 4] = [
        AgentType::CopyTrading,
        AgentType::LiquidationHunter,
        AgentType::Scanner,
        AgentType::Sniper,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            AgentType::CopyTrading => "copy_trading",
            AgentType::LiquidationHunter => "liquidation_hunter",
            AgentType::Scanner => "scanner",
            AgentType::Sniper => "sniper",
            AgentType::Custom(name) => name,
        }
    }

    /// Resolve a type name; unknown names become `Custom`
    pub fn from_name(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "copy_trading" => AgentType::CopyTrading,
            "liquidation_hunter" => AgentType::LiquidationHunter,
            "scanner" => AgentType::Scanner,
            "sniper" => AgentType::Sniper,
            _ => AgentType::Custom(normalized),
        }
    }
}

impl FromStr for AgentType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AgentType::from_name(s))
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AgentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(AgentType::from_name(&raw))
    }
}

/// Scheduling priority class.
///
/// Lower discriminant wins when several cycles are ready and resource slots
/// are scarce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePriority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl CyclePriority {
    /// Promote by `steps` classes, saturating at `High`
    pub fn promoted(self, steps: u32) -> Self {
        let rank = (self as u32).saturating_sub(steps);
        match rank {
            0 => CyclePriority::High,
            1 => CyclePriority::Normal,
            _ => CyclePriority::Low,
        }
    }
}

impl Default for CyclePriority {
    fn default() -> Self {
        CyclePriority::Normal
    }
}

impl FromStr for CyclePriority {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(CyclePriority::High),
            "normal" => Ok(CyclePriority::Normal),
            "low" => Ok(CyclePriority::Low),
            other => Err(FleetError::invalid_config(format!(
                "priority must be one of high/normal/low, got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for CyclePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CyclePriority::High => write!(f, "high"),
            CyclePriority::Normal => write!(f, "normal"),
            CyclePriority::Low => write!(f, "low"),
        }
    }
}

/// Outcome of one `run_cycle` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub success: bool,
    /// None when the cycle never ran (agent not running)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<Uuid>,
    /// Hook wall time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CycleResult {
    pub fn not_running() -> Self {
        Self {
            success: false,
            cycle_id: None,
            duration: None,
            results: None,
            error: None,
            message: Some("not running".to_string()),
        }
    }

    pub fn succeeded(cycle_id: Uuid, duration: f64, results: Value) -> Self {
        Self {
            success: true,
            cycle_id: Some(cycle_id),
            duration: Some(duration),
            results: Some(results),
            error: None,
            message: None,
        }
    }

    pub fn failed(cycle_id: Uuid, duration: f64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            cycle_id: Some(cycle_id),
            duration: Some(duration),
            results: None,
            error: Some(error.into()),
            message: None,
        }
    }

    /// True when the cycle was skipped because the agent was not running
    pub fn was_skipped(&self) -> bool {
        self.cycle_id.is_none()
    }
}

/// Free-form imperative request routed to a strategy's action handler.
///
/// Parameters may be nested (`{"type": "add_wallet", "parameters": {"wallet": "w1"}}`)
/// or inline (`{"type": "add_wallet", "wallet": "w1"}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(flatten)]
    pub inline: Map<String, Value>,
}

impl AgentAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Look up a parameter, nested parameters first
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key).or_else(|| self.inline.get(key))
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// Required string parameter, trimmed and non-empty
    pub fn require_str(&self, key: &str) -> crate::error::Result<String> {
        self.str_param(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                FleetError::strategy(format!(
                    "action '{}' requires string parameter '{}'",
                    self.action_type, key
                ))
            })
    }
}

/// Structured response to `execute_action`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn not_supported(action_type: &str) -> Self {
        Self::failed(format!("{action_type} not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        assert!(AgentStatus::Initialized.can_start());
        assert!(AgentStatus::Stopped.can_start());
        assert!(!AgentStatus::Running.can_start());
        assert!(AgentStatus::Running.is_running());
        assert_eq!(AgentStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_agent_type_parsing() {
        assert_eq!("copy_trading".parse::<AgentType>().unwrap(), AgentType::CopyTrading);
        assert_eq!("Copy-Trading".parse::<AgentType>().unwrap(), AgentType::CopyTrading);
        assert_eq!(
            "market_maker".parse::<AgentType>().unwrap(),
            AgentType::Custom("market_maker".into())
        );

        let serialized = serde_json::to_string(&AgentType::LiquidationHunter).unwrap();
        assert_eq!(serialized, "\"liquidation_hunter\"");
    }

    #[test]
    fn test_priority_promotion() {
        assert_eq!(CyclePriority::Low.promoted(1), CyclePriority::Normal);
        assert_eq!(CyclePriority::Low.promoted(5), CyclePriority::High);
        assert_eq!(CyclePriority::High.promoted(1), CyclePriority::High);
        assert!(CyclePriority::High < CyclePriority::Low);
        assert!("urgent".parse::<CyclePriority>().is_err());
    }

    #[test]
    fn test_action_params_nested_and_inline() {
        let inline: AgentAction =
            serde_json::from_value(json!({"type": "add_wallet", "wallet": "w1"})).unwrap();
        assert_eq!(inline.action_type, "add_wallet");
        assert_eq!(inline.str_param("wallet"), Some("w1"));

        let nested: AgentAction = serde_json::from_value(
            json!({"type": "add_wallet", "parameters": {"wallet": "w2"}}),
        )
        .unwrap();
        assert_eq!(nested.str_param("wallet"), Some("w2"));
        assert!(nested.require_str("missing").is_err());
    }

    #[test]
    fn test_not_supported_message() {
        let result = ActionResult::not_supported("bogus");
        assert!(!result.success);
        assert_eq!(result.message, "bogus not supported");
    }
}
