//! Agent configuration bag
//!
//! The core treats agent configuration as an opaque JSON object. Only two
//! reserved keys are interpreted here (`interval_seconds`, `priority`);
//! everything else is validated by the concrete strategy.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;

use super::types::CyclePriority;
use crate::error::{FleetError, Result};

pub const INTERVAL_KEY: &str = "interval_seconds";
pub const PRIORITY_KEY: &str = "priority";

/// Longest accepted `interval_seconds` (one year)
pub const MAX_INTERVAL_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Key-value configuration owned by one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentConfig(Map<String, Value>);

impl AgentConfig {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from any JSON value; only objects (or null) are accepted
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(FleetError::invalid_config(format!(
                "agent config must be a mapping, got {other}"
            ))),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Overwrite top-level keys with those from `patch`
    pub fn merged(&self, patch: &Map<String, Value>) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_error(key, "a boolean", other)),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| FleetError::invalid_config(format!("{key} is out of range"))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| type_error(key, "a number", &Value::String(s.clone()))),
            Some(other) => Err(type_error(key, "a number", other)),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| type_error(key, "a non-negative integer", &Value::Number(n.clone()))),
            Some(other) => Err(type_error(key, "a non-negative integer", other)),
        }
    }

    /// Numbers and numeric strings are both accepted
    pub fn get_decimal(&self, key: &str) -> Result<Option<Decimal>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                let raw = n.to_string();
                Decimal::from_str(&raw)
                    .or_else(|_| Decimal::from_scientific(&raw))
                    .ok()
                    .or_else(|| n.as_f64().and_then(Decimal::from_f64))
                    .map(Some)
                    .ok_or_else(|| type_error(key, "a decimal", &Value::Number(n.clone())))
            }
            Some(Value::String(s)) => Decimal::from_str(s.trim())
                .map(Some)
                .map_err(|_| type_error(key, "a decimal", &Value::String(s.clone()))),
            Some(other) => Err(type_error(key, "a decimal", other)),
        }
    }

    /// A list of non-empty strings; a missing key is `None`
    pub fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item.as_str().map(str::trim) {
                    Some(s) if !s.is_empty() => Ok(s.to_string()),
                    _ => Err(type_error(key, "a list of non-empty strings", item)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(type_error(key, "a list of strings", other)),
        }
    }

    /// `interval_seconds`, if present, must be a positive number of at
    /// most `MAX_INTERVAL_SECS`
    pub fn interval(&self) -> Result<Option<Duration>> {
        let Some(secs) = self.get_f64(INTERVAL_KEY)? else {
            return Ok(None);
        };
        if !(secs > 0.0 && secs <= MAX_INTERVAL_SECS) {
            return Err(FleetError::invalid_config(format!(
                "{INTERVAL_KEY} must be a positive number of at most {MAX_INTERVAL_SECS}, got {secs}"
            )));
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| FleetError::invalid_config(format!("{INTERVAL_KEY}: {e}")))
    }

    pub fn priority(&self) -> Result<CyclePriority> {
        match self.0.get(PRIORITY_KEY) {
            None | Some(Value::Null) => Ok(CyclePriority::default()),
            Some(Value::String(s)) => s.parse(),
            Some(other) => Err(type_error(PRIORITY_KEY, "a string", other)),
        }
    }

    /// Validate the keys the core itself interprets
    pub fn validate_reserved(&self) -> Result<()> {
        self.interval()?;
        self.priority()?;
        Ok(())
    }
}

impl From<Map<String, Value>> for AgentConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn type_error(key: &str, expected: &str, got: &Value) -> FleetError {
    FleetError::invalid_config(format!("{key} must be {expected}, got {got}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn config(value: Value) -> AgentConfig {
        AgentConfig::from_value(value).unwrap()
    }

    #[test]
    fn test_rejects_non_mapping() {
        assert!(AgentConfig::from_value(json!([1, 2])).is_err());
        assert!(AgentConfig::from_value(Value::Null).unwrap().as_map().is_empty());
    }

    #[test]
    fn test_reserved_keys() {
        let cfg = config(json!({"interval_seconds": 0.5, "priority": "high"}));
        assert_eq!(cfg.interval().unwrap(), Some(Duration::from_millis(500)));
        assert_eq!(cfg.priority().unwrap(), CyclePriority::High);

        assert!(config(json!({"interval_seconds": 0})).validate_reserved().is_err());
        assert!(config(json!({"interval_seconds": "fast"})).validate_reserved().is_err());
        assert!(config(json!({"priority": 3})).validate_reserved().is_err());

        // too large for the scheduler clock
        assert!(config(json!({"interval_seconds": 1e19})).validate_reserved().is_err());
        assert!(config(json!({"interval_seconds": 1e20})).interval().is_err());
        assert_eq!(
            config(json!({"interval_seconds": MAX_INTERVAL_SECS})).interval().unwrap(),
            Some(Duration::from_secs(365 * 24 * 3600))
        );
        assert_eq!(config(json!({})).priority().unwrap(), CyclePriority::Normal);
    }

    #[test]
    fn test_decimal_parsing() {
        let cfg = config(json!({"a": 0.25, "b": "12.5", "c": 100, "d": true}));
        assert_eq!(cfg.get_decimal("a").unwrap(), Some(dec!(0.25)));
        assert_eq!(cfg.get_decimal("b").unwrap(), Some(dec!(12.5)));
        assert_eq!(cfg.get_decimal("c").unwrap(), Some(dec!(100)));
        assert!(cfg.get_decimal("d").is_err());
        assert_eq!(cfg.get_decimal("missing").unwrap(), None);
    }

    #[test]
    fn test_string_list() {
        let cfg = config(json!({"ok": ["w1", " w2 "], "bad": ["w1", 3], "empty": []}));
        assert_eq!(
            cfg.get_string_list("ok").unwrap(),
            Some(vec!["w1".to_string(), "w2".to_string()])
        );
        assert!(cfg.get_string_list("bad").is_err());
        assert_eq!(cfg.get_string_list("empty").unwrap(), Some(vec![]));
    }

    #[test]
    fn test_merge_overwrites_top_level() {
        let cfg = config(json!({"a": 1, "b": 2}));
        let patch = json!({"b": 3, "c": 4});
        let merged = cfg.merged(patch.as_object().unwrap());
        assert_eq!(merged.to_value(), json!({"a": 1, "b": 3, "c": 4}));
        // original untouched
        assert_eq!(cfg.get("b"), Some(&json!(2)));
    }
}
