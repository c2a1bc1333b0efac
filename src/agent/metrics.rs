//! Per-agent metrics store
//!
//! Named counters and gauges owned by one agent. Counters only grow; gauges
//! are overwritten. Nothing is ever reset short of recreating the agent.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CYCLES_COMPLETED: &str = "cycles_completed";
pub const CYCLES_FAILED: &str = "cycles_failed";
pub const ERRORS: &str = "errors";
pub const LAST_CYCLE_COMPLETED: &str = "last_cycle_completed";
pub const LAST_CYCLE_TIME: &str = "last_cycle_time";
pub const LAST_CYCLE_ERROR: &str = "last_cycle_error";

/// A single metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl MetricValue {
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            MetricValue::Counter(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetricValue::Counter(n) => Value::from(*n),
            MetricValue::Gauge(v) => Value::from(*v),
            MetricValue::Timestamp(ts) => Value::from(ts.to_rfc3339()),
            MetricValue::Text(s) => Value::from(s.clone()),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Gauge(v)
    }
}

impl From<DateTime<Utc>> for MetricValue {
    fn from(ts: DateTime<Utc>) -> Self {
        MetricValue::Timestamp(ts)
    }
}

impl From<String> for MetricValue {
    fn from(s: String) -> Self {
        MetricValue::Text(s)
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        MetricValue::Text(s.to_string())
    }
}

/// Metrics collector for one agent
#[derive(Debug, Default)]
pub struct AgentMetrics {
    values: RwLock<BTreeMap<String, MetricValue>>,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter, creating it at zero if absent.
    ///
    /// A name previously used as a gauge is turned into a counter.
    pub fn increment(&self, name: &str, by: u64) -> u64 {
        let mut values = self.values.write();
        let entry = values
            .entry(name.to_string())
            .or_insert(MetricValue::Counter(0));
        let next = entry.as_counter().unwrap_or(0).saturating_add(by);
        *entry = MetricValue::Counter(next);
        next
    }

    /// Overwrite a gauge
    pub fn set(&self, name: &str, value: impl Into<MetricValue>) {
        self.values.write().insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.read().get(name).cloned()
    }

    /// Current value of a counter (zero when never incremented)
    pub fn counter(&self, name: &str) -> u64 {
        self.values
            .read()
            .get(name)
            .and_then(MetricValue::as_counter)
            .unwrap_or(0)
    }

    /// Copy of all metrics
    pub fn snapshot(&self) -> BTreeMap<String, MetricValue> {
        self.values.read().clone()
    }

    /// All metrics as a JSON object
    pub fn to_json(&self) -> Value {
        let values = self.values.read();
        Value::Object(
            values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Record a successful cycle
    pub(crate) fn record_success(&self, duration_secs: f64, completed_at: DateTime<Utc>) {
        let mut values = self.values.write();
        bump(&mut values, CYCLES_COMPLETED);
        values.insert(LAST_CYCLE_COMPLETED.to_string(), completed_at.into());
        values.insert(LAST_CYCLE_TIME.to_string(), duration_secs.into());
    }

    /// Record a failed cycle
    pub(crate) fn record_failure(&self, duration_secs: f64, error: &str) {
        let mut values = self.values.write();
        bump(&mut values, CYCLES_FAILED);
        bump(&mut values, ERRORS);
        values.insert(LAST_CYCLE_TIME.to_string(), duration_secs.into());
        values.insert(LAST_CYCLE_ERROR.to_string(), error.into());
    }
}

fn bump(values: &mut BTreeMap<String, MetricValue>, name: &str) {
    let entry = values
        .entry(name.to_string())
        .or_insert(MetricValue::Counter(0));
    *entry = MetricValue::Counter(entry.as_counter().unwrap_or(0).saturating_add(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let metrics = AgentMetrics::new();
        assert_eq!(metrics.counter("trades"), 0);
        assert_eq!(metrics.increment("trades", 2), 2);
        assert_eq!(metrics.increment("trades", 1), 3);

        metrics.set("exposure", 12.5);
        assert_eq!(metrics.get("exposure"), Some(MetricValue::Gauge(12.5)));
        metrics.set("exposure", 3.0);
        assert_eq!(metrics.get("exposure"), Some(MetricValue::Gauge(3.0)));
    }

    #[test]
    fn test_cycle_recording() {
        let metrics = AgentMetrics::new();
        metrics.record_success(0.25, Utc::now());
        metrics.record_failure(0.5, "boom");

        assert_eq!(metrics.counter(CYCLES_COMPLETED), 1);
        assert_eq!(metrics.counter(CYCLES_FAILED), 1);
        assert_eq!(metrics.counter(ERRORS), 1);
        assert_eq!(metrics.get(LAST_CYCLE_TIME), Some(MetricValue::Gauge(0.5)));
        assert_eq!(
            metrics.get(LAST_CYCLE_ERROR),
            Some(MetricValue::Text("boom".into()))
        );

        let json = metrics.to_json();
        assert_eq!(json["cycles_completed"], 1);
        assert!(json["last_cycle_completed"].is_string());
    }
}
