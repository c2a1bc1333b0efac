//! Reference strategies
//!
//! Deterministic decision rules over the `MarketFeed` boundary. They emit
//! trade intents into cycle results and metrics; nothing here talks to a
//! venue.

pub mod copy_trading;
pub mod feed;
pub mod liquidation;
pub mod scanner;
pub mod sniper;

pub use copy_trading::CopyTradingStrategy;
pub use feed::{
    LendingPosition, MarketFeed, NewPair, PaperFeed, TokenSnapshot, TradeSide, WalletTrade,
};
pub use liquidation::LiquidationHunterStrategy;
pub use scanner::ScannerStrategy;
pub use sniper::SniperStrategy;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::agent::{AgentAction, AgentConfig};
use crate::error::{FleetError, Result};

/// A trade a strategy wants executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub token: String,
    pub side: TradeSide,
    pub amount: Decimal,
    pub reason: String,
}

/// Decimal setting with a default, checked against `valid`
pub(crate) fn decimal_setting(
    config: &AgentConfig,
    key: &str,
    default: Decimal,
    valid: impl Fn(Decimal) -> bool,
    expectation: &str,
) -> Result<Decimal> {
    let value = config.get_decimal(key)?.unwrap_or(default);
    if !valid(value) {
        return Err(FleetError::invalid_config(format!(
            "{key} must be {expectation}, got {value}"
        )));
    }
    Ok(value)
}

/// Add `item` unless an equal entry (case-insensitive) exists
pub(crate) fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    if list.iter().any(|x| x.eq_ignore_ascii_case(item)) {
        return false;
    }
    list.push(item.to_string());
    true
}

/// Remove an entry (case-insensitive); false if it was not there
pub(crate) fn remove_entry(list: &mut Vec<String>, item: &str) -> bool {
    let before = list.len();
    list.retain(|x| !x.eq_ignore_ascii_case(item));
    list.len() != before
}

/// Order-preserving, case-insensitive dedup
pub(crate) fn dedup_list(items: Vec<String>) -> Vec<String> {
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        push_unique(&mut unique, &item);
    }
    unique
}

/// Required decimal action parameter; numbers and numeric strings both work
pub(crate) fn decimal_param(action: &AgentAction, key: &str) -> Result<Decimal> {
    let parsed = match action.param(key) {
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        FleetError::strategy(format!(
            "action '{}' requires numeric parameter '{}'",
            action.action_type, key
        ))
    })
}

pub(crate) fn gauge(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
