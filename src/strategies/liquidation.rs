//! Liquidation hunter: find under-collateralised lending positions worth
//! liquidating

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{decimal_param, decimal_setting, dedup_list, gauge, push_unique, remove_entry, MarketFeed};
use crate::agent::{ActionOutcome, AgentAction, AgentConfig, AgentLogBuffer, CycleContext, Strategy};
use crate::error::{FleetError, Result};

/// Share of a position's debt that can be repaid in one liquidation
const CLOSE_FACTOR: Decimal = dec!(0.5);

#[derive(Debug, Clone)]
struct LiquidationSettings {
    protocols: Vec<String>,
    health_factor_threshold: Decimal,
    min_profit: Decimal,
    liquidation_bonus: Decimal,
}

impl LiquidationSettings {
    fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            protocols: dedup_list(config.get_string_list("protocols")?.unwrap_or_default()),
            health_factor_threshold: decimal_setting(
                config,
                "health_factor_threshold",
                Decimal::ONE,
                |v| v > Decimal::ZERO,
                "positive",
            )?,
            min_profit: decimal_setting(
                config,
                "min_profit",
                Decimal::from(10),
                |v| v >= Decimal::ZERO,
                "non-negative",
            )?,
            liquidation_bonus: decimal_setting(
                config,
                "liquidation_bonus",
                dec!(0.05),
                |v| v >= Decimal::ZERO && v <= Decimal::ONE,
                "in [0, 1]",
            )?,
        })
    }
}

impl Default for LiquidationSettings {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            health_factor_threshold: Decimal::ONE,
            min_profit: Decimal::from(10),
            liquidation_bonus: dec!(0.05),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationOpportunity {
    pub protocol: String,
    pub account: String,
    pub health_factor: Decimal,
    pub repay_amount: Decimal,
    pub estimated_profit: Decimal,
}

pub struct LiquidationHunterStrategy {
    feed: Arc<dyn MarketFeed>,
    settings: LiquidationSettings,
    opportunities_found: u64,
    best_profit_seen: Decimal,
}

impl LiquidationHunterStrategy {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            feed,
            settings: LiquidationSettings::default(),
            opportunities_found: 0,
            best_profit_seen: Decimal::ZERO,
        }
    }
}

#[async_trait]
impl Strategy for LiquidationHunterStrategy {
    fn default_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn initialize(&mut self, config: &AgentConfig) -> Result<()> {
        self.settings = LiquidationSettings::from_config(config)?;
        Ok(())
    }

    async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value> {
        let positions = self.feed.lending_positions(&self.settings.protocols).await?;
        let scanned = positions.len();

        let mut opportunities: Vec<LiquidationOpportunity> = positions
            .into_iter()
            .filter(|p| p.health_factor < self.settings.health_factor_threshold)
            .filter_map(|p| {
                let repay_amount = (p.debt_value * CLOSE_FACTOR).round_dp(8);
                let estimated_profit = (repay_amount * self.settings.liquidation_bonus).round_dp(8);
                (estimated_profit >= self.settings.min_profit).then(|| LiquidationOpportunity {
                    protocol: p.protocol,
                    account: p.account,
                    health_factor: p.health_factor,
                    repay_amount,
                    estimated_profit,
                })
            })
            .collect();
        opportunities.sort_by(|a, b| b.estimated_profit.cmp(&a.estimated_profit));

        if let Some(best) = opportunities.first() {
            self.best_profit_seen = self.best_profit_seen.max(best.estimated_profit);
            ctx.logs().info(format!(
                "{} liquidation opportunity(ies), best {} on {} ({})",
                opportunities.len(),
                best.estimated_profit,
                best.protocol,
                best.account
            ));
        }
        self.opportunities_found += opportunities.len() as u64;

        ctx.increment("opportunities_found", opportunities.len() as u64);
        ctx.set_metric("positions_scanned", scanned as f64);
        ctx.set_metric("best_profit_seen", gauge(self.best_profit_seen));

        Ok(json!({
            "positions_scanned": scanned,
            "opportunities": opportunities,
        }))
    }

    async fn execute_action(
        &mut self,
        action: &AgentAction,
        _logs: &AgentLogBuffer,
    ) -> Result<ActionOutcome> {
        match action.action_type.as_str() {
            "add_protocol" => {
                let protocol = action.require_str("protocol")?;
                let message = if push_unique(&mut self.settings.protocols, &protocol) {
                    format!("watching {protocol}")
                } else {
                    format!("{protocol} already watched")
                };
                Ok(ActionOutcome::completed(message)
                    .with_data(json!({"protocols": self.settings.protocols}))
                    .with_config_patch("protocols", json!(self.settings.protocols)))
            }
            "remove_protocol" => {
                let protocol = action.require_str("protocol")?;
                if !remove_entry(&mut self.settings.protocols, &protocol) {
                    return Err(FleetError::strategy(format!("{protocol} is not watched")));
                }
                Ok(ActionOutcome::completed(format!("stopped watching {protocol}"))
                    .with_data(json!({"protocols": self.settings.protocols}))
                    .with_config_patch("protocols", json!(self.settings.protocols)))
            }
            "set_threshold" => {
                let threshold = decimal_param(action, "threshold")?;
                if threshold <= Decimal::ZERO {
                    return Err(FleetError::strategy("threshold must be positive"));
                }
                self.settings.health_factor_threshold = threshold;
                Ok(ActionOutcome::completed(format!("health factor threshold set to {threshold}"))
                    .with_config_patch("health_factor_threshold", json!(threshold)))
            }
            _ => Ok(ActionOutcome::Unsupported),
        }
    }

    fn snapshot(&self) -> Value {
        json!({
            "protocols": self.settings.protocols,
            "health_factor_threshold": self.settings.health_factor_threshold,
            "min_profit": self.settings.min_profit,
            "liquidation_bonus": self.settings.liquidation_bonus,
            "opportunities_found": self.opportunities_found,
        })
    }
}
