//! Sniper: buy into newly listed pairs that clear a liquidity floor

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{decimal_setting, dedup_list, gauge, push_unique, remove_entry, MarketFeed, TradeIntent, TradeSide};
use crate::agent::{ActionOutcome, AgentAction, AgentConfig, AgentLogBuffer, CycleContext, Strategy};
use crate::error::{FleetError, Result};

#[derive(Debug, Clone)]
struct SniperSettings {
    max_buy_amount: Decimal,
    min_liquidity: Decimal,
    blacklist: Vec<String>,
}

impl SniperSettings {
    fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            max_buy_amount: decimal_setting(
                config,
                "max_buy_amount",
                Decimal::from(50),
                |v| v > Decimal::ZERO,
                "positive",
            )?,
            min_liquidity: decimal_setting(
                config,
                "min_liquidity",
                Decimal::from(1000),
                |v| v >= Decimal::ZERO,
                "non-negative",
            )?,
            blacklist: dedup_list(config.get_string_list("blacklist")?.unwrap_or_default()),
        })
    }

    fn is_blacklisted(&self, token: &str) -> bool {
        self.blacklist.iter().any(|b| b.eq_ignore_ascii_case(token))
    }
}

pub struct SniperStrategy {
    feed: Arc<dyn MarketFeed>,
    settings: SniperSettings,
    last_pair_seen: Option<DateTime<Utc>>,
    buys_emitted: u64,
    skipped_blacklisted: u64,
}

impl SniperStrategy {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            feed,
            settings: SniperSettings {
                max_buy_amount: Decimal::from(50),
                min_liquidity: Decimal::from(1000),
                blacklist: Vec::new(),
            },
            last_pair_seen: None,
            buys_emitted: 0,
            skipped_blacklisted: 0,
        }
    }
}

#[async_trait]
impl Strategy for SniperStrategy {
    fn default_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn initialize(&mut self, config: &AgentConfig) -> Result<()> {
        self.settings = SniperSettings::from_config(config)?;
        Ok(())
    }

    async fn on_start(&mut self, _logs: &AgentLogBuffer) -> Result<()> {
        // pairs listed before a (re)start are not snipe targets
        self.last_pair_seen = Some(Utc::now());
        Ok(())
    }

    async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value> {
        let pairs = self.feed.new_pairs(self.last_pair_seen).await?;
        let seen = pairs.len();
        let mut intents = Vec::new();
        let mut blacklisted = 0u64;
        let mut illiquid = 0u64;

        for pair in pairs {
            if self.last_pair_seen.map_or(true, |t| pair.created_at > t) {
                self.last_pair_seen = Some(pair.created_at);
            }

            if self.settings.is_blacklisted(&pair.base_token)
                || self.settings.is_blacklisted(&pair.pair_address)
            {
                blacklisted += 1;
                continue;
            }
            if pair.liquidity < self.settings.min_liquidity {
                illiquid += 1;
                continue;
            }

            intents.push(TradeIntent {
                token: pair.base_token.clone(),
                side: TradeSide::Buy,
                amount: self.settings.max_buy_amount,
                reason: format!(
                    "new pair {} ({}/{}) liquidity {}",
                    pair.pair_address, pair.base_token, pair.quote_token, pair.liquidity
                ),
            });
        }

        for intent in &intents {
            ctx.logs().info(format!("snipe {} for {}", intent.token, intent.amount));
        }
        self.buys_emitted += intents.len() as u64;
        self.skipped_blacklisted += blacklisted;

        ctx.increment("pairs_seen", seen as u64);
        ctx.increment("buys_emitted", intents.len() as u64);
        ctx.set_metric(
            "committed_notional",
            gauge(self.settings.max_buy_amount * Decimal::from(self.buys_emitted)),
        );

        Ok(json!({
            "pairs_seen": seen,
            "skipped_blacklisted": blacklisted,
            "skipped_illiquid": illiquid,
            "intents": intents,
        }))
    }

    async fn execute_action(
        &mut self,
        action: &AgentAction,
        _logs: &AgentLogBuffer,
    ) -> Result<ActionOutcome> {
        match action.action_type.as_str() {
            "blacklist_token" => {
                let token = action.require_str("token")?;
                let message = if push_unique(&mut self.settings.blacklist, &token) {
                    format!("{token} blacklisted")
                } else {
                    format!("{token} already blacklisted")
                };
                Ok(ActionOutcome::completed(message)
                    .with_data(json!({"blacklist": self.settings.blacklist}))
                    .with_config_patch("blacklist", json!(self.settings.blacklist)))
            }
            "unblacklist_token" => {
                let token = action.require_str("token")?;
                if !remove_entry(&mut self.settings.blacklist, &token) {
                    return Err(FleetError::strategy(format!("{token} is not blacklisted")));
                }
                Ok(ActionOutcome::completed(format!("{token} removed from blacklist"))
                    .with_data(json!({"blacklist": self.settings.blacklist}))
                    .with_config_patch("blacklist", json!(self.settings.blacklist)))
            }
            _ => Ok(ActionOutcome::Unsupported),
        }
    }

    fn snapshot(&self) -> Value {
        json!({
            "max_buy_amount": self.settings.max_buy_amount,
            "min_liquidity": self.settings.min_liquidity,
            "blacklist": self.settings.blacklist,
            "buys_emitted": self.buys_emitted,
            "skipped_blacklisted": self.skipped_blacklisted,
        })
    }
}
