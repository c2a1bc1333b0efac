//! Copy trading: mirror trades made by tracked wallets, scaled down and capped

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{decimal_setting, dedup_list, gauge, push_unique, remove_entry, MarketFeed, TradeIntent};
use crate::agent::{ActionOutcome, AgentAction, AgentConfig, AgentLogBuffer, CycleContext, Strategy};
use crate::error::{FleetError, Result};

const TRACKED_WALLETS: &str = "tracked_wallets";

#[derive(Debug, Clone)]
struct CopySettings {
    tracked_wallets: Vec<String>,
    copy_ratio: Decimal,
    max_copy_amount: Decimal,
}

impl CopySettings {
    fn from_config(config: &AgentConfig) -> Result<Self> {
        let tracked_wallets = config
            .get_string_list(TRACKED_WALLETS)?
            .ok_or_else(|| FleetError::invalid_config("tracked_wallets is required"))?;

        Ok(Self {
            tracked_wallets: dedup_list(tracked_wallets),
            copy_ratio: decimal_setting(
                config,
                "copy_ratio",
                Decimal::ONE,
                |r| r > Decimal::ZERO && r <= Decimal::ONE,
                "in (0, 1]",
            )?,
            max_copy_amount: decimal_setting(
                config,
                "max_copy_amount",
                Decimal::from(100),
                |v| v > Decimal::ZERO,
                "positive",
            )?,
        })
    }
}

pub struct CopyTradingStrategy {
    feed: Arc<dyn MarketFeed>,
    settings: CopySettings,
    /// Newest trade seen per wallet
    last_seen: HashMap<String, DateTime<Utc>>,
    /// Trades before this are history, not signals
    watch_from: Option<DateTime<Utc>>,
    intents_emitted: u64,
    volume_copied: Decimal,
}

impl CopyTradingStrategy {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            feed,
            settings: CopySettings {
                tracked_wallets: Vec::new(),
                copy_ratio: Decimal::ONE,
                max_copy_amount: Decimal::from(100),
            },
            last_seen: HashMap::new(),
            watch_from: None,
            intents_emitted: 0,
            volume_copied: Decimal::ZERO,
        }
    }

    fn wallets_patch(&self) -> Value {
        json!(self.settings.tracked_wallets)
    }
}

#[async_trait]
impl Strategy for CopyTradingStrategy {
    fn default_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn initialize(&mut self, config: &AgentConfig) -> Result<()> {
        self.settings = CopySettings::from_config(config)?;
        Ok(())
    }

    async fn on_start(&mut self, logs: &AgentLogBuffer) -> Result<()> {
        self.watch_from = Some(Utc::now());
        logs.info(format!(
            "copying {} wallet(s) at ratio {} (cap {})",
            self.settings.tracked_wallets.len(),
            self.settings.copy_ratio,
            self.settings.max_copy_amount
        ));
        Ok(())
    }

    async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value> {
        let mut intents = Vec::new();

        for wallet in &self.settings.tracked_wallets {
            let since = self.last_seen.get(wallet).copied().or(self.watch_from);
            let trades = self.feed.wallet_trades(wallet, since).await?;

            for trade in trades {
                let newest = self.last_seen.entry(wallet.clone()).or_insert(trade.timestamp);
                if trade.timestamp > *newest {
                    *newest = trade.timestamp;
                }

                let amount = (trade.amount * self.settings.copy_ratio)
                    .min(self.settings.max_copy_amount)
                    .round_dp(8);
                if amount <= Decimal::ZERO {
                    continue;
                }
                intents.push(TradeIntent {
                    token: trade.token.clone(),
                    side: trade.side,
                    amount,
                    reason: format!("copy {wallet} {} {}", trade.side, trade.amount),
                });
            }
        }

        let volume: Decimal = intents.iter().map(|i| i.amount).sum();
        self.intents_emitted += intents.len() as u64;
        self.volume_copied += volume;

        if !intents.is_empty() {
            ctx.logs()
                .info(format!("{} copy intent(s), volume {volume}", intents.len()));
        }
        ctx.increment("trades_copied", intents.len() as u64);
        ctx.set_metric("volume_copied", gauge(self.volume_copied));

        Ok(json!({
            "wallets_checked": self.settings.tracked_wallets.len(),
            "intents": intents,
        }))
    }

    async fn execute_action(
        &mut self,
        action: &AgentAction,
        _logs: &AgentLogBuffer,
    ) -> Result<ActionOutcome> {
        match action.action_type.as_str() {
            "add_wallet" => {
                let wallet = action.require_str("wallet")?;
                if !push_unique(&mut self.settings.tracked_wallets, &wallet) {
                    return Ok(ActionOutcome::completed(format!("{wallet} already tracked"))
                        .with_data(json!({TRACKED_WALLETS: self.settings.tracked_wallets})));
                }
                // only trades from now on are copied
                self.last_seen.insert(wallet.clone(), Utc::now());
                Ok(ActionOutcome::completed(format!("tracking {wallet}"))
                    .with_data(json!({TRACKED_WALLETS: self.settings.tracked_wallets}))
                    .with_config_patch(TRACKED_WALLETS, self.wallets_patch()))
            }
            "remove_wallet" => {
                let wallet = action.require_str("wallet")?;
                if !remove_entry(&mut self.settings.tracked_wallets, &wallet) {
                    return Err(FleetError::strategy(format!("{wallet} is not tracked")));
                }
                self.last_seen.retain(|w, _| !w.eq_ignore_ascii_case(&wallet));
                Ok(ActionOutcome::completed(format!("stopped tracking {wallet}"))
                    .with_data(json!({TRACKED_WALLETS: self.settings.tracked_wallets}))
                    .with_config_patch(TRACKED_WALLETS, self.wallets_patch()))
            }
            "list_wallets" => Ok(ActionOutcome::completed(format!(
                "{} wallet(s) tracked",
                self.settings.tracked_wallets.len()
            ))
            .with_data(json!({TRACKED_WALLETS: self.settings.tracked_wallets}))),
            _ => Ok(ActionOutcome::Unsupported),
        }
    }

    fn snapshot(&self) -> Value {
        json!({
            "tracked_wallets": self.settings.tracked_wallets,
            "copy_ratio": self.settings.copy_ratio,
            "max_copy_amount": self.settings.max_copy_amount,
            "intents_emitted": self.intents_emitted,
            "volume_copied": self.volume_copied,
        })
    }
}
