//! Market scanner: alert on large price moves across a watchlist

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{decimal_setting, dedup_list, push_unique, remove_entry, MarketFeed};
use crate::agent::{ActionOutcome, AgentAction, AgentConfig, AgentLogBuffer, CycleContext, Strategy};
use crate::error::{FleetError, Result};

const RECENT_ALERTS: usize = 100;

#[derive(Debug, Clone)]
struct ScannerSettings {
    watchlist: Vec<String>,
    /// Percent
    price_change_threshold: Decimal,
    min_volume: Decimal,
}

impl ScannerSettings {
    fn from_config(config: &AgentConfig) -> Result<Self> {
        let watchlist = config
            .get_string_list("watchlist")?
            .ok_or_else(|| FleetError::invalid_config("watchlist is required"))?;

        Ok(Self {
            watchlist: dedup_list(watchlist),
            price_change_threshold: decimal_setting(
                config,
                "price_change_threshold",
                Decimal::from(5),
                |v| v > Decimal::ZERO,
                "positive",
            )?,
            min_volume: decimal_setting(
                config,
                "min_volume",
                Decimal::ZERO,
                |v| v >= Decimal::ZERO,
                "non-negative",
            )?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub token: String,
    pub price: Decimal,
    pub change_pct: Decimal,
    pub volume_24h: Decimal,
    pub direction: MoveDirection,
    pub at: DateTime<Utc>,
}

pub struct ScannerStrategy {
    feed: Arc<dyn MarketFeed>,
    settings: ScannerSettings,
    recent_alerts: VecDeque<PriceAlert>,
    alerts_total: u64,
}

impl ScannerStrategy {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            feed,
            settings: ScannerSettings {
                watchlist: Vec::new(),
                price_change_threshold: Decimal::from(5),
                min_volume: Decimal::ZERO,
            },
            recent_alerts: VecDeque::new(),
            alerts_total: 0,
        }
    }

    fn remember(&mut self, alert: PriceAlert) {
        if self.recent_alerts.len() >= RECENT_ALERTS {
            self.recent_alerts.pop_front();
        }
        self.recent_alerts.push_back(alert);
    }
}

#[async_trait]
impl Strategy for ScannerStrategy {
    fn default_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn initialize(&mut self, config: &AgentConfig) -> Result<()> {
        self.settings = ScannerSettings::from_config(config)?;
        Ok(())
    }

    async fn run_cycle(&mut self, ctx: &CycleContext<'_>) -> Result<Value> {
        let mut alerts = Vec::new();
        let mut missing = Vec::new();

        for token in &self.settings.watchlist {
            let Some(snapshot) = self.feed.token_snapshot(token).await? else {
                missing.push(token.clone());
                continue;
            };

            if snapshot.price_change_pct.abs() < self.settings.price_change_threshold
                || snapshot.volume_24h < self.settings.min_volume
            {
                continue;
            }

            alerts.push(PriceAlert {
                token: snapshot.token,
                price: snapshot.price,
                change_pct: snapshot.price_change_pct,
                volume_24h: snapshot.volume_24h,
                direction: if snapshot.price_change_pct.is_sign_negative() {
                    MoveDirection::Down
                } else {
                    MoveDirection::Up
                },
                at: snapshot.timestamp,
            });
        }

        if !missing.is_empty() {
            ctx.logs()
                .warning(format!("no market data for {}", missing.join(", ")));
        }
        for alert in &alerts {
            ctx.logs().info(format!(
                "{} moved {}% to {}",
                alert.token, alert.change_pct, alert.price
            ));
            self.remember(alert.clone());
        }
        self.alerts_total += alerts.len() as u64;

        ctx.increment("alerts_raised", alerts.len() as u64);
        ctx.set_metric("tokens_scanned", (self.settings.watchlist.len() - missing.len()) as f64);

        Ok(json!({
            "tokens_scanned": self.settings.watchlist.len() - missing.len(),
            "missing": missing,
            "alerts": alerts,
        }))
    }

    async fn execute_action(
        &mut self,
        action: &AgentAction,
        _logs: &AgentLogBuffer,
    ) -> Result<ActionOutcome> {
        match action.action_type.as_str() {
            "add_token" => {
                let token = action.require_str("token")?;
                let message = if push_unique(&mut self.settings.watchlist, &token) {
                    format!("watching {token}")
                } else {
                    format!("{token} already watched")
                };
                Ok(ActionOutcome::completed(message)
                    .with_data(json!({"watchlist": self.settings.watchlist}))
                    .with_config_patch("watchlist", json!(self.settings.watchlist)))
            }
            "remove_token" => {
                let token = action.require_str("token")?;
                if !remove_entry(&mut self.settings.watchlist, &token) {
                    return Err(FleetError::strategy(format!("{token} is not on the watchlist")));
                }
                Ok(ActionOutcome::completed(format!("stopped watching {token}"))
                    .with_data(json!({"watchlist": self.settings.watchlist}))
                    .with_config_patch("watchlist", json!(self.settings.watchlist)))
            }
            "list_alerts" => {
                let limit = action
                    .param("limit")
                    .and_then(Value::as_u64)
                    .map_or(RECENT_ALERTS, |l| l as usize);
                let skip = self.recent_alerts.len().saturating_sub(limit);
                let alerts: Vec<&PriceAlert> = self.recent_alerts.iter().skip(skip).collect();
                Ok(ActionOutcome::completed(format!("{} recent alert(s)", alerts.len()))
                    .with_data(json!({"alerts": alerts})))
            }
            _ => Ok(ActionOutcome::Unsupported),
        }
    }

    fn snapshot(&self) -> Value {
        json!({
            "watchlist": self.settings.watchlist,
            "price_change_threshold": self.settings.price_change_threshold,
            "min_volume": self.settings.min_volume,
            "alerts_total": self.alerts_total,
        })
    }
}
