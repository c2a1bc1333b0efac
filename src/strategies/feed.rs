//! Market-data boundary consumed by the reference strategies
//!
//! Venue and chain clients live outside this crate; they plug in by
//! implementing `MarketFeed`. `PaperFeed` is an in-memory implementation used
//! for paper runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// A trade made by a watched wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTrade {
    pub wallet: String,
    pub token: String,
    pub side: TradeSide,
    /// Notional in quote currency
    pub amount: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A borrower position on a lending protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendingPosition {
    pub protocol: String,
    pub account: String,
    pub collateral_value: Decimal,
    pub debt_value: Decimal,
    pub health_factor: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub token: String,
    pub price: Decimal,
    /// Percent change over the feed's reference window
    pub price_change_pct: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A freshly created trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPair {
    pub pair_address: String,
    pub base_token: String,
    pub quote_token: String,
    pub liquidity: Decimal,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Trades by `wallet` strictly after `since` (all known trades if `None`)
    async fn wallet_trades(
        &self,
        wallet: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WalletTrade>>;

    /// Open positions on the given protocols; empty means every protocol
    async fn lending_positions(&self, protocols: &[String]) -> Result<Vec<LendingPosition>>;

    async fn token_snapshot(&self, token: &str) -> Result<Option<TokenSnapshot>>;

    /// Pairs created strictly after `since`
    async fn new_pairs(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NewPair>>;
}

#[derive(Debug, Default)]
struct PaperState {
    trades: Vec<WalletTrade>,
    positions: Vec<LendingPosition>,
    snapshots: HashMap<String, TokenSnapshot>,
    pairs: Vec<NewPair>,
}

/// In-memory market feed
#[derive(Debug, Default)]
pub struct PaperFeed {
    state: RwLock<PaperState>,
}

impl PaperFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_trade(&self, trade: WalletTrade) {
        self.state.write().trades.push(trade);
    }

    pub fn set_positions(&self, positions: Vec<LendingPosition>) {
        self.state.write().positions = positions;
    }

    pub fn set_snapshot(&self, snapshot: TokenSnapshot) {
        self.state
            .write()
            .snapshots
            .insert(snapshot.token.to_lowercase(), snapshot);
    }

    pub fn push_pair(&self, pair: NewPair) {
        self.state.write().pairs.push(pair);
    }
}

#[async_trait]
impl MarketFeed for PaperFeed {
    async fn wallet_trades(
        &self,
        wallet: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WalletTrade>> {
        let state = self.state.read();
        Ok(state
            .trades
            .iter()
            .filter(|t| t.wallet.eq_ignore_ascii_case(wallet))
            .filter(|t| since.map_or(true, |s| t.timestamp > s))
            .cloned()
            .collect())
    }

    async fn lending_positions(&self, protocols: &[String]) -> Result<Vec<LendingPosition>> {
        let state = self.state.read();
        Ok(state
            .positions
            .iter()
            .filter(|p| {
                protocols.is_empty() || protocols.iter().any(|x| x.eq_ignore_ascii_case(&p.protocol))
            })
            .cloned()
            .collect())
    }

    async fn token_snapshot(&self, token: &str) -> Result<Option<TokenSnapshot>> {
        Ok(self.state.read().snapshots.get(&token.to_lowercase()).cloned())
    }

    async fn new_pairs(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NewPair>> {
        let state = self.state.read();
        Ok(state
            .pairs
            .iter()
            .filter(|p| since.map_or(true, |s| p.created_at > s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_feed_filters_by_time() {
        let feed = PaperFeed::new();
        let t0 = Utc::now();
        for (i, wallet) in ["w1", "w2", "W1"].iter().enumerate() {
            feed.push_trade(WalletTrade {
                wallet: wallet.to_string(),
                token: "ETH".into(),
                side: TradeSide::Buy,
                amount: dec!(10),
                price: dec!(2000),
                timestamp: t0 + Duration::seconds(i as i64),
            });
        }

        assert_eq!(feed.wallet_trades("w1", None).await.unwrap().len(), 2);
        assert_eq!(feed.wallet_trades("w1", Some(t0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paper_feed_protocol_filter() {
        let feed = PaperFeed::new();
        let position = |protocol: &str| LendingPosition {
            protocol: protocol.into(),
            account: "0xabc".into(),
            collateral_value: dec!(100),
            debt_value: dec!(95),
            health_factor: dec!(0.95),
        };
        feed.set_positions(vec![position("aave"), position("compound")]);

        assert_eq!(feed.lending_positions(&[]).await.unwrap().len(), 2);
        let aave = feed.lending_positions(&["AAVE".to_string()]).await.unwrap();
        assert_eq!(aave.len(), 1);
        assert_eq!(aave[0].protocol, "aave");
    }
}
