//! Persistence seams.
//!
//! The engine never talks to a database directly; it writes through
//! these two traits. The in-memory implementations are the default and
//! are what the tests use. Write failures are surfaced as `Error::Store`
//! and the caller decides whether they matter; settlement feedback must
//! keep flowing even when persistence is down.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::{DecisionMethod, Side, Trade, TradeStatus};
use crate::error::Result;

pub trait TradeStore: Send + Sync {
    fn insert_trade(&self, trade: &Trade) -> Result<()>;
    fn update_trade_status(&self, trade_id: &str, status: TradeStatus) -> Result<()>;
    fn get_trade(&self, trade_id: &str) -> Result<Option<Trade>>;
}

/// One settled trade in the performance ledger.
#[derive(Debug, Clone)]
pub struct PerformanceRecord {
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub stake: Decimal,
    pub payout: Option<Decimal>,
    pub profit: Decimal,
    pub won: bool,
    pub method: Option<DecisionMethod>,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub net_profit: Decimal,
}

pub trait PerformanceLedger: Send + Sync {
    fn append(&self, record: PerformanceRecord) -> Result<()>;
    fn summary(&self) -> LedgerSummary;
}

#[derive(Default)]
pub struct InMemoryTradeStore {
    trades: Mutex<HashMap<String, Trade>>,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeStore for InMemoryTradeStore {
    fn insert_trade(&self, trade: &Trade) -> Result<()> {
        self.trades.lock().insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    fn update_trade_status(&self, trade_id: &str, status: TradeStatus) -> Result<()> {
        if let Some(trade) = self.trades.lock().get_mut(trade_id) {
            trade.transition(status);
        }
        Ok(())
    }

    fn get_trade(&self, trade_id: &str) -> Result<Option<Trade>> {
        Ok(self.trades.lock().get(trade_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<Vec<PerformanceRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PerformanceRecord> {
        self.records.lock().clone()
    }
}

impl PerformanceLedger for InMemoryLedger {
    fn append(&self, record: PerformanceRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    fn summary(&self) -> LedgerSummary {
        let records = self.records.lock();
        let trades = records.len();
        let wins = records.iter().filter(|r| r.won).count();
        let net_profit = records.iter().map(|r| r.profit).sum();
        LedgerSummary {
            trades,
            wins,
            losses: trades - wins,
            win_rate: if trades > 0 {
                wins as f64 / trades as f64
            } else {
                0.0
            },
            net_profit,
        }
    }
}
