//! Broker-side open contracts correlated to logical trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::trade::Side;

/// Status of a broker-side contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Active,
    Won,
    Lost,
}

/// One open contract at the broker, keyed by its contract id.
///
/// Some brokers assign a second identifier once the update stream for the
/// contract starts; `secondary_id` records it so either id resolves here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub contract_id: String,
    pub secondary_id: Option<String>,
    pub side: Side,
    pub stake: Decimal,
    pub opened_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    pub payout: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(
        trade_id: impl Into<String>,
        contract_id: impl Into<String>,
        side: Side,
        stake: Decimal,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            trade_id: trade_id.into(),
            contract_id: contract_id.into(),
            secondary_id: None,
            side,
            stake,
            opened_at: Utc::now(),
            expires_at,
            status: PositionStatus::Active,
            payout: None,
            closed_at: None,
        }
    }
}
