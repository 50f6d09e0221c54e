//! Trades and the RISE/FALL ↔ CALL/PUT boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade in the engine's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Rise,
    Fall,
}

impl Side {
    /// Map to the broker's contract vocabulary. Used only when building
    /// buy frames; nothing else in the engine speaks CALL/PUT.
    pub fn to_contract_type(self) -> ContractType {
        match self {
            Side::Rise => ContractType::Call,
            Side::Fall => ContractType::Put,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Rise => Side::Fall,
            Side::Fall => Side::Rise,
        }
    }

    /// Parse a loosely-formatted side string as brokers and strategies
    /// emit them ("RISE", "rise", "CALL", "PUT").
    pub fn parse(s: &str) -> Option<Side> {
        match s.to_ascii_uppercase().as_str() {
            "RISE" | "CALL" => Some(Side::Rise),
            "FALL" | "PUT" => Some(Side::Fall),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Rise => write!(f, "RISE"),
            Side::Fall => write!(f, "FALL"),
        }
    }
}

/// Broker-side contract vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    Call,
    Put,
}

impl ContractType {
    pub fn to_side(self) -> Side {
        match self {
            ContractType::Call => Side::Rise,
            ContractType::Put => Side::Fall,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractType::Call => "CALL",
            ContractType::Put => "PUT",
        }
    }
}

/// Lifecycle status of a logical trade.
///
/// Transitions are monotonic: once a trade reaches a terminal status it
/// never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Active,
    Won,
    Lost,
    Rejected,
    Error,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Won | TradeStatus::Lost | TradeStatus::Rejected | TradeStatus::Error
        )
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Active => "ACTIVE",
            TradeStatus::Won => "WON",
            TradeStatus::Lost => "LOST",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// A logical trade intent and its broker-side progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub stake: Decimal,
    pub duration: u32,
    pub duration_unit: String,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        stake: Decimal,
        duration: u32,
        duration_unit: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            stake,
            duration,
            duration_unit: duration_unit.into(),
            status: TradeStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Apply a status transition, refusing to leave a terminal state.
    pub fn transition(&mut self, next: TradeStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_round_trips_through_contract_vocabulary() {
        assert_eq!(Side::Rise.to_contract_type().to_side(), Side::Rise);
        assert_eq!(Side::Fall.to_contract_type().to_side(), Side::Fall);
        assert_eq!(Side::Rise.to_contract_type().as_str(), "CALL");
        assert_eq!(Side::parse("put"), Some(Side::Fall));
        assert_eq!(Side::parse("sideways"), None);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut trade = Trade::new("R_100", Side::Rise, dec!(1), 5, "t");
        assert!(trade.transition(TradeStatus::Active));
        assert!(trade.transition(TradeStatus::Won));
        assert!(!trade.transition(TradeStatus::Lost));
        assert_eq!(trade.status, TradeStatus::Won);
    }
}
