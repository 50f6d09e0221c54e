//! Broker wire frames.
//!
//! Outbound requests are strictly typed. Inbound frames are deliberately
//! permissive: every key is optional and numeric fields accept either
//! JSON numbers or strings, because real broker payloads vary between
//! firmware versions and between the `buy`, `proposal_open_contract` and
//! `sell` shapes of the same contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::domain::ContractType;

// ---------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AuthorizeRequest {
    pub authorize: String,
}

#[derive(Debug, Serialize)]
pub struct TicksRequest {
    pub ticks: String,
    pub subscribe: u8,
}

impl TicksRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            ticks: symbol.into(),
            subscribe: 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BuyRequest {
    pub buy: u8,
    /// Maximum price; formatted with two decimals as the broker expects.
    pub price: String,
    pub parameters: BuyParameters,
}

#[derive(Debug, Serialize)]
pub struct BuyParameters {
    pub amount: Decimal,
    pub basis: &'static str,
    pub contract_type: &'static str,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: String,
    pub symbol: String,
}

impl BuyRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        amount: Decimal,
        contract_type: ContractType,
        currency: impl Into<String>,
        duration: u32,
        duration_unit: impl Into<String>,
    ) -> Self {
        let amount = amount.round_dp(2);
        Self {
            buy: 1,
            price: format!("{amount:.2}"),
            parameters: BuyParameters {
                amount,
                basis: "stake",
                contract_type: contract_type.as_str(),
                currency: currency.into(),
                duration,
                duration_unit: duration_unit.into(),
                symbol: symbol.into(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenContractRequest {
    pub proposal_open_contract: u8,
    pub contract_id: Value,
    pub subscribe: u8,
}

impl OpenContractRequest {
    /// Subscribe to a contract's update stream. The broker wants numeric
    /// contract ids where it issued one, so parse back when possible.
    pub fn subscribe(contract_id: &str) -> Self {
        let contract_id = match contract_id.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(contract_id),
        };
        Self {
            proposal_open_contract: 1,
            contract_id,
            subscribe: 1,
        }
    }
}

// ---------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------

/// One inbound broker frame. Exactly which of the payload keys is set
/// depends on the request that produced it; `error` may accompany any.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub authorize: Option<AuthorizeInfo>,
    #[serde(default)]
    pub tick: Option<TickData>,
    #[serde(default)]
    pub buy: Option<BuyAck>,
    #[serde(default)]
    pub proposal: Option<Value>,
    #[serde(default)]
    pub proposal_open_contract: Option<ContractUpdate>,
    #[serde(default)]
    pub sell: Option<ContractUpdate>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeInfo {
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub loginid: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickData {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub quote: Option<f64>,
    #[serde(default)]
    pub epoch: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyAck {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub contract_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub proposal_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub payout: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub longcode: Option<String>,
}

/// A contract update as delivered on the `proposal_open_contract` or
/// `sell` streams. The settlement-relevant fields are mutually
/// inconsistent across broker payloads, which is why the executor ORs
/// across them rather than trusting any single one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractUpdate {
    /// Secondary (stream) identifier, when the broker assigns one.
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "de_opt_flag")]
    pub is_sold: Option<bool>,
    #[serde(default, deserialize_with = "de_opt_flag")]
    pub is_expired: Option<bool>,
    #[serde(default)]
    pub date_expiry: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub sell_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub bid_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub payout: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub buy_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub profit: Option<Decimal>,
    /// Post-settlement balance, present on `sell` frames.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub balance_after: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub entry_tick: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub exit_tick: Option<f64>,
}

impl ContractUpdate {
    /// The best available payout, in the broker's order of reliability.
    /// First non-null wins.
    pub fn best_payout(&self) -> Option<Decimal> {
        self.sell_price
            .or(self.bid_price)
            .or(self.payout)
            .or(self.buy_price)
    }

    /// Whether the frame carries any recognized settlement field at all.
    /// A frame with none of them cannot settle a position.
    pub fn has_settlement_fields(&self) -> bool {
        self.is_sold.is_some()
            || self.status.is_some()
            || self.is_expired.is_some()
            || self.date_expiry.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiError {
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("unknown")
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("no message")
    }
}

// ---------------------------------------------------------------------
// Forgiving deserializers
// ---------------------------------------------------------------------

fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }))
}

fn de_opt_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Decimal>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(&s).ok(),
        _ => None,
    }))
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Brokers encode booleans as true/false, 0/1 or "1".
fn de_opt_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }))
}
