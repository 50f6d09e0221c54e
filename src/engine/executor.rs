//! Trade submission and settlement.
//!
//! The executor is the only place where the engine's RISE/FALL
//! vocabulary is translated into the broker's CALL/PUT. It pairs buy
//! acknowledgements with pending trades oldest-first (the engine runs
//! one trade in flight, so the queue is almost always length one),
//! tracks each contract's update stream, and on settlement fans the
//! realized outcome out to the store, the risk manager, the classifier
//! and the performance ledger exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::{Decision, Position, PositionStatus, Trade, TradeStatus};
use crate::engine::consensus::SignalConsensus;
use crate::engine::positions::PositionManager;
use crate::engine::risk::RiskManager;
use crate::error::{ExecutionError, ProtocolError, Result};
use crate::protocol::messages::{BuyRequest, ContractUpdate, Frame};
use crate::protocol::{FrameListener, ProtocolClient};
use crate::store::{PerformanceLedger, PerformanceRecord, TradeStore};

/// Pending trades older than this are written off as errored.
const PENDING_EXPIRY_SECS: i64 = 60;

struct PendingTrade {
    trade: Trade,
    decision: Option<Decision>,
    features: Vec<f64>,
    submitted_at: DateTime<Utc>,
}

/// Decision context kept per open contract for settlement feedback.
struct ContractMeta {
    symbol: String,
    decision: Option<Decision>,
    features: Vec<f64>,
}

#[derive(Default)]
struct ExecState {
    /// Trades sent to the broker, awaiting their buy acknowledgement.
    awaiting: VecDeque<PendingTrade>,
    /// Keyed by primary contract id.
    meta: HashMap<String, ContractMeta>,
}

pub struct OrderExecutor {
    client: ProtocolClient,
    positions: Arc<PositionManager>,
    risk: Arc<RiskManager>,
    consensus: Arc<SignalConsensus>,
    store: Arc<dyn TradeStore>,
    ledger: Arc<dyn PerformanceLedger>,
    currency: String,
    state: Mutex<ExecState>,
}

impl OrderExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: ProtocolClient,
        positions: Arc<PositionManager>,
        risk: Arc<RiskManager>,
        consensus: Arc<SignalConsensus>,
        store: Arc<dyn TradeStore>,
        ledger: Arc<dyn PerformanceLedger>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            client,
            positions,
            risk,
            consensus,
            store,
            ledger,
            currency: currency.into(),
            state: Mutex::new(ExecState::default()),
        }
    }

    /// Submit one trade. The trade is queued before the frame goes out
    /// so the acknowledgement can never race past it; a transport error
    /// rolls the queue entry back and marks the trade errored.
    ///
    /// Submission is fire-and-forget: the acknowledgement arrives on
    /// the reader task and is paired by [`FrameListener::on_frame`], so
    /// this may safely be called from inside frame dispatch without
    /// stalling the reader.
    pub async fn place_trade(
        &self,
        trade: Trade,
        decision: Option<Decision>,
        features: Vec<f64>,
    ) -> Result<()> {
        if let Err(e) = self.store.insert_trade(&trade) {
            error!(trade_id = %trade.id, error = %e, "failed to persist new trade");
        }

        let request = BuyRequest::new(
            trade.symbol.clone(),
            trade.stake,
            trade.side.to_contract_type(),
            self.currency.clone(),
            trade.duration,
            trade.duration_unit.clone(),
        );

        let trade_id = trade.id.clone();
        self.state.lock().awaiting.push_back(PendingTrade {
            trade,
            decision,
            features,
            submitted_at: Utc::now(),
        });

        if let Err(e) = self.client.send(&request).await {
            let removed = {
                let mut state = self.state.lock();
                state
                    .awaiting
                    .iter()
                    .position(|p| p.trade.id == trade_id)
                    .and_then(|idx| state.awaiting.remove(idx))
            };
            if removed.is_some() {
                self.persist_status(&trade_id, TradeStatus::Error);
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().awaiting.len()
    }

    async fn handle_buy_frame(&self, frame: &Frame) {
        if let Some(error) = &frame.error {
            if frame.buy.is_none() {
                let rejected = self.state.lock().awaiting.pop_front();
                if let Some(mut pending) = rejected {
                    warn!(
                        trade_id = %pending.trade.id,
                        "{}",
                        ProtocolError::BuyRejected {
                            code: error.code().to_string(),
                            message: error.message().to_string(),
                        }
                    );
                    pending.trade.transition(TradeStatus::Rejected);
                    self.persist_status(&pending.trade.id, TradeStatus::Rejected);
                }
                return;
            }
        }

        let Some(ack) = &frame.buy else { return };
        let Some(contract_id) = &ack.contract_id else {
            warn!("buy acknowledgement without a contract id");
            return;
        };

        let pending = self.state.lock().awaiting.pop_front();
        let Some(mut pending) = pending else {
            debug!(contract_id = %contract_id, "unmatched buy acknowledgement");
            return;
        };

        pending.trade.transition(TradeStatus::Active);
        self.persist_status(&pending.trade.id, TradeStatus::Active);

        let position = Position::new(
            pending.trade.id.clone(),
            contract_id.clone(),
            pending.trade.side,
            pending.trade.stake,
            None,
        );
        if !self.positions.add_position(position) {
            return;
        }
        self.state.lock().meta.insert(
            contract_id.clone(),
            ContractMeta {
                symbol: pending.trade.symbol.clone(),
                decision: pending.decision,
                features: pending.features,
            },
        );
        self.risk.record_trade_placed();
        info!(
            trade_id = %pending.trade.id,
            contract_id = %contract_id,
            side = %pending.trade.side,
            stake = %pending.trade.stake,
            "trade active"
        );

        if let Err(e) = self.client.subscribe_contract(contract_id).await {
            // The stream will still be picked up after reconnect; the
            // expiry-time fallback covers a missed subscription.
            warn!(contract_id = %contract_id, error = %e, "contract subscription failed");
        }
    }

    async fn handle_contract_update(&self, update: &ContractUpdate) {
        let Some(identifier) = update.contract_id.as_deref().or(update.id.as_deref()) else {
            return;
        };

        if self.positions.is_cleaned(identifier)
            || update
                .id
                .as_deref()
                .is_some_and(|id| self.positions.is_cleaned(id))
        {
            debug!(identifier, "update for settled contract, ignoring");
            return;
        }

        // Backfill the stream id as an alias the first time it appears.
        if let (Some(primary), Some(secondary)) =
            (update.contract_id.as_deref(), update.id.as_deref())
        {
            if primary != secondary {
                self.positions.update_secondary_id(primary, secondary);
            }
        }

        let Some(position) = self.positions.get_position(identifier) else {
            debug!(
                identifier,
                "{}",
                ExecutionError::UnknownContract {
                    identifier: identifier.to_string()
                }
            );
            return;
        };

        if !update.has_settlement_fields() {
            warn!(
                identifier,
                "{}",
                ExecutionError::SettlementAmbiguous {
                    identifier: identifier.to_string()
                }
            );
            return;
        }
        if !Self::is_settled(update) {
            return;
        }

        let payout = update.best_payout();
        let profit = update
            .profit
            .unwrap_or_else(|| payout.unwrap_or(Decimal::ZERO) - position.stake);
        let won = profit > Decimal::ZERO;
        let status = if won {
            PositionStatus::Won
        } else {
            PositionStatus::Lost
        };

        // Claiming the position here is what makes settlement
        // exactly-once; late duplicates fail the cleaned check above or
        // resolve to nothing.
        let Some(position) = self.positions.mark_closed(identifier, status, payout) else {
            return;
        };

        info!(
            contract_id = %position.contract_id,
            trade_id = %position.trade_id,
            %profit,
            won,
            "contract settled"
        );

        let meta = self.state.lock().meta.remove(&position.contract_id);

        let trade_status = if won { TradeStatus::Won } else { TradeStatus::Lost };
        self.persist_status(&position.trade_id, trade_status);

        // The settlement frame's own balance is the freshest reading;
        // the client cache is only updated after listener fan-out.
        let balance = update.balance_after.or_else(|| self.client.balance());
        self.risk
            .update_trade_outcome(won, position.stake, profit, balance);

        if let Some(meta) = &meta {
            if !meta.features.is_empty() {
                // Train on the side that actually paid out.
                let realized = if won {
                    position.side
                } else {
                    position.side.opposite()
                };
                self.consensus
                    .add_training_sample(meta.features.clone(), realized);
            }
        }

        let record = PerformanceRecord {
            trade_id: position.trade_id.clone(),
            symbol: meta.as_ref().map(|m| m.symbol.clone()).unwrap_or_default(),
            side: position.side,
            stake: position.stake,
            payout,
            profit,
            won,
            method: meta.as_ref().and_then(|m| m.decision.as_ref()).map(|d| d.method),
            settled_at: Utc::now(),
        };
        if let Err(e) = self.ledger.append(record) {
            error!(trade_id = %position.trade_id, error = %e, "failed to append ledger record");
        }
    }

    /// A contract is settled when any of the broker's signals says so.
    fn is_settled(update: &ContractUpdate) -> bool {
        if update.is_sold == Some(true) || update.is_expired == Some(true) {
            return true;
        }
        if let Some(status) = update.status.as_deref() {
            if matches!(status, "sold" | "won" | "lost") {
                return true;
            }
        }
        if let Some(expiry) = update.date_expiry {
            if Utc::now().timestamp() >= expiry {
                return true;
            }
        }
        false
    }

    fn persist_status(&self, trade_id: &str, status: TradeStatus) {
        if let Err(e) = self.store.update_trade_status(trade_id, status) {
            error!(trade_id, error = %e, "failed to persist trade status");
        }
    }

    /// Drop pending trades the broker never acknowledged.
    fn expire_stale_pending(&self) {
        let cutoff = Utc::now() - ChronoDuration::seconds(PENDING_EXPIRY_SECS);
        let expired: Vec<String> = {
            let mut state = self.state.lock();
            let mut ids = Vec::new();
            state.awaiting.retain(|p| {
                if p.submitted_at < cutoff {
                    ids.push(p.trade.id.clone());
                    false
                } else {
                    true
                }
            });
            ids
        };
        for trade_id in expired {
            warn!(trade_id = %trade_id, "pending trade expired without acknowledgement");
            self.persist_status(&trade_id, TradeStatus::Error);
        }
    }
}

#[async_trait]
impl FrameListener for OrderExecutor {
    async fn on_frame(&self, frame: &Frame) -> Result<()> {
        if frame.buy.is_some()
            || (frame.error.is_some() && frame.msg_type.as_deref() == Some("buy"))
        {
            self.handle_buy_frame(frame).await;
        }
        if let Some(update) = &frame.proposal_open_contract {
            self.handle_contract_update(update).await;
        }
        if let Some(update) = &frame.sell {
            self.handle_contract_update(update).await;
        }
        if frame.tick.is_some() {
            self.expire_stale_pending();
        }
        Ok(())
    }
}
