//! Engine wiring and the per-tick control flow.
//!
//! One `Engine` value owns every component; nothing in the crate is a
//! global. The tick pipeline runs on the protocol reader task via a
//! frame listener: throttle, market gate, inter-trade spacing, signal
//! collection, consensus, risk, submission.

pub mod analyzer;
pub mod consensus;
pub mod executor;
pub mod positions;
pub mod risk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{Tick, Trade};
use crate::engine::analyzer::MarketAnalyzer;
use crate::engine::consensus::{extract_features, NearestCentroidClassifier, SignalConsensus};
use crate::engine::executor::OrderExecutor;
use crate::engine::positions::PositionManager;
use crate::engine::risk::{Admission, RiskManager};
use crate::error::{ConfigError, ProtocolError, Result};
use crate::protocol::client::AUTH_TIMEOUT_SECS;
use crate::protocol::{Frame, FrameListener, ProtocolClient};
use crate::store::{InMemoryLedger, InMemoryTradeStore, PerformanceLedger, TradeStore};
use crate::strategy::{default_strategies, Strategy};

/// How often the maintenance task logs a status line.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

struct EngineInner {
    config: Config,
    client: ProtocolClient,
    positions: Arc<PositionManager>,
    risk: Arc<RiskManager>,
    consensus: Arc<SignalConsensus>,
    executor: Arc<OrderExecutor>,
    analyzer: MarketAnalyzer,
    strategies: Mutex<Vec<Box<dyn Strategy>>>,
    running: AtomicBool,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
    last_trade_at: Mutex<Option<DateTime<Utc>>>,
    session_open: Mutex<Option<f64>>,
}

pub struct Engine {
    inner: Arc<EngineInner>,
    tick_listener_id: Mutex<Option<u64>>,
    status_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryTradeStore::new()),
            Arc::new(InMemoryLedger::new()),
        )
    }

    pub fn with_stores(
        config: Config,
        store: Arc<dyn TradeStore>,
        ledger: Arc<dyn PerformanceLedger>,
    ) -> Self {
        let client = ProtocolClient::new(config.connection.ws_url.clone());
        let positions = Arc::new(PositionManager::new());
        let risk = Arc::new(RiskManager::new(
            config.risk.clone(),
            config.recovery.clone(),
            config.trading.base_stake,
        ));
        let consensus = Arc::new(SignalConsensus::new(
            config.consensus.clone(),
            Box::new(NearestCentroidClassifier::new()),
        ));
        let executor = Arc::new(OrderExecutor::new(
            client.clone(),
            positions.clone(),
            risk.clone(),
            consensus.clone(),
            store,
            ledger,
            config.connection.currency.clone(),
        ));

        Self {
            inner: Arc::new(EngineInner {
                client,
                positions,
                risk,
                consensus,
                executor,
                analyzer: MarketAnalyzer::new(),
                strategies: Mutex::new(default_strategies()),
                running: AtomicBool::new(false),
                last_tick_at: Mutex::new(None),
                last_trade_at: Mutex::new(None),
                session_open: Mutex::new(None),
                config,
            }),
            tick_listener_id: Mutex::new(None),
            status_task: Mutex::new(None),
        }
    }

    /// Connect, authorize and begin trading.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let token = inner
            .config
            .connection
            .api_token
            .clone()
            .ok_or(ConfigError::MissingField {
                field: "connection.api_token",
            })?;

        inner.client.connect().await?;
        if !inner.client.authorize(&token).await? {
            return Err(ProtocolError::AuthorizationTimeout {
                timeout_secs: AUTH_TIMEOUT_SECS,
            }
            .into());
        }

        match inner.client.balance() {
            Some(balance) => inner.risk.start_session(balance),
            None => warn!("no balance on authorize, session baseline deferred"),
        }

        inner
            .client
            .add_listener(inner.executor.clone() as Arc<dyn FrameListener>);
        let tick_id = inner.client.add_listener(Arc::new(TickListener {
            engine: Arc::clone(inner),
        }));
        *self.tick_listener_id.lock() = Some(tick_id);

        inner
            .client
            .subscribe_ticks(&inner.config.connection.symbol)
            .await?;
        inner.running.store(true, Ordering::Release);

        let status_inner = Arc::clone(inner);
        *self.status_task.lock() = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(STATUS_INTERVAL).await;
                let metrics = status_inner.risk.metrics();
                info!(
                    state = %metrics.state,
                    streak = metrics.recovery_streak,
                    daily_loss = %metrics.daily_loss,
                    daily_profit = %metrics.daily_profit,
                    open = status_inner.positions.get_open_count(),
                    "engine status"
                );
            }
        }));

        info!(symbol = %inner.config.connection.symbol, "engine started");
        Ok(())
    }

    /// Stop trading. The tick listener comes off before the running
    /// flag clears so no tick observes a half-stopped engine.
    pub async fn shutdown(&self) {
        if let Some(id) = self.tick_listener_id.lock().take() {
            self.inner.client.remove_listener(id);
        }
        self.inner.running.store(false, Ordering::Release);

        let task = self.status_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        self.inner.client.close().await;
        info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl EngineInner {
    async fn on_tick(&self, tick: &Tick) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        if tick.symbol != self.config.connection.symbol {
            return;
        }

        let now = Utc::now();
        {
            let mut last = self.last_tick_at.lock();
            if !interval_elapsed(*last, self.config.trading.tick_throttle_secs, now) {
                return;
            }
            *last = Some(now);
        }

        let session_open = {
            let mut open = self.session_open.lock();
            *open.get_or_insert(tick.quote)
        };

        let assessment = self.analyzer.observe(tick.quote);

        // Strategies always see the tick so their history keeps moving,
        // even when the market gate or trade spacing stops us trading.
        let signals: Vec<_> = {
            let mut strategies = self.strategies.lock();
            strategies
                .iter_mut()
                .filter_map(|s| s.on_tick(tick))
                .collect()
        };

        if !assessment.tradable {
            debug!(regime = %assessment.regime, reason = assessment.reason, "market gate closed");
            return;
        }
        if !interval_elapsed(
            *self.last_trade_at.lock(),
            self.config.trading.min_trade_interval_secs,
            now,
        ) {
            return;
        }
        if signals.is_empty() {
            return;
        }

        let Some(decision) =
            self.consensus
                .evaluate(&signals, assessment.regime, tick.quote, session_open)
        else {
            return;
        };

        let Some(balance) = self.client.balance() else {
            warn!("no balance available, skipping trade");
            return;
        };
        let stake = self.risk.get_next_trade_amount(balance);
        if stake.is_zero() {
            return;
        }
        match self.risk.allow_trade(self.positions.get_open_count(), balance) {
            Admission::Allowed => {}
            Admission::Blocked(reason) => {
                info!(%reason, "trade blocked");
                return;
            }
        }

        let features = extract_features(&decision.signals, tick.quote, session_open);
        let trade = Trade::new(
            tick.symbol.clone(),
            decision.side,
            stake,
            self.config.trading.duration,
            self.config.trading.duration_unit.clone(),
        );
        info!(
            trade_id = %trade.id,
            side = %decision.side,
            score = decision.score,
            method = ?decision.method,
            %stake,
            "placing trade"
        );
        *self.last_trade_at.lock() = Some(now);
        if let Err(e) = self
            .executor
            .place_trade(trade, Some(decision), features)
            .await
        {
            warn!(error = %e, "trade submission failed");
        }
    }
}

struct TickListener {
    engine: Arc<EngineInner>,
}

#[async_trait]
impl FrameListener for TickListener {
    async fn on_frame(&self, frame: &Frame) -> Result<()> {
        if let Some(tick) = &frame.tick {
            if let (Some(symbol), Some(quote), Some(epoch)) =
                (tick.symbol.clone(), tick.quote, tick.epoch)
            {
                self.engine
                    .on_tick(&Tick {
                        symbol,
                        quote,
                        epoch,
                    })
                    .await;
            }
        }
        Ok(())
    }
}

fn interval_elapsed(last: Option<DateTime<Utc>>, interval_secs: u64, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(last) => (now - last).num_seconds() >= interval_secs as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn tick(quote: f64, epoch: i64) -> Tick {
        Tick {
            symbol: "R_100".into(),
            quote,
            epoch,
        }
    }

    #[test]
    fn interval_elapsed_boundaries() {
        let now = Utc::now();
        assert!(interval_elapsed(None, 30, now));
        assert!(!interval_elapsed(Some(now - ChronoDuration::seconds(29)), 30, now));
        assert!(interval_elapsed(Some(now - ChronoDuration::seconds(30)), 30, now));
    }

    #[tokio::test]
    async fn stopped_engine_ignores_ticks() {
        let engine = Engine::new(Config::default());
        engine.inner.on_tick(&tick(100.0, 1)).await;
        assert_eq!(engine.inner.analyzer.metrics().samples, 0);
    }

    #[tokio::test]
    async fn tick_pipeline_runs_without_balance() {
        // Zero throttle so every tick lands in the analyzer.
        let mut config = Config::default();
        config.trading.tick_throttle_secs = 0;
        let engine = Engine::new(config);
        engine.inner.running.store(true, Ordering::Release);

        for i in 0..30 {
            engine.inner.on_tick(&tick(100.0 + i as f64 * 0.01, i)).await;
        }
        // No balance was ever cached, so nothing can have been staked.
        assert_eq!(engine.inner.positions.get_open_count(), 0);
        assert_eq!(engine.inner.analyzer.metrics().samples, 30);
    }

    #[tokio::test]
    async fn foreign_symbol_is_ignored() {
        let mut config = Config::default();
        config.trading.tick_throttle_secs = 0;
        let engine = Engine::new(config);
        engine.inner.running.store(true, Ordering::Release);
        engine
            .inner
            .on_tick(&Tick {
                symbol: "R_50".into(),
                quote: 100.0,
                epoch: 1,
            })
            .await;
        assert_eq!(engine.inner.analyzer.metrics().samples, 0);
    }
}
