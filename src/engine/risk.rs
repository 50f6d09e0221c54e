//! Position sizing and admission control.
//!
//! The manager is a four-state machine: NORMAL trading, RECOVERY after
//! losses (staircase sizing working back the outstanding deficit),
//! PANIC (timed cool-down when drawdown approaches the hard limit) and
//! LOCKED (hard drawdown or a daily limit). Every trade passes
//! `allow_trade` in a fixed gate order and gets its stake from
//! `get_next_trade_amount`; realized outcomes flow back through
//! `update_trade_outcome`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::{RecoveryConfig, RiskConfig};

/// Loss-recovery sizing staircase.
const FIB: [u32; 10] = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55];

/// Streak-scaled increment added to the balance floor per recovery step.
const FLOOR_STEP_PER_STREAK: f64 = 0.05;
/// The floor never rises above half the session-start balance.
const FLOOR_MAX_PCT: f64 = 0.5;
/// Affordability margin over the next stake.
const AFFORDABILITY_FACTOR: Decimal = Decimal::from_parts(12, 0, 0, false, 1); // 1.2

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskState {
    Normal,
    Recovery,
    Panic,
    Locked,
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskState::Normal => "NORMAL",
            RiskState::Recovery => "RECOVERY",
            RiskState::Panic => "PANIC",
            RiskState::Locked => "LOCKED",
        };
        write!(f, "{s}")
    }
}

/// Why a trade was refused admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Locked,
    PanicCooldown,
    RecoveryExhausted,
    HourlyLimit,
    OpenPositionCap,
    BalanceFloor,
    DailyLossLimit,
    DailyProfitTarget,
    LossCooldown,
    WinPause,
    InsufficientBalance,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockReason::Locked => "engine is locked",
            BlockReason::PanicCooldown => "panic cool-down active",
            BlockReason::RecoveryExhausted => "recovery streak exhausted",
            BlockReason::HourlyLimit => "hourly trade limit reached",
            BlockReason::OpenPositionCap => "open position cap reached",
            BlockReason::BalanceFloor => "balance below dynamic floor",
            BlockReason::DailyLossLimit => "daily loss limit reached",
            BlockReason::DailyProfitTarget => "daily profit target reached",
            BlockReason::LossCooldown => "loss-streak cool-down active",
            BlockReason::WinPause => "win-streak pause active",
            BlockReason::InsufficientBalance => "balance cannot afford the next stake",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Blocked(BlockReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Point-in-time view of the risk state, for logs and dashboards.
#[derive(Debug, Clone)]
pub struct RiskMetrics {
    pub state: RiskState,
    pub recovery_streak: u32,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub outstanding_losses: Decimal,
    pub next_trade_amount: Decimal,
    pub daily_loss: Decimal,
    pub daily_profit: Decimal,
    pub drawdown_pct: f64,
}

struct Inner {
    state: RiskState,
    recovery_streak: u32,
    consecutive_losses: u32,
    consecutive_wins: u32,
    outstanding_losses: Decimal,
    next_trade_amount: Decimal,
    daily_loss: Decimal,
    daily_profit: Decimal,
    session_start_balance: Option<Decimal>,
    peak_balance: Decimal,
    current_balance: Decimal,
    /// Hard-drawdown lock: only `manual_unlock` clears it.
    manual_lock: bool,
    locked_until: Option<DateTime<Utc>>,
    panic_until: Option<DateTime<Utc>>,
    loss_cooldown_until: Option<DateTime<Utc>>,
    win_pause_until: Option<DateTime<Utc>>,
    trade_times: Vec<DateTime<Utc>>,
}

pub struct RiskManager {
    risk: RiskConfig,
    recovery: RecoveryConfig,
    base_stake: Decimal,
    payout_ratio: Decimal,
    martingale_multiplier: Decimal,
    inner: Mutex<Inner>,
}

impl RiskManager {
    pub fn new(risk: RiskConfig, recovery: RecoveryConfig, base_stake: Decimal) -> Self {
        let payout_ratio = Decimal::from_f64_retain(recovery.payout_ratio)
            .filter(|d| *d > Decimal::ZERO)
            .unwrap_or_else(|| Decimal::new(82, 2));
        let martingale_multiplier = recovery.martingale_multiplier.max(Decimal::ONE);
        Self {
            base_stake,
            payout_ratio,
            martingale_multiplier,
            inner: Mutex::new(Inner {
                state: RiskState::Normal,
                recovery_streak: 0,
                consecutive_losses: 0,
                consecutive_wins: 0,
                outstanding_losses: Decimal::ZERO,
                next_trade_amount: base_stake,
                daily_loss: Decimal::ZERO,
                daily_profit: Decimal::ZERO,
                session_start_balance: None,
                peak_balance: Decimal::ZERO,
                current_balance: Decimal::ZERO,
                manual_lock: false,
                locked_until: None,
                panic_until: None,
                loss_cooldown_until: None,
                win_pause_until: None,
                trade_times: Vec::new(),
            }),
            risk,
            recovery,
        }
    }

    /// Fix the session baseline. Daily counters and drawdown tracking
    /// start from here.
    pub fn start_session(&self, balance: Decimal) {
        let mut inner = self.inner.lock();
        inner.session_start_balance = Some(balance);
        inner.peak_balance = balance;
        inner.current_balance = balance;
        inner.daily_loss = Decimal::ZERO;
        inner.daily_profit = Decimal::ZERO;
        inner.trade_times.clear();
        info!(%balance, "risk session started");
    }

    pub fn state(&self) -> RiskState {
        self.inner.lock().state
    }

    /// Size the next trade. Zero means the recovery staircase ran out
    /// and the engine is now in PANIC.
    pub fn get_next_trade_amount(&self, balance: Decimal) -> Decimal {
        let mut inner = self.inner.lock();

        if !self.recovery.enabled || inner.recovery_streak == 0 {
            inner.next_trade_amount = self.base_stake;
            return self.base_stake;
        }

        if inner.recovery_streak > self.recovery.max_recovery_streak {
            warn!(
                streak = inner.recovery_streak,
                "recovery streak exhausted, entering panic"
            );
            self.enter_panic(&mut inner);
            inner.next_trade_amount = Decimal::ZERO;
            return Decimal::ZERO;
        }

        let idx = ((inner.recovery_streak - 1) as usize).min(FIB.len() - 1);
        let mut hybrid = self.base_stake * Decimal::from(FIB[idx]);
        if inner.recovery_streak >= self.recovery.martingale_after_streak {
            hybrid *= self.martingale_multiplier;
        }

        let target = inner.outstanding_losses / self.payout_ratio;
        let raw = hybrid.max(target);

        let cap_multiplier = self.base_stake * self.recovery.max_multiplier;
        let cap_balance = balance * self.recovery.max_recovery_pct;
        let amount = raw.min(cap_multiplier).min(cap_balance).round_dp(2);

        inner.next_trade_amount = amount;
        amount
    }

    /// Admission gates, checked in a fixed order so the reported reason
    /// is deterministic.
    pub fn allow_trade(&self, open_positions: usize, balance: Decimal) -> Admission {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        // Gate 1: locks and panic.
        if inner.state == RiskState::Locked {
            if inner.manual_lock {
                return Admission::Blocked(BlockReason::Locked);
            }
            match inner.locked_until {
                Some(until) if now < until => return Admission::Blocked(BlockReason::Locked),
                _ => {
                    info!("lock expired, resuming");
                    inner.locked_until = None;
                    inner.daily_loss = Decimal::ZERO;
                    inner.daily_profit = Decimal::ZERO;
                    inner.state = if inner.recovery_streak > 0 {
                        RiskState::Recovery
                    } else {
                        RiskState::Normal
                    };
                }
            }
        }
        if inner.state == RiskState::Panic {
            match inner.panic_until {
                Some(until) if now < until => {
                    return Admission::Blocked(BlockReason::PanicCooldown)
                }
                _ => {
                    info!("panic cool-down over");
                    inner.panic_until = None;
                    inner.state = if inner.recovery_streak > 0 {
                        RiskState::Recovery
                    } else {
                        RiskState::Normal
                    };
                }
            }
        }

        // Gate 2: recovery limits. Only the streak cap refuses
        // admission here; the multiplier and balance-percent stake caps
        // are enforced by `get_next_trade_amount` clamping the amount
        // instead, so an over-sized staircase step trades smaller
        // rather than not at all.
        if inner.state == RiskState::Recovery
            && inner.recovery_streak > self.recovery.max_recovery_streak
        {
            self.enter_panic(&mut inner);
            return Admission::Blocked(BlockReason::RecoveryExhausted);
        }

        // Gate 3: hourly rate limit. Recovery trades are exempt; the
        // staircase must be allowed to finish what it started.
        let hour_ago = now - ChronoDuration::hours(1);
        inner.trade_times.retain(|t| *t > hour_ago);
        if inner.state != RiskState::Recovery
            && inner.trade_times.len() >= self.risk.max_trades_per_hour as usize
        {
            return Admission::Blocked(BlockReason::HourlyLimit);
        }

        // Gate 4: open position cap.
        if open_positions >= self.risk.max_open_positions {
            return Admission::Blocked(BlockReason::OpenPositionCap);
        }

        // Gate 5: dynamic balance floor, scaled up while in recovery.
        if let Some(session_start) = inner.session_start_balance {
            let floor_pct = (self.risk.balance_floor_pct
                + FLOOR_STEP_PER_STREAK * inner.recovery_streak as f64)
                .min(FLOOR_MAX_PCT);
            let floor = session_start
                * Decimal::from_f64_retain(floor_pct).unwrap_or(Decimal::ZERO);
            if balance < floor {
                return Admission::Blocked(BlockReason::BalanceFloor);
            }
        }

        // Gate 6: daily limits against the session-start balance,
        // converting into an auto-expiring lock.
        if let Some((loss_limit, profit_limit)) = self.daily_limits(&inner) {
            if inner.daily_loss >= loss_limit {
                self.enter_lock(&mut inner, now);
                return Admission::Blocked(BlockReason::DailyLossLimit);
            }
            if inner.daily_profit >= profit_limit {
                self.enter_lock(&mut inner, now);
                return Admission::Blocked(BlockReason::DailyProfitTarget);
            }
        }

        // Gate 7: streak cool-downs.
        if matches!(inner.loss_cooldown_until, Some(until) if now < until) {
            return Admission::Blocked(BlockReason::LossCooldown);
        }
        if matches!(inner.win_pause_until, Some(until) if now < until) {
            return Admission::Blocked(BlockReason::WinPause);
        }

        // Gate 8: affordability.
        if balance < inner.next_trade_amount * AFFORDABILITY_FACTOR {
            return Admission::Blocked(BlockReason::InsufficientBalance);
        }

        Admission::Allowed
    }

    /// Record that a trade was actually submitted, for the hourly gate.
    pub fn record_trade_placed(&self) {
        self.inner.lock().trade_times.push(Utc::now());
    }

    /// Apply one settled outcome and re-evaluate drawdown and daily
    /// limits against the post-settlement balance. `None` means the
    /// balance is unknown right now; streak bookkeeping still applies
    /// but the drawdown gates keep their last reading.
    pub fn update_trade_outcome(
        &self,
        won: bool,
        stake: Decimal,
        profit: Decimal,
        balance: Option<Decimal>,
    ) {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        if let Some(balance) = balance {
            inner.current_balance = balance;
            if balance > inner.peak_balance {
                inner.peak_balance = balance;
            }
        }

        if won {
            inner.consecutive_wins += 1;
            inner.consecutive_losses = 0;
            inner.daily_profit += profit.max(Decimal::ZERO);
            inner.outstanding_losses =
                (inner.outstanding_losses - profit.max(Decimal::ZERO)).max(Decimal::ZERO);

            // Each win retires two steps of the staircase.
            inner.recovery_streak = inner.recovery_streak.saturating_sub(2);
            if inner.recovery_streak == 0 {
                inner.outstanding_losses = Decimal::ZERO;
                inner.next_trade_amount = self.base_stake;
                if inner.state == RiskState::Recovery {
                    info!("recovery complete");
                    inner.state = RiskState::Normal;
                }
            }

            if self.risk.win_streak_pause_after > 0
                && inner.consecutive_wins >= self.risk.win_streak_pause_after
            {
                inner.win_pause_until =
                    Some(now + ChronoDuration::seconds(self.risk.win_pause_secs as i64));
                inner.consecutive_wins = 0;
            }
        } else {
            inner.consecutive_losses += 1;
            inner.consecutive_wins = 0;
            inner.daily_loss += stake;
            inner.outstanding_losses += stake;

            if self.recovery.enabled
                && matches!(inner.state, RiskState::Normal | RiskState::Recovery)
            {
                inner.recovery_streak += 1;
                inner.state = RiskState::Recovery;
            }

            if inner.consecutive_losses >= self.risk.max_consecutive_losses {
                inner.loss_cooldown_until =
                    Some(now + ChronoDuration::seconds(self.risk.loss_cooldown_secs as i64));
                warn!(
                    losses = inner.consecutive_losses,
                    "loss streak cool-down engaged"
                );
            }
        }

        if let Some(balance) = balance {
            self.evaluate_drawdown(&mut inner, balance);
        }

        if let Some((loss_limit, profit_limit)) = self.daily_limits(&inner) {
            if inner.daily_loss >= loss_limit || inner.daily_profit >= profit_limit {
                self.enter_lock(&mut inner, now);
            }
        }
    }

    /// Daily limits in currency terms, derived from the configured
    /// fractions of the session-start balance. `None` until a session
    /// baseline exists.
    fn daily_limits(&self, inner: &Inner) -> Option<(Decimal, Decimal)> {
        let start = inner.session_start_balance?;
        let loss = Decimal::from_f64_retain(self.risk.daily_loss_limit_pct)?;
        let profit = Decimal::from_f64_retain(self.risk.daily_profit_limit_pct)?;
        Some((start * loss, start * profit))
    }

    /// Clear a hard lock. The only exit from a hard-drawdown LOCKED.
    pub fn manual_unlock(&self) {
        let mut inner = self.inner.lock();
        inner.manual_lock = false;
        inner.locked_until = None;
        inner.daily_loss = Decimal::ZERO;
        inner.daily_profit = Decimal::ZERO;
        inner.state = if inner.recovery_streak > 0 {
            RiskState::Recovery
        } else {
            RiskState::Normal
        };
        info!("manual unlock");
    }

    pub fn reset_streaks(&self) {
        let mut inner = self.inner.lock();
        inner.recovery_streak = 0;
        inner.consecutive_losses = 0;
        inner.consecutive_wins = 0;
        inner.outstanding_losses = Decimal::ZERO;
        inner.next_trade_amount = self.base_stake;
        if matches!(inner.state, RiskState::Recovery) {
            inner.state = RiskState::Normal;
        }
    }

    pub fn metrics(&self) -> RiskMetrics {
        let inner = self.inner.lock();
        RiskMetrics {
            state: inner.state,
            recovery_streak: inner.recovery_streak,
            consecutive_losses: inner.consecutive_losses,
            consecutive_wins: inner.consecutive_wins,
            outstanding_losses: inner.outstanding_losses,
            next_trade_amount: inner.next_trade_amount,
            daily_loss: inner.daily_loss,
            daily_profit: inner.daily_profit,
            drawdown_pct: Self::drawdown(&inner),
        }
    }

    fn drawdown(inner: &Inner) -> f64 {
        if inner.peak_balance <= Decimal::ZERO {
            return 0.0;
        }
        let current = inner.current_balance.min(inner.peak_balance);
        let dd = (inner.peak_balance - current) / inner.peak_balance;
        dd.to_f64().unwrap_or(0.0)
    }

    fn evaluate_drawdown(&self, inner: &mut Inner, balance: Decimal) {
        if inner.peak_balance <= Decimal::ZERO {
            return;
        }
        let drawdown = (inner.peak_balance - balance.min(inner.peak_balance)) / inner.peak_balance;
        let hard = Decimal::from_f64_retain(self.risk.max_drawdown_pct).unwrap_or(Decimal::ONE);
        let panic_at =
            hard * Decimal::from_f64_retain(self.risk.panic_ratio).unwrap_or(Decimal::ONE);

        if drawdown >= hard {
            warn!(%drawdown, "hard drawdown limit breached, locking");
            inner.state = RiskState::Locked;
            inner.manual_lock = true;
            inner.locked_until = None;
        } else if drawdown >= panic_at && inner.state != RiskState::Locked {
            warn!(%drawdown, "drawdown approaching limit, entering panic");
            self.enter_panic(inner);
        }
    }

    fn enter_panic(&self, inner: &mut Inner) {
        if inner.state == RiskState::Locked {
            return;
        }
        inner.state = RiskState::Panic;
        inner.panic_until =
            Some(Utc::now() + ChronoDuration::seconds(self.risk.panic_cooldown_secs as i64));
    }

    fn enter_lock(&self, inner: &mut Inner, now: DateTime<Utc>) {
        if inner.manual_lock {
            return;
        }
        inner.state = RiskState::Locked;
        inner.locked_until =
            Some(now + ChronoDuration::seconds(self.risk.lock_duration_secs as i64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), RecoveryConfig::default(), dec!(1))
    }

    #[test]
    fn base_stake_while_normal() {
        let m = manager();
        m.start_session(dec!(100));
        assert_eq!(m.get_next_trade_amount(dec!(100)), dec!(1));
        assert_eq!(m.state(), RiskState::Normal);
    }

    #[test]
    fn recovery_staircase_targets_outstanding_losses() {
        let m = manager();
        m.start_session(dec!(100));

        // First loss: recover 1.00 at a 0.82 payout ratio.
        m.update_trade_outcome(false, dec!(1), dec!(-1), Some(dec!(99)));
        assert_eq!(m.state(), RiskState::Recovery);
        assert_eq!(m.get_next_trade_amount(dec!(99)), dec!(1.22));

        // Second loss: outstanding 2.22.
        m.update_trade_outcome(false, dec!(1.22), dec!(-1.22), Some(dec!(97.78)));
        assert_eq!(m.get_next_trade_amount(dec!(97.78)), dec!(2.71));
    }

    #[test]
    fn recovery_stake_respects_both_caps() {
        let m = manager();
        m.start_session(dec!(100));
        for _ in 0..5 {
            m.update_trade_outcome(false, dec!(3), dec!(-3), Some(dec!(90)));
        }
        let amount = m.get_next_trade_amount(dec!(90));
        assert!(amount <= dec!(1) * RecoveryConfig::default().max_multiplier);
        assert!(amount <= dec!(90) * RecoveryConfig::default().max_recovery_pct);
    }

    #[test]
    fn exhausted_staircase_forces_panic_and_zero_stake() {
        let m = manager();
        m.start_session(dec!(1000));
        for _ in 0..(RecoveryConfig::default().max_recovery_streak + 1) {
            m.update_trade_outcome(false, dec!(0.5), dec!(-0.5), Some(dec!(995)));
        }
        assert_eq!(m.get_next_trade_amount(dec!(995)), dec!(0));
        assert_eq!(m.state(), RiskState::Panic);
        assert_eq!(
            m.allow_trade(0, dec!(995)),
            Admission::Blocked(BlockReason::PanicCooldown)
        );
    }

    #[test]
    fn win_retires_two_staircase_steps() {
        let m = manager();
        m.start_session(dec!(100));
        for _ in 0..3 {
            m.update_trade_outcome(false, dec!(1), dec!(-1), Some(dec!(97)));
        }
        assert_eq!(m.metrics().recovery_streak, 3);

        m.update_trade_outcome(true, dec!(2), dec!(1.6), Some(dec!(98.6)));
        assert_eq!(m.metrics().recovery_streak, 1);
        assert_eq!(m.state(), RiskState::Recovery);

        m.update_trade_outcome(true, dec!(1), dec!(0.8), Some(dec!(99.4)));
        assert_eq!(m.metrics().recovery_streak, 0);
        assert_eq!(m.state(), RiskState::Normal);
        assert_eq!(m.get_next_trade_amount(dec!(99.4)), dec!(1));
    }

    #[test]
    fn drawdown_near_limit_panics_and_at_limit_locks() {
        // Peak 100, panic engages at 16% drawdown (0.8 x 20%). Daily
        // limit widened so only the drawdown gates react.
        let drawdown_manager = || {
            let risk = RiskConfig {
                daily_loss_limit_pct: 1.0,
                ..RiskConfig::default()
            };
            RiskManager::new(risk, RecoveryConfig::default(), dec!(1))
        };
        let m = drawdown_manager();
        m.start_session(dec!(100));
        m.update_trade_outcome(false, dec!(16), dec!(-16), Some(dec!(84)));
        assert_eq!(m.state(), RiskState::Panic);

        let m = drawdown_manager();
        m.start_session(dec!(100));
        m.update_trade_outcome(false, dec!(20), dec!(-20), Some(dec!(80)));
        assert_eq!(m.state(), RiskState::Locked);
        assert_eq!(
            m.allow_trade(0, dec!(80)),
            Admission::Blocked(BlockReason::Locked)
        );

        // Hard lock only clears manually.
        m.manual_unlock();
        assert_ne!(m.state(), RiskState::Locked);
    }

    #[test]
    fn open_position_cap_blocks() {
        let m = manager();
        m.start_session(dec!(100));
        assert_eq!(
            m.allow_trade(1, dec!(100)),
            Admission::Blocked(BlockReason::OpenPositionCap)
        );
        assert!(m.allow_trade(0, dec!(100)).is_allowed());
    }

    #[test]
    fn hourly_limit_exempts_recovery() {
        let m = manager();
        m.start_session(dec!(100));
        for _ in 0..RiskConfig::default().max_trades_per_hour {
            m.record_trade_placed();
        }
        assert_eq!(
            m.allow_trade(0, dec!(100)),
            Admission::Blocked(BlockReason::HourlyLimit)
        );

        // One loss flips the state to RECOVERY; the staircase may run.
        m.update_trade_outcome(false, dec!(1), dec!(-1), Some(dec!(99)));
        assert!(m.allow_trade(0, dec!(99)).is_allowed());
    }

    #[test]
    fn balance_floor_scales_with_recovery_streak() {
        let mut risk = RiskConfig::default();
        risk.max_drawdown_pct = 0.9; // keep drawdown gates out of the way
        risk.max_consecutive_losses = 100;
        let m = RiskManager::new(risk, RecoveryConfig::default(), dec!(1));
        m.start_session(dec!(100));

        // Base floor 30%: 35 is fine while NORMAL.
        assert!(m.allow_trade(0, dec!(35)).is_allowed());

        // Two recovery steps push the floor to 40%.
        m.update_trade_outcome(false, dec!(1), dec!(-1), Some(dec!(99)));
        m.update_trade_outcome(false, dec!(1), dec!(-1), Some(dec!(98)));
        assert_eq!(
            m.allow_trade(0, dec!(35)),
            Admission::Blocked(BlockReason::BalanceFloor)
        );
    }

    #[test]
    fn daily_loss_limit_locks_with_expiry() {
        let mut risk = RiskConfig::default();
        risk.max_drawdown_pct = 0.9;
        risk.max_consecutive_losses = 100;
        let m = RiskManager::new(risk, RecoveryConfig::default(), dec!(1));
        m.start_session(dec!(1000));
        // The limit is 10% of the 1000 baseline.
        m.update_trade_outcome(false, dec!(100), dec!(-100), Some(dec!(900)));
        assert_eq!(m.state(), RiskState::Locked);
        assert_eq!(
            m.allow_trade(0, dec!(900)),
            Admission::Blocked(BlockReason::Locked)
        );
    }

    #[test]
    fn daily_loss_limit_scales_with_session_balance() {
        let mut risk = RiskConfig::default();
        risk.max_drawdown_pct = 0.9;
        risk.max_consecutive_losses = 100;
        let m = RiskManager::new(risk, RecoveryConfig::default(), dec!(1));
        m.start_session(dec!(5000));

        // A 50 loss would lock a 100 session but is nothing here.
        m.update_trade_outcome(false, dec!(50), dec!(-50), Some(dec!(4950)));
        assert_ne!(m.state(), RiskState::Locked);

        // 500 total is 10% of the baseline.
        m.update_trade_outcome(false, dec!(450), dec!(-450), Some(dec!(4500)));
        assert_eq!(m.state(), RiskState::Locked);
    }

    #[test]
    fn loss_streak_engages_cooldown() {
        let mut risk = RiskConfig::default();
        risk.max_drawdown_pct = 0.9;
        let m = RiskManager::new(risk, RecoveryConfig::default(), dec!(1));
        m.start_session(dec!(1000));
        for _ in 0..3 {
            m.update_trade_outcome(false, dec!(1), dec!(-1), Some(dec!(997)));
        }
        assert_eq!(
            m.allow_trade(0, dec!(997)),
            Admission::Blocked(BlockReason::LossCooldown)
        );
    }

    #[test]
    fn cannot_afford_next_stake() {
        // Needs 1.2x the next stake in balance; disable the floor so
        // the affordability gate is the one that fires.
        let m = RiskManager::new(
            RiskConfig {
                balance_floor_pct: 0.0,
                ..RiskConfig::default()
            },
            RecoveryConfig::default(),
            dec!(10),
        );
        m.start_session(dec!(11));
        assert_eq!(
            m.allow_trade(0, dec!(11)),
            Admission::Blocked(BlockReason::InsufficientBalance)
        );
    }
}
