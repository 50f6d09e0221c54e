//! Open-contract bookkeeping.
//!
//! Brokers occasionally reuse or re-key a contract: the update stream
//! may carry a second identifier for a contract bought under another.
//! This manager keeps a bidirectional alias table so either id resolves,
//! and a permanent cleaned set so a settled contract can never be
//! processed twice no matter which of its ids a late frame carries.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::domain::{Position, PositionStatus};

#[derive(Default)]
struct State {
    /// Active positions keyed by primary contract id.
    active: HashMap<String, Position>,
    /// Secondary id -> primary contract id.
    aliases: HashMap<String, String>,
    /// Every identifier ever associated with a settled contract.
    cleaned: HashSet<String>,
}

#[derive(Default)]
pub struct PositionManager {
    state: Mutex<State>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new position. Refused when the contract id is already
    /// active or already settled.
    pub fn add_position(&self, position: Position) -> bool {
        let mut state = self.state.lock();
        let id = position.contract_id.clone();
        if state.cleaned.contains(&id) {
            warn!(contract_id = %id, "refusing to re-open a settled contract");
            return false;
        }
        if state.active.contains_key(&id) {
            warn!(contract_id = %id, "duplicate position for active contract");
            return false;
        }
        debug!(contract_id = %id, trade_id = %position.trade_id, "position opened");
        state.active.insert(id, position);
        true
    }

    /// Record a second broker identifier for a known contract. Unknown
    /// primary ids are logged and ignored; a late or misrouted frame
    /// must not grow the alias table.
    pub fn update_secondary_id(&self, contract_id: &str, secondary_id: &str) {
        let mut state = self.state.lock();
        let Some(primary) = Self::resolve(&state, contract_id) else {
            warn!(
                contract_id,
                secondary_id, "secondary id for unknown contract, ignoring"
            );
            return;
        };
        if primary == secondary_id {
            return;
        }
        state
            .aliases
            .insert(secondary_id.to_string(), primary.clone());
        if let Some(position) = state.active.get_mut(&primary) {
            position.secondary_id = Some(secondary_id.to_string());
        }
    }

    /// Look up a position by either its primary or secondary id.
    pub fn get_position(&self, id: &str) -> Option<Position> {
        let state = self.state.lock();
        let primary = Self::resolve(&state, id)?;
        state.active.get(&primary).cloned()
    }

    /// Settle a position: remove it from the active set and blacklist
    /// every identifier it was ever known by. Returns the settled
    /// position, or `None` if the id resolved to nothing.
    pub fn mark_closed(
        &self,
        id: &str,
        status: PositionStatus,
        payout: Option<Decimal>,
    ) -> Option<Position> {
        let mut state = self.state.lock();
        let primary = Self::resolve(&state, id)?;
        let mut position = state.active.remove(&primary)?;

        position.status = status;
        position.payout = payout;
        position.closed_at = Some(chrono::Utc::now());

        state.cleaned.insert(primary.clone());
        state.cleaned.insert(id.to_string());
        if let Some(secondary) = &position.secondary_id {
            state.cleaned.insert(secondary.clone());
        }
        state.aliases.retain(|_, p| *p != primary);

        debug!(contract_id = %primary, status = ?status, "position settled");
        Some(position)
    }

    /// Whether this identifier belongs to an already-settled contract.
    pub fn is_cleaned(&self, id: &str) -> bool {
        self.state.lock().cleaned.contains(id)
    }

    pub fn get_open_count(&self) -> usize {
        self.state.lock().active.len()
    }

    fn resolve(state: &State, id: &str) -> Option<String> {
        if state.active.contains_key(id) {
            return Some(id.to_string());
        }
        state.aliases.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    fn position(contract_id: &str) -> Position {
        Position::new("trade-1", contract_id, Side::Rise, dec!(1), None)
    }

    #[test]
    fn resolves_by_either_identifier() {
        let manager = PositionManager::new();
        assert!(manager.add_position(position("c-1")));
        manager.update_secondary_id("c-1", "s-9");

        assert_eq!(manager.get_position("c-1").unwrap().contract_id, "c-1");
        assert_eq!(manager.get_position("s-9").unwrap().contract_id, "c-1");
        assert_eq!(manager.get_open_count(), 1);
    }

    #[test]
    fn secondary_id_for_unknown_contract_is_ignored() {
        let manager = PositionManager::new();
        manager.update_secondary_id("ghost", "s-1");
        assert!(manager.get_position("s-1").is_none());
    }

    #[test]
    fn close_blacklists_every_identifier() {
        let manager = PositionManager::new();
        manager.add_position(position("c-1"));
        manager.update_secondary_id("c-1", "s-9");

        // Settle via the secondary id; both ids must end up cleaned.
        let settled = manager
            .mark_closed("s-9", PositionStatus::Won, Some(dec!(1.95)))
            .unwrap();
        assert_eq!(settled.status, PositionStatus::Won);
        assert_eq!(settled.payout, Some(dec!(1.95)));

        assert!(manager.is_cleaned("c-1"));
        assert!(manager.is_cleaned("s-9"));
        assert_eq!(manager.get_open_count(), 0);
        assert!(manager.mark_closed("c-1", PositionStatus::Lost, None).is_none());
    }

    #[test]
    fn settled_contract_cannot_reopen() {
        let manager = PositionManager::new();
        manager.add_position(position("c-1"));
        manager.mark_closed("c-1", PositionStatus::Lost, None);
        assert!(!manager.add_position(position("c-1")));
    }

    #[test]
    fn duplicate_active_contract_is_refused() {
        let manager = PositionManager::new();
        assert!(manager.add_position(position("c-1")));
        assert!(!manager.add_position(position("c-1")));
        assert_eq!(manager.get_open_count(), 1);
    }
}
