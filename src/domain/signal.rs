//! Strategy signals and consensus decisions.

use serde::{Deserialize, Serialize};

use super::trade::Side;

/// One strategy's opinion for the current tick.
///
/// Ephemeral: produced and consumed within a single tick of the engine
/// pipeline, then kept only as part of a decision snapshot for training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub side: Side,
    /// Strength in [0, 1].
    pub score: f64,
    pub strategy: String,
    /// Escape hatch: a single signal flagged trusted may form a decision
    /// on its own, bypassing the two-strategy diversity requirement.
    #[serde(default)]
    pub single_trusted: bool,
    /// Free-form strategy annotations (indicator readings etc).
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl Signal {
    pub fn new(side: Side, score: f64, strategy: impl Into<String>) -> Self {
        Self {
            side,
            score,
            strategy: strategy.into(),
            single_trusted: false,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn trusted(mut self) -> Self {
        self.single_trusted = true;
        self
    }
}

/// How the final decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    Traditional,
    MlOverride,
    SingleTrusted,
}

/// The consensus engine's trade decision for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub side: Side,
    pub score: f64,
    /// Number of signals that survived filtering.
    pub sources: usize,
    pub strategies: Vec<String>,
    pub method: DecisionMethod,
    pub traditional_score: f64,
    pub ml_score: f64,
    /// The surviving signals, retained for the training sample built when
    /// the trade settles.
    pub signals: Vec<Signal>,
}
