//! Multi-signal consensus.
//!
//! Raw strategy signals pass through a staged filter pipeline; most
//! ticks end in an abstention, which is the designed outcome. A
//! classifier trained online on realized outcomes may raise the final
//! score, but only when it agrees with the traditional majority and is
//! confidently ahead of it.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::domain::{Decision, DecisionMethod, MarketRegime, Side, Signal};

/// Length of the fixed feature vector fed to the classifier.
pub const FEATURE_LEN: usize = 14;
/// Training samples buffered before a synchronous retrain.
pub const TRAINING_BUFFER_CAPACITY: usize = 50;

/// The strategy names with dedicated feature slots. Signals from other
/// strategies still count in the aggregate slots.
const CANONICAL_STRATEGIES: [&str; 3] = ["mean_reversion", "momentum", "breakout"];

#[derive(Debug, Clone)]
pub struct Prediction {
    pub side: Side,
    /// In [0, 1].
    pub confidence: f64,
}

/// One realized outcome paired with the features observed at decision
/// time.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    pub side: Side,
}

/// Online-trained side predictor. Internals are interchangeable; the
/// consensus only needs these three capabilities.
pub trait Classifier: Send + Sync {
    fn is_trained(&self) -> bool;
    /// `None` means no usable prediction; the caller falls back to the
    /// traditional score.
    fn predict(&self, features: &[f64]) -> Option<Prediction>;
    fn train(&mut self, samples: &[TrainingSample]);
}

pub struct SignalConsensus {
    config: ConsensusConfig,
    classifier: Mutex<Box<dyn Classifier>>,
    training_buffer: Mutex<Vec<TrainingSample>>,
}

impl SignalConsensus {
    pub fn new(config: ConsensusConfig, classifier: Box<dyn Classifier>) -> Self {
        Self {
            config,
            classifier: Mutex::new(classifier),
            training_buffer: Mutex::new(Vec::with_capacity(TRAINING_BUFFER_CAPACITY)),
        }
    }

    /// Run the full pipeline for one tick. `None` is an abstention.
    pub fn evaluate(
        &self,
        signals: &[Signal],
        regime: MarketRegime,
        price: f64,
        session_open: f64,
    ) -> Option<Decision> {
        // Stage 1: drop weak signals.
        let strong: Vec<Signal> = signals
            .iter()
            .filter(|s| s.score >= self.config.min_strength)
            .cloned()
            .collect();
        if strong.is_empty() {
            return None;
        }

        // Stage 2: diversity. One lone signal may only decide when it is
        // explicitly trusted to.
        let mut strategies: Vec<String> = strong.iter().map(|s| s.strategy.clone()).collect();
        strategies.sort();
        strategies.dedup();
        let single_trusted = strong.len() == 1 && strong[0].single_trusted;
        if strategies.len() < 2 && !single_trusted {
            debug!(sources = strong.len(), "consensus abstain: too few strategies");
            return None;
        }

        // Stage 3: conflict. A near-even split between sides is a
        // stalemate, not a trade.
        let rise_sum: f64 = strong
            .iter()
            .filter(|s| s.side == Side::Rise)
            .map(|s| s.score)
            .sum();
        let fall_sum: f64 = strong
            .iter()
            .filter(|s| s.side == Side::Fall)
            .map(|s| s.score)
            .sum();
        if rise_sum > 0.0 && fall_sum > 0.0 {
            let diff_ratio = (rise_sum - fall_sum).abs() / (rise_sum + fall_sum);
            if diff_ratio < self.config.conflict_ratio {
                debug!(diff_ratio, "consensus abstain: sides in conflict");
                return None;
            }
        }

        // Stage 4: dispersion. Widely scattered scores mean the
        // strategies are not seeing the same market.
        let max_score = strong.iter().map(|s| s.score).fold(f64::MIN, f64::max);
        let min_score = strong.iter().map(|s| s.score).fold(f64::MAX, f64::min);
        if max_score - min_score > self.config.max_dispersion {
            debug!(
                spread = max_score - min_score,
                "consensus abstain: score dispersion too wide"
            );
            return None;
        }

        // Stage 5: weighted majority with a regime-specific bar. The
        // score is the winning share of the total weight, so a
        // one-sided field scores 1.0 and a barely-winning split scores
        // just over half.
        let side = if rise_sum >= fall_sum {
            Side::Rise
        } else {
            Side::Fall
        };
        let winning_sum = if side == Side::Rise { rise_sum } else { fall_sum };
        let traditional_score = winning_sum / (rise_sum + fall_sum);
        let min_score_required = match regime {
            MarketRegime::Trending => self.config.min_score_trending,
            _ => self.config.min_score_ranging,
        };
        if traditional_score < min_score_required {
            debug!(
                traditional_score,
                min_score_required,
                %regime,
                "consensus abstain: below regime minimum"
            );
            return None;
        }

        let mut decision = Decision {
            side,
            score: traditional_score,
            sources: strong.len(),
            strategies,
            method: if single_trusted {
                DecisionMethod::SingleTrusted
            } else {
                DecisionMethod::Traditional
            },
            traditional_score,
            ml_score: 0.0,
            signals: strong.clone(),
        };

        // Stage 6: classifier blend. Strictly an upgrade; it may never
        // flip the side or rescue a failed traditional decision.
        let features = extract_features(&strong, price, session_open);
        let classifier = self.classifier.lock();
        if classifier.is_trained() {
            if let Some(prediction) = classifier.predict(&features) {
                decision.ml_score = prediction.confidence;
                if prediction.side == decision.side
                    && prediction.confidence >= self.config.ml_min_confidence
                    && prediction.confidence >= traditional_score + self.config.ml_margin
                {
                    decision.score = prediction.confidence;
                    decision.method = DecisionMethod::MlOverride;
                }
            }
        }

        Some(decision)
    }

    /// Buffer one realized outcome. At capacity the classifier retrains
    /// synchronously on the whole buffer and the buffer is cleared.
    pub fn add_training_sample(&self, features: Vec<f64>, side: Side) {
        if features.len() != FEATURE_LEN {
            warn!(
                got = features.len(),
                expected = FEATURE_LEN,
                "discarding malformed training sample"
            );
            return;
        }
        let mut buffer = self.training_buffer.lock();
        buffer.push(TrainingSample { features, side });
        if buffer.len() >= TRAINING_BUFFER_CAPACITY {
            let samples = std::mem::take(&mut *buffer);
            drop(buffer);
            info!(samples = samples.len(), "retraining classifier");
            self.classifier.lock().train(&samples);
        }
    }

    pub fn buffered_samples(&self) -> usize {
        self.training_buffer.lock().len()
    }
}

/// Build the fixed 14-element feature vector from the surviving signals
/// and the price context.
pub fn extract_features(signals: &[Signal], price: f64, session_open: f64) -> Vec<f64> {
    let mut features = Vec::with_capacity(FEATURE_LEN);

    for side in [Side::Rise, Side::Fall] {
        let scores: Vec<f64> = signals
            .iter()
            .filter(|s| s.side == side)
            .map(|s| s.score)
            .collect();
        features.push(scores.len() as f64);
        features.push(scores.iter().sum());
        features.push(scores.iter().copied().fold(0.0, f64::max));
    }

    for strategy in CANONICAL_STRATEGIES {
        let scores: Vec<f64> = signals
            .iter()
            .filter(|s| s.strategy == strategy)
            .map(|s| s.score)
            .collect();
        features.push(scores.len() as f64);
        features.push(scores.iter().sum());
    }

    let displacement = if session_open != 0.0 {
        (price - session_open) / session_open
    } else {
        0.0
    };
    features.push(displacement);

    let all: Vec<f64> = signals.iter().map(|s| s.score).collect();
    let mean = all.iter().sum::<f64>() / all.len().max(1) as f64;
    let variance = all.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / all.len().max(1) as f64;
    features.push(variance);

    features
}

/// Nearest-centroid side predictor over z-score-normalized features.
///
/// Deliberately dependency-light: two centroids and per-feature
/// normalization are enough to blend realized-outcome history into the
/// score, and retraining is a single pass over the buffer.
#[derive(Default)]
pub struct NearestCentroidClassifier {
    model: Option<CentroidModel>,
}

struct CentroidModel {
    mean: Vec<f64>,
    std: Vec<f64>,
    rise_centroid: Vec<f64>,
    fall_centroid: Vec<f64>,
}

impl NearestCentroidClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(model: &CentroidModel, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(model.mean.iter().zip(model.std.iter()))
            .map(|(x, (m, s))| if *s > 0.0 { (x - m) / s } else { 0.0 })
            .collect()
    }

    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl Classifier for NearestCentroidClassifier {
    fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    fn predict(&self, features: &[f64]) -> Option<Prediction> {
        let model = self.model.as_ref()?;
        if features.len() != model.mean.len() {
            // Fail open: a malformed vector must never veto the
            // traditional decision.
            warn!(
                got = features.len(),
                expected = model.mean.len(),
                "feature length mismatch, skipping prediction"
            );
            return None;
        }
        let normalized = Self::normalize(model, features);
        let d_rise = Self::distance(&normalized, &model.rise_centroid);
        let d_fall = Self::distance(&normalized, &model.fall_centroid);
        let total = d_rise + d_fall;
        if total == 0.0 {
            return None;
        }
        // Confidence is the relative distance to the losing centroid.
        let (side, confidence) = if d_rise <= d_fall {
            (Side::Rise, d_fall / total)
        } else {
            (Side::Fall, d_rise / total)
        };
        Some(Prediction { side, confidence })
    }

    fn train(&mut self, samples: &[TrainingSample]) {
        let rise: Vec<&TrainingSample> =
            samples.iter().filter(|s| s.side == Side::Rise).collect();
        let fall: Vec<&TrainingSample> =
            samples.iter().filter(|s| s.side == Side::Fall).collect();
        if rise.is_empty() || fall.is_empty() {
            warn!("training set lacks one class, keeping previous model");
            return;
        }
        let dim = samples[0].features.len();
        if samples.iter().any(|s| s.features.len() != dim) {
            warn!("inconsistent feature lengths in training set, keeping previous model");
            return;
        }

        let n = samples.len() as f64;
        let mut mean = vec![0.0; dim];
        for sample in samples {
            for (m, x) in mean.iter_mut().zip(&sample.features) {
                *m += x / n;
            }
        }
        let mut std = vec![0.0; dim];
        for sample in samples {
            for (s, (x, m)) in std.iter_mut().zip(sample.features.iter().zip(&mean)) {
                *s += (x - m).powi(2) / n;
            }
        }
        for s in &mut std {
            *s = s.sqrt();
        }

        let model = CentroidModel {
            rise_centroid: vec![0.0; dim],
            fall_centroid: vec![0.0; dim],
            mean,
            std,
        };
        let mut model = model;
        for sample in &rise {
            let normalized = Self::normalize(&model, &sample.features);
            for (c, x) in model.rise_centroid.iter_mut().zip(&normalized) {
                *c += x / rise.len() as f64;
            }
        }
        for sample in &fall {
            let normalized = Self::normalize(&model, &sample.features);
            for (c, x) in model.fall_centroid.iter_mut().zip(&normalized) {
                *c += x / fall.len() as f64;
            }
        }

        self.model = Some(model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;

    fn consensus() -> SignalConsensus {
        SignalConsensus::new(
            ConsensusConfig::default(),
            Box::new(NearestCentroidClassifier::new()),
        )
    }

    fn signal(side: Side, score: f64, strategy: &str) -> Signal {
        Signal::new(side, score, strategy)
    }

    #[test]
    fn abstains_on_single_untrusted_strategy() {
        let c = consensus();
        let signals = vec![signal(Side::Rise, 0.9, "momentum")];
        assert!(c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .is_none());
    }

    #[test]
    fn single_trusted_signal_decides_alone() {
        let c = consensus();
        let signals = vec![signal(Side::Fall, 0.9, "momentum").trusted()];
        let decision = c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .unwrap();
        assert_eq!(decision.side, Side::Fall);
        assert_eq!(decision.method, DecisionMethod::SingleTrusted);
    }

    #[test]
    fn near_even_conflict_abstains() {
        let c = consensus();
        // 0.70 vs 0.65: diff ratio 0.037, well under the stalemate bar.
        let signals = vec![
            signal(Side::Rise, 0.70, "momentum"),
            signal(Side::Fall, 0.65, "mean_reversion"),
        ];
        assert!(c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .is_none());
    }

    #[test]
    fn wide_dispersion_abstains() {
        let c = consensus();
        let signals = vec![
            signal(Side::Rise, 1.0, "momentum"),
            signal(Side::Rise, 0.6, "mean_reversion"),
        ];
        // Spread 0.40 passes, 0.50 abstains.
        assert!(c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .is_some());
        let signals = vec![
            signal(Side::Rise, 1.0, "momentum"),
            signal(Side::Rise, 0.5, "mean_reversion"),
        ];
        assert!(c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .is_none());
    }

    /// A contested majority: rise 1.35 vs fall 0.62 gives a winning
    /// share of 0.685, between the trending and ranging minimums.
    fn contested_signals() -> Vec<Signal> {
        vec![
            signal(Side::Rise, 0.65, "momentum"),
            signal(Side::Rise, 0.70, "mean_reversion"),
            signal(Side::Fall, 0.62, "breakout"),
        ]
    }

    #[test]
    fn ranging_regime_requires_higher_score() {
        let c = consensus();
        let signals = contested_signals();
        let decision = c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .unwrap();
        assert_eq!(decision.side, Side::Rise);
        assert!((decision.traditional_score - 1.35 / 1.97).abs() < 1e-9);
        assert!(c
            .evaluate(&signals, MarketRegime::Ranging, 100.0, 100.0)
            .is_none());
    }

    #[test]
    fn one_sided_field_scores_full_share() {
        let c = consensus();
        let signals = vec![
            signal(Side::Rise, 0.62, "momentum"),
            signal(Side::Rise, 0.64, "mean_reversion"),
        ];
        let decision = c
            .evaluate(&signals, MarketRegime::Ranging, 100.0, 100.0)
            .unwrap();
        assert_eq!(decision.traditional_score, 1.0);
    }

    #[test]
    fn feature_vector_has_fixed_shape() {
        let signals = vec![
            signal(Side::Rise, 0.8, "momentum"),
            signal(Side::Fall, 0.7, "breakout"),
        ];
        let features = extract_features(&signals, 101.0, 100.0);
        assert_eq!(features.len(), FEATURE_LEN);
        // rise count/sum/max
        assert_eq!(features[0], 1.0);
        assert_eq!(features[1], 0.8);
        // price displacement
        assert!((features[12] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn retrains_and_clears_buffer_at_capacity() {
        let c = consensus();
        for i in 0..TRAINING_BUFFER_CAPACITY {
            let side = if i % 2 == 0 { Side::Rise } else { Side::Fall };
            let base = if side == Side::Rise { 1.0 } else { -1.0 };
            let mut features = vec![base; FEATURE_LEN];
            features[0] += i as f64 * 0.01;
            c.add_training_sample(features, side);
        }
        assert_eq!(c.buffered_samples(), 0);
        assert!(c.classifier.lock().is_trained());
    }

    #[test]
    fn malformed_training_sample_is_discarded() {
        let c = consensus();
        c.add_training_sample(vec![1.0; FEATURE_LEN - 1], Side::Rise);
        assert_eq!(c.buffered_samples(), 0);
    }

    #[test]
    fn classifier_fails_open_on_feature_mismatch() {
        let mut classifier = NearestCentroidClassifier::new();
        let samples: Vec<TrainingSample> = (0..10)
            .map(|i| {
                let side = if i % 2 == 0 { Side::Rise } else { Side::Fall };
                let base = if side == Side::Rise { 1.0 } else { -1.0 };
                TrainingSample {
                    features: vec![base; FEATURE_LEN],
                    side,
                }
            })
            .collect();
        classifier.train(&samples);
        assert!(classifier.is_trained());
        assert!(classifier.predict(&vec![1.0; FEATURE_LEN - 3]).is_none());
        assert!(classifier.predict(&vec![1.0; FEATURE_LEN]).is_some());
    }

    #[test]
    fn centroid_classifier_separates_classes() {
        let mut classifier = NearestCentroidClassifier::new();
        let samples: Vec<TrainingSample> = (0..20)
            .map(|i| {
                let side = if i % 2 == 0 { Side::Rise } else { Side::Fall };
                let base = if side == Side::Rise { 2.0 } else { -2.0 };
                TrainingSample {
                    features: vec![base + (i as f64) * 0.001; FEATURE_LEN],
                    side,
                }
            })
            .collect();
        classifier.train(&samples);

        let prediction = classifier.predict(&vec![2.0; FEATURE_LEN]).unwrap();
        assert_eq!(prediction.side, Side::Rise);
        assert!(prediction.confidence > 0.5);

        let prediction = classifier.predict(&vec![-2.0; FEATURE_LEN]).unwrap();
        assert_eq!(prediction.side, Side::Fall);
    }

    #[test]
    fn ml_override_requires_agreement_and_margin() {
        struct Fixed(Prediction);
        impl Classifier for Fixed {
            fn is_trained(&self) -> bool {
                true
            }
            fn predict(&self, _features: &[f64]) -> Option<Prediction> {
                Some(self.0.clone())
            }
            fn train(&mut self, _samples: &[TrainingSample]) {}
        }

        let signals = contested_signals();

        // Agreeing and confidently ahead: override.
        let c = SignalConsensus::new(
            ConsensusConfig::default(),
            Box::new(Fixed(Prediction {
                side: Side::Rise,
                confidence: 0.85,
            })),
        );
        let decision = c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .unwrap();
        assert_eq!(decision.method, DecisionMethod::MlOverride);
        assert_eq!(decision.score, 0.85);

        // Disagreeing: never overrides, never flips the side.
        let c = SignalConsensus::new(
            ConsensusConfig::default(),
            Box::new(Fixed(Prediction {
                side: Side::Fall,
                confidence: 0.99,
            })),
        );
        let decision = c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .unwrap();
        assert_eq!(decision.method, DecisionMethod::Traditional);
        assert_eq!(decision.side, Side::Rise);

        // Agreeing but without the margin over the traditional score
        // (0.685 here): no override.
        let c = SignalConsensus::new(
            ConsensusConfig::default(),
            Box::new(Fixed(Prediction {
                side: Side::Rise,
                confidence: 0.71,
            })),
        );
        let decision = c
            .evaluate(&signals, MarketRegime::Trending, 100.0, 100.0)
            .unwrap();
        assert_eq!(decision.method, DecisionMethod::Traditional);
    }
}
