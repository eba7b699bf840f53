use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_BOOTSTRAP_ITERATIONS;
use crate::features::{DataQuality, FeatureVector};
use crate::model::TrainedModel;
use crate::reasoning::{ReasoningFact, ReasoningInput, build_facts, render};
use crate::record_store::stable_hash;
use crate::tiers::TierInfo;

pub const MIN_CONFIDENCE: f64 = 0.1;
pub const MAX_CONFIDENCE: f64 = 0.95;
pub const BOOTSTRAP_MIN_SAMPLES: usize = 5;
const FORM_SENSITIVITY: f64 = 0.08;
const POSITION_DAMPING: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prediction {
    #[serde(rename = "OVER")]
    Over,
    #[serde(rename = "UNDER")]
    Under,
}

impl Prediction {
    pub fn as_str(self) -> &'static str {
        match self {
            Prediction::Over => "OVER",
            Prediction::Under => "UNDER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiMethod {
    Bootstrap,
    Parametric,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionWarning {
    InsufficientSample { tier: u8, series_used: usize },
    DegenerateFeature { feature: &'static str },
    EarlyGameImputed { quality: DataQuality },
}

/// Prop-independent quantities shared by `predict` and the curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseQuantities {
    pub expected_stat: f64,
    pub p_over: f64,
    pub combo_penalty: f64,
}

/// Confidence breakdown for one prop line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredProp {
    pub prediction: Prediction,
    pub gap: f64,
    pub gap_adjustment: f64,
    /// Model probability of the predicted side, 0..1.
    pub base_confidence: f64,
    /// Final confidence after gap, combo and tier adjustments, 0..1.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub prediction: Prediction,
    pub confidence: f64,
    pub base_model_confidence: f64,
    pub expected_stat: f64,
    pub confidence_interval: ConfidenceInterval,
    pub ci_method: CiMethod,
    pub tier: TierInfo,
    pub reasoning: String,
    pub facts: Vec<ReasoningFact>,
    pub features: FeatureVector,
    pub warnings: Vec<PredictionWarning>,
}

/// Expected stat from features alone: average, volatility-damped form, damped role effect.
pub fn expected_stat(features: &FeatureVector) -> f64 {
    let z = features.form_z_score.clamp(-2.0, 2.0);
    let form = 1.0 + FORM_SENSITIVITY * (1.0 - features.volatility.clamp(0.0, 1.0)) * z;
    let position = 1.0 + (features.position_factor - 1.0) * POSITION_DAMPING;
    let value = features.avg_stat * form * position;
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

pub fn gap_adjustment(gap: f64, prop: f64) -> f64 {
    (gap / prop.max(1.0) * 2.0).clamp(0.0, 1.0)
}

pub fn score_prop(base: &BaseQuantities, prop: f64, tier_weight: f64) -> ScoredProp {
    let prediction = if base.expected_stat > prop {
        Prediction::Over
    } else {
        Prediction::Under
    };
    let gap = (base.expected_stat - prop).abs();
    let gap_adj = gap_adjustment(gap, prop);
    let base_confidence = match prediction {
        Prediction::Over => base.p_over,
        Prediction::Under => 1.0 - base.p_over,
    }
    .clamp(0.0, 1.0);
    let adjusted = (base_confidence + (1.0 - base_confidence) * gap_adj)
        * (1.0 - base.combo_penalty.clamp(0.0, 1.0));
    let adjusted = adjusted.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
    ScoredProp {
        prediction,
        gap,
        gap_adjustment: gap_adj,
        base_confidence,
        confidence: adjusted * tier_weight.clamp(0.0, 1.0),
    }
}

/// 2.5/97.5 percentile interval of resampled means, or a normal-theory interval
/// when the sample is too small or has no spread.
pub fn confidence_interval(
    center: f64,
    std: f64,
    n: usize,
    iterations: usize,
) -> (ConfidenceInterval, CiMethod) {
    let center = if center.is_finite() { center.max(0.0) } else { 0.0 };
    let std = if std.is_finite() { std.max(0.0) } else { 0.0 };
    if n >= BOOTSTRAP_MIN_SAMPLES
        && std > 0.0
        && iterations > 0
        && let Ok(dist) = Normal::new(center, std)
    {
        let key = format!("{:016x}:{:016x}:{n}", center.to_bits(), std.to_bits());
        let mut rng = StdRng::seed_from_u64(stable_hash(&[key.as_str()]));
        let mut means: Vec<f64> = (0..iterations)
            .map(|_| (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64)
            .collect();
        means.sort_by(|a, b| a.total_cmp(b));
        let lower = percentile(&means, 0.025).max(0.0);
        let upper = percentile(&means, 0.975).max(lower);
        return (ConfidenceInterval { lower, upper }, CiMethod::Bootstrap);
    }

    let spread = if std > 0.0 { std } else { center.sqrt() };
    let half = 1.96 * spread / (n.max(1) as f64).sqrt();
    let lower = (center - half).max(0.0);
    let upper = (center + half).max(lower);
    (ConfidenceInterval { lower, upper }, CiMethod::Parametric)
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Scores props against one model snapshot.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    model: Arc<TrainedModel>,
    bootstrap_iterations: usize,
}

impl PredictionEngine {
    pub fn new(model: Arc<TrainedModel>) -> Self {
        Self {
            model,
            bootstrap_iterations: DEFAULT_BOOTSTRAP_ITERATIONS,
        }
    }

    pub fn with_bootstrap_iterations(mut self, iterations: usize) -> Self {
        self.bootstrap_iterations = iterations.max(1);
        self
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn base_quantities(&self, features: &FeatureVector) -> BaseQuantities {
        let p_over = self.model.prob_over(features);
        BaseQuantities {
            expected_stat: expected_stat(features),
            p_over: if p_over.is_finite() { p_over.clamp(0.0, 1.0) } else { 0.5 },
            combo_penalty: features.combo_penalty,
        }
    }

    pub fn predict(&self, features: &FeatureVector, prop: f64, tier: &TierInfo) -> PredictionResult {
        let base = self.base_quantities(features);
        let scored = score_prop(&base, prop, tier.weight);
        let n = features.sample_size();
        let (ci, ci_method) = confidence_interval(
            base.expected_stat,
            features.std_dev_stat,
            n,
            self.bootstrap_iterations,
        );

        let confidence = scored.confidence * 100.0;
        let facts = build_facts(&ReasoningInput {
            tier,
            avg: features.avg_stat,
            std: features.std_dev_stat,
            volatility: features.volatility,
            form_z: features.form_z_score,
            series: n,
            position_factor: features.position_factor,
            prediction: scored.prediction,
            expected: base.expected_stat,
            prop,
            confidence,
        });

        let mut warnings = Vec::new();
        if tier.is_fallback() || n < 10 {
            warnings.push(PredictionWarning::InsufficientSample {
                tier: tier.tier,
                series_used: tier.series_used,
            });
        }
        if features.std_dev_stat <= 0.0 {
            warnings.push(PredictionWarning::DegenerateFeature {
                feature: "std_dev_stat",
            });
        }
        if matches!(
            features.early_game_quality,
            DataQuality::Low | DataQuality::Fallback
        ) {
            warnings.push(PredictionWarning::EarlyGameImputed {
                quality: features.early_game_quality,
            });
        }

        PredictionResult {
            prediction: scored.prediction,
            confidence,
            base_model_confidence: scored.base_confidence * 100.0,
            expected_stat: base.expected_stat,
            confidence_interval: ci,
            ci_method,
            tier: tier.clone(),
            reasoning: render(&facts),
            facts,
            features: *features,
            warnings,
        }
    }
}
