use serde::Serialize;

use crate::config::DEFAULT_CURVE_STEP;
use crate::features::FeatureVector;
use crate::predict::{Prediction, PredictionEngine, score_prop};
use crate::tiers::TierInfo;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub prop_value: f64,
    pub prediction: Prediction,
    /// 0-100, same scale as the single prediction.
    pub confidence: f64,
    pub expected_stat: f64,
    pub is_input_prop: bool,
}

/// Sweeps `input_prop + step * i` for `i` in `-half_width..=half_width`, ascending.
///
/// Base quantities are computed once, so the point at `i = 0` matches `predict`.
pub fn generate_curve(
    engine: &PredictionEngine,
    features: &FeatureVector,
    input_prop: f64,
    step: f64,
    half_width: usize,
    tier: &TierInfo,
) -> Vec<CurvePoint> {
    let step = if step.is_finite() && step > 0.0 {
        step
    } else {
        DEFAULT_CURVE_STEP
    };
    let base = engine.base_quantities(features);
    let hw = half_width as i64;
    (-hw..=hw)
        .map(|i| {
            let prop_value = input_prop + step * i as f64;
            let scored = score_prop(&base, prop_value, tier.weight);
            CurvePoint {
                prop_value,
                prediction: scored.prediction,
                confidence: scored.confidence * 100.0,
                expected_stat: base.expected_stat,
                is_input_prop: i == 0,
            }
        })
        .collect()
}
