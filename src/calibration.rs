use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

pub fn evaluate(probs: &[f64], labels: &[bool]) -> Metrics {
    let weights = vec![1.0; probs.len()];
    evaluate_weighted(probs, labels, &weights)
}

pub fn evaluate_weighted(probs: &[f64], labels: &[bool], weights: &[f64]) -> Metrics {
    if probs.is_empty() || probs.len() != labels.len() || probs.len() != weights.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0.0_f64;
    let mut weight_sum = 0.0_f64;

    for ((p, y), w_raw) in probs.iter().zip(labels).zip(weights) {
        let w = (*w_raw).max(1e-9);
        weight_sum += w;
        let p = p.clamp(0.0, 1.0);
        let target = if *y { 1.0 } else { 0.0 };
        brier_sum += w * (p - target).powi(2);
        let actual_prob = if *y { p } else { 1.0 - p }.clamp(1e-12, 1.0);
        log_loss_sum += -w * actual_prob.ln();
        if (p >= 0.5) == *y {
            correct += w;
        }
    }

    let n = weight_sum.max(1e-9);
    Metrics {
        samples: probs.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct / n,
    }
}

pub fn calibration_bins(probs: &[f64], labels: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, y) in probs.iter().zip(labels) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if *y {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Count-weighted mean gap between predicted and observed rate per bin.
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| b.count as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum::<f64>()
        / total as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMethod {
    Sigmoid,
    Isotonic,
    /// Isotonic once the calibration split is large enough, sigmoid otherwise.
    Auto,
}

impl CalibrationMethod {
    pub const ISOTONIC_MIN_SAMPLES: usize = 400;

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sigmoid" | "platt" => Some(Self::Sigmoid),
            "isotonic" => Some(Self::Isotonic),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Maps raw classifier probabilities to calibrated probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibrator {
    Identity,
    Sigmoid { a: f64, b: f64 },
    Isotonic { thresholds: Vec<f64>, values: Vec<f64> },
}

impl Calibrator {
    pub fn apply(&self, raw: f64) -> f64 {
        let raw = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.5 };
        match self {
            Calibrator::Identity => raw,
            Calibrator::Sigmoid { a, b } => sigmoid(a * logit(raw) + b),
            Calibrator::Isotonic { thresholds, values } => interpolate(raw, thresholds, values),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Calibrator::Identity => "identity",
            Calibrator::Sigmoid { .. } => "sigmoid",
            Calibrator::Isotonic { .. } => "isotonic",
        }
    }
}

pub fn fit_calibrator(
    method: CalibrationMethod,
    raw: &[f64],
    labels: &[bool],
    weights: &[f64],
) -> Calibrator {
    if raw.is_empty() || raw.len() != labels.len() || raw.len() != weights.len() {
        return Calibrator::Identity;
    }
    match method {
        CalibrationMethod::Sigmoid => fit_sigmoid(raw, labels, weights),
        CalibrationMethod::Isotonic => fit_isotonic(raw, labels, weights),
        CalibrationMethod::Auto if raw.len() >= CalibrationMethod::ISOTONIC_MIN_SAMPLES => {
            fit_isotonic(raw, labels, weights)
        }
        CalibrationMethod::Auto => fit_sigmoid(raw, labels, weights),
    }
}

const PLATT_RIDGE: f64 = 1e-3;
const PLATT_MIN_VARIANCE: f64 = 1e-8;

/// Platt scaling on the logit of the raw probability.
///
/// Damped Newton steps on ridge-penalized weighted log loss; each step is halved
/// until the loss goes down. Raw scores without spread get an intercept-only fit.
pub fn fit_sigmoid(raw: &[f64], labels: &[bool], weights: &[f64]) -> Calibrator {
    let pos: f64 = labels
        .iter()
        .zip(weights)
        .filter(|(y, _)| **y)
        .map(|(_, w)| w.max(0.0))
        .sum();
    let neg: f64 = labels
        .iter()
        .zip(weights)
        .filter(|(y, _)| !**y)
        .map(|(_, w)| w.max(0.0))
        .sum();
    if pos <= 0.0 || neg <= 0.0 {
        return Calibrator::Identity;
    }
    // Smoothed targets keep the fit finite on separable data.
    let t_pos = (pos + 1.0) / (pos + 2.0);
    let t_neg = 1.0 / (neg + 2.0);
    let total = pos + neg;

    let xs: Vec<f64> = raw.iter().map(|p| logit(p.clamp(0.0, 1.0))).collect();
    let ws: Vec<f64> = weights.iter().map(|w| w.max(0.0)).collect();
    let ts: Vec<f64> = labels.iter().map(|y| if *y { t_pos } else { t_neg }).collect();

    let x_mean = xs.iter().zip(&ws).map(|(x, w)| x * w).sum::<f64>() / total;
    let x_var = xs
        .iter()
        .zip(&ws)
        .map(|(x, w)| w * (x - x_mean).powi(2))
        .sum::<f64>()
        / total;
    if x_var < PLATT_MIN_VARIANCE {
        let t_mean = ts.iter().zip(&ws).map(|(t, w)| t * w).sum::<f64>() / total;
        return Calibrator::Sigmoid {
            a: 1.0,
            b: logit(t_mean) - x_mean,
        };
    }

    let mut a = 1.0_f64;
    let mut b = 0.0_f64;
    let mut loss = platt_loss(a, b, &xs, &ts, &ws);
    for _ in 0..100 {
        let (mut g_a, mut g_b) = (PLATT_RIDGE * a, 0.0);
        let (mut h_aa, mut h_ab, mut h_bb) = (PLATT_RIDGE, 0.0, PLATT_RIDGE);
        for ((x, t), w) in xs.iter().zip(&ts).zip(&ws) {
            let p = sigmoid(a * x + b);
            let d = p - t;
            let s = (p * (1.0 - p)).max(1e-12);
            g_a += w * d * x;
            g_b += w * d;
            h_aa += w * s * x * x;
            h_ab += w * s * x;
            h_bb += w * s;
        }
        let det = h_aa * h_bb - h_ab * h_ab;
        if det.abs() < 1e-12 {
            break;
        }
        let step_a = (h_bb * g_a - h_ab * g_b) / det;
        let step_b = (h_aa * g_b - h_ab * g_a) / det;

        let mut scale = 1.0;
        let mut improved = false;
        while scale > 1e-6 {
            let (na, nb) = (a - scale * step_a, b - scale * step_b);
            let next = platt_loss(na, nb, &xs, &ts, &ws);
            if next.is_finite() && next <= loss {
                a = na;
                b = nb;
                improved = loss - next > 1e-12;
                loss = next;
                break;
            }
            scale *= 0.5;
        }
        if !improved {
            break;
        }
    }
    if !a.is_finite() || !b.is_finite() {
        return Calibrator::Identity;
    }
    Calibrator::Sigmoid { a, b }
}

fn platt_loss(a: f64, b: f64, xs: &[f64], ts: &[f64], ws: &[f64]) -> f64 {
    let data: f64 = xs
        .iter()
        .zip(ts)
        .zip(ws)
        .map(|((x, t), w)| {
            let p = sigmoid(a * x + b).clamp(1e-15, 1.0 - 1e-15);
            -w * (t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    data + 0.5 * PLATT_RIDGE * a * a
}

/// Weighted pool-adjacent-violators fit; prediction interpolates between block centers.
pub fn fit_isotonic(raw: &[f64], labels: &[bool], weights: &[f64]) -> Calibrator {
    let mut points: Vec<(f64, f64, f64)> = raw
        .iter()
        .zip(labels)
        .zip(weights)
        .filter(|((p, _), w)| p.is_finite() && **w > 0.0)
        .map(|((p, y), w)| (p.clamp(0.0, 1.0), if *y { 1.0 } else { 0.0 }, *w))
        .collect();
    if points.is_empty() {
        return Calibrator::Identity;
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    // (weighted x sum, weighted y sum, weight)
    let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(points.len());
    for (x, y, w) in points {
        blocks.push((x * w, y * w, w));
        while blocks.len() > 1 {
            let n = blocks.len();
            let last = blocks[n - 1];
            let prev = blocks[n - 2];
            if prev.1 / prev.2 <= last.1 / last.2 {
                break;
            }
            blocks.pop();
            blocks[n - 2] = (prev.0 + last.0, prev.1 + last.1, prev.2 + last.2);
        }
    }

    let thresholds = blocks.iter().map(|b| b.0 / b.2).collect();
    let values = blocks
        .iter()
        .map(|b| (b.1 / b.2).clamp(1e-3, 1.0 - 1e-3))
        .collect();
    Calibrator::Isotonic { thresholds, values }
}

fn interpolate(x: f64, thresholds: &[f64], values: &[f64]) -> f64 {
    let n = thresholds.len().min(values.len());
    if n == 0 {
        return x;
    }
    if x <= thresholds[0] {
        return values[0];
    }
    if x >= thresholds[n - 1] {
        return values[n - 1];
    }
    let idx = thresholds[..n].partition_point(|t| *t <= x);
    let (x0, x1) = (thresholds[idx - 1], thresholds[idx]);
    let (y0, y1) = (values[idx - 1], values[idx]);
    if x1 - x0 <= 1e-12 {
        return y1;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let m = evaluate(&[1.0, 0.0, 1.0], &[true, false, true]);
        assert_eq!(m.samples, 3);
        assert!(m.brier < 1e-12);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn ece_is_zero_when_bins_match() {
        let probs = vec![0.25; 4];
        let labels = vec![true, false, false, false];
        let bins = calibration_bins(&probs, &labels, 10);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 4);
        assert!(expected_calibration_error(&bins) < 1e-12);
    }

    #[test]
    fn isotonic_output_is_monotone() {
        let raw = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let labels = vec![false, true, false, false, true, false, true, true];
        let cal = fit_isotonic(&raw, &labels, &vec![1.0; raw.len()]);
        let mut prev = 0.0;
        for i in 0..=20 {
            let p = cal.apply(i as f64 / 20.0);
            assert!(p + 1e-12 >= prev);
            assert!((0.0..=1.0).contains(&p));
            prev = p;
        }
    }

    #[test]
    fn sigmoid_fit_pulls_overconfident_scores_in() {
        // Scores claim 0.9 but the event happens half the time.
        let raw = vec![0.9; 200];
        let labels: Vec<bool> = (0..200).map(|i| i % 2 == 0).collect();
        let cal = fit_sigmoid(&raw, &labels, &vec![1.0; 200]);
        let p = cal.apply(0.9);
        assert!((p - 0.5).abs() < 0.05, "calibrated {p}");
    }

    #[test]
    fn sigmoid_fit_stays_bounded_on_narrow_scores() {
        let raw: Vec<f64> = (0..300).map(|i| 0.6 + 0.001 * ((i / 3) % 3) as f64).collect();
        let labels: Vec<bool> = (0..300).map(|i| i % 3 == 0).collect();
        let cal = fit_sigmoid(&raw, &labels, &vec![1.0; 300]);
        match cal {
            Calibrator::Sigmoid { a, b } => assert!(a.abs() < 1e4 && b.abs() < 1e4),
            other => panic!("expected sigmoid, got {other:?}"),
        }
        let p = cal.apply(0.601);
        assert!((p - 1.0 / 3.0).abs() < 0.1, "calibrated {p}");
    }

    #[test]
    fn sigmoid_fit_keeps_ranking_on_informative_scores() {
        let raw: Vec<f64> = (0..200).map(|i| 0.2 + 0.6 * (i as f64) / 199.0).collect();
        let labels: Vec<bool> = (0..200).map(|i| (i * 7) % 10 < i / 20).collect();
        let cal = fit_sigmoid(&raw, &labels, &vec![1.0; 200]);
        assert!(cal.apply(0.8) > cal.apply(0.2));
    }

    #[test]
    fn one_class_falls_back_to_identity() {
        let cal = fit_calibrator(CalibrationMethod::Sigmoid, &[0.3, 0.4], &[true, true], &[1.0, 1.0]);
        assert_eq!(cal, Calibrator::Identity);
    }
}
