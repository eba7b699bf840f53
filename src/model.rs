use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calibration::{CalibrationBin, Calibrator, Metrics, logit, sigmoid};
use crate::config::EngineConfig;
use crate::features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    pub min_child_weight: f64,
    pub min_gain: f64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_trees: 120,
            max_depth: 3,
            learning_rate: 0.08,
            lambda: 1.0,
            min_child_weight: 0.5,
            min_gain: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree over the logit margin. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedClassifier {
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl BoostedClassifier {
    pub fn constant(p: f64) -> Self {
        Self {
            base_score: logit(p),
            trees: Vec::new(),
        }
    }

    pub fn margin(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.margin(x))
    }

    /// Gradient boosting on weighted logistic loss with Newton leaf values.
    pub fn fit(
        rows: &[[f64; FEATURE_COUNT]],
        labels: &[bool],
        weights: &[f64],
        params: &BoostParams,
    ) -> Self {
        let n = rows.len().min(labels.len()).min(weights.len());
        let w_sum: f64 = weights[..n].iter().sum();
        let pos: f64 = (0..n).filter(|&i| labels[i]).map(|i| weights[i]).sum();
        let base_rate = if w_sum > 0.0 { pos / w_sum } else { 0.5 };
        let mut model = Self::constant(base_rate.clamp(1e-3, 1.0 - 1e-3));
        if n == 0 {
            return model;
        }

        let mut margins = vec![model.base_score; n];
        let all: Vec<usize> = (0..n).collect();
        for _ in 0..params.n_trees {
            let (grad, hess): (Vec<f64>, Vec<f64>) = (0..n)
                .map(|i| {
                    let p = sigmoid(margins[i]);
                    let y = if labels[i] { 1.0 } else { 0.0 };
                    let w = weights[i].max(0.0);
                    (w * (p - y), (w * p * (1.0 - p)).max(1e-12))
                })
                .unzip();
            let mut builder = TreeBuilder {
                rows,
                grad: &grad,
                hess: &hess,
                params,
                nodes: Vec::new(),
            };
            builder.grow(&all, 0);
            let tree = Tree {
                nodes: builder.nodes,
            };
            for (i, m) in margins.iter_mut().enumerate() {
                *m += tree.predict(&rows[i]);
            }
            model.trees.push(tree);
        }
        model
    }
}

struct TreeBuilder<'a> {
    rows: &'a [[f64; FEATURE_COUNT]],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostParams,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, idx: &[usize], depth: usize) -> usize {
        let g: f64 = idx.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = idx.iter().map(|&i| self.hess[i]).sum();
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: -g / (h + self.params.lambda) * self.params.learning_rate,
        });
        if depth >= self.params.max_depth || idx.len() < 2 {
            return slot;
        }
        let Some(split) = self.best_split(idx, g, h) else {
            return slot;
        };
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .iter()
            .partition(|&&i| self.rows[i][split.feature] <= split.threshold);
        let left = self.grow(&left_idx, depth + 1);
        let right = self.grow(&right_idx, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    fn best_split(&self, idx: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent = g * g / (h + lambda);
        let per_feature: Vec<Option<SplitCandidate>> = (0..FEATURE_COUNT)
            .into_par_iter()
            .map(|feature| {
                let mut order: Vec<usize> = idx.to_vec();
                order.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));
                let mut gl = 0.0;
                let mut hl = 0.0;
                let mut best: Option<SplitCandidate> = None;
                for k in 0..order.len() - 1 {
                    let i = order[k];
                    gl += self.grad[i];
                    hl += self.hess[i];
                    let x = self.rows[i][feature];
                    let next = self.rows[order[k + 1]][feature];
                    if next <= x {
                        continue;
                    }
                    let gr = g - gl;
                    let hr = h - hl;
                    if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                        continue;
                    }
                    let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent;
                    if gain > self.params.min_gain && best.is_none_or(|b| gain > b.gain) {
                        best = Some(SplitCandidate {
                            feature,
                            threshold: 0.5 * (x + next),
                            gain,
                        });
                    }
                }
                best
            })
            .collect();

        // Sequential reduce keeps the lowest feature index on ties.
        per_feature
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<SplitCandidate>, c| match acc {
                Some(a) if a.gain >= c.gain => Some(a),
                _ => Some(c),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingDiagnostics {
    pub train_examples: usize,
    pub calibration_examples: usize,
    pub validation_examples: usize,
    pub train_over_rate: f64,
    pub calibration_method: String,
    pub train_metrics: Metrics,
    pub validation_raw: Metrics,
    pub validation_calibrated: Metrics,
    pub mean_predicted: f64,
    pub observed_over_rate: f64,
    pub calibration_gap: f64,
    pub expected_calibration_error: f64,
    pub reliability: Vec<CalibrationBin>,
}

impl TrainingDiagnostics {
    pub fn empty() -> Self {
        Self {
            train_examples: 0,
            calibration_examples: 0,
            validation_examples: 0,
            train_over_rate: 0.0,
            calibration_method: "identity".to_string(),
            train_metrics: Metrics::empty(),
            validation_raw: Metrics::empty(),
            validation_calibrated: Metrics::empty(),
            mean_predicted: 0.0,
            observed_over_rate: 0.0,
            calibration_gap: 0.0,
            expected_calibration_error: 0.0,
            reliability: Vec::new(),
        }
    }
}

/// Immutable trained artifact: classifier, calibration layer and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub fingerprint: String,
    pub feature_names: Vec<String>,
    pub classifier: BoostedClassifier,
    pub calibrator: Calibrator,
    pub diagnostics: TrainingDiagnostics,
}

impl TrainedModel {
    pub fn new(
        classifier: BoostedClassifier,
        calibrator: Calibrator,
        diagnostics: TrainingDiagnostics,
    ) -> Result<Self> {
        let fingerprint = fingerprint(&classifier, &calibrator)?;
        Ok(Self {
            version: ARTIFACT_VERSION,
            generated_at: Utc::now(),
            fingerprint,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classifier,
            calibrator,
            diagnostics,
        })
    }

    /// Constant-probability model used before any artifact exists.
    pub fn baseline(p_over: f64) -> Self {
        let classifier = BoostedClassifier::constant(p_over.clamp(1e-3, 1.0 - 1e-3));
        let calibrator = Calibrator::Identity;
        let fingerprint = fingerprint(&classifier, &calibrator).unwrap_or_default();
        Self {
            version: ARTIFACT_VERSION,
            generated_at: DateTime::<Utc>::default(),
            fingerprint,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classifier,
            calibrator,
            diagnostics: TrainingDiagnostics::empty(),
        }
    }

    pub fn raw_prob_over(&self, features: &FeatureVector) -> f64 {
        self.classifier.predict_proba(&features.to_array())
    }

    pub fn prob_over(&self, features: &FeatureVector) -> f64 {
        self.calibrator.apply(self.raw_prob_over(features))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read model artifact {}", path.display()))?;
        let model = serde_json::from_str::<TrainedModel>(&raw)
            .with_context(|| format!("parse model artifact {}", path.display()))?;
        if model.version != ARTIFACT_VERSION {
            bail!(
                "model artifact {} has version {}, expected {}",
                path.display(),
                model.version,
                ARTIFACT_VERSION
            );
        }
        if model.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES.iter().copied()) {
            bail!("model artifact {} was trained on a different feature schema", path.display());
        }
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create model dir {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize model artifact")?;
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).context("swap model artifact")?;
        Ok(())
    }
}

fn fingerprint(classifier: &BoostedClassifier, calibrator: &Calibrator) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(classifier).context("serialize classifier")?);
    hasher.update(serde_json::to_vec(calibrator).context("serialize calibrator")?);
    let digest = hasher.finalize();
    Ok(digest.iter().take(8).map(|b| format!("{b:02x}")).collect())
}

/// Shared slot for the active model. Readers take an `Arc` snapshot and keep it
/// for the whole request.
#[derive(Debug)]
pub struct ModelHandle {
    current: RwLock<Arc<TrainedModel>>,
    generation: AtomicU64,
}

impl ModelHandle {
    pub fn new(model: TrainedModel) -> Self {
        Self {
            current: RwLock::new(Arc::new(model)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<TrainedModel> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn publish(&self, model: TrainedModel) {
        let fingerprint = model.fingerprint.clone();
        let next = Arc::new(model);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(%fingerprint, generation, "published model");
    }

    /// Runs `train` and publishes its model. Any error leaves the active model in place.
    pub fn retrain<E, F>(&self, train: F) -> std::result::Result<u64, E>
    where
        E: std::fmt::Display,
        F: FnOnce() -> std::result::Result<TrainedModel, E>,
    {
        match train() {
            Ok(model) => {
                self.publish(model);
                Ok(self.generation())
            }
            Err(err) => {
                let active = self.current();
                tracing::warn!(
                    error = %err,
                    active_fingerprint = %active.fingerprint,
                    "training failed; keeping active model"
                );
                Err(err)
            }
        }
    }
}

pub fn load_or_baseline(config: &EngineConfig) -> TrainedModel {
    match TrainedModel::load(&config.model_path) {
        Ok(model) => model,
        Err(err) => {
            tracing::warn!(
                path = %config.model_path.display(),
                error = %format!("{err:#}"),
                "no usable model artifact; serving baseline"
            );
            TrainedModel::baseline(0.5)
        }
    }
}
