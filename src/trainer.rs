use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;

use crate::calibration::{
    CalibrationMethod, calibration_bins, evaluate_weighted, expected_calibration_error,
    fit_calibrator,
};
use crate::config::{env_parse, env_flag};
use crate::error::TrainError;
use crate::features::{FEATURE_COUNT, MatchContext, extract, history_window};
use crate::model::{BoostParams, BoostedClassifier, TrainedModel, TrainingDiagnostics};
use crate::record_store::{
    MatchRecord, RecordFilter, RecordStore, StatKind, normalize_name, stable_hash,
};
use crate::series::{MapRange, SeriesSample, aggregate};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub seed: u64,
    pub stats: Vec<StatKind>,
    pub map_ranges: Vec<MapRange>,
    pub min_history: usize,
    pub include_combos: bool,
    pub max_combos_per_team: usize,
    pub margin_min: f64,
    pub margin_max: f64,
    pub noise_std: f64,
    pub prop_floor: f64,
    pub half_life_days: f64,
    pub train_fraction: f64,
    pub calibration_fraction: f64,
    pub boost: BoostParams,
    pub calibration: CalibrationMethod,
    pub drift_tolerance: f64,
    pub min_examples: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            stats: StatKind::ALL.to_vec(),
            map_ranges: [(1, 2), (1, 3)]
                .into_iter()
                .filter_map(|(a, b)| MapRange::new(a, b))
                .collect(),
            min_history: 5,
            include_combos: true,
            max_combos_per_team: 3,
            margin_min: 0.75,
            margin_max: 1.5,
            noise_std: 0.25,
            prop_floor: 0.5,
            half_life_days: 365.0,
            train_fraction: 0.70,
            calibration_fraction: 0.15,
            boost: BoostParams::default(),
            calibration: CalibrationMethod::Auto,
            drift_tolerance: 0.05,
            min_examples: 200,
        }
    }
}

impl TrainerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let margin_min = env_parse::<f64>("PROPS_MARGIN_MIN")
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(d.margin_min);
        let margin_max = env_parse::<f64>("PROPS_MARGIN_MAX")
            .filter(|v| v.is_finite())
            .unwrap_or(d.margin_max)
            .max(margin_min);
        Self {
            seed: env_parse("PROPS_TRAIN_SEED").unwrap_or(d.seed),
            include_combos: env_flag("PROPS_TRAIN_COMBOS").unwrap_or(d.include_combos),
            margin_min,
            margin_max,
            noise_std: env_parse::<f64>("PROPS_NOISE_STD")
                .filter(|v| v.is_finite())
                .unwrap_or(d.noise_std)
                .max(0.0),
            half_life_days: env_parse("PROPS_HALF_LIFE_DAYS").unwrap_or(d.half_life_days),
            boost: BoostParams {
                n_trees: env_parse("PROPS_TRAIN_TREES")
                    .unwrap_or(d.boost.n_trees)
                    .clamp(1, 2000),
                max_depth: env_parse("PROPS_TRAIN_DEPTH")
                    .unwrap_or(d.boost.max_depth)
                    .clamp(1, 8),
                learning_rate: env_parse::<f64>("PROPS_TRAIN_LEARNING_RATE")
                    .unwrap_or(d.boost.learning_rate)
                    .clamp(0.001, 1.0),
                ..d.boost
            },
            calibration: std::env::var("PROPS_CALIBRATION")
                .ok()
                .and_then(|raw| CalibrationMethod::parse(&raw))
                .unwrap_or(d.calibration),
            drift_tolerance: env_parse("PROPS_DRIFT_TOLERANCE").unwrap_or(d.drift_tolerance),
            min_examples: env_parse("PROPS_MIN_EXAMPLES").unwrap_or(d.min_examples),
            ..d
        }
    }
}

/// One labelled training row.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub subject: String,
    pub date: NaiveDate,
    pub features: [f64; FEATURE_COUNT],
    pub prop: f64,
    pub actual: f64,
    pub over: bool,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingWarning {
    CalibrationDrift {
        mean_predicted: f64,
        observed_over_rate: f64,
        gap: f64,
        tolerance: f64,
    },
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: TrainedModel,
    pub warnings: Vec<TrainingWarning>,
}

/// Prop line anchored on the historical average with a strictly positive margin.
pub fn anchored_prop(historical_avg: f64, rng: &mut impl Rng, cfg: &TrainerConfig) -> f64 {
    let margin = if cfg.margin_max > cfg.margin_min {
        rng.gen_range(cfg.margin_min..=cfg.margin_max)
    } else {
        cfg.margin_min
    };
    let noise = match Normal::new(0.0, cfg.noise_std) {
        Ok(dist) if cfg.noise_std > 0.0 => dist.sample(rng),
        _ => 0.0,
    };
    (historical_avg + margin + noise).max(cfg.prop_floor)
}

pub fn recency_weight(date: NaiveDate, latest: NaiveDate, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days = (latest - date).num_days().max(0) as f64;
    0.5_f64.powf(age_days / half_life_days)
}

#[derive(Debug, Clone)]
struct Subject {
    key: String,
    players: Vec<String>,
}

fn subjects(records: &[MatchRecord], cfg: &TrainerConfig, seed: u64) -> Vec<Subject> {
    let mut by_player: BTreeMap<String, usize> = BTreeMap::new();
    let mut roster: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for r in records {
        let player = r.player_norm();
        *by_player.entry(player.clone()).or_default() += 1;
        *roster
            .entry(normalize_name(&r.team))
            .or_default()
            .entry(player)
            .or_default() += 1;
    }

    let mut out: Vec<Subject> = by_player
        .keys()
        .map(|p| Subject {
            key: p.clone(),
            players: vec![p.clone()],
        })
        .collect();

    if cfg.include_combos && cfg.max_combos_per_team > 0 {
        for (team, players) in &roster {
            let mut core: Vec<(&String, &usize)> = players.iter().collect();
            core.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            core.truncate(5);
            let mut pairs = Vec::new();
            for i in 0..core.len() {
                for j in (i + 1)..core.len() {
                    pairs.push((core[i].0.clone(), core[j].0.clone()));
                }
            }
            let mut rng = StdRng::seed_from_u64(seed ^ stable_hash(&[team.as_str()]));
            pairs.shuffle(&mut rng);
            for (a, b) in pairs.into_iter().take(cfg.max_combos_per_team) {
                out.push(Subject {
                    key: format!("{a}+{b}"),
                    players: vec![a, b],
                });
            }
        }
    }
    out
}

/// Walks every subject's series history and emits one example per target series.
pub fn build_examples(records: &[MatchRecord], cfg: &TrainerConfig) -> Vec<Example> {
    let Some(latest) = records.iter().map(|r| r.date).max() else {
        return Vec::new();
    };
    let mut by_player: HashMap<String, Vec<MatchRecord>> = HashMap::new();
    for r in records {
        by_player.entry(r.player_norm()).or_default().push(r.clone());
    }

    let subjects = subjects(records, cfg, cfg.seed);
    let mut examples: Vec<Example> = subjects
        .par_iter()
        .flat_map_iter(|subject| {
            let pool: Vec<MatchRecord> = subject
                .players
                .iter()
                .filter_map(|p| by_player.get(p))
                .flatten()
                .cloned()
                .collect();
            let mut out = Vec::new();
            for &stat in &cfg.stats {
                for &range in &cfg.map_ranges {
                    let samples = aggregate(&pool, &subject.players, stat, range);
                    let key = format!("{}|{}|{}-{}", subject.key, stat, range.first, range.last);
                    let mut rng = StdRng::seed_from_u64(cfg.seed ^ stable_hash(&[key.as_str()]));
                    subject_examples(subject, stat, &samples, latest, cfg, &mut rng, &mut out);
                }
            }
            out
        })
        .collect();

    examples.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.prop.total_cmp(&b.prop))
    });
    examples
}

fn subject_examples(
    subject: &Subject,
    stat: StatKind,
    samples: &[SeriesSample],
    latest: NaiveDate,
    cfg: &TrainerConfig,
    rng: &mut StdRng,
    out: &mut Vec<Example>,
) {
    let min_history = cfg.min_history.max(1);
    for k in min_history..samples.len() {
        let target = &samples[k];
        // Same-day series can't inform each other.
        let eligible = samples[..k].partition_point(|s| s.date < target.date);
        let history = history_window(&samples[..eligible]);
        if history.len() < min_history {
            continue;
        }
        let ctx = MatchContext {
            stat,
            roles: target.roles.clone(),
            opponent: Some(target.opponent.clone()),
            tournament: Some(target.tournament.clone()),
            combo_size: subject.players.len(),
        };
        let fv = extract(history, &ctx);
        let prop = anchored_prop(fv.avg_stat, rng, cfg);
        let weight = recency_weight(target.date, latest, cfg.half_life_days)
            * (0.5 + 0.5 * fv.tournament_importance);
        out.push(Example {
            subject: subject.key.clone(),
            date: target.date,
            features: fv.to_array(),
            prop,
            actual: target.stat,
            over: target.stat > prop,
            weight,
        });
    }
}

/// Chronological train / calibration / validation split points.
pub fn split_indices(n: usize, cfg: &TrainerConfig) -> (usize, usize) {
    let train_end = ((n as f64) * cfg.train_fraction.clamp(0.1, 0.9)).floor() as usize;
    let calib_end = ((n as f64) * (cfg.train_fraction + cfg.calibration_fraction).clamp(0.2, 0.95))
        .floor() as usize;
    let train_end = train_end.clamp(1, n.saturating_sub(2).max(1));
    let calib_end = calib_end.clamp(train_end + 1, n.saturating_sub(1).max(train_end + 1));
    (train_end, calib_end)
}

pub fn train(records: &[MatchRecord], cfg: &TrainerConfig) -> Result<TrainOutcome, TrainError> {
    let examples = build_examples(records, cfg);
    train_on_examples(&examples, cfg)
}

pub fn train_from_store(
    store: &dyn RecordStore,
    cfg: &TrainerConfig,
) -> Result<TrainOutcome, TrainError> {
    let records = store
        .query(&RecordFilter::default())
        .map_err(|e| TrainError::Store(format!("{e:#}")))?;
    train(&records, cfg)
}

pub fn train_on_examples(
    examples: &[Example],
    cfg: &TrainerConfig,
) -> Result<TrainOutcome, TrainError> {
    let required = cfg.min_examples.max(10);
    if examples.len() < required {
        return Err(TrainError::InsufficientExamples {
            found: examples.len(),
            required,
        });
    }

    let (train_end, calib_end) = split_indices(examples.len(), cfg);
    let (train_set, rest) = examples.split_at(train_end);
    let (calib_set, val_set) = rest.split_at(calib_end - train_end);

    let positives = train_set.iter().filter(|e| e.over).count();
    let negatives = train_set.len() - positives;
    let over_rate = positives as f64 / train_set.len() as f64;
    if !(0.02..=0.98).contains(&over_rate) || positives < 10 || negatives < 10 {
        return Err(TrainError::DegenerateClassBalance {
            over_rate,
            positives,
            negatives,
        });
    }

    let rows: Vec<[f64; FEATURE_COUNT]> = train_set.iter().map(|e| e.features).collect();
    let labels: Vec<bool> = train_set.iter().map(|e| e.over).collect();
    let weights: Vec<f64> = train_set.iter().map(|e| e.weight).collect();
    let classifier = BoostedClassifier::fit(&rows, &labels, &weights, &cfg.boost);
    let train_probs: Vec<f64> = rows.iter().map(|x| classifier.predict_proba(x)).collect();
    let train_metrics = evaluate_weighted(&train_probs, &labels, &weights);

    let calib_raw: Vec<f64> = calib_set
        .iter()
        .map(|e| classifier.predict_proba(&e.features))
        .collect();
    let calib_labels: Vec<bool> = calib_set.iter().map(|e| e.over).collect();
    let calib_weights: Vec<f64> = calib_set.iter().map(|e| e.weight).collect();
    let calibrator = fit_calibrator(cfg.calibration, &calib_raw, &calib_labels, &calib_weights);

    let val_raw: Vec<f64> = val_set
        .iter()
        .map(|e| classifier.predict_proba(&e.features))
        .collect();
    let val_cal: Vec<f64> = val_raw.iter().map(|p| calibrator.apply(*p)).collect();
    let val_labels: Vec<bool> = val_set.iter().map(|e| e.over).collect();
    let val_weights: Vec<f64> = val_set.iter().map(|e| e.weight).collect();
    let validation_raw = evaluate_weighted(&val_raw, &val_labels, &val_weights);
    let validation_calibrated = evaluate_weighted(&val_cal, &val_labels, &val_weights);
    let reliability = calibration_bins(&val_cal, &val_labels, 10);
    let ece = expected_calibration_error(&reliability);
    let mean_predicted = mean(&val_cal);
    let observed = val_labels.iter().filter(|y| **y).count() as f64 / val_labels.len().max(1) as f64;
    let gap = (mean_predicted - observed).abs();

    tracing::info!(
        train = train_set.len(),
        calibration = calib_set.len(),
        validation = val_set.len(),
        over_rate,
        calibrator = calibrator.name(),
        train_log_loss = train_metrics.log_loss,
        val_log_loss_raw = validation_raw.log_loss,
        val_log_loss = validation_calibrated.log_loss,
        val_brier = validation_calibrated.brier,
        ece,
        mean_predicted,
        observed,
        "trained prop model"
    );

    let mut warnings = Vec::new();
    if gap > cfg.drift_tolerance {
        tracing::warn!(
            mean_predicted,
            observed,
            gap,
            tolerance = cfg.drift_tolerance,
            "calibration drift on validation split"
        );
        warnings.push(TrainingWarning::CalibrationDrift {
            mean_predicted,
            observed_over_rate: observed,
            gap,
            tolerance: cfg.drift_tolerance,
        });
    }

    let diagnostics = TrainingDiagnostics {
        train_examples: train_set.len(),
        calibration_examples: calib_set.len(),
        validation_examples: val_set.len(),
        train_over_rate: over_rate,
        calibration_method: calibrator.name().to_string(),
        train_metrics,
        validation_raw,
        validation_calibrated,
        mean_predicted,
        observed_over_rate: observed,
        calibration_gap: gap,
        expected_calibration_error: ece,
        reliability,
    };
    let model = TrainedModel::new(classifier, calibrator, diagnostics)
        .map_err(|e| TrainError::Artifact(format!("{e:#}")))?;
    Ok(TrainOutcome { model, warnings })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_records::{FakeLeagueConfig, generate};
    use crate::features::{FEATURE_NAMES, HISTORY_WINDOW};

    fn quick_config() -> TrainerConfig {
        TrainerConfig {
            boost: BoostParams {
                n_trees: 15,
                max_depth: 2,
                learning_rate: 0.2,
                ..Default::default()
            },
            min_examples: 50,
            ..Default::default()
        }
    }

    #[test]
    fn anchored_prop_sits_above_average() {
        let cfg = TrainerConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let prop = anchored_prop(4.0, &mut rng, &cfg);
            assert!(prop >= 4.0 + 0.75 - 5.0 * cfg.noise_std);
            assert!(prop <= 4.0 + 1.5 + 5.0 * cfg.noise_std);
        }
        let zero_noise = TrainerConfig {
            noise_std: 0.0,
            ..TrainerConfig::default()
        };
        assert_eq!(anchored_prop(-3.0, &mut rng, &zero_noise), 0.5);
    }

    #[test]
    fn recency_halves_each_half_life() {
        let latest = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let year_ago = latest - chrono::Duration::days(365);
        assert!((recency_weight(year_ago, latest, 365.0) - 0.5).abs() < 1e-12);
        assert_eq!(recency_weight(latest, latest, 365.0), 1.0);
    }

    #[test]
    fn examples_are_deterministic_and_chronological() {
        let records = generate(&FakeLeagueConfig::small(3));
        let cfg = quick_config();
        let a = build_examples(&records, &cfg);
        let b = build_examples(&records, &cfg);
        assert!(!a.is_empty());
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].date <= w[1].date));
        assert!(a.iter().all(|e| e.prop >= cfg.prop_floor && e.weight > 0.0));
    }

    #[test]
    fn trains_on_synthetic_league() {
        let records = generate(&FakeLeagueConfig::small(11));
        let outcome = train(&records, &quick_config()).unwrap();
        let d = &outcome.model.diagnostics;
        assert!(d.train_examples > d.validation_examples);
        assert!(d.validation_calibrated.samples > 0);
        assert!((0.0..=1.0).contains(&d.mean_predicted));
    }

    #[test]
    fn constant_outcomes_are_rejected() {
        let cfg = TrainerConfig {
            noise_std: 0.0,
            min_examples: 20,
            ..quick_config()
        };
        let examples: Vec<Example> = (0..100)
            .map(|i| Example {
                subject: "p".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i),
                features: [0.0; FEATURE_COUNT],
                prop: 5.75,
                actual: 5.0,
                over: false,
                weight: 1.0,
            })
            .collect();
        let err = train_on_examples(&examples, &cfg).unwrap_err();
        assert!(matches!(err, TrainError::DegenerateClassBalance { positives: 0, .. }));
    }

    #[test]
    fn long_histories_use_the_shared_window() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let samples: Vec<SeriesSample> = (0..60)
            .map(|i| SeriesSample {
                series_id: format!("s{i}"),
                date: start + chrono::Duration::days(7 * i),
                tournament: "LCK Summer 2024".to_string(),
                team: "GEN".to_string(),
                opponent: "T1".to_string(),
                stat: (3 + i % 4) as f64,
                maps: 2,
                deaths: 3.0,
                damage: 30_000.0,
                vision: 40.0,
                cs: 480.0,
                early: crate::series::EarlySummary::default(),
                roles: vec![crate::record_store::Role::Mid],
            })
            .collect();
        let subject = Subject {
            key: "chovy".to_string(),
            players: vec!["Chovy".to_string()],
        };
        let cfg = TrainerConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut out = Vec::new();
        let latest = samples[59].date;
        subject_examples(&subject, StatKind::Kills, &samples, latest, &cfg, &mut rng, &mut out);
        let played = FEATURE_NAMES.iter().position(|n| *n == "maps_played").unwrap();
        let most = out.iter().map(|e| e.features[played]).fold(0.0, f64::max);
        assert_eq!(most, HISTORY_WINDOW as f64);
        assert_eq!(out.last().map(|e| e.features[played]), Some(HISTORY_WINDOW as f64));
    }

    #[test]
    fn split_leaves_every_part_non_empty() {
        let cfg = TrainerConfig::default();
        for n in [3usize, 10, 1000] {
            let (a, b) = split_indices(n, &cfg);
            assert!(a >= 1 && a < b && b < n, "n={n} a={a} b={b}");
        }
    }
}
