use std::path::PathBuf;

use anyhow::Context;

use prop_oracle::calibration::Metrics;
use prop_oracle::config::{EngineConfig, init_logging, load_dotenv};
use prop_oracle::fake_records::{FakeLeagueConfig, generate};
use prop_oracle::record_store::{MatchRecord, RecordFilter, RecordStore, SqliteStore};
use prop_oracle::trainer::{self, TrainerConfig, TrainingWarning};

fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging();

    let engine = EngineConfig::from_env();
    let cfg = TrainerConfig::from_env();
    let out = parse_path_arg("--out").unwrap_or_else(|| engine.model_path.clone());

    let records = load_records(&engine)?;
    println!("Records: {}", records.len());

    let outcome = match trainer::train(&records, &cfg) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("Training failed: {err}");
            eprintln!("Existing artifact at {} left untouched.", out.display());
            std::process::exit(1);
        }
    };

    let d = &outcome.model.diagnostics;
    println!(
        "Split: train={} calibration={} validation={}",
        d.train_examples, d.calibration_examples, d.validation_examples
    );
    println!("Train over rate: {:.3}", d.train_over_rate);
    println!("Calibrator: {}", d.calibration_method);
    print_metrics("Train", &d.train_metrics);
    print_metrics("Validation (raw)", &d.validation_raw);
    print_metrics("Validation (calibrated)", &d.validation_calibrated);
    println!(
        "Mean predicted={:.3} observed={:.3} gap={:.3} ece={:.4}",
        d.mean_predicted, d.observed_over_rate, d.calibration_gap, d.expected_calibration_error
    );
    println!("Reliability:");
    for bin in &d.reliability {
        if bin.count == 0 {
            continue;
        }
        println!(
            "  [{:.1}, {:.1}) n={} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }

    let drifted = outcome
        .warnings
        .iter()
        .any(|w| matches!(w, TrainingWarning::CalibrationDrift { .. }));
    if drifted && !has_flag("--force") {
        eprintln!("Calibration drift above tolerance; pass --force to save anyway.");
        std::process::exit(1);
    }

    outcome.model.save(&out)?;
    println!("Saved {} (fingerprint {})", out.display(), outcome.model.fingerprint);
    Ok(())
}

fn load_records(engine: &EngineConfig) -> anyhow::Result<Vec<MatchRecord>> {
    if has_flag("--fake") {
        let seed = std::env::var("PROPS_FAKE_SEED")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(7);
        return Ok(generate(&FakeLeagueConfig::standard(seed)));
    }
    let db_path = parse_path_arg("--db").unwrap_or_else(|| engine.db_path.clone());
    let store = SqliteStore::open(&db_path)?;
    store
        .query(&RecordFilter::default())
        .with_context(|| format!("load records from {}", db_path.display()))
}

fn print_metrics(label: &str, metrics: &Metrics) {
    println!("{label}:");
    println!(
        "  samples={} brier={:.4} log_loss={:.4} accuracy={:.3}",
        metrics.samples, metrics.brier, metrics.log_loss, metrics.accuracy
    );
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(PathBuf::from(v));
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
