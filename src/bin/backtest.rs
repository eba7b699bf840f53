use std::path::PathBuf;

use chrono::NaiveDate;

use prop_oracle::calibration::{self, Metrics};
use prop_oracle::config::{EngineConfig, init_logging, load_dotenv};
use prop_oracle::fake_records::{FakeLeagueConfig, generate};
use prop_oracle::record_store::{MatchRecord, RecordFilter, RecordStore, SqliteStore};
use prop_oracle::service::parse_match_date;
use prop_oracle::trainer::{self, TrainerConfig};

/// Walk-forward check: train on everything before the cutoff, score examples on or after it.
fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging();

    let engine = EngineConfig::from_env();
    let cfg = TrainerConfig::from_env();
    let records = if has_flag("--fake") {
        generate(&FakeLeagueConfig::standard(7))
    } else {
        let db_path = parse_value_arg("--db")
            .map(PathBuf::from)
            .unwrap_or(engine.db_path);
        SqliteStore::open(&db_path)?.query(&RecordFilter::default())?
    };
    if records.is_empty() {
        anyhow::bail!("no records to backtest");
    }

    let cutoff = parse_value_arg("--cutoff")
        .and_then(|raw| parse_match_date(&raw))
        .unwrap_or_else(|| default_cutoff(&records));
    let history: Vec<MatchRecord> = records.iter().filter(|r| r.date < cutoff).cloned().collect();
    println!("Cutoff: {cutoff}");
    println!("History records: {} / {}", history.len(), records.len());

    let outcome = match trainer::train(&history, &cfg) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("Training on history failed: {err}");
            std::process::exit(1);
        }
    };
    let model = outcome.model;

    let holdout: Vec<_> = trainer::build_examples(&records, &cfg)
        .into_iter()
        .filter(|e| e.date >= cutoff)
        .collect();
    if holdout.is_empty() {
        anyhow::bail!("no holdout examples on or after {cutoff}");
    }

    let labels: Vec<bool> = holdout.iter().map(|e| e.over).collect();
    let raw: Vec<f64> = holdout
        .iter()
        .map(|e| model.classifier.predict_proba(&e.features))
        .collect();
    let calibrated: Vec<f64> = raw.iter().map(|p| model.calibrator.apply(*p)).collect();
    let prior = vec![model.diagnostics.train_over_rate; holdout.len()];

    print_metrics("Prior (train over rate)", &calibration::evaluate(&prior, &labels));
    print_metrics("Model (raw)", &calibration::evaluate(&raw, &labels));
    print_metrics("Model (calibrated)", &calibration::evaluate(&calibrated, &labels));

    let bins = calibration::calibration_bins(&calibrated, &labels, 10);
    println!("ECE: {:.4}", calibration::expected_calibration_error(&bins));
    for bin in bins.iter().filter(|b| b.count > 0) {
        println!(
            "  [{:.1}, {:.1}) n={} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }

    let confident: Vec<(f64, bool)> = calibrated
        .iter()
        .zip(&labels)
        .filter(|(p, _)| (**p - 0.5).abs() >= 0.1)
        .map(|(p, y)| (*p, *y))
        .collect();
    let hits = confident.iter().filter(|(p, y)| (*p >= 0.5) == *y).count();
    println!(
        "Confident picks (|p-0.5|>=0.1): {} hit_rate={:.3}",
        confident.len(),
        hits as f64 / confident.len().max(1) as f64
    );
    Ok(())
}

fn default_cutoff(records: &[MatchRecord]) -> NaiveDate {
    let mut dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
    dates.sort();
    dates[(dates.len() * 4 / 5).min(dates.len() - 1)]
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

fn parse_value_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(v.to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.clone());
        }
    }
    None
}
