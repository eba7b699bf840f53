use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use prop_oracle::config::{EngineConfig, init_logging, load_dotenv};
use prop_oracle::error::PropError;
use prop_oracle::fake_records::{FakeLeagueConfig, generate};
use prop_oracle::model::{ModelHandle, load_or_baseline};
use prop_oracle::record_store::{MemoryStore, RecordStore, SqliteStore};
use prop_oracle::service::{PropRequest, PropService};

fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging();

    let mut config = EngineConfig::from_env();
    if let Some(path) = parse_path_arg("--db") {
        config.db_path = path;
    }
    if let Some(path) = parse_path_arg("--model") {
        config.model_path = path;
    }

    let raw = match parse_path_arg("--request") {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("read request {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read request from stdin")?;
            buf
        }
    };
    let request: PropRequest = serde_json::from_str(&raw).context("parse prop request json")?;

    let store: Arc<dyn RecordStore> = if has_flag("--fake") {
        let records = generate(&FakeLeagueConfig::standard(fake_seed()));
        tracing::info!(records = records.len(), "serving from synthetic history");
        Arc::new(MemoryStore::new(records))
    } else {
        let db = SqliteStore::open(&config.db_path)?;
        Arc::new(db.snapshot()?)
    };
    let models = Arc::new(ModelHandle::new(load_or_baseline(&config)));
    let service = PropService::new(store, models, config);

    match service.handle(&request) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&error_body(&err))?);
            std::process::exit(2);
        }
    }
}

fn error_body(err: &PropError) -> serde_json::Value {
    match err {
        PropError::NoData(details) => json!({
            "error": err.kind(),
            "message": err.to_string(),
            "details": details,
        }),
        _ => json!({
            "error": err.kind(),
            "message": err.to_string(),
        }),
    }
}

fn fake_seed() -> u64 {
    std::env::var("PROPS_FAKE_SEED")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(7)
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
