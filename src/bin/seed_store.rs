use std::path::PathBuf;

use prop_oracle::config::{EngineConfig, init_logging, load_dotenv};
use prop_oracle::fake_records::{FakeLeagueConfig, generate};
use prop_oracle::record_store::{RecordStore, SqliteStore};

fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging();

    let engine = EngineConfig::from_env();
    let db_path = parse_path_arg("--db").unwrap_or(engine.db_path);
    let seed = std::env::var("PROPS_FAKE_SEED")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(7);
    let cfg = if has_flag("--small") {
        FakeLeagueConfig::small(seed)
    } else {
        FakeLeagueConfig::standard(seed)
    };

    let records = generate(&cfg);
    let store = SqliteStore::open(&db_path)?;
    let written = store.upsert_records(&records)?;
    println!("Seeded {written} player-maps into {}", db_path.display());
    println!("Tournaments: {}", store.tournaments()?.len());
    println!("Players: {}", store.players()?.len());
    Ok(())
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
