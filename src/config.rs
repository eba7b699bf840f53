use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::tiers::{DEFAULT_RECENT_MONTHS, MIN_SERIES};

pub const DEFAULT_BOOTSTRAP_ITERATIONS: usize = 1000;
pub const DEFAULT_CURVE_STEP: f64 = 0.5;
pub const DEFAULT_CURVE_HALF_WIDTH: usize = 6;

/// Serving-side knobs. Every field has a `PROPS_*` override.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub min_series: usize,
    pub recent_months: u32,
    pub bootstrap_iterations: usize,
    pub curve_step: f64,
    pub curve_half_width: usize,
    pub model_path: PathBuf,
    pub db_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_series: MIN_SERIES,
            recent_months: DEFAULT_RECENT_MONTHS,
            bootstrap_iterations: DEFAULT_BOOTSTRAP_ITERATIONS,
            curve_step: DEFAULT_CURVE_STEP,
            curve_half_width: DEFAULT_CURVE_HALF_WIDTH,
            model_path: PathBuf::from("data/prop_model_v1.json"),
            db_path: PathBuf::from("data/player_maps.sqlite"),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_series: env_parse("PROPS_MIN_SERIES").unwrap_or(d.min_series).max(1),
            recent_months: env_parse("PROPS_RECENT_MONTHS")
                .unwrap_or(d.recent_months)
                .clamp(6, 12),
            bootstrap_iterations: env_parse("PROPS_BOOTSTRAP_ITERATIONS")
                .unwrap_or(d.bootstrap_iterations)
                .clamp(100, 20_000),
            curve_step: env_parse::<f64>("PROPS_CURVE_STEP")
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(d.curve_step),
            curve_half_width: env_parse("PROPS_CURVE_HALF_WIDTH")
                .unwrap_or(d.curve_half_width)
                .min(50),
            model_path: env_path("PROPS_MODEL_PATH").unwrap_or(d.model_path),
            db_path: env_path("PROPS_DB_PATH").unwrap_or(d.db_path),
        }
    }
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

pub fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|raw| {
        !matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "off" | "no"
        )
    })
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Loads `.env.local` then `.env`; missing files are ignored.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

/// Stderr subscriber honoring `RUST_LOG`, `info` otherwise.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
