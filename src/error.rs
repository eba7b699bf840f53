use serde::Serialize;
use thiserror::Error;

use crate::tiers::TierAttempt;

/// What the resolver tried before giving up, for the caller to act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoDataDetails {
    pub players: Vec<String>,
    pub attempts: Vec<TierAttempt>,
    pub available_tournaments: Vec<String>,
    pub sample_players: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PropError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no historical series for {} in any data tier", .0.players.join(", "))]
    NoData(Box<NoDataDetails>),
    #[error("model error: {0}")]
    Model(String),
    #[error("record store error: {0}")]
    Store(String),
}

impl PropError {
    pub fn store(err: anyhow::Error) -> Self {
        PropError::Store(format!("{err:#}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PropError::InvalidRequest(_) => "invalid_request",
            PropError::NoData(_) => "no_data",
            PropError::Model(_) => "model",
            PropError::Store(_) => "store",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainError {
    #[error("only {found} training examples, need at least {required}")]
    InsufficientExamples { found: usize, required: usize },
    #[error("degenerate class balance: over rate {over_rate:.3} ({positives} over / {negatives} under)")]
    DegenerateClassBalance {
        over_rate: f64,
        positives: usize,
        negatives: usize,
    },
    #[error("record store error: {0}")]
    Store(String),
    #[error("artifact error: {0}")]
    Artifact(String),
}
