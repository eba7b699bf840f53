use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::curve::{CurvePoint, generate_curve};
use crate::error::{NoDataDetails, PropError};
use crate::features::{MatchContext, extract, history_window};
use crate::model::ModelHandle;
use crate::predict::{CiMethod, Prediction, PredictionEngine, PredictionWarning};
use crate::record_store::{RecordStore, Role, StatKind, normalize_name};
use crate::series::{MapRange, aggregate, data_years};
use crate::tiers::{TierQuery, resolve};

const MAX_MAP_INDEX: u8 = 5;
const NO_DATA_LISTING: usize = 20;

fn default_map_range() -> [u8; 2] {
    [1, 2]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRequest {
    pub player_names: Vec<String>,
    pub prop_type: String,
    pub prop_value: f64,
    #[serde(default = "default_map_range")]
    pub map_range: [u8; 2],
    #[serde(default)]
    pub opponent: Option<String>,
    #[serde(default)]
    pub tournament: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    /// ISO-8601 date or RFC 3339 timestamp; today when absent.
    #[serde(default)]
    pub match_date: Option<String>,
    #[serde(default)]
    pub position_roles: Vec<String>,
    #[serde(default)]
    pub strict_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatSummary {
    pub series: usize,
    pub avg: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleDetails {
    pub maps_used: usize,
    pub series_used: usize,
    pub data_tier: u8,
    pub tier_name: String,
    pub tier_weight: f64,
    pub fallback_used: bool,
    /// Series drawn from each tournament.
    pub sample_sources: BTreeMap<String, usize>,
    pub volatility: f64,
    pub ci_method: CiMethod,
    pub strict_mode_applied: bool,
    pub early_game_quality: crate::features::DataQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropResponse {
    pub prediction: Prediction,
    pub confidence: f64,
    pub base_model_confidence: f64,
    pub expected_stat: f64,
    pub confidence_interval: [f64; 2],
    pub reasoning: String,
    /// Feature snapshot the model scored, by feature name.
    pub player_stats: BTreeMap<String, f64>,
    /// Per-member history in the selected sample.
    pub player_summaries: BTreeMap<String, PlayerStatSummary>,
    /// Year span of the sample, e.g. `2023-2024`.
    pub data_years: String,
    pub sample_details: SampleDetails,
    pub confidence_warning: Option<String>,
    pub prediction_curve: Vec<CurvePoint>,
    pub warnings: Vec<PredictionWarning>,
    pub model_fingerprint: String,
}

/// Validated form of a [`PropRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub players: Vec<String>,
    pub stat: StatKind,
    pub prop: f64,
    pub range: MapRange,
    pub match_date: NaiveDate,
    pub roles: Vec<Role>,
}

pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

impl PropRequest {
    pub fn validate(&self) -> Result<ParsedRequest, PropError> {
        let mut seen = BTreeSet::new();
        let mut players = Vec::new();
        for name in &self.player_names {
            let trimmed = name.trim();
            let key = normalize_name(trimmed);
            if key.is_empty() {
                return Err(PropError::InvalidRequest(format!(
                    "player name {name:?} has no letters or digits"
                )));
            }
            if seen.insert(key) {
                players.push(trimmed.to_string());
            }
        }
        if players.is_empty() {
            return Err(PropError::InvalidRequest(
                "player_names must not be empty".to_string(),
            ));
        }
        let stat = StatKind::parse(&self.prop_type).ok_or_else(|| {
            PropError::InvalidRequest(format!(
                "prop_type must be kills or assists, got {:?}",
                self.prop_type
            ))
        })?;
        if !self.prop_value.is_finite() || self.prop_value < 0.0 {
            return Err(PropError::InvalidRequest(format!(
                "prop_value must be a non-negative number, got {}",
                self.prop_value
            )));
        }
        let [first, last] = self.map_range;
        let range = MapRange::new(first, last)
            .filter(|r| r.last <= MAX_MAP_INDEX)
            .ok_or_else(|| {
                PropError::InvalidRequest(format!(
                    "map_range must satisfy 1 <= a <= b <= {MAX_MAP_INDEX}, got [{first}, {last}]"
                ))
            })?;
        let match_date = match self.match_date.as_deref().map(str::trim) {
            None | Some("") => Utc::now().date_naive(),
            Some(raw) => parse_match_date(raw).ok_or_else(|| {
                PropError::InvalidRequest(format!("unparseable match_date {raw:?}"))
            })?,
        };
        let roles = self
            .position_roles
            .iter()
            .map(|r| Role::parse(r))
            .filter(|r| *r != Role::Unknown)
            .collect();
        Ok(ParsedRequest {
            players,
            stat,
            prop: self.prop_value,
            range,
            match_date,
            roles,
        })
    }
}

/// Request entry point: tier resolution, features, prediction and curve.
pub struct PropService {
    store: Arc<dyn RecordStore>,
    models: Arc<ModelHandle>,
    config: EngineConfig,
}

impl PropService {
    pub fn new(store: Arc<dyn RecordStore>, models: Arc<ModelHandle>, config: EngineConfig) -> Self {
        Self {
            store,
            models,
            config,
        }
    }

    pub fn models(&self) -> &Arc<ModelHandle> {
        &self.models
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self, request: &PropRequest) -> Result<PropResponse, PropError> {
        let req = request.validate()?;
        let query = TierQuery {
            players: req.players.clone(),
            stat: req.stat,
            range: req.range,
            tournament: request.tournament.clone(),
            team: request.team.clone(),
            match_date: req.match_date,
            min_series: self.config.min_series,
            recent_months: self.config.recent_months,
            strict_mode: request.strict_mode,
        };
        let resolution = resolve(self.store.as_ref(), &query).map_err(PropError::store)?;
        if resolution.info.tier == 0 {
            return Err(self.no_data(&req, resolution.attempts));
        }

        let roles = if req.roles.is_empty() {
            dominant_roles(&resolution.samples, req.players.len())
        } else {
            req.roles.clone()
        };
        let ctx = MatchContext {
            stat: req.stat,
            roles,
            opponent: request.opponent.clone(),
            tournament: request.tournament.clone(),
            combo_size: req.players.len(),
        };
        let features = extract(history_window(&resolution.samples), &ctx);

        // One snapshot for both the prediction and the curve.
        let engine = PredictionEngine::new(self.models.current())
            .with_bootstrap_iterations(self.config.bootstrap_iterations);
        let result = engine.predict(&features, req.prop, &resolution.info);
        let curve = generate_curve(
            &engine,
            &features,
            req.prop,
            self.config.curve_step,
            self.config.curve_half_width,
            &resolution.info,
        )
        .into_iter()
        .map(|p| CurvePoint {
            confidence: round1(p.confidence),
            expected_stat: round2(p.expected_stat),
            ..p
        })
        .collect();

        let player_stats: BTreeMap<String, f64> = features
            .named()
            .into_iter()
            .map(|(name, v)| (name.to_string(), round2(v)))
            .collect();

        let mut player_summaries = BTreeMap::new();
        for player in &req.players {
            let solo = aggregate(&resolution.records, std::slice::from_ref(player), req.stat, req.range);
            player_summaries.insert(player.clone(), summarize(solo.iter().map(|s| s.stat)));
        }

        let mut sample_sources: BTreeMap<String, usize> = BTreeMap::new();
        for s in &resolution.samples {
            *sample_sources.entry(s.tournament.clone()).or_default() += 1;
        }

        let info = &resolution.info;
        let confidence_warning = if info.is_fallback() {
            Some(format!(
                "No qualifying sample in the exact tournament; using tier {} ({}) data at {:.0}% weight.",
                info.tier,
                info.name.replace('_', " "),
                info.weight * 100.0
            ))
        } else if info.series_used < 10 {
            Some(format!(
                "Only {} series available; estimates are less stable.",
                info.series_used
            ))
        } else {
            None
        };

        tracing::info!(
            players = %req.players.join("+"),
            stat = %req.stat,
            prop = req.prop,
            tier = info.tier,
            prediction = result.prediction.as_str(),
            confidence = result.confidence,
            "scored prop"
        );

        Ok(PropResponse {
            prediction: result.prediction,
            confidence: round1(result.confidence),
            base_model_confidence: round1(result.base_model_confidence),
            expected_stat: round2(result.expected_stat),
            confidence_interval: [
                round2(result.confidence_interval.lower),
                round2(result.confidence_interval.upper),
            ],
            reasoning: result.reasoning,
            player_stats,
            player_summaries,
            data_years: year_span(&data_years(&resolution.samples)),
            sample_details: SampleDetails {
                maps_used: info.maps_used,
                series_used: info.series_used,
                data_tier: info.tier,
                tier_name: info.name.clone(),
                tier_weight: info.weight,
                fallback_used: info.is_fallback(),
                sample_sources,
                volatility: round2(features.volatility),
                ci_method: result.ci_method,
                strict_mode_applied: request.strict_mode,
                early_game_quality: features.early_game_quality,
            },
            confidence_warning,
            prediction_curve: curve,
            warnings: result.warnings,
            model_fingerprint: engine.model().fingerprint.clone(),
        })
    }

    fn no_data(&self, req: &ParsedRequest, attempts: Vec<crate::tiers::TierAttempt>) -> PropError {
        let available_tournaments = self
            .store
            .tournaments()
            .map(|mut t| {
                t.truncate(NO_DATA_LISTING);
                t
            })
            .unwrap_or_default();
        let sample_players = self
            .store
            .players()
            .map(|mut p| {
                p.truncate(NO_DATA_LISTING);
                p
            })
            .unwrap_or_default();
        tracing::warn!(players = %req.players.join("+"), "no data in any tier");
        PropError::NoData(Box::new(NoDataDetails {
            players: req.players.clone(),
            attempts,
            available_tournaments,
            sample_players,
        }))
    }
}

/// Most frequent roles across the sample, one per combo member.
fn dominant_roles(samples: &[crate::series::SeriesSample], members: usize) -> Vec<Role> {
    let mut counts: HashMap<Role, usize> = HashMap::new();
    for s in samples {
        for r in &s.roles {
            if *r != Role::Unknown {
                *counts.entry(*r).or_default() += 1;
            }
        }
    }
    let mut ranked: Vec<(Role, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(members).map(|(r, _)| r).collect()
}

fn summarize(values: impl Iterator<Item = f64>) -> PlayerStatSummary {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return PlayerStatSummary {
            series: 0,
            avg: 0.0,
            std_dev: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    let n = values.len() as f64;
    let avg = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n;
    PlayerStatSummary {
        series: values.len(),
        avg: round2(avg),
        std_dev: round2(var.sqrt()),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// `2024`, `2023-2024`, or empty when there are no years.
fn year_span(years: &[i32]) -> String {
    match (years.first(), years.last()) {
        (Some(first), Some(last)) if first == last => first.to_string(),
        (Some(first), Some(last)) => format!("{first}-{last}"),
        _ => String::new(),
    }
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PropRequest {
        PropRequest {
            player_names: vec!["Faker".to_string()],
            prop_type: "kills".to_string(),
            prop_value: 4.5,
            map_range: [1, 2],
            opponent: None,
            tournament: Some("LCK Summer 2024".to_string()),
            team: None,
            match_date: Some("2024-08-01".to_string()),
            position_roles: vec!["mid".to_string()],
            strict_mode: false,
        }
    }

    #[test]
    fn validate_accepts_iso_and_rfc3339_dates() {
        let mut r = request();
        assert_eq!(
            r.validate().unwrap().match_date,
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap()
        );
        r.match_date = Some("2024-08-01T18:00:00+09:00".to_string());
        assert_eq!(
            r.validate().unwrap().match_date,
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap()
        );
    }

    #[test]
    fn validate_rejects_bad_inputs() {
        let mut r = request();
        r.prop_type = "deaths".to_string();
        assert!(matches!(r.validate(), Err(PropError::InvalidRequest(_))));

        let mut r = request();
        r.map_range = [2, 1];
        assert!(matches!(r.validate(), Err(PropError::InvalidRequest(_))));

        let mut r = request();
        r.prop_value = f64::NAN;
        assert!(matches!(r.validate(), Err(PropError::InvalidRequest(_))));

        let mut r = request();
        r.player_names = vec![" ".to_string()];
        assert!(matches!(r.validate(), Err(PropError::InvalidRequest(_))));
    }

    #[test]
    fn duplicate_players_collapse() {
        let mut r = request();
        r.player_names = vec!["Faker".to_string(), "faker ".to_string()];
        assert_eq!(r.validate().unwrap().players, vec!["Faker".to_string()]);
    }

    #[test]
    fn hangul_combo_members_stay_distinct() {
        let mut r = request();
        r.player_names = vec!["페이커".to_string(), "쵸비".to_string()];
        assert_eq!(
            r.validate().unwrap().players,
            vec!["페이커".to_string(), "쵸비".to_string()]
        );
        r.player_names = vec!["--".to_string()];
        assert!(matches!(r.validate(), Err(PropError::InvalidRequest(_))));
    }

    #[test]
    fn year_span_formats() {
        assert_eq!(year_span(&[]), "");
        assert_eq!(year_span(&[2024]), "2024");
        assert_eq!(year_span(&[2023, 2024]), "2023-2024");
        assert_eq!(year_span(&[2022, 2023, 2024]), "2022-2024");
    }

    #[test]
    fn request_json_defaults() {
        let r: PropRequest = serde_json::from_str(
            r#"{"player_names":["Chovy"],"prop_type":"assists","prop_value":6.5}"#,
        )
        .unwrap();
        assert_eq!(r.map_range, [1, 2]);
        assert!(!r.strict_mode);
        assert!(r.position_roles.is_empty());
    }
}
