use anyhow::Result;
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::record_store::{MatchRecord, RecordFilter, RecordStore, StatKind, region_of};
use crate::series::{MapRange, SeriesSample, aggregate};

pub const MIN_SERIES: usize = 5;
pub const DEFAULT_RECENT_MONTHS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierInfo {
    pub tier: u8,
    pub weight: f64,
    pub name: String,
    pub series_used: usize,
    pub maps_used: usize,
}

impl TierInfo {
    pub fn no_data() -> Self {
        Self {
            tier: 0,
            weight: 0.0,
            name: "no_data".to_string(),
            series_used: 0,
            maps_used: 0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.tier != 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ExactTournament,
    RegionYear,
    TeamYear,
    RecentMonths,
    AllHistory,
}

pub const CASCADE: [Tier; 5] = [
    Tier::ExactTournament,
    Tier::RegionYear,
    Tier::TeamYear,
    Tier::RecentMonths,
    Tier::AllHistory,
];

impl Tier {
    pub fn number(self) -> u8 {
        match self {
            Tier::ExactTournament => 1,
            Tier::RegionYear => 2,
            Tier::TeamYear => 3,
            Tier::RecentMonths => 4,
            Tier::AllHistory => 5,
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            Tier::ExactTournament => 1.0,
            Tier::RegionYear => 0.8,
            Tier::TeamYear => 0.7,
            Tier::RecentMonths => 0.5,
            Tier::AllHistory => 0.3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::ExactTournament => "exact_tournament",
            Tier::RegionYear => "region_year",
            Tier::TeamYear => "team_year",
            Tier::RecentMonths => "recent_months",
            Tier::AllHistory => "all_history",
        }
    }

    /// Record filter for this tier, or `None` when the request lacks the field it keys on.
    pub fn filter(self, q: &TierQuery) -> Option<RecordFilter> {
        let base = RecordFilter::for_players(&q.players).before(q.match_date);
        let year = q.match_date.year();
        match self {
            Tier::ExactTournament => non_empty(&q.tournament).map(|t| base.tournament(t)),
            Tier::RegionYear => non_empty(&q.tournament)
                .and_then(region_of)
                .map(|region| base.region(region).year(year)),
            Tier::TeamYear => non_empty(&q.team).map(|team| base.team(team).year(year)),
            Tier::RecentMonths => {
                let since = q
                    .match_date
                    .checked_sub_months(Months::new(q.recent_months))
                    .unwrap_or(NaiveDate::MIN);
                Some(base.since(since))
            }
            Tier::AllHistory => Some(base),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Everything the cascade needs to select history for one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct TierQuery {
    pub players: Vec<String>,
    pub stat: StatKind,
    pub range: MapRange,
    pub tournament: Option<String>,
    pub team: Option<String>,
    pub match_date: NaiveDate,
    pub min_series: usize,
    pub recent_months: u32,
    pub strict_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierAttempt {
    pub tier: u8,
    pub name: &'static str,
    pub series_found: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierResolution {
    pub info: TierInfo,
    pub samples: Vec<SeriesSample>,
    /// Per-map rows behind `samples`.
    pub records: Vec<MatchRecord>,
    pub attempts: Vec<TierAttempt>,
}

enum ResolveState {
    Attempt(usize),
    Satisfied(Tier, Vec<MatchRecord>, Vec<SeriesSample>),
    Exhausted,
}

pub fn resolve(store: &dyn RecordStore, q: &TierQuery) -> Result<TierResolution> {
    let limit = if q.strict_mode { 1 } else { CASCADE.len() };
    let min_series = q.min_series.max(1);
    let mut attempts = Vec::new();
    let mut state = ResolveState::Attempt(0);

    loop {
        state = match state {
            ResolveState::Attempt(i) if i >= limit => ResolveState::Exhausted,
            ResolveState::Attempt(i) => {
                let tier = CASCADE[i];
                match tier.filter(q) {
                    None => {
                        attempts.push(TierAttempt {
                            tier: tier.number(),
                            name: tier.name(),
                            series_found: 0,
                            skipped: true,
                        });
                        ResolveState::Attempt(i + 1)
                    }
                    Some(filter) => {
                        let records = store.query(&filter)?;
                        let samples = aggregate(&records, &q.players, q.stat, q.range);
                        tracing::debug!(
                            tier = tier.number(),
                            records = records.len(),
                            series = samples.len(),
                            "tier attempt"
                        );
                        attempts.push(TierAttempt {
                            tier: tier.number(),
                            name: tier.name(),
                            series_found: samples.len(),
                            skipped: false,
                        });
                        if samples.len() >= min_series {
                            ResolveState::Satisfied(tier, records, samples)
                        } else {
                            ResolveState::Attempt(i + 1)
                        }
                    }
                }
            }
            ResolveState::Satisfied(tier, records, samples) => {
                let info = TierInfo {
                    tier: tier.number(),
                    weight: tier.weight(),
                    name: tier.name().to_string(),
                    series_used: samples.len(),
                    maps_used: samples.iter().map(|s| s.maps).sum(),
                };
                tracing::debug!(tier = info.tier, series = info.series_used, "tier selected");
                return Ok(TierResolution {
                    info,
                    samples,
                    records,
                    attempts,
                });
            }
            ResolveState::Exhausted => {
                return Ok(TierResolution {
                    info: TierInfo::no_data(),
                    samples: Vec::new(),
                    records: Vec::new(),
                    attempts,
                });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_descend_through_cascade() {
        let weights: Vec<f64> = CASCADE.iter().map(|t| t.weight()).collect();
        assert_eq!(weights, vec![1.0, 0.8, 0.7, 0.5, 0.3]);
        assert!(CASCADE.windows(2).all(|w| w[0].number() + 1 == w[1].number()));
    }

    #[test]
    fn no_data_is_fully_populated() {
        let info = TierInfo::no_data();
        assert_eq!(info.tier, 0);
        assert_eq!(info.weight, 0.0);
        assert_eq!(info.maps_used, 0);
        assert_eq!(info.name, "no_data");
    }

    #[test]
    fn tier_filters_skip_missing_fields() {
        let q = TierQuery {
            players: vec!["Faker".to_string()],
            stat: StatKind::Kills,
            range: MapRange::new(1, 2).unwrap(),
            tournament: Some("Mystery Cup".to_string()),
            team: None,
            match_date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            min_series: MIN_SERIES,
            recent_months: DEFAULT_RECENT_MONTHS,
            strict_mode: false,
        };
        assert!(Tier::ExactTournament.filter(&q).is_some());
        assert!(Tier::RegionYear.filter(&q).is_none());
        assert!(Tier::TeamYear.filter(&q).is_none());
        let recent = Tier::RecentMonths.filter(&q).unwrap();
        assert_eq!(recent.since, NaiveDate::from_ymd_opt(2023, 9, 1));
        assert_eq!(recent.before, Some(q.match_date));
    }
}
