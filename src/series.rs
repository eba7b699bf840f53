use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::record_store::{EARLY_GAME_FIELDS, MatchRecord, Role, StatKind, normalize_name};

/// Inclusive map range within a series, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapRange {
    pub first: u8,
    pub last: u8,
}

impl MapRange {
    pub fn new(first: u8, last: u8) -> Option<Self> {
        (first >= 1 && first <= last).then_some(Self { first, last })
    }

    pub fn len(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.first > self.last
    }

    pub fn contains(&self, map_index: u8) -> bool {
        (self.first..=self.last).contains(&map_index)
    }
}

/// Running sums for the six early-game columns across player-maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EarlySummary {
    pub sums: [f64; EARLY_GAME_FIELDS],
    pub counts: [u32; EARLY_GAME_FIELDS],
    /// Player-maps that could have carried an observation.
    pub slots: u32,
}

impl EarlySummary {
    pub fn add(&mut self, record: &MatchRecord) {
        self.slots += 1;
        for (i, v) in record.early.values().into_iter().enumerate() {
            if let Some(v) = v.filter(|v| v.is_finite()) {
                self.sums[i] += v;
                self.counts[i] += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &EarlySummary) {
        self.slots += other.slots;
        for i in 0..EARLY_GAME_FIELDS {
            self.sums[i] += other.sums[i];
            self.counts[i] += other.counts[i];
        }
    }

    pub fn mean(&self, field: usize) -> Option<f64> {
        (self.counts[field] > 0).then(|| self.sums[field] / self.counts[field] as f64)
    }

    /// Share of possible observations that were real.
    pub fn coverage(&self) -> f64 {
        if self.slots == 0 {
            return 0.0;
        }
        let real: u32 = self.counts.iter().sum();
        real as f64 / (self.slots as f64 * EARLY_GAME_FIELDS as f64)
    }
}

/// One subject's combined performance over the map range of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSample {
    pub series_id: String,
    pub date: NaiveDate,
    pub tournament: String,
    pub team: String,
    pub opponent: String,
    pub stat: f64,
    pub maps: usize,
    pub deaths: f64,
    pub damage: f64,
    pub vision: f64,
    pub cs: f64,
    pub early: EarlySummary,
    pub roles: Vec<Role>,
}

/// Sums `stat` over `range` for the player set, one sample per series, sorted by date.
///
/// Series where any member is missing any in-range map are dropped.
pub fn aggregate(
    records: &[MatchRecord],
    players: &[String],
    stat: StatKind,
    range: MapRange,
) -> Vec<SeriesSample> {
    let wanted: BTreeSet<String> = players.iter().map(|p| normalize_name(p)).collect();
    if wanted.is_empty() || wanted.contains("") {
        return Vec::new();
    }

    // series -> player -> map_index -> record
    let mut by_series: HashMap<&str, BTreeMap<String, BTreeMap<u8, &MatchRecord>>> =
        HashMap::new();
    for r in records {
        if !range.contains(r.map_index) {
            continue;
        }
        let player = r.player_norm();
        if !wanted.contains(&player) {
            continue;
        }
        by_series
            .entry(r.series_id.as_str())
            .or_default()
            .entry(player)
            .or_default()
            .insert(r.map_index, r);
    }

    let mut out: Vec<SeriesSample> = by_series
        .into_iter()
        .filter_map(|(series_id, per_player)| {
            let complete = wanted.iter().all(|p| {
                per_player
                    .get(p)
                    .is_some_and(|maps| maps.len() == range.len())
            });
            if !complete {
                return None;
            }
            combine(series_id, &per_player, stat, range)
        })
        .collect();

    out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.series_id.cmp(&b.series_id)));
    out
}

fn combine(
    series_id: &str,
    per_player: &BTreeMap<String, BTreeMap<u8, &MatchRecord>>,
    stat: StatKind,
    range: MapRange,
) -> Option<SeriesSample> {
    let first = per_player.values().flat_map(|maps| maps.values()).next()?;
    let mut sample = SeriesSample {
        series_id: series_id.to_string(),
        date: first.date,
        tournament: first.tournament.clone(),
        team: first.team.clone(),
        opponent: first.opponent.clone(),
        stat: 0.0,
        maps: range.len(),
        deaths: 0.0,
        damage: 0.0,
        vision: 0.0,
        cs: 0.0,
        early: EarlySummary::default(),
        roles: Vec::new(),
    };
    let mut roles = BTreeSet::new();
    for r in per_player.values().flat_map(|maps| maps.values()) {
        roles.insert(r.role);
        sample.stat += r.stat(stat);
        sample.deaths += r.deaths as f64;
        sample.damage += r.damage;
        sample.vision += r.vision;
        sample.cs += r.cs;
        sample.early.add(r);
    }
    sample.roles = roles.into_iter().collect();
    Some(sample)
}

/// Distinct calendar years covered, ascending.
pub fn data_years(samples: &[SeriesSample]) -> Vec<i32> {
    use chrono::Datelike;
    samples
        .iter()
        .map(|s| s.date.year())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::EarlyGame;

    fn map(player: &str, series: &str, idx: u8, kills: u32) -> MatchRecord {
        MatchRecord {
            player: player.to_string(),
            team: "T1".to_string(),
            opponent: "HLE".to_string(),
            tournament: "LCK Summer 2024".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            series_id: series.to_string(),
            map_index: idx,
            role: Role::Mid,
            kills,
            assists: 1,
            deaths: 1,
            damage: 10_000.0,
            vision: 20.0,
            cs: 250.0,
            early: EarlyGame {
                gold_at_10: Some(3400.0),
                ..Default::default()
            },
        }
    }

    #[test]
    fn sums_maps_in_range() {
        let records = vec![map("Faker", "s1", 1, 2), map("Faker", "s1", 2, 3), map("Faker", "s1", 3, 9)];
        let out = aggregate(
            &records,
            &["faker".to_string()],
            StatKind::Kills,
            MapRange::new(1, 2).unwrap(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].stat, 5.0);
        assert_eq!(out[0].maps, 2);
        assert_eq!(out[0].early.counts[0], 2);
        assert_eq!(out[0].early.slots, 2);
    }

    #[test]
    fn drops_series_missing_a_map() {
        let records = vec![map("Faker", "s1", 1, 2), map("Faker", "s2", 1, 4), map("Faker", "s2", 2, 1)];
        let out = aggregate(
            &records,
            &["Faker".to_string()],
            StatKind::Kills,
            MapRange::new(1, 2).unwrap(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].series_id, "s2");
    }

    #[test]
    fn combo_requires_every_member() {
        let mut records = vec![map("Faker", "s1", 1, 2), map("Oner", "s1", 1, 1)];
        records.push(map("Faker", "s2", 1, 5));
        let out = aggregate(
            &records,
            &["Faker".to_string(), "Oner".to_string()],
            StatKind::Kills,
            MapRange::new(1, 1).unwrap(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].stat, 3.0);
    }

    #[test]
    fn other_scripts_never_borrow_each_others_series() {
        let records = vec![map("쵸비", "s1", 1, 9), map("쵸비", "s1", 2, 9)];
        let out = aggregate(
            &records,
            &["페이커".to_string()],
            StatKind::Kills,
            MapRange::new(1, 2).unwrap(),
        );
        assert!(out.is_empty());
        let punct = aggregate(&records, &["--".to_string()], StatKind::Kills, MapRange::new(1, 2).unwrap());
        assert!(punct.is_empty());
    }

    #[test]
    fn map_range_rejects_inverted() {
        assert!(MapRange::new(2, 1).is_none());
        assert!(MapRange::new(0, 1).is_none());
        assert_eq!(MapRange::new(1, 3).unwrap().len(), 3);
    }
}
