#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use prop_oracle::record_store::{EarlyGame, MatchRecord, Role};

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

/// One player's maps in one series; `kills[i]` is map `i + 1`.
pub fn series_maps(
    player: &str,
    role: Role,
    tournament: &str,
    day: NaiveDate,
    series_id: &str,
    kills: &[u32],
) -> Vec<MatchRecord> {
    kills
        .iter()
        .enumerate()
        .map(|(i, k)| MatchRecord {
            player: player.to_string(),
            team: "Gen.G".to_string(),
            opponent: "T1".to_string(),
            tournament: tournament.to_string(),
            date: day,
            series_id: series_id.to_string(),
            map_index: i as u8 + 1,
            role,
            kills: *k,
            assists: k + 4,
            deaths: 2,
            damage: 18_000.0 + 1_000.0 * *k as f64,
            vision: 25.0,
            cs: 270.0,
            early: EarlyGame {
                gold_at_10: Some(3_400.0),
                xp_at_10: Some(4_100.0),
                cs_at_10: Some(85.0),
                gold_diff_15: Some(250.0),
                xp_diff_15: Some(120.0),
                cs_diff_15: Some(4.0),
            },
        })
        .collect()
}

/// `count` weekly two-map series for `player` starting at `start`.
pub fn weekly_series(
    player: &str,
    role: Role,
    tournament: &str,
    start: &str,
    count: usize,
) -> Vec<MatchRecord> {
    let start = date(start);
    (0..count)
        .flat_map(|i| {
            let day = start + Duration::days(7 * i as i64);
            let id = format!("{tournament}-{i}");
            let kills = [2 + (i % 4) as u32, 3 + (i % 3) as u32];
            series_maps(player, role, tournament, day, &id, &kills)
        })
        .collect()
}
