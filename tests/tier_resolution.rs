mod common;

use common::{date, weekly_series};
use prop_oracle::record_store::{MemoryStore, Role, StatKind};
use prop_oracle::series::MapRange;
use prop_oracle::tiers::{DEFAULT_RECENT_MONTHS, MIN_SERIES, TierQuery, resolve};

fn query(tournament: Option<&str>, team: Option<&str>, strict: bool) -> TierQuery {
    TierQuery {
        players: vec!["Chovy".to_string()],
        stat: StatKind::Kills,
        range: MapRange::new(1, 2).unwrap(),
        tournament: tournament.map(String::from),
        team: team.map(String::from),
        match_date: date("2024-09-01"),
        min_series: MIN_SERIES,
        recent_months: DEFAULT_RECENT_MONTHS,
        strict_mode: strict,
    }
}

#[test]
fn exact_tournament_wins_when_deep_enough() {
    let store = MemoryStore::new(weekly_series("Chovy", Role::Mid, "LCK Summer 2024", "2024-06-01", 6));
    let res = resolve(&store, &query(Some("LCK Summer 2024"), None, false)).unwrap();
    assert_eq!(res.info.tier, 1);
    assert_eq!(res.info.weight, 1.0);
    assert_eq!(res.info.series_used, 6);
    assert_eq!(res.info.maps_used, 12);
    assert_eq!(res.attempts.len(), 1);
}

#[test]
fn thin_tournament_falls_back_to_region_year() {
    let mut records = weekly_series("Chovy", Role::Mid, "LCK Summer 2024", "2024-06-01", 3);
    records.extend(weekly_series("Chovy", Role::Mid, "LCK Spring 2024", "2024-01-20", 4));
    let store = MemoryStore::new(records);

    let res = resolve(&store, &query(Some("LCK Summer 2024"), None, false)).unwrap();
    assert_eq!(res.info.tier, 2);
    assert_eq!(res.info.weight, 0.8);
    assert_eq!(res.info.series_used, 7);
    assert!(res.info.is_fallback());
    assert_eq!(res.attempts[0].series_found, 3);
}

#[test]
fn strict_mode_never_leaves_tier_one() {
    let mut records = weekly_series("Chovy", Role::Mid, "LCK Summer 2024", "2024-06-01", 3);
    records.extend(weekly_series("Chovy", Role::Mid, "LCK Spring 2024", "2024-01-20", 10));
    let store = MemoryStore::new(records);

    let res = resolve(&store, &query(Some("LCK Summer 2024"), None, true)).unwrap();
    assert_eq!(res.info.tier, 0);
    assert!(res.samples.is_empty());
    assert_eq!(res.attempts.len(), 1);
    assert_eq!(res.attempts[0].tier, 1);
}

#[test]
fn team_year_used_when_region_is_unknown() {
    let store = MemoryStore::new(weekly_series("Chovy", Role::Mid, "Mystery Cup", "2024-03-01", 6));
    let res = resolve(&store, &query(Some("LCK Summer 2024"), Some("gen.g"), false)).unwrap();
    assert_eq!(res.info.tier, 3);
    assert_eq!(res.info.weight, 0.7);
}

#[test]
fn old_history_only_reaches_all_history_tier() {
    let store = MemoryStore::new(weekly_series("Chovy", Role::Mid, "LCK Summer 2021", "2021-06-01", 8));
    let res = resolve(&store, &query(None, None, false)).unwrap();
    assert_eq!(res.info.tier, 5);
    assert_eq!(res.info.weight, 0.3);
    let skipped: Vec<u8> = res.attempts.iter().filter(|a| a.skipped).map(|a| a.tier).collect();
    assert_eq!(skipped, vec![1, 2, 3]);
}

#[test]
fn games_on_or_after_match_date_never_count() {
    let store = MemoryStore::new(weekly_series("Chovy", Role::Mid, "LCK Summer 2024", "2024-09-01", 8));
    let res = resolve(&store, &query(Some("LCK Summer 2024"), None, false)).unwrap();
    assert_eq!(res.info.tier, 0);
    assert_eq!(res.info.name, "no_data");
    assert_eq!(res.attempts.len(), 5);
}

#[test]
fn recent_tier_name_does_not_depend_on_window_length() {
    let store = MemoryStore::new(weekly_series("Chovy", Role::Mid, "Mystery Cup", "2024-04-01", 8));
    for months in [6, DEFAULT_RECENT_MONTHS] {
        let q = TierQuery {
            recent_months: months,
            ..query(None, None, false)
        };
        let res = resolve(&store, &q).unwrap();
        assert_eq!(res.info.tier, 4, "window {months}");
        assert_eq!(res.info.name, "recent_months");
    }
}
