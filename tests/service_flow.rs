mod common;

use std::sync::Arc;

use common::weekly_series;
use prop_oracle::config::EngineConfig;
use prop_oracle::error::PropError;
use prop_oracle::features::HISTORY_WINDOW;
use prop_oracle::model::{ModelHandle, TrainedModel};
use prop_oracle::predict::Prediction;
use prop_oracle::record_store::{MemoryStore, Role};
use prop_oracle::service::{PropRequest, PropService};

fn service() -> PropService {
    let mut records = weekly_series("Chovy", Role::Mid, "LCK Summer 2024", "2024-06-01", 8);
    records.extend(weekly_series("Peyz", Role::Bot, "LCK Summer 2024", "2024-06-01", 8));
    let config = EngineConfig {
        bootstrap_iterations: 200,
        ..EngineConfig::default()
    };
    PropService::new(
        Arc::new(MemoryStore::new(records)),
        Arc::new(ModelHandle::new(TrainedModel::baseline(0.5))),
        config,
    )
}

fn request(players: &[&str], tournament: &str) -> PropRequest {
    PropRequest {
        player_names: players.iter().map(|p| p.to_string()).collect(),
        prop_type: "kills".to_string(),
        prop_value: 6.5,
        map_range: [1, 2],
        opponent: Some("T1".to_string()),
        tournament: Some(tournament.to_string()),
        team: None,
        match_date: Some("2024-09-01".to_string()),
        position_roles: Vec::new(),
        strict_mode: false,
    }
}

#[test]
fn exact_tournament_request_is_fully_populated() {
    let resp = service().handle(&request(&["Chovy"], "LCK Summer 2024")).unwrap();
    assert_eq!(resp.sample_details.data_tier, 1);
    assert_eq!(resp.sample_details.series_used, 8);
    assert_eq!(resp.sample_details.maps_used, 16);
    assert!(!resp.sample_details.fallback_used);
    assert_eq!(resp.sample_details.sample_sources.len(), 1);
    assert_eq!(resp.sample_details.sample_sources["LCK Summer 2024"], 8);
    assert_eq!(resp.data_years, "2024");
    assert!(resp.confidence_warning.is_none());
    assert!(resp.confidence >= 10.0 && resp.confidence <= 95.0);
    assert!(resp.confidence_interval[0] <= resp.confidence_interval[1]);
    assert!(!resp.reasoning.is_empty());
    assert_eq!(resp.player_stats["maps_played"], 8.0);
    assert!(resp.player_stats.contains_key("avg_stat"));
    assert_eq!(resp.player_summaries["Chovy"].series, 8);
    assert_eq!(resp.model_fingerprint, TrainedModel::baseline(0.5).fingerprint);
}

#[test]
fn fallback_is_disclosed() {
    let resp = service().handle(&request(&["Chovy"], "Worlds 2024")).unwrap();
    assert_eq!(resp.sample_details.data_tier, 4);
    assert_eq!(resp.sample_details.tier_weight, 0.5);
    assert!(resp.sample_details.fallback_used);
    assert!(resp.confidence <= 95.0 * 0.5);
    assert!(resp.confidence_warning.is_some());
    assert!(resp.reasoning.starts_with("Fallback data used"));
}

#[test]
fn strict_mode_reports_no_data_with_details() {
    let mut req = request(&["Chovy"], "Worlds 2024");
    req.strict_mode = true;
    match service().handle(&req) {
        Err(PropError::NoData(details)) => {
            assert_eq!(details.attempts.len(), 1);
            assert_eq!(details.available_tournaments, vec!["LCK Summer 2024".to_string()]);
            assert_eq!(details.sample_players, vec!["Chovy".to_string(), "Peyz".to_string()]);
        }
        other => panic!("expected no data, got {other:?}"),
    }
}

#[test]
fn unknown_player_is_no_data() {
    let err = service().handle(&request(&["Ghost"], "LCK Summer 2024")).unwrap_err();
    assert_eq!(err.kind(), "no_data");
}

#[test]
fn invalid_requests_are_rejected_before_lookup() {
    let mut req = request(&["Chovy"], "LCK Summer 2024");
    req.map_range = [1, 6];
    assert_eq!(service().handle(&req).unwrap_err().kind(), "invalid_request");

    let mut req = request(&["Chovy"], "LCK Summer 2024");
    req.match_date = Some("next tuesday".to_string());
    assert_eq!(service().handle(&req).unwrap_err().kind(), "invalid_request");
}

#[test]
fn combo_request_reports_each_member() {
    let resp = service().handle(&request(&["Chovy", "Peyz"], "LCK Summer 2024")).unwrap();
    assert_eq!(resp.sample_details.series_used, 8);
    let names: Vec<&String> = resp.player_summaries.keys().collect();
    assert_eq!(names, vec!["Chovy", "Peyz"]);
    let solo = service().handle(&request(&["Chovy"], "LCK Summer 2024")).unwrap();
    assert!(resp.expected_stat > solo.expected_stat);
}

#[test]
fn low_line_reads_over() {
    let mut req = request(&["Chovy"], "LCK Summer 2024");
    req.prop_value = 0.5;
    let resp = service().handle(&req).unwrap();
    assert_eq!(resp.prediction, Prediction::Over);
}

#[test]
fn long_history_is_scored_on_the_recent_window() {
    let records = weekly_series("Chovy", Role::Mid, "LCK Summer 2024", "2023-01-02", 60);
    let service = PropService::new(
        Arc::new(MemoryStore::new(records)),
        Arc::new(ModelHandle::new(TrainedModel::baseline(0.5))),
        EngineConfig::default(),
    );
    let mut req = request(&["Chovy"], "LCK Summer 2024");
    req.match_date = Some("2024-06-01".to_string());
    let resp = service.handle(&req).unwrap();
    assert_eq!(resp.sample_details.series_used, 60);
    assert_eq!(resp.player_stats["maps_played"], HISTORY_WINDOW as f64);
    assert_eq!(resp.data_years, "2023-2024");
    assert_eq!(resp.sample_details.sample_sources["LCK Summer 2024"], 60);
}
