mod common;

use std::sync::Arc;

use common::weekly_series;
use prop_oracle::config::EngineConfig;
use prop_oracle::model::{ModelHandle, TrainedModel};
use prop_oracle::predict::Prediction;
use prop_oracle::record_store::{MemoryStore, Role};
use prop_oracle::service::{PropRequest, PropService};

fn service(p_over: f64) -> PropService {
    let records = weekly_series("Faker", Role::Mid, "LCK Summer 2024", "2024-06-01", 12);
    PropService::new(
        Arc::new(MemoryStore::new(records)),
        Arc::new(ModelHandle::new(TrainedModel::baseline(p_over))),
        EngineConfig {
            bootstrap_iterations: 300,
            ..EngineConfig::default()
        },
    )
}

fn request(prop: f64) -> PropRequest {
    serde_json::from_value(serde_json::json!({
        "player_names": ["Faker"],
        "prop_type": "kills",
        "prop_value": prop,
        "map_range": [1, 2],
        "tournament": "LCK Summer 2024",
        "match_date": "2024-10-01",
        "position_roles": ["mid"],
    }))
    .unwrap()
}

#[test]
fn curve_center_matches_the_single_prediction() {
    let resp = service(0.6).handle(&request(6.5)).unwrap();
    let center: Vec<_> = resp.prediction_curve.iter().filter(|p| p.is_input_prop).collect();
    assert_eq!(center.len(), 1);
    let center = center[0];
    assert_eq!(center.prop_value, 6.5);
    assert_eq!(center.prediction, resp.prediction);
    assert_eq!(center.confidence, resp.confidence);
    assert_eq!(center.expected_stat, resp.expected_stat);
}

#[test]
fn curve_is_ascending_and_symmetric_around_the_line() {
    let resp = service(0.5).handle(&request(6.5)).unwrap();
    let curve = &resp.prediction_curve;
    assert_eq!(curve.len(), 13);
    assert!(curve.windows(2).all(|w| w[0].prop_value < w[1].prop_value));
    assert_eq!(curve[0].prop_value, 3.5);
    assert_eq!(curve[12].prop_value, 9.5);
    assert!(curve.iter().all(|p| p.expected_stat == resp.expected_stat));
}

#[test]
fn lines_far_below_expectation_read_over() {
    let resp = service(0.5).handle(&request(6.5)).unwrap();
    let curve = &resp.prediction_curve;
    assert_eq!(curve[0].prediction, Prediction::Over);
    assert!(curve.iter().all(|p| p.confidence >= 10.0 && p.confidence <= 95.0));
    assert!(
        curve
            .iter()
            .all(|p| (p.prediction == Prediction::Over) == (resp.expected_stat > p.prop_value)
                || (p.prop_value - resp.expected_stat).abs() < 0.01)
    );
}

#[test]
fn identical_requests_give_identical_responses() {
    let svc = service(0.55);
    let a = svc.handle(&request(7.0)).unwrap();
    let b = svc.handle(&request(7.0)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn published_model_takes_effect_on_next_request() {
    let svc = service(0.5);
    let before = svc.handle(&request(6.5)).unwrap();
    svc.models().publish(TrainedModel::baseline(0.9));
    let after = svc.handle(&request(6.5)).unwrap();
    assert_ne!(before.model_fingerprint, after.model_fingerprint);
    assert_eq!(svc.models().generation(), 1);
}
