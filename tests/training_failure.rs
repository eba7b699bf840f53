use chrono::NaiveDate;

use prop_oracle::error::TrainError;
use prop_oracle::features::FEATURE_COUNT;
use prop_oracle::model::{ModelHandle, TrainedModel};
use prop_oracle::trainer::{self, Example, TrainerConfig};

fn examples(n: usize, over: impl Fn(usize) -> bool) -> Vec<Example> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..n)
        .map(|i| {
            let mut features = [0.0; FEATURE_COUNT];
            features[0] = i as f64;
            Example {
                subject: format!("p{}", i % 7),
                date: start + chrono::Duration::days(i as i64),
                features,
                prop: 4.5,
                actual: if over(i) { 6.0 } else { 3.0 },
                over: over(i),
                weight: 1.0,
            }
        })
        .collect()
}

#[test]
fn too_few_examples_is_an_error() {
    let cfg = TrainerConfig::default();
    let err = trainer::train_on_examples(&examples(20, |i| i % 2 == 0), &cfg).unwrap_err();
    assert_eq!(
        err,
        TrainError::InsufficientExamples {
            found: 20,
            required: cfg.min_examples
        }
    );
}

#[test]
fn one_sided_labels_are_rejected() {
    let cfg = TrainerConfig::default();
    let err = trainer::train_on_examples(&examples(400, |_| true), &cfg).unwrap_err();
    assert!(matches!(err, TrainError::DegenerateClassBalance { negatives: 0, .. }));
}

#[test]
fn failed_retrain_keeps_serving_the_previous_model() {
    let handle = ModelHandle::new(TrainedModel::baseline(0.5));
    let before = handle.current();
    let cfg = TrainerConfig::default();

    let result = handle.retrain(|| {
        trainer::train_on_examples(&examples(400, |_| false), &cfg).map(|outcome| outcome.model)
    });

    assert!(result.is_err());
    assert_eq!(handle.generation(), 0);
    assert_eq!(handle.current().fingerprint, before.fingerprint);
}

#[test]
fn empty_history_cannot_train() {
    let err = trainer::train(&[], &TrainerConfig::default()).unwrap_err();
    assert!(matches!(err, TrainError::InsufficientExamples { found: 0, .. }));
}
