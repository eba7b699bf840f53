pub mod calibration;
pub mod config;
pub mod curve;
pub mod error;
pub mod fake_records;
pub mod features;
pub mod model;
pub mod predict;
pub mod reasoning;
pub mod record_store;
pub mod series;
pub mod service;
pub mod tiers;
pub mod trainer;
