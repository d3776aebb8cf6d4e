//! E2E tests for configuration and reports
//!
//! Tests the path the CLI takes: a config file on disk feeds the run, and
//! the finished run is written out as a JSON report.

use latencytester::latency::{
    FailureReason, LatencyConfig, LatencyError, LatencyReport, LatencyState, LatencyTest,
};
use latencytester::LatencyEngine;

fn ambient(period: usize) -> Vec<i16> {
    (0..period)
        .map(|i| if i % 2 == 0 { 100 } else { -100 })
        .collect()
}

/// Run one scripted trial with a 240 sample round trip at 48kHz
fn run_single_trial(config: LatencyConfig) -> LatencyTest {
    let period = config.period_size;
    let mut test = LatencyTest::new(config).unwrap();
    let quiet = ambient(period);
    let onset: Vec<i16> = (0..period)
        .map(|i| if i < 48 { 100 } else { 20000 })
        .collect();

    while test.state() != LatencyState::PlayAndListen {
        test.handle_input(&quiet).unwrap();
    }
    for _ in 0..3 {
        test.handle_input(&quiet).unwrap();
    }
    test.handle_input(&onset).unwrap();
    test
}

#[test]
fn test_config_file_drives_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latencytester").join("config.json");

    LatencyConfig {
        period_size: 64,
        trials: 1,
        silence_guard_periods: 0,
        ..Default::default()
    }
    .save(&path)
    .unwrap();

    let config = LatencyConfig::load(&path);
    assert_eq!(config.period_size, 64);

    let test = run_single_trial(config);
    assert_eq!(test.state(), LatencyState::CompleteSuccess);
    assert_eq!(test.final_result(), Some(5.0));
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "period_size": 512 }"#).unwrap();

    let loaded = LatencyConfig::load(&path);
    assert_eq!(loaded.period_size, 512);
    assert_eq!(loaded.sample_rate, 48000);
    assert_eq!(loaded.trials, 5);
    assert_eq!(loaded.channels, 1);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_report_json() {
    let test = run_single_trial(LatencyConfig {
        period_size: 64,
        trials: 1,
        ..Default::default()
    });

    let json = serde_json::to_string_pretty(&test.report()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["state"], "CompleteSuccess");
    assert_eq!(value["final_ms"], 5.0);
    assert!(value["failure"].is_null());
    assert_eq!(value["trials_ms"].as_array().unwrap().len(), 1);

    let report: LatencyReport = serde_json::from_str(&json).unwrap();
    assert_eq!(report.state, LatencyState::CompleteSuccess);
    assert_eq!(report.trials_ms, vec![5.0]);
    assert!(report.ambient_db.is_some());
}

#[test]
fn test_report_json_for_uncalibrated_failure() {
    // Time limit hit during the lead-in: no ambient level measured yet
    let mut test = LatencyTest::new(LatencyConfig {
        period_size: 64,
        ..Default::default()
    })
    .unwrap();
    test.handle_input(&ambient(64)).unwrap();
    test.abort(FailureReason::TimeLimitExceeded);

    let json = serde_json::to_string(&test.report()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["ambient_db"].is_null());

    let report: LatencyReport = serde_json::from_str(&json).unwrap();
    assert_eq!(report.state, LatencyState::CompleteFailure);
    assert_eq!(report.failure, Some(FailureReason::TimeLimitExceeded));
    assert!(report.ambient_db.is_none());
    assert!(report.trials_ms.is_empty());
}

#[test]
fn test_stereo_rejected_at_setup() {
    let config = LatencyConfig {
        channels: 2,
        ..Default::default()
    };
    assert_eq!(
        LatencyTest::new(config).unwrap_err(),
        LatencyError::UnsupportedChannels(2)
    );
}

#[test]
fn test_wrong_block_length_is_fatal() {
    let mut test = LatencyTest::new(LatencyConfig {
        period_size: 64,
        ..Default::default()
    })
    .unwrap();

    let err = test.handle_input(&[0i16; 32]).unwrap_err();
    assert_eq!(
        err,
        LatencyError::PeriodSizeMismatch {
            expected: 64,
            actual: 32
        }
    );
    assert_eq!(test.state(), LatencyState::SkipLead);
    assert_eq!(test.frames_captured(), 0);
}

#[test]
fn test_engine_keeps_config() {
    let config = LatencyConfig {
        period_size: 128,
        ..Default::default()
    };
    let engine = LatencyEngine::new(config.clone());
    assert_eq!(engine.config(), &config);
    assert!(engine.device_name().is_none());
}
