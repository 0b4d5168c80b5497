// File: race_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use std::time::{Duration, Instant};

use common::{response_with_body, spawn_canned_server, spawn_capturing_server, spawn_killing_server, OK_EMPTY};
use rrace::racer::{AttemptResult, FailureStage, RaceConfig, RaceJob};
use rrace::request::RawRequest;
use tokio::net::TcpListener;

fn plain_config(fan_out: usize) -> RaceConfig {
    RaceConfig {
        fan_out,
        use_tls: false,
        timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fan_out_five_all_succeed() {
    let addr = spawn_canned_server(OK_EMPTY.to_vec()).await;
    let request = RawRequest::new("GET", "/", "127.0.0.1")
        .to_serialized()
        .unwrap();
    let job = RaceJob::new("127.0.0.1", addr.port(), request, plain_config(5)).unwrap();

    let report = job.run().await;

    assert_eq!(report.fan_out, 5);
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.successes(), 5);
    for (i, outcome) in report.outcomes.iter().enumerate() {
        assert_eq!(outcome.index, i);
        assert_eq!(outcome.status(), Some(200));
        assert!(outcome.suffix_sent_at_us.is_some());
    }
    assert!(report.race_window_us.is_some());
}

#[tokio::test]
async fn test_response_bodies_come_back() {
    let addr = spawn_canned_server(response_with_body(200, "granted")).await;
    let request = RawRequest::new("GET", "/redeem", "127.0.0.1")
        .to_serialized()
        .unwrap();
    let job = RaceJob::new("127.0.0.1", addr.port(), request, plain_config(3)).unwrap();

    let report = job.run().await;

    assert_eq!(report.successes(), 3);
    for outcome in &report.outcomes {
        match &outcome.result {
            AttemptResult::Success { response } => {
                assert_eq!(response.status, 200);
                assert_eq!(response.body, "granted");
                assert_eq!(response.header("connection"), Some("close"));
            }
            AttemptResult::Failure { stage, error } => {
                panic!("unexpected failure at {}: {}", stage, error)
            }
        }
    }
}

#[tokio::test]
async fn test_every_copy_arrives_byte_identical() {
    let (addr, mut captured) = spawn_capturing_server(OK_EMPTY.to_vec()).await;

    let mut request = RawRequest::new("POST", "/api/v1/users", "127.0.0.1");
    request.add_header("Content-Type", "application/json");
    request.add_header("Content-Length", "25");
    request.set_body(br#"{"name":"Alice","age":30}"#.to_vec());
    let serialized = request.to_serialized().unwrap();
    let wire = serialized.as_bytes().to_vec();

    let job = RaceJob::new("127.0.0.1", addr.port(), serialized, plain_config(3)).unwrap();
    let report = job.run().await;
    assert_eq!(report.successes(), 3);

    for _ in 0..3 {
        let received = captured.recv().await.expect("server captured a request");
        assert_eq!(received, wire);
    }
}

#[tokio::test]
async fn test_one_torn_down_connection_does_not_hurt_siblings() {
    let addr = spawn_killing_server(OK_EMPTY.to_vec(), 1).await;
    let request = RawRequest::new("GET", "/", "127.0.0.1")
        .to_serialized()
        .unwrap();
    let job = RaceJob::new("127.0.0.1", addr.port(), request, plain_config(3)).unwrap();

    let report = job.run().await;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.successes(), 2);
    assert_eq!(report.failures(), 1);

    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    for outcome in report.outcomes.iter().filter(|o| o.is_success()) {
        assert_eq!(outcome.status(), Some(200));
    }
}

#[tokio::test]
async fn test_refused_dials_fail_fast_without_deadlock() {
    // Bind and immediately drop to get a port that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let request = RawRequest::new("GET", "/", "127.0.0.1")
        .to_serialized()
        .unwrap();
    let job = RaceJob::new("127.0.0.1", addr.port(), request, plain_config(3)).unwrap();

    let started = Instant::now();
    let report = job.run().await;
    let elapsed = started.elapsed();

    assert_eq!(report.failures(), 3);
    for outcome in &report.outcomes {
        assert!(matches!(
            outcome.result,
            AttemptResult::Failure {
                stage: FailureStage::Dial,
                ..
            }
        ));
        assert!(outcome.suffix_sent_at_us.is_none());
    }
    // All workers failed and arrived; nothing waits out the 2 s deadline.
    assert!(elapsed < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_report_metadata() {
    let addr = spawn_canned_server(OK_EMPTY.to_vec()).await;
    let request = RawRequest::new("GET", "/", "127.0.0.1")
        .to_serialized()
        .unwrap();
    let job = RaceJob::new("127.0.0.1", addr.port(), request, plain_config(2)).unwrap();

    let report = job.run().await;

    assert_eq!(report.target, format!("127.0.0.1:{}", addr.port()));
    assert_eq!(report.request_fingerprint.len(), 64);
    assert!(report
        .request_fingerprint
        .chars()
        .all(|c| c.is_ascii_hexdigit()));
    assert!(report.duration_ms < 2_000);
}

#[test]
fn test_zero_fan_out_rejected_before_any_connection() {
    let request = RawRequest::new("GET", "/", "127.0.0.1")
        .to_serialized()
        .unwrap();
    let config = RaceConfig {
        fan_out: 0,
        use_tls: false,
        ..Default::default()
    };
    assert!(RaceJob::new("127.0.0.1", 80, request, config).is_err());
}
