// File: race_cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{anyhow, Context, Result};
use colored::*;
use indicatif::ProgressBar;
use log::warn;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::time::Duration;

use crate::cli::{parse_header_line, RaceArgs};
use crate::racer::{AttemptResult, RaceConfig, RaceJob, RaceReport, RaceTarget};
use crate::request::RawRequest;

pub async fn run_race_command(args: RaceArgs) -> Result<()> {
    let target = RaceTarget::parse(&args.target)?;
    let port = args.port.unwrap_or(target.port);
    let path = args.path.clone().unwrap_or_else(|| target.path.clone());

    let mut request = RawRequest::new(&args.method, &path, &target.host);
    for line in &args.headers {
        match parse_header_line(line) {
            Some((name, value)) => request.add_header(&name, &value),
            None => warn!("ignoring malformed header argument: {:?}", line),
        }
    }

    let body = match (&args.body, &args.body_file) {
        (Some(body), _) => body.clone().into_bytes(),
        (None, Some(path)) => std::fs::read(path)
            .with_context(|| format!("failed to read body file {:?}", path))?,
        (None, None) => Vec::new(),
    };
    if !body.is_empty() && !request.has_header("content-length") {
        warn!("request body present without a Content-Length header; the target may ignore it");
    }
    request.set_body(body);

    let config = RaceConfig {
        fan_out: args.count,
        timeout: Duration::from_millis(args.timeout_ms),
        use_tls: target.use_tls,
        verify_tls: !args.insecure,
        ..Default::default()
    };
    let job = RaceJob::new(&target.host, port, request.to_serialized()?, config)?;

    let pb = ProgressBar::new_spinner();
    pb.set_message(format!(
        "racing {} connections against {}:{}",
        args.count, target.host, port
    ));
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = job.run().await;
    pb.finish_and_clear();

    display_summary(&report);

    if let Some(dir) = &args.output_dir {
        let saved = save_report(&report, dir, &args.output_format)?;
        println!("\nReport saved to: {}", saved);
    }

    Ok(())
}

pub fn display_summary(report: &RaceReport) {
    println!("\nRace Summary");
    println!("================");
    println!("Target: {}", report.target);
    println!(
        "Connections: {} ({} / {})",
        report.fan_out,
        format!("{} ok", report.successes()).green(),
        format!("{} failed", report.failures()).red()
    );
    if let Some(window) = report.race_window_us {
        println!("Race window: {} us between first and last suffix", window);
    }
    println!("Duration: {} ms", report.duration_ms);

    let mut by_status: HashMap<u16, usize> = HashMap::new();
    for outcome in &report.outcomes {
        if let Some(status) = outcome.status() {
            *by_status.entry(status).or_insert(0) += 1;
        }
    }
    if !by_status.is_empty() {
        let mut statuses: Vec<_> = by_status.into_iter().collect();
        statuses.sort_by_key(|(status, _)| *status);
        println!("Status distribution:");
        for (status, count) in statuses {
            let rendered = if (200..300).contains(&status) {
                status.to_string().green()
            } else {
                status.to_string().yellow()
            };
            println!("  {} x{}", rendered, count);
        }
    }

    println!("\nPer-connection outcomes:");
    for outcome in &report.outcomes {
        match &outcome.result {
            AttemptResult::Success { response } => {
                println!(
                    "  [{}] {} {} ({} body bytes)",
                    outcome.index,
                    response.status.to_string().green(),
                    response.status_text,
                    response.body.len()
                );
            }
            AttemptResult::Failure { stage, error } => {
                println!(
                    "  [{}] {} at {}: {}",
                    outcome.index,
                    "failed".red(),
                    stage,
                    error
                );
            }
        }
    }
}

/// Write the report under a timestamped name in `dir`. Returns the path.
pub fn save_report(report: &RaceReport, dir: &str, format: &str) -> Result<String> {
    std::fs::create_dir_all(dir)?;
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");

    let filename = match format {
        "json" => {
            let filename = format!("{}/race_report_{}.json", dir, timestamp);
            let mut file = File::create(&filename)?;
            let json = serde_json::to_string_pretty(report)?;
            file.write_all(json.as_bytes())?;
            filename
        }
        "jsonl" => {
            let filename = format!("{}/race_report_{}.jsonl", dir, timestamp);
            let mut file = File::create(&filename)?;
            for outcome in &report.outcomes {
                let json = serde_json::to_string(outcome)?;
                writeln!(file, "{}", json)?;
            }
            filename
        }
        "txt" => {
            let filename = format!("{}/race_report_{}.txt", dir, timestamp);
            let mut file = File::create(&filename)?;
            file.write_all(generate_text_report(report).as_bytes())?;
            filename
        }
        _ => return Err(anyhow!("Unsupported output format: {}", format)),
    };

    Ok(filename)
}

fn generate_text_report(report: &RaceReport) -> String {
    let mut out = String::new();
    out.push_str("rrace report\n");
    out.push_str("============\n");
    out.push_str(&format!("Target: {}\n", report.target));
    out.push_str(&format!("Started: {}\n", report.started_at.format("%Y-%m-%d %H:%M:%S UTC")));
    out.push_str(&format!("Request fingerprint: {}\n", report.request_fingerprint));
    out.push_str(&format!(
        "Connections: {} ({} ok, {} failed)\n",
        report.fan_out,
        report.successes(),
        report.failures()
    ));
    if let Some(window) = report.race_window_us {
        out.push_str(&format!("Race window: {} us\n", window));
    }
    out.push_str(&format!("Duration: {} ms\n\n", report.duration_ms));

    for outcome in &report.outcomes {
        match &outcome.result {
            AttemptResult::Success { response } => {
                out.push_str(&format!(
                    "[{}] {} {} ({} body bytes)\n",
                    outcome.index,
                    response.status,
                    response.status_text,
                    response.body.len()
                ));
            }
            AttemptResult::Failure { stage, error } => {
                out.push_str(&format!(
                    "[{}] failed at {}: {}\n",
                    outcome.index, stage, error
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::racer::{AttemptOutcome, FailureStage};
    use crate::response::RawHttpResponse;

    fn sample_report() -> RaceReport {
        RaceReport {
            target: "example.com:443".to_string(),
            fan_out: 2,
            request_fingerprint: "ab".repeat(32),
            started_at: chrono::Utc::now(),
            duration_ms: 42,
            race_window_us: Some(150),
            outcomes: vec![
                AttemptOutcome {
                    index: 0,
                    result: AttemptResult::Success {
                        response: RawHttpResponse {
                            http_version: "HTTP/1.1".to_string(),
                            status: 200,
                            status_text: "OK".to_string(),
                            headers: vec![],
                            body: "done".to_string(),
                        },
                    },
                    suffix_sent_at_us: Some(1000),
                },
                AttemptOutcome {
                    index: 1,
                    result: AttemptResult::Failure {
                        stage: FailureStage::Dial,
                        error: "connect failed: connection refused".to_string(),
                    },
                    suffix_sent_at_us: None,
                },
            ],
        }
    }

    #[test]
    fn test_text_report_contents() {
        let text = generate_text_report(&sample_report());
        assert!(text.contains("Target: example.com:443"));
        assert!(text.contains("Race window: 150 us"));
        assert!(text.contains("[0] 200 OK"));
        assert!(text.contains("[1] failed at dial"));
    }

    #[test]
    fn test_save_report_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_report(
            &sample_report(),
            dir.path().to_str().unwrap(),
            "json",
        )
        .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: RaceReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.fan_out, 2);
        assert_eq!(parsed.outcomes.len(), 2);
        assert_eq!(parsed.outcomes[1].index, 1);
    }

    #[test]
    fn test_save_report_jsonl_one_line_per_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_report(
            &sample_report(),
            dir.path().to_str().unwrap(),
            "jsonl",
        )
        .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn test_save_report_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_report(&sample_report(), dir.path().to_str().unwrap(), "html");
        assert!(result.is_err());
    }
}
