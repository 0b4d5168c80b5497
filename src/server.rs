// File: server.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use axum::{
    extract::{Query, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::error::InputError;
use crate::racer::{RaceConfig, RaceJob, RaceReport, RaceTarget, DEFAULT_TIMEOUT_MS};
use crate::request::RawRequest;

/// Largest inbound body the front end will buffer for re-serialization.
const MAX_INBOUND_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Query surface of the `/race` endpoint. The inbound request's own method,
/// path, headers and body are the raced request; these parameters say where
/// to aim it and how wide to fan out.
#[derive(Debug, Deserialize)]
pub struct RaceParams {
    /// Target URL; scheme selects TLS, its path replaces the inbound path
    /// unless `rewrite_path=false`.
    pub target: String,
    pub count: usize,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub insecure: Option<bool>,
    pub rewrite_path: Option<bool>,
}

pub fn app() -> Router {
    Router::new().route("/race", any(race_handler))
}

pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("race api listening on {}", addr);
    axum::serve(listener, app()).await
}

async fn race_handler(Query(params): Query<RaceParams>, request: Request) -> Response {
    match run_race(params, request).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            warn!("race request rejected: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn run_race(params: RaceParams, request: Request) -> Result<RaceReport, InputError> {
    let target = RaceTarget::parse(&params.target)?;
    let port = params.port.unwrap_or(target.port);

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_INBOUND_BODY_BYTES)
        .await
        .map_err(|e| InputError::BodyRead(e.to_string()))?;

    let path = if params.rewrite_path.unwrap_or(true) {
        target.path.clone()
    } else {
        parts.uri.path().to_string()
    };

    let mut raw = RawRequest::new(parts.method.as_str(), &path, &target.host);
    for (name, value) in parts.headers.iter() {
        // The transport-level Host of the inbound hop is not caller data; the
        // serializer appends the target host itself.
        if name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        let value = match value.to_str() {
            Ok(v) => v.to_string(),
            Err(_) => String::from_utf8_lossy(value.as_bytes()).to_string(),
        };
        raw.add_header(name.as_str(), &value);
    }
    raw.set_body(body.to_vec());

    let config = RaceConfig {
        fan_out: params.count,
        timeout: Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        use_tls: target.use_tls,
        verify_tls: !params.insecure.unwrap_or(false),
        ..Default::default()
    };

    info!(
        "race request: {} {} -> {}:{} x{}",
        raw.method(),
        raw.path(),
        target.host,
        port,
        config.fan_out
    );

    let job = RaceJob::new(&target.host, port, raw.to_serialized()?, config)?;
    Ok(job.run().await)
}
