// File: racer.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::{rustls, TlsConnector};
use url::Url;

use crate::barrier::PhaseBarrier;
use crate::error::InputError;
use crate::request::SerializedRequest;
use crate::response::{read_response, RawHttpResponse};

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Knobs for one race job.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// Number of simultaneous connections (N >= 1).
    pub fan_out: usize,
    /// Overall job deadline bounding dial, handshake, both writes, the gate
    /// wait and the response read.
    pub timeout: Duration,
    pub use_tls: bool,
    /// Verify the peer certificate against the target host name. Turning
    /// this off exists for self-signed test targets.
    pub verify_tls: bool,
    pub max_response_bytes: usize,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            fan_out: 10,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            use_tls: true,
            verify_tls: true,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl RaceConfig {
    pub fn validate(&self) -> Result<(), InputError> {
        if self.fan_out == 0 {
            return Err(InputError::ZeroFanOut);
        }
        if self.timeout.is_zero() {
            return Err(InputError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Pipeline step a connection was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    Dial,
    Handshake,
    SendPrefix,
    SendSuffix,
    ReadResponse,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::Dial => "dial",
            FailureStage::Handshake => "handshake",
            FailureStage::SendPrefix => "send-prefix",
            FailureStage::SendSuffix => "send-suffix",
            FailureStage::ReadResponse => "read-response",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptResult {
    Success { response: RawHttpResponse },
    Failure { stage: FailureStage, error: String },
}

/// Exactly one of these per fan-out index. `suffix_sent_at_us` is the offset
/// from job start at which this connection's final bytes left the process,
/// when they did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub index: usize,
    #[serde(flatten)]
    pub result: AttemptResult,
    pub suffix_sent_at_us: Option<u64>,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, AttemptResult::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match &self.result {
            AttemptResult::Success { response } => Some(response.status),
            AttemptResult::Failure { .. } => None,
        }
    }
}

/// Complete batch for one job: N outcomes indexable by fan-out position, plus
/// the spread between the first and last suffix send (the race window the
/// tool exists to minimize).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceReport {
    pub target: String,
    pub fan_out: usize,
    pub request_fingerprint: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub race_window_us: Option<u64>,
    pub outcomes: Vec<AttemptOutcome>,
}

impl RaceReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }
}

/// Scheme, host, port and path of the machine being raced, parsed out of a
/// target URL. The scheme decides whether workers handshake TLS.
#[derive(Debug, Clone)]
pub struct RaceTarget {
    pub use_tls: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RaceTarget {
    pub fn parse(target: &str) -> Result<Self, InputError> {
        let parsed =
            Url::parse(target).map_err(|e| InputError::invalid_target(target, e))?;
        let use_tls = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(InputError::UnsupportedScheme(other.to_string())),
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| InputError::invalid_target(target, "no host"))?
            .to_string();
        validate_host(&host)?;
        let port = parsed
            .port_or_known_default()
            .unwrap_or(if use_tls { 443 } else { 80 });
        Ok(RaceTarget {
            use_tls,
            host,
            port,
            path: parsed.path().to_string(),
        })
    }
}

fn validate_host(host: &str) -> Result<(), InputError> {
    if host.is_empty() {
        return Err(InputError::invalid_target(host, "empty host"));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_graphic() || c == '.' || c == '-')
    {
        return Err(InputError::invalid_target(
            host,
            "host contains invalid characters",
        ));
    }
    Ok(())
}

/// One race: a target, a fan-out count and the pre-serialized request. Owns
/// every worker task it spawns; `run` joins them all before returning, so no
/// task outlives the job.
#[derive(Debug)]
pub struct RaceJob {
    host: String,
    port: u16,
    server_name: Option<rustls::ServerName>,
    config: RaceConfig,
    request: SerializedRequest,
}

impl RaceJob {
    /// Validates everything that can be rejected before a single connection
    /// is attempted: the config, the host spelling and (for TLS) the server
    /// name.
    pub fn new(
        host: &str,
        port: u16,
        request: SerializedRequest,
        config: RaceConfig,
    ) -> Result<Self, InputError> {
        config.validate()?;
        validate_host(host)?;
        let server_name = if config.use_tls {
            Some(
                rustls::ServerName::try_from(host)
                    .map_err(|e| InputError::invalid_target(host, e))?,
            )
        } else {
            None
        };
        Ok(RaceJob {
            host: host.to_string(),
            port,
            server_name,
            config,
            request,
        })
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    pub async fn run(self) -> RaceReport {
        let fan_out = self.config.fan_out;
        let started_at = chrono::Utc::now();
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let request_fingerprint = fingerprint(self.request.as_bytes());

        info!(
            "racing {} connections against {}:{} ({} byte request, {} byte suffix withheld)",
            fan_out,
            self.host,
            self.port,
            self.request.len(),
            self.request.suffix().len()
        );

        let tls = match (&self.server_name, self.config.use_tls) {
            (Some(name), true) => Some((
                build_tls_connector(self.config.verify_tls),
                name.clone(),
            )),
            _ => None,
        };

        let ctx = Arc::new(WorkerContext {
            host: self.host.clone(),
            port: self.port,
            request: self.request.clone(),
            tls,
            started,
            deadline,
            max_response_bytes: self.config.max_response_bytes,
        });
        let barrier = Arc::new(PhaseBarrier::new(fan_out));

        let mut handles = Vec::with_capacity(fan_out);
        for index in 0..fan_out {
            handles.push(tokio::spawn(run_attempt(
                index,
                Arc::clone(&ctx),
                Arc::clone(&barrier),
            )));
        }

        // Joined in spawn order, so slot i always belongs to connection i.
        let outcomes: Vec<AttemptOutcome> = join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => early_failure(
                    index,
                    FailureStage::Dial,
                    format!("worker task died before completing: {}", e),
                ),
            })
            .collect();

        let report = RaceReport {
            target: format!("{}:{}", self.host, self.port),
            fan_out,
            request_fingerprint,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            race_window_us: race_window(&outcomes),
            outcomes,
        };

        info!(
            "race against {} finished in {} ms: {} of {} connections succeeded, window {:?} us",
            report.target,
            report.duration_ms,
            report.successes(),
            fan_out,
            report.race_window_us
        );
        report
    }
}

struct WorkerContext {
    host: String,
    port: u16,
    request: SerializedRequest,
    tls: Option<(TlsConnector, rustls::ServerName)>,
    started: Instant,
    deadline: Instant,
    max_response_bytes: usize,
}

fn early_failure(index: usize, stage: FailureStage, error: String) -> AttemptOutcome {
    AttemptOutcome {
        index,
        result: AttemptResult::Failure { stage, error },
        suffix_sent_at_us: None,
    }
}

async fn run_attempt(
    index: usize,
    ctx: Arc<WorkerContext>,
    barrier: Arc<PhaseBarrier>,
) -> AttemptOutcome {
    let addr = format!("{}:{}", ctx.host, ctx.port);
    debug!("connection {}: dialing {}", index, addr);

    let tcp = match timeout_at(ctx.deadline, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("connection {}: connect to {} failed: {}", index, addr, e);
            barrier.arrive();
            return early_failure(index, FailureStage::Dial, format!("connect failed: {}", e));
        }
        Err(_) => {
            warn!("connection {}: connect to {} timed out", index, addr);
            barrier.arrive();
            return early_failure(index, FailureStage::Dial, "connect deadline exceeded".into());
        }
    };

    match ctx.tls.clone() {
        Some((connector, server_name)) => {
            debug!("connection {}: negotiating tls with {}", index, ctx.host);
            let stream = match timeout_at(ctx.deadline, connector.connect(server_name, tcp)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!("connection {}: tls handshake failed: {}", index, e);
                    barrier.arrive();
                    return early_failure(
                        index,
                        FailureStage::Handshake,
                        format!("handshake failed: {}", e),
                    );
                }
                Err(_) => {
                    warn!("connection {}: tls handshake timed out", index);
                    barrier.arrive();
                    return early_failure(
                        index,
                        FailureStage::Handshake,
                        "handshake deadline exceeded".into(),
                    );
                }
            };
            drive(index, stream, ctx, barrier).await
        }
        None => drive(index, tcp, ctx, barrier).await,
    }
}

/// The phased send over an established transport: prefix, arrive, gate,
/// suffix, response. Generic so tests can run it over in-memory pipes.
async fn drive<S>(
    index: usize,
    mut stream: S,
    ctx: Arc<WorkerContext>,
    barrier: Arc<PhaseBarrier>,
) -> AttemptOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Arrive whether or not the prefix went out; a worker that stays silent
    // here would strand its siblings at the gate.
    let prefix_result = write_deadline(&mut stream, ctx.request.prefix(), ctx.deadline).await;
    barrier.arrive();
    if let Err(error) = prefix_result {
        warn!("connection {}: prefix send failed: {}", index, error);
        return early_failure(index, FailureStage::SendPrefix, error);
    }
    debug!(
        "connection {}: prefix sent ({} bytes), waiting at the gate",
        index,
        ctx.request.prefix().len()
    );

    if !barrier.wait_release(ctx.deadline).await {
        debug!(
            "connection {}: released by deadline with {} arrivals outstanding",
            index,
            barrier.pending()
        );
    }

    if let Err(error) = write_deadline(&mut stream, ctx.request.suffix(), ctx.deadline).await {
        warn!("connection {}: suffix send failed: {}", index, error);
        return early_failure(index, FailureStage::SendSuffix, error);
    }
    let suffix_sent_at_us = Some(ctx.started.elapsed().as_micros() as u64);
    debug!("connection {}: suffix sent", index);

    match read_response(&mut stream, ctx.deadline, ctx.max_response_bytes).await {
        Ok(response) => {
            debug!("connection {}: response {} received", index, response.status);
            let _ = stream.shutdown().await;
            AttemptOutcome {
                index,
                result: AttemptResult::Success { response },
                suffix_sent_at_us,
            }
        }
        Err(e) => {
            warn!("connection {}: response read failed: {}", index, e);
            let _ = stream.shutdown().await;
            AttemptOutcome {
                index,
                result: AttemptResult::Failure {
                    stage: FailureStage::ReadResponse,
                    error: e.to_string(),
                },
                suffix_sent_at_us,
            }
        }
    }
}

async fn write_deadline<S>(
    stream: &mut S,
    bytes: &[u8],
    deadline: Instant,
) -> Result<(), String>
where
    S: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match timeout_at(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("write failed: {}", e)),
        Err(_) => Err("write deadline exceeded".to_string()),
    }
}

fn race_window(outcomes: &[AttemptOutcome]) -> Option<u64> {
    let sent: Vec<u64> = outcomes.iter().filter_map(|o| o.suffix_sent_at_us).collect();
    let first = sent.iter().min()?;
    let last = sent.iter().max()?;
    Some(last - first)
}

fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

static WEBPKI_ROOTS: Lazy<rustls::RootCertStore> = Lazy::new(|| {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    roots
});

fn build_tls_connector(verify: bool) -> TlsConnector {
    let config = if verify {
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(WEBPKI_ROOTS.clone())
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

/// Accepts any peer certificate. Only reachable when `verify_tls` is off.
struct InsecureVerifier;

impl rustls::client::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
