// File: response.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::trace;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const READ_CHUNK_SIZE: usize = 4096;
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// One parsed HTTP/1.1 response. Header names are lowercased; order and
/// duplicates (e.g. `Set-Cookie`) are preserved. The body is carried as a
/// lossy UTF-8 string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHttpResponse {
    pub http_version: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawHttpResponse {
    /// First value of a header, by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

enum BodyFraming {
    ContentLength(usize),
    Chunked,
    ReadToEof,
}

/// Read and parse one complete response from the stream: status line, header
/// block, then the body framed by `Content-Length` or chunked encoding as
/// declared. Without either, reads until EOF. Every read is bounded by the
/// job deadline and the size cap.
pub async fn read_response<S>(
    stream: &mut S,
    deadline: Instant,
    max_body_bytes: usize,
) -> Result<RawHttpResponse, BoxError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = WireReader::new(stream);

    let status_line = reader.read_line(deadline).await?;
    let (http_version, status, status_text) = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = reader.read_line(deadline).await?;
        if line.is_empty() {
            break;
        }
        if reader.consumed() > MAX_HEADER_BYTES {
            return Err("response header section too large".into());
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let framing = detect_framing(&headers, max_body_bytes)?;
    let body = match framing {
        BodyFraming::ContentLength(len) => reader.read_exact_bytes(len, deadline).await?,
        BodyFraming::Chunked => read_chunked_body(&mut reader, deadline, max_body_bytes).await?,
        BodyFraming::ReadToEof => reader.read_to_eof(max_body_bytes, deadline).await?,
    };

    trace!(
        "parsed response: {} {} ({} header lines, {} body bytes)",
        status,
        status_text,
        headers.len(),
        body.len()
    );

    Ok(RawHttpResponse {
        http_version,
        status,
        status_text,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn parse_status_line(line: &str) -> Result<(String, u16, String), BoxError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().filter(|v| v.starts_with("HTTP/"));
    let status = parts.next().and_then(|s| s.parse::<u16>().ok());
    match (version, status) {
        (Some(version), Some(status)) => Ok((
            version.to_string(),
            status,
            parts.next().unwrap_or("").to_string(),
        )),
        _ => Err(format!("invalid status line: {:?}", line).into()),
    }
}

fn detect_framing(
    headers: &[(String, String)],
    max_body_bytes: usize,
) -> Result<BodyFraming, BoxError> {
    let chunked = headers.iter().any(|(name, value)| {
        name == "transfer-encoding" && value.to_lowercase().contains("chunked")
    });
    if chunked {
        return Ok(BodyFraming::Chunked);
    }
    if let Some((_, value)) = headers.iter().find(|(name, _)| name == "content-length") {
        let len: usize = value
            .trim()
            .parse()
            .map_err(|_| format!("invalid content-length: {:?}", value))?;
        if len > max_body_bytes {
            return Err(format!(
                "declared body of {} bytes exceeds the {} byte response cap",
                len, max_body_bytes
            )
            .into());
        }
        return Ok(BodyFraming::ContentLength(len));
    }
    Ok(BodyFraming::ReadToEof)
}

async fn read_chunked_body<S>(
    reader: &mut WireReader<'_, S>,
    deadline: Instant,
    max_body_bytes: usize,
) -> Result<Vec<u8>, BoxError>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let size_line = reader.read_line(deadline).await?;
        let size_field = size_line
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        let size = usize::from_str_radix(&size_field, 16)
            .map_err(|_| format!("invalid chunk size: {:?}", size_line))?;
        if size == 0 {
            // Trailer section ends at the first empty line.
            loop {
                let trailer = reader.read_line(deadline).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if body.len() + size > max_body_bytes {
            return Err(format!(
                "chunked body exceeds the {} byte response cap",
                max_body_bytes
            )
            .into());
        }
        body.extend_from_slice(&reader.read_exact_bytes(size, deadline).await?);
        let chunk_end = reader.read_exact_bytes(2, deadline).await?;
        if chunk_end != b"\r\n" {
            return Err("chunk data not terminated by CRLF".into());
        }
    }
}

/// Incremental reader over a raw stream: buffers whatever the peer sends and
/// hands it out as CRLF lines or exact byte counts, each wait bounded by the
/// deadline.
struct WireReader<'a, S> {
    stream: &'a mut S,
    buf: Vec<u8>,
    pos: usize,
    consumed: usize,
}

impl<'a, S> WireReader<'a, S>
where
    S: AsyncRead + Unpin,
{
    fn new(stream: &'a mut S) -> Self {
        WireReader {
            stream,
            buf: Vec::with_capacity(READ_CHUNK_SIZE),
            pos: 0,
            consumed: 0,
        }
    }

    fn consumed(&self) -> usize {
        self.consumed
    }

    fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// One read from the stream into the buffer. Returns the byte count, 0 at
    /// EOF. Errors on deadline expiry.
    async fn fill(&mut self, deadline: Instant) -> Result<usize, BoxError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = match timeout_at(deadline, self.stream.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(format!("read failed: {}", e).into()),
            Err(_) => return Err("deadline exceeded while reading response".into()),
        };
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Next line without its terminator. Accepts bare LF as well as CRLF.
    async fn read_line(&mut self, deadline: Instant) -> Result<String, BoxError> {
        loop {
            if let Some(offset) = self.buffered().iter().position(|&b| b == b'\n') {
                let end = self.pos + offset;
                let mut line = &self.buf[self.pos..end];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                let line = String::from_utf8_lossy(line).to_string();
                self.consumed += offset + 1;
                self.pos = end + 1;
                return Ok(line);
            }
            if self.buf.len() - self.pos > MAX_HEADER_BYTES {
                return Err("response line too long".into());
            }
            if self.fill(deadline).await? == 0 {
                return Err("connection closed mid-response".into());
            }
        }
    }

    async fn read_exact_bytes(
        &mut self,
        count: usize,
        deadline: Instant,
    ) -> Result<Vec<u8>, BoxError> {
        while self.buffered().len() < count {
            if self.fill(deadline).await? == 0 {
                return Err(format!(
                    "connection closed with {} of {} body bytes received",
                    self.buffered().len(),
                    count
                )
                .into());
            }
        }
        let out = self.buf[self.pos..self.pos + count].to_vec();
        self.pos += count;
        self.consumed += count;
        Ok(out)
    }

    /// Drain until EOF, the size cap, or the deadline, whichever comes first.
    /// Neither the cap nor the deadline is an error here: with no framing
    /// declared, whatever arrived in time is the body.
    async fn read_to_eof(
        &mut self,
        max_bytes: usize,
        deadline: Instant,
    ) -> Result<Vec<u8>, BoxError> {
        loop {
            if self.buffered().len() >= max_bytes {
                break;
            }
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(format!("read failed: {}", e).into()),
                Err(_) => break,
            }
        }
        let end = (self.pos + max_bytes).min(self.buf.len());
        let out = self.buf[self.pos..end].to_vec();
        self.consumed += out.len();
        self.pos = end;
        Ok(out)
    }
}
