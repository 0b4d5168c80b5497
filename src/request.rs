// File: request.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::sync::Arc;

use crate::error::InputError;

/// Number of trailing bytes withheld until the release gate opens. These are
/// the literal final bytes of the serialized message (the CRLF that closes the
/// header block when the request carries no body).
pub const SPLIT_TERMINATOR_LEN: usize = 2;

/// Structured description of one HTTP request before it hits the wire.
///
/// Headers are an ordered multimap: duplicates are preserved and rendered one
/// line per value. The target host doubles as the `Host` header value and as
/// the TLS server name.
#[derive(Debug, Clone)]
pub struct RawRequest {
    method: String,
    path: String,
    protocol: String,
    headers: Vec<(String, Vec<String>)>,
    body: Vec<u8>,
    host: String,
}

impl RawRequest {
    pub fn new(method: &str, path: &str, host: &str) -> Self {
        RawRequest {
            method: method.to_string(),
            path: path.to_string(),
            protocol: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            host: host.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn headers(&self) -> &[(String, Vec<String>)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub fn set_protocol(&mut self, protocol: &str) {
        self.protocol = protocol.to_string();
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Append a header value. Values for a name already present are grouped
    /// with it; names compare case-insensitively, the stored spelling is the
    /// first one seen.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if let Some((_, values)) = self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            values.push(value.to_string());
        } else {
            self.headers
                .push((name.to_string(), vec![value.to_string()]));
        }
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Render the exact wire bytes: request line, one line per header value,
    /// an explicit `Host` line appended after all caller headers (never
    /// deduplicated), the blank line, then the body verbatim. `Content-Length`
    /// is neither computed nor corrected; the caller owns the header set.
    pub fn serialize(&self) -> Vec<u8> {
        let mut wire =
            format!("{} {} {}\r\n", self.method, self.path, self.protocol).into_bytes();
        for (name, values) in &self.headers {
            for value in values {
                wire.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
            }
        }
        wire.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        wire.extend_from_slice(b"\r\n");
        wire.extend_from_slice(&self.body);
        wire
    }

    pub fn to_serialized(&self) -> Result<SerializedRequest, InputError> {
        SerializedRequest::split(self.serialize())
    }
}

/// The immutable wire bytes of one request, logically split into the prefix
/// (everything except the trailing terminator) and the suffix (the terminator
/// itself). The bytes are shared read-only across all connection workers;
/// `prefix + suffix` is always the whole message.
#[derive(Debug, Clone)]
pub struct SerializedRequest {
    bytes: Arc<[u8]>,
    split_at: usize,
}

impl SerializedRequest {
    /// Plan the split from the tail of the full byte sequence. The suffix is
    /// always the literal last bytes of the message, independent of where the
    /// header/body boundary falls. Rejects messages shorter than the
    /// terminator.
    pub fn split(wire: Vec<u8>) -> Result<Self, InputError> {
        if wire.len() < SPLIT_TERMINATOR_LEN {
            return Err(InputError::RequestTooShort(wire.len()));
        }
        Ok(SerializedRequest {
            split_at: wire.len() - SPLIT_TERMINATOR_LEN,
            bytes: wire.into(),
        })
    }

    pub fn prefix(&self) -> &[u8] {
        &self.bytes[..self.split_at]
    }

    pub fn suffix(&self) -> &[u8] {
        &self.bytes[self.split_at..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
