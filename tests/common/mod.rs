// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const OK_EMPTY: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

pub fn response_with_body(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

/// Answer every connection with the canned response.
pub async fn spawn_canned_server(response: Vec<u8>) -> SocketAddr {
    spawn_server(response, None, None).await
}

/// Like `spawn_canned_server`, but the connection accepted at position `kill`
/// (0-based) is dropped without a byte in reply.
pub async fn spawn_killing_server(response: Vec<u8>, kill: usize) -> SocketAddr {
    spawn_server(response, Some(kill), None).await
}

/// Like `spawn_canned_server`, but every fully received request is forwarded
/// on the returned channel before the response goes out.
pub async fn spawn_capturing_server(
    response: Vec<u8>,
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = spawn_server(response, None, Some(tx)).await;
    (addr, rx)
}

async fn spawn_server(
    response: Vec<u8>,
    kill: Option<usize>,
    capture: Option<mpsc::UnboundedSender<Vec<u8>>>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut accepted = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let index = accepted;
            accepted += 1;
            if kill == Some(index) {
                drop(socket);
                continue;
            }
            let response = response.clone();
            let capture = capture.clone();
            tokio::spawn(async move {
                if let Some(request) = read_full_request(&mut socket).await {
                    if let Some(tx) = capture {
                        let _ = tx.send(request);
                    }
                    let _ = socket.write_all(&response).await;
                    let _ = socket.flush().await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    addr
}

/// Read header block plus any `Content-Length` body, so the response never
/// goes out before the raced suffix has actually arrived.
async fn read_full_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let declared = content_length(&buf[..header_end]).unwrap_or(0);
    while buf.len() < header_end + declared {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(buf)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn content_length(head: &[u8]) -> Option<usize> {
    let head = String::from_utf8_lossy(head);
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}
