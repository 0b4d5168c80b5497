// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::racer::DEFAULT_TIMEOUT_MS;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long = "log-level", default_value = "warn", global = true)]
    pub log_level: String,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Enable verbose output",
        global = true
    )]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long = "quiet",
        help = "Reduce output verbosity",
        global = true
    )]
    pub quiet: bool,

    #[arg(long = "no-color", help = "Disable colored output", global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fire one request over many synchronized connections
    Race(RaceArgs),
    /// Run the HTTP front end that races inbound requests on demand
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RaceArgs {
    #[arg(help = "Target URL (http:// or https://)")]
    pub target: String,

    #[arg(
        short = 'n',
        long = "count",
        default_value_t = 10,
        help = "Number of simultaneous connections"
    )]
    pub count: usize,

    #[arg(short = 'X', long = "method", default_value = "POST")]
    pub method: String,

    #[arg(long = "path", help = "Request path, defaults to the target URL path")]
    pub path: Option<String>,

    #[arg(
        short = 'H',
        long = "header",
        help = "Header line 'Name: Value', repeatable"
    )]
    pub headers: Vec<String>,

    #[arg(long = "body", conflicts_with = "body_file")]
    pub body: Option<String>,

    #[arg(long = "body-file", help = "Read the request body from a file")]
    pub body_file: Option<PathBuf>,

    #[arg(long = "port", help = "Override the target port")]
    pub port: Option<u16>,

    #[arg(
        short = 't',
        long = "timeout-ms",
        default_value_t = DEFAULT_TIMEOUT_MS,
        help = "Overall job deadline in milliseconds"
    )]
    pub timeout_ms: u64,

    #[arg(
        short = 'k',
        long = "insecure",
        help = "Skip TLS certificate verification"
    )]
    pub insecure: bool,

    #[arg(
        short = 'o',
        long = "output-dir",
        help = "Write the report into this directory"
    )]
    pub output_dir: Option<String>,

    #[arg(
        long = "format",
        default_value = "json",
        help = "Report format: json, jsonl or txt"
    )]
    pub output_format: String,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(short = 'b', long = "bind", default_value = "127.0.0.1:8080")]
    pub bind: String,
}

pub fn resolve_log_level(cli: &Cli) -> log::LevelFilter {
    if cli.quiet {
        return log::LevelFilter::Error;
    }
    if cli.verbose {
        return log::LevelFilter::Debug;
    }
    match cli.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Warn,
    }
}

/// Split a `-H "Name: Value"` argument. Returns `None` for lines without a
/// colon or with an empty name.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
