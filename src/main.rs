// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::Result;
use clap::Parser;
use log::info;
use simple_logger::SimpleLogger;
use tokio::net::TcpListener;

use rrace::cli::{resolve_log_level, Cli, Commands};
use rrace::race_cli::run_race_command;
use rrace::server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(resolve_log_level(&cli))
        .init()?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Race(args) => run_race_command(args).await,
        Commands::Serve(args) => {
            let listener = TcpListener::bind(&args.bind).await?;
            info!(
                "{} {} serving on {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                args.bind
            );
            server::serve(listener).await?;
            Ok(())
        }
    }
}
