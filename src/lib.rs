// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]

pub mod barrier;
pub mod cli;
pub mod error;
pub mod race_cli;
pub mod racer;
pub mod request;
pub mod response;
pub mod server;
