// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use thiserror::Error;

/// Errors rejected before any connection is attempted. Everything past this
/// validation class degrades to per-connection `Failure` outcomes instead of
/// aborting the whole job.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("fan-out count must be at least 1")]
    ZeroFanOut,

    #[error("job timeout must be greater than zero")]
    ZeroTimeout,

    #[error("serialized request is {0} bytes, too short to withhold a terminator")]
    RequestTooShort(usize),

    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl InputError {
    pub fn invalid_target(target: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}
