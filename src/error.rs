// Copyright 2026 Ragbench Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed failures that callers need to tell apart. Everything else travels
//! as `anyhow::Error` with context attached at the I/O boundary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing credential: set {var} to use the {provider} embedding provider")]
    MissingCredential {
        provider: &'static str,
        var: &'static str,
    },

    #[error("unknown {kind} '{name}'; available: {available}")]
    UnknownName {
        kind: &'static str,
        name: String,
        available: String,
    },

    #[error("'{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("paired samples differ in length: {left} vs {right}")]
    PairedLengthMismatch { left: usize, right: usize },

    #[error(
        "chunking failure rate for '{run_tag}' is {failures}/{attempted}, above threshold {threshold}"
    )]
    FailureRateExceeded {
        run_tag: String,
        failures: usize,
        attempted: usize,
        threshold: f64,
    },

    #[error("chunking bridge '{program}' failed: {message}")]
    Bridge { program: String, message: String },
}

impl BenchError {
    pub fn code(&self) -> &'static str {
        match self {
            BenchError::InvalidConfig(_) => "invalid_config",
            BenchError::MissingCredential { .. } => "missing_credential",
            BenchError::UnknownName { .. } => "unknown_name",
            BenchError::AlreadyRegistered { .. } => "already_registered",
            BenchError::DimensionMismatch { .. } => "dimension_mismatch",
            BenchError::PairedLengthMismatch { .. } => "paired_length_mismatch",
            BenchError::FailureRateExceeded { .. } => "failure_rate_exceeded",
            BenchError::Bridge { .. } => "bridge_failed",
        }
    }
}

/// Maps an error chain to the code used in JSON error envelopes.
pub fn error_code(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BenchError>())
        .map(BenchError::code)
        .unwrap_or("error")
}
