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

//! Chunking delegated to an external process.
//!
//! The document goes to the child's stdin. On success the child exits 0 and
//! prints a JSON array of `{id?, text, startLine?, endLine?}`; on failure it
//! exits non-zero, ideally printing `{"error": "..."}`.

use std::io::Write as _;
use std::process::Command;
use std::process::Stdio;
use std::sync::OnceLock;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use crate::chunk::CHUNKER_BRIDGE;
use crate::chunk::Chunker;
use crate::config::Config;
use crate::error::BenchError;
use crate::model::ChunkResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeChunk {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    start_line: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BridgeError {
    error: String,
}

#[derive(Debug)]
pub struct BridgeChunker {
    program: String,
    args: Vec<String>,
    preflight_args: Vec<String>,
    size: usize,
    overlap: usize,
    preflight: OnceLock<Result<(), String>>,
}

impl BridgeChunker {
    pub fn new(program: impl Into<String>, args: Vec<String>, size: usize, overlap: usize) -> Self {
        Self {
            program: program.into(),
            args,
            preflight_args: vec!["--version".to_string()],
            size,
            overlap,
            preflight: OnceLock::new(),
        }
    }

    pub fn with_preflight_args(mut self, args: Vec<String>) -> Self {
        self.preflight_args = args;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, BenchError> {
        let program = config
            .bridge_program
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                BenchError::InvalidConfig("the bridge chunker requires bridge_program".into())
            })?;
        Ok(Self::new(
            program,
            config.bridge_args.clone(),
            config.chunk_size,
            config.chunk_overlap,
        )
        .with_preflight_args(config.bridge_preflight_args.clone()))
    }

    fn expand_args(&self, filepath: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{filepath}", filepath)
                    .replace("{size}", &self.size.to_string())
                    .replace("{overlap}", &self.overlap.to_string())
            })
            .collect()
    }

    fn failure(&self, message: impl Into<String>) -> BenchError {
        BenchError::Bridge {
            program: self.program.clone(),
            message: message.into(),
        }
    }

    fn probe(&self) -> Result<(), String> {
        let output = Command::new(&self.program)
            .args(&self.preflight_args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| format!("cannot start: {err}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "preflight exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

impl Chunker for BridgeChunker {
    fn name(&self) -> &str {
        CHUNKER_BRIDGE
    }

    fn chunk(&self, content: &str, filepath: &str) -> Result<Vec<ChunkResult>> {
        let mut child = Command::new(&self.program)
            .args(self.expand_args(filepath))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.failure(format!("cannot start: {err}")))?;

        // feed stdin from a thread so a chatty child cannot deadlock on a full stdout pipe
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("stdin unavailable"))?;
        let payload = content.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(payload.as_bytes()));

        let output = child
            .wait_with_output()
            .with_context(|| format!("wait for {}", self.program))?;
        match writer.join() {
            Ok(Ok(())) => {}
            // a child that exits without reading stdin is judged by its exit status
            Ok(Err(err)) => debug!(program = %self.program, error = %err, "bridge stdin closed early"),
            Err(_) => return Err(self.failure("stdin writer panicked").into()),
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let message = serde_json::from_str::<BridgeError>(stdout.trim())
                .or_else(|_| serde_json::from_str::<BridgeError>(stderr.trim()))
                .map(|envelope| envelope.error)
                .unwrap_or_else(|_| format!("exited with {}: {}", output.status, stderr.trim()));
            return Err(self.failure(message).into());
        }

        let chunks: Vec<BridgeChunk> = serde_json::from_str(stdout.trim())
            .map_err(|err| self.failure(format!("invalid JSON output: {err}")))?;
        debug!(program = %self.program, filepath, chunks = chunks.len(), "bridge chunked document");
        Ok(chunks
            .into_iter()
            .map(|chunk| ChunkResult {
                content: chunk.text,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                id: chunk.id,
            })
            .collect())
    }

    fn preflight(&self) -> Result<()> {
        self.preflight
            .get_or_init(|| self.probe())
            .clone()
            .map_err(|message| self.failure(message).into())
    }
}
