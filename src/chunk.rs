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

use anyhow::Result;
use tracing::warn;

use crate::bridge::BridgeChunker;
use crate::config::Config;
use crate::error::BenchError;
use crate::model::ChunkResult;
use crate::registry::Registry;

pub const CHUNKER_FIXED: &str = "fixed";
pub const CHUNKER_BRIDGE: &str = "bridge";

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 96;

pub trait Chunker {
    fn name(&self) -> &str;

    fn chunk(&self, content: &str, filepath: &str) -> Result<Vec<ChunkResult>>;

    /// Fails fast when something the strategy depends on is unavailable.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

pub type ChunkerFactory = fn(&Config) -> Result<Box<dyn Chunker>>;

pub fn builtin_chunkers() -> Result<Registry<ChunkerFactory>, BenchError> {
    let mut registry: Registry<ChunkerFactory> = Registry::new("chunker");
    registry.register(CHUNKER_FIXED, &["fixed-size", "character"], |config| {
        Ok(Box::new(FixedSizeChunker::new(
            config.chunk_size,
            config.chunk_overlap,
        )?))
    })?;
    registry.register(CHUNKER_BRIDGE, &["subprocess"], |config| {
        let bridge = BridgeChunker::from_config(config)?;
        if config.chunk_fallback {
            let fallback = FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?;
            return Ok(Box::new(FallbackChunker::new(Box::new(bridge), fallback)));
        }
        Ok(Box::new(bridge))
    })?;
    Ok(registry)
}

pub fn build_chunker(config: &Config) -> Result<Box<dyn Chunker>> {
    let registry = builtin_chunkers()?;
    let factory = registry.lookup(&config.chunker)?;
    factory(config)
}

/// Character windows of `size` that advance by `size - overlap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl FixedSizeChunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self, BenchError> {
        if size == 0 {
            return Err(BenchError::InvalidConfig(
                "chunk size must be greater than 0".into(),
            ));
        }
        if overlap >= size {
            return Err(BenchError::InvalidConfig(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn windows(&self, content: &str, filepath: &str) -> Vec<ChunkResult> {
        let chars: Vec<char> = content.chars().collect();
        let lines = LineIndex::new(&chars);
        let len = chars.len();
        let step = self.size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < len {
            let end = usize::min(start + self.size, len);
            let text: String = chars[start..end].iter().collect();
            if !text.trim().is_empty() {
                chunks.push(ChunkResult {
                    id: Some(format!("{filepath}:{}", chunks.len())),
                    start_line: Some(lines.line_of(start)),
                    end_line: Some(lines.line_of(end - 1)),
                    content: text,
                });
            }
            start += step;
            if len.saturating_sub(start) < self.overlap {
                break;
            }
        }
        chunks
    }
}

impl Chunker for FixedSizeChunker {
    fn name(&self) -> &str {
        CHUNKER_FIXED
    }

    fn chunk(&self, content: &str, filepath: &str) -> Result<Vec<ChunkResult>> {
        Ok(self.windows(content, filepath))
    }
}

/// Character offsets where each line starts.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(chars: &[char]) -> Self {
        let mut starts = vec![0];
        starts.extend(
            chars
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self { starts }
    }

    /// 1-indexed line containing `offset`.
    fn line_of(&self, offset: usize) -> u32 {
        self.starts.partition_point(|&start| start <= offset) as u32
    }
}

/// Runs `primary` and re-chunks with fixed windows when it fails or
/// produces nothing.
pub struct FallbackChunker {
    primary: Box<dyn Chunker>,
    fallback: FixedSizeChunker,
}

impl FallbackChunker {
    pub fn new(primary: Box<dyn Chunker>, fallback: FixedSizeChunker) -> Self {
        Self { primary, fallback }
    }
}

impl Chunker for FallbackChunker {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn chunk(&self, content: &str, filepath: &str) -> Result<Vec<ChunkResult>> {
        match self.primary.chunk(content, filepath) {
            Ok(chunks) if !chunks.is_empty() => Ok(chunks),
            Ok(_) => {
                warn!(
                    chunker = self.primary.name(),
                    filepath, "no chunks produced; falling back to fixed windows"
                );
                self.fallback.chunk(content, filepath)
            }
            Err(err) => {
                warn!(
                    chunker = self.primary.name(),
                    filepath,
                    error = %err,
                    "chunker failed; falling back to fixed windows"
                );
                self.fallback.chunk(content, filepath)
            }
        }
    }

    fn preflight(&self) -> Result<()> {
        self.primary.preflight()
    }
}
