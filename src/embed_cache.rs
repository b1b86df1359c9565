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

//! Disk memoization of embeddings and the batching front end that uses it.
//!
//! Entries live at `<dir>/<key[0..2]>/<key>.json` where `key` depends only on
//! the text and the model id, so switching credentials for the same model
//! keeps hitting the cache.

use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use tracing::warn;

use crate::embed::EmbeddingSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    pub created_at: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(text: &str, model: &str) -> String {
        let text_hash = sha256_hex(text.as_bytes());
        sha256_hex(format!("{text_hash}:{model}").as_bytes())
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or(key);
        self.dir.join(shard).join(format!("{key}.json"))
    }

    /// Returns `None` on a miss. Unreadable or foreign-model entries count
    /// as misses so a bad file never fails a run.
    pub fn get(&self, text: &str, model: &str) -> Option<CacheEntry> {
        let path = self.entry_path(&Self::key(text, model));
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.model == model => Some(entry),
            Ok(entry) => {
                warn!(path = %path.display(), found = %entry.model, expected = model, "cache entry model mismatch");
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupt cache entry");
                None
            }
        }
    }

    pub fn put(
        &self,
        text: &str,
        model: &str,
        vector: &[f32],
        token_count: Option<u64>,
    ) -> Result<()> {
        let path = self.entry_path(&Self::key(text, model));
        let shard_dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cache path {} has no parent", path.display()))?;
        std::fs::create_dir_all(shard_dir)
            .with_context(|| format!("create cache dir {}", shard_dir.display()))?;

        let entry = CacheEntry {
            vector: vector.to_vec(),
            token_count,
            created_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .context("format cache timestamp")?,
            model: model.to_string(),
        };
        let body = serde_json::to_vec(&entry).context("serialize cache entry")?;

        // write-then-rename so readers in other processes never see a torn file
        let mut tmp = tempfile::NamedTempFile::new_in(shard_dir)
            .with_context(|| format!("create temp file in {}", shard_dir.display()))?;
        tmp.write_all(&body).context("write cache entry")?;
        tmp.persist(&path)
            .with_context(|| format!("persist cache entry {}", path.display()))?;
        Ok(())
    }
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub token_count: Option<u64>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchEmbeddingResult {
    pub embeddings: Vec<EmbeddingResult>,
    pub cache_hits: usize,
    pub api_calls: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingStats {
    pub api_calls: u64,
    pub total_tokens: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Batching, order-preserving front end over an [`EmbeddingSource`] with an
/// optional disk cache.
pub struct CachedEmbedder {
    source: Box<dyn EmbeddingSource>,
    cache: Option<EmbeddingCache>,
    stats: EmbeddingStats,
}

impl CachedEmbedder {
    pub fn new(source: Box<dyn EmbeddingSource>, cache: Option<EmbeddingCache>) -> Self {
        Self {
            source,
            cache,
            stats: EmbeddingStats::default(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.source.model_id()
    }

    pub fn stats(&self) -> EmbeddingStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EmbeddingStats::default();
    }

    pub fn embed(&mut self, text: &str) -> Result<EmbeddingResult> {
        let mut batch = self.embed_batch(&[text])?;
        batch
            .embeddings
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding source returned no vector"))
    }

    pub fn embed_batch(&mut self, texts: &[&str]) -> Result<BatchEmbeddingResult> {
        let model = self.source.model_id().to_string();
        let mut slots: Vec<Option<EmbeddingResult>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();
        let mut cache_hits = 0usize;

        for (i, text) in texts.iter().enumerate() {
            match self.cache.as_ref().and_then(|c| c.get(text, &model)) {
                Some(entry) => {
                    cache_hits += 1;
                    slots[i] = Some(EmbeddingResult {
                        vector: entry.vector,
                        token_count: entry.token_count,
                        from_cache: true,
                    });
                }
                None => missing.push(i),
            }
        }

        let mut api_calls = 0usize;
        let batch_size = self.source.max_batch_size().max(1);
        for group in missing.chunks(batch_size) {
            let inputs: Vec<&str> = group.iter().map(|&i| texts[i]).collect();
            let raw = self
                .source
                .embed_texts(&inputs)
                .with_context(|| format!("embed {} texts with {model}", inputs.len()))?;
            api_calls += 1;
            anyhow::ensure!(
                raw.vectors.len() == inputs.len(),
                "embedding source returned {} vectors for {} inputs",
                raw.vectors.len(),
                inputs.len()
            );
            self.stats.total_tokens += raw.total_tokens.unwrap_or(0);
            // per-text counts are only known when the batch has one text
            let per_text_tokens = if inputs.len() == 1 {
                raw.total_tokens
            } else {
                None
            };
            for (&i, vector) in group.iter().zip(raw.vectors) {
                if let Some(cache) = &self.cache
                    && let Err(err) = cache.put(texts[i], &model, &vector, per_text_tokens)
                {
                    warn!(error = %err, "failed to write embedding cache entry");
                }
                slots[i] = Some(EmbeddingResult {
                    vector,
                    token_count: per_text_tokens,
                    from_cache: false,
                });
            }
        }

        self.stats.api_calls += api_calls as u64;
        self.stats.cache_hits += cache_hits as u64;
        self.stats.cache_misses += missing.len() as u64;
        debug!(
            texts = texts.len(),
            cache_hits,
            api_calls,
            model = %model,
            "embedded batch"
        );

        let embeddings = slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| anyhow::anyhow!("embedding slot left empty")))
            .collect::<Result<Vec<_>>>()?;
        Ok(BatchEmbeddingResult {
            embeddings,
            cache_hits,
            api_calls,
        })
    }
}
