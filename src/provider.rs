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

use std::collections::HashMap;

use anyhow::Context;
use anyhow::Result;
use clap::ValueEnum;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::chunk::Chunker;
use crate::chunk::build_chunker;
use crate::config::Config;
use crate::embed::build_source;
use crate::embed_cache::CachedEmbedder;
use crate::embed_cache::EmbeddingCache;
use crate::embed_cache::EmbeddingStats;
use crate::error::BenchError;
use crate::model::PreparedData;
use crate::model::SearchResult;
use crate::model::StoredChunk;
use crate::vector_store::SearchParams;
use crate::vector_store::VectorStore;
use crate::vector_store::builtin_stores;

/// A retrieval system under test. All state is partitioned by `run_tag`.
pub trait Provider {
    fn name(&self) -> &str;

    /// Prepares the provider; calling it again is a no-op.
    fn initialize(&mut self) -> Result<()>;

    fn add_context(&mut self, data: &PreparedData, run_tag: &str) -> Result<()>;

    fn search_query(
        &mut self,
        query: &str,
        run_tag: &str,
        params: SearchParams,
    ) -> Result<Vec<SearchResult>>;

    fn clear(&mut self, run_tag: &str) -> Result<()>;

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fails once too many documents under `run_tag` could not be indexed.
    fn check_failure_rate(&self, _run_tag: &str) -> Result<(), BenchError> {
        Ok(())
    }

    fn embedding_stats(&self) -> Option<EmbeddingStats> {
        None
    }
}

/// What happens to a document that cannot be chunked or embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip it with a warning.
    #[default]
    Permissive,
    /// Count it against the failure-rate budget.
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounts {
    pub attempted: usize,
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub struct FailureTracker {
    threshold: f64,
    counts: HashMap<String, FailureCounts>,
}

impl FailureTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            counts: HashMap::new(),
        }
    }

    pub fn record(&mut self, run_tag: &str, failed: bool) {
        let counts = self.counts.entry(run_tag.to_string()).or_default();
        counts.attempted += 1;
        counts.failures += usize::from(failed);
    }

    pub fn counts(&self, run_tag: &str) -> FailureCounts {
        self.counts.get(run_tag).copied().unwrap_or_default()
    }

    pub fn check(&self, run_tag: &str) -> Result<(), BenchError> {
        let counts = self.counts(run_tag);
        if counts.attempted == 0 {
            return Ok(());
        }
        let rate = counts.failures as f64 / counts.attempted as f64;
        if rate > self.threshold {
            return Err(BenchError::FailureRateExceeded {
                run_tag: run_tag.to_string(),
                failures: counts.failures,
                attempted: counts.attempted,
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    pub fn reset(&mut self, run_tag: &str) {
        self.counts.remove(run_tag);
    }
}

/// Chunk, embed, and store documents; answer queries by vector search.
pub struct ChunkEmbedProvider {
    name: String,
    chunker: Box<dyn Chunker>,
    embedder: CachedEmbedder,
    store: Box<dyn VectorStore>,
    policy: FailurePolicy,
    tracker: FailureTracker,
    initialized: bool,
}

impl ChunkEmbedProvider {
    pub fn new(
        name: impl Into<String>,
        chunker: Box<dyn Chunker>,
        embedder: CachedEmbedder,
        store: Box<dyn VectorStore>,
    ) -> Self {
        Self {
            name: name.into(),
            chunker,
            embedder,
            store,
            policy: FailurePolicy::default(),
            tracker: FailureTracker::new(0.1),
            initialized: false,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy, threshold: f64) -> Self {
        self.policy = policy;
        self.tracker = FailureTracker::new(threshold);
        self
    }

    /// Builds every component up front so a bad name or missing credential
    /// fails before any item runs.
    pub fn from_config(name: impl Into<String>, config: &Config) -> Result<Self> {
        config.validate()?;
        let chunker = build_chunker(config)?;
        let source = build_source(config)?;
        let cache = config.cache_dir.as_ref().map(EmbeddingCache::new);
        let stores = builtin_stores()?;
        let store = stores.lookup(&config.vector_store)?();
        Ok(Self::new(name, chunker, CachedEmbedder::new(source, cache), store)
            .with_failure_policy(config.failure_policy, config.failure_threshold))
    }

    pub fn failure_counts(&self, run_tag: &str) -> FailureCounts {
        self.tracker.counts(run_tag)
    }

    fn document_failed(&mut self, run_tag: &str, doc_id: &str, err: anyhow::Error) -> Result<()> {
        self.tracker.record(run_tag, true);
        match self.policy {
            FailurePolicy::Permissive => {
                warn!(run_tag, doc_id, error = %err, "skipping document");
            }
            FailurePolicy::Strict => {
                let counts = self.tracker.counts(run_tag);
                warn!(
                    run_tag,
                    doc_id,
                    failures = counts.failures,
                    attempted = counts.attempted,
                    error = %err,
                    "document failed"
                );
            }
        }
        Ok(())
    }

    fn index_document(&mut self, data: &PreparedData) -> Result<Vec<StoredChunk>> {
        let filepath = data.filepath().to_string();
        let chunks = self
            .chunker
            .chunk(&data.content, &filepath)
            .with_context(|| format!("chunk {filepath}"))?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let batch = self
            .embedder
            .embed_batch(&texts)
            .with_context(|| format!("embed chunks of {filepath}"))?;

        Ok(chunks
            .into_iter()
            .zip(batch.embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| {
                let mut metadata = data.metadata.clone();
                metadata.insert("filepath".into(), Value::from(filepath.as_str()));
                for (key, line) in [("startLine", chunk.start_line), ("endLine", chunk.end_line)] {
                    match line {
                        Some(line) => metadata.insert(key.into(), Value::from(line)),
                        // a document's own span must not stand in for the chunk's
                        None => metadata.remove(key),
                    };
                }
                metadata.insert("chunkIndex".into(), Value::from(index));
                metadata.insert("docId".into(), Value::from(data.id.as_str()));
                StoredChunk {
                    id: chunk.id.unwrap_or_else(|| format!("{filepath}:{index}")),
                    content: chunk.content,
                    embedding: embedding.vector,
                    metadata,
                }
            })
            .collect())
    }
}

impl Provider for ChunkEmbedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.chunker
            .preflight()
            .with_context(|| format!("initialize provider {}", self.name))?;
        self.initialized = true;
        info!(
            provider = %self.name,
            chunker = self.chunker.name(),
            model = self.embedder.model_id(),
            "provider initialized"
        );
        Ok(())
    }

    fn add_context(&mut self, data: &PreparedData, run_tag: &str) -> Result<()> {
        let stored = match self.index_document(data) {
            Ok(stored) => stored,
            Err(err) => return self.document_failed(run_tag, &data.id, err),
        };
        if stored.is_empty() {
            if self.policy == FailurePolicy::Strict {
                let err = anyhow::anyhow!("chunker produced no chunks");
                return self.document_failed(run_tag, &data.id, err);
            }
            debug!(run_tag, doc_id = %data.id, "document produced no chunks");
            self.tracker.record(run_tag, false);
            return Ok(());
        }
        debug!(run_tag, doc_id = %data.id, chunks = stored.len(), "indexed document");
        self.store.add(run_tag, stored)?;
        self.tracker.record(run_tag, false);
        Ok(())
    }

    fn search_query(
        &mut self,
        query: &str,
        run_tag: &str,
        params: SearchParams,
    ) -> Result<Vec<SearchResult>> {
        let embedded = self.embedder.embed(query).context("embed query")?;
        let hits = self
            .store
            .search(run_tag, &embedded.vector, params)
            .with_context(|| format!("search {run_tag}"))?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                id: hit.chunk.id,
                content: hit.chunk.content,
                score: hit.score,
                chunks: Vec::new(),
                metadata: hit.chunk.metadata,
            })
            .collect())
    }

    fn clear(&mut self, run_tag: &str) -> Result<()> {
        self.store.clear(run_tag);
        self.tracker.reset(run_tag);
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        let stats = self.embedder.stats();
        debug!(
            provider = %self.name,
            api_calls = stats.api_calls,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            total_tokens = stats.total_tokens,
            "provider cleanup"
        );
        Ok(())
    }

    fn check_failure_rate(&self, run_tag: &str) -> Result<(), BenchError> {
        match self.policy {
            FailurePolicy::Permissive => Ok(()),
            FailurePolicy::Strict => self.tracker.check(run_tag),
        }
    }

    fn embedding_stats(&self) -> Option<EmbeddingStats> {
        Some(self.embedder.stats())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::chunk::FixedSizeChunker;
    use crate::embed::EmbeddingSource;
    use crate::embed::RawEmbeddings;
    use crate::model::ChunkResult;
    use crate::model::Metadata;
    use crate::relevance::LineRange;
    use crate::relevance::is_location_relevant;
    use crate::vector_store::InMemoryVectorStore;

    /// Byte histogram: a fixed-length, deterministic stand-in for a model.
    struct StubSource;

    impl EmbeddingSource for StubSource {
        fn model_id(&self) -> &str {
            "stub-histogram"
        }

        fn max_batch_size(&self) -> usize {
            16
        }

        fn embed_texts(&self, texts: &[&str]) -> Result<RawEmbeddings> {
            Ok(RawEmbeddings {
                vectors: texts
                    .iter()
                    .map(|text| {
                        let mut v = vec![0.0f32; 64];
                        for b in text.bytes() {
                            v[usize::from(b) % 64] += 1.0;
                        }
                        v
                    })
                    .collect(),
                total_tokens: None,
            })
        }
    }

    fn provider(chunker: Box<dyn Chunker>) -> ChunkEmbedProvider {
        ChunkEmbedProvider::new(
            "stub",
            chunker,
            CachedEmbedder::new(Box::new(StubSource), None),
            Box::new(InMemoryVectorStore::default()),
        )
    }

    fn doc(id: &str, filepath: &str, content: &str) -> PreparedData {
        let mut metadata = Metadata::new();
        metadata.insert("filepath".into(), json!(filepath));
        PreparedData {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    #[test]
    fn query_closest_to_second_document_ranks_its_first_chunk_first() -> Result<()> {
        let fixed = FixedSizeChunker::new(50, 10)?;
        let mut provider = provider(Box::new(fixed));
        provider.initialize()?;
        let docs = [
            doc(
                "1",
                "docs/one.rs",
                "fn alpha() -> u32 {\n    1\n}\n\nfn beta() -> u32 {\n    alpha() + 1\n}\n",
            ),
            doc(
                "2",
                "docs/two.rs",
                "struct Parser {\n    input: String,\n}\n\nimpl Parser {\n    fn parse(&self) {}\n}\n",
            ),
            doc(
                "3",
                "docs/three.md",
                "# Notes\n\nZebra quokka yak xylophone. Lorem ipsum dolor sit amet.\n",
            ),
        ];
        for d in &docs {
            provider.add_context(d, "t1")?;
        }

        let first_chunk = &fixed.windows(&docs[1].content, "docs/two.rs")[0];
        let hits = provider.search_query(&first_chunk.content, "t1", SearchParams::default())?;
        assert_eq!(hits[0].id, "docs/two.rs:0");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[0].metadata["startLine"], json!(1));
        assert_eq!(hits[0].metadata["docId"], json!("2"));

        assert!(provider.search_query("x", "t2", SearchParams::default())?.is_empty());
        provider.clear("t1")?;
        assert!(provider.search_query("x", "t1", SearchParams::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn chunk_keys_override_document_metadata() -> Result<()> {
        let mut fixed = provider(Box::new(FixedSizeChunker::new(100, 0)?));
        let mut data = doc("d", "src/lib.rs", "pub fn lib() {}\n");
        data.metadata.insert("startLine".into(), json!(999));
        data.metadata.insert("chunkIndex".into(), json!("bogus"));
        data.metadata.insert("repo".into(), json!("acme/lib"));
        fixed.add_context(&data, "t")?;

        let hits = fixed.search_query("pub fn lib() {}", "t", SearchParams::default())?;
        let metadata = &hits[0].metadata;
        assert_eq!(metadata["startLine"], json!(1));
        assert_eq!(metadata["chunkIndex"], json!(0));
        assert_eq!(metadata["repo"], json!("acme/lib"));
        assert_eq!(metadata["filepath"], json!("src/lib.rs"));

        let mut lineless = provider(Box::new(Lineless));
        let mut data = doc("d", "src/lib.rs", "pub fn lib() {}\n");
        data.metadata.insert("startLine".into(), json!(40));
        data.metadata.insert("endLine".into(), json!(60));
        lineless.add_context(&data, "t")?;
        let hits = lineless.search_query("pub fn lib() {}", "t", SearchParams::default())?;
        assert!(!hits[0].metadata.contains_key("startLine"));
        assert!(!hits[0].metadata.contains_key("endLine"));
        // file match alone decides relevance when the chunk has no span
        let location = hits[0].location();
        assert!(is_location_relevant(&location, "src/lib.rs", LineRange::new(1, 2), None));
        Ok(())
    }

    /// Reports whole-document chunks without line spans.
    struct Lineless;

    impl Chunker for Lineless {
        fn name(&self) -> &str {
            "lineless"
        }

        fn chunk(&self, content: &str, _filepath: &str) -> Result<Vec<ChunkResult>> {
            Ok(vec![ChunkResult {
                id: None,
                start_line: None,
                end_line: None,
                content: content.to_string(),
            }])
        }
    }

    struct Flaky {
        preflights: Rc<Cell<usize>>,
    }

    impl Chunker for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn chunk(&self, content: &str, filepath: &str) -> Result<Vec<ChunkResult>> {
            if content.starts_with("bad") {
                anyhow::bail!("cannot parse {filepath}");
            }
            Ok(vec![ChunkResult {
                content: content.to_string(),
                start_line: Some(1),
                end_line: Some(1),
                id: None,
            }])
        }

        fn preflight(&self) -> Result<()> {
            self.preflights.set(self.preflights.get() + 1);
            Ok(())
        }
    }

    fn flaky() -> (Box<dyn Chunker>, Rc<Cell<usize>>) {
        let preflights = Rc::new(Cell::new(0));
        let chunker = Flaky {
            preflights: preflights.clone(),
        };
        (Box::new(chunker), preflights)
    }

    #[test]
    fn initialize_is_idempotent() -> Result<()> {
        let (chunker, preflights) = flaky();
        let mut provider = provider(chunker);
        provider.initialize()?;
        provider.initialize()?;
        assert_eq!(preflights.get(), 1);
        Ok(())
    }

    #[test]
    fn permissive_policy_skips_failed_documents() -> Result<()> {
        let (chunker, _) = flaky();
        let mut provider = provider(chunker);
        provider.add_context(&doc("a", "a.rs", "bad input"), "t")?;
        provider.add_context(&doc("b", "b.rs", "good input"), "t")?;
        assert!(provider.check_failure_rate("t").is_ok());
        let hits = provider.search_query("good input", "t", SearchParams::default())?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b.rs:0");
        Ok(())
    }

    #[test]
    fn strict_policy_trips_above_threshold() -> Result<()> {
        let (chunker, _) = flaky();
        let mut provider = provider(chunker).with_failure_policy(FailurePolicy::Strict, 0.25);
        for i in 0..3 {
            provider.add_context(&doc(&i.to_string(), "g.rs", "good"), "t")?;
        }
        provider.add_context(&doc("x", "x.rs", "bad"), "t")?;
        // 1 of 4 is exactly the threshold
        assert!(provider.check_failure_rate("t").is_ok());
        provider.add_context(&doc("y", "y.rs", "bad"), "t")?;
        let err = provider.check_failure_rate("t").unwrap_err();
        assert_eq!(
            err,
            BenchError::FailureRateExceeded {
                run_tag: "t".into(),
                failures: 2,
                attempted: 5,
                threshold: 0.25,
            }
        );
        assert!(provider.check_failure_rate("other").is_ok());
        provider.clear("t")?;
        assert_eq!(provider.failure_counts("t"), FailureCounts::default());
        Ok(())
    }

    #[test]
    fn strict_policy_counts_empty_output_as_failure() -> Result<()> {
        let mut provider = provider(Box::new(FixedSizeChunker::new(10, 0)?))
            .with_failure_policy(FailurePolicy::Strict, 0.0);
        provider.add_context(&doc("blank", "b.txt", "   \n  "), "t")?;
        assert!(provider.check_failure_rate("t").is_err());
        Ok(())
    }

    #[test]
    fn from_config_fails_fast_on_unknown_components() {
        let config = Config {
            vector_store: "pgvector".into(),
            ..Default::default()
        };
        let err = ChunkEmbedProvider::from_config("p", &config).err().expect("error");
        assert!(err.to_string().contains("unknown vector store 'pgvector'"));

        assert!(ChunkEmbedProvider::from_config("p", &Config::default()).is_ok());
    }
}
