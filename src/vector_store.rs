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

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;

use crate::error::BenchError;
use crate::model::StoredChunk;
use crate::registry::Registry;

pub const STORE_MEMORY: &str = "memory";

#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub limit: usize,
    pub threshold: Option<f32>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Per-namespace chunk storage. Implementations must keep namespaces
/// fully isolated from each other.
pub trait VectorStore {
    fn add(&mut self, run_tag: &str, chunks: Vec<StoredChunk>) -> Result<()>;

    fn search(&self, run_tag: &str, query: &[f32], params: SearchParams)
    -> Result<Vec<ScoredChunk>>;

    fn clear(&mut self, run_tag: &str);

    fn count(&self, run_tag: &str) -> usize {
        self.get_all(run_tag).len()
    }

    fn get_all(&self, run_tag: &str) -> Vec<StoredChunk>;
}

pub type StoreFactory = fn() -> Box<dyn VectorStore>;

pub fn builtin_stores() -> Result<Registry<StoreFactory>, BenchError> {
    let mut registry: Registry<StoreFactory> = Registry::new("vector store");
    registry.register(STORE_MEMORY, &["in-memory", "brute-force"], || {
        Box::new(InMemoryVectorStore::default())
    })?;
    Ok(registry)
}

/// Unindexed scan over every chunk in the namespace.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    namespaces: HashMap<String, Vec<StoredChunk>>,
}

impl VectorStore for InMemoryVectorStore {
    fn add(&mut self, run_tag: &str, chunks: Vec<StoredChunk>) -> Result<()> {
        self.namespaces
            .entry(run_tag.to_string())
            .or_default()
            .extend(chunks);
        Ok(())
    }

    fn search(
        &self,
        run_tag: &str,
        query: &[f32],
        params: SearchParams,
    ) -> Result<Vec<ScoredChunk>> {
        let Some(chunks) = self.namespaces.get(run_tag) else {
            return Ok(Vec::new());
        };
        let threshold = params.threshold.unwrap_or(f32::NEG_INFINITY);
        let mut scored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let score = cosine_similarity(query, &chunk.embedding)?;
            if score >= threshold {
                scored.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                });
            }
        }
        // sort_by is stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(params.limit);
        Ok(scored)
    }

    fn clear(&mut self, run_tag: &str) {
        self.namespaces.remove(run_tag);
    }

    fn count(&self, run_tag: &str) -> usize {
        self.namespaces.get(run_tag).map(Vec::len).unwrap_or(0)
    }

    fn get_all(&self, run_tag: &str) -> Vec<StoredChunk> {
        self.namespaces.get(run_tag).cloned().unwrap_or_default()
    }
}

/// Cosine similarity; 0 when either side has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, BenchError> {
    if a.len() != b.len() {
        return Err(BenchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(sim.clamp(-1.0, 1.0) as f32)
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::*;
    use crate::model::Metadata;

    fn chunk(id: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            id: id.to_string(),
            content: id.to_string(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn cosine_handles_identity_zero_and_mismatch() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[0.0; 3], &v).unwrap(), 0.0);
        assert_eq!(
            cosine_similarity(&v, &[1.0]),
            Err(BenchError::DimensionMismatch { left: 3, right: 1 })
        );
    }

    #[test]
    fn search_ranks_filters_and_truncates() -> Result<()> {
        let mut store = InMemoryVectorStore::default();
        store.add(
            "t1",
            vec![
                chunk("far", vec![0.0, 1.0]),
                chunk("near", vec![1.0, 0.1]),
                chunk("exact", vec![1.0, 0.0]),
                chunk("opposite", vec![-1.0, 0.0]),
            ],
        )?;

        let hits = store.search(
            "t1",
            &[1.0, 0.0],
            SearchParams {
                limit: 2,
                threshold: None,
            },
        )?;
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, ["exact", "near"]);

        let hits = store.search(
            "t1",
            &[1.0, 0.0],
            SearchParams {
                limit: 10,
                threshold: Some(0.0),
            },
        )?;
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, ["exact", "near", "far"]);
        Ok(())
    }

    #[test]
    fn ties_keep_insertion_order_and_duplicates_coexist() -> Result<()> {
        let mut store = InMemoryVectorStore::default();
        store.add("t1", vec![chunk("b", vec![1.0, 0.0])])?;
        store.add("t1", vec![chunk("a", vec![2.0, 0.0]), chunk("b", vec![1.0, 0.0])])?;
        let hits = store.search("t1", &[1.0, 0.0], SearchParams::default())?;
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "b"]);
        assert_eq!(store.count("t1"), 3);
        Ok(())
    }

    #[test]
    fn namespaces_are_isolated_and_clearable() -> Result<()> {
        let mut store = InMemoryVectorStore::default();
        store.add("t1", vec![chunk("one", vec![1.0])])?;
        store.add("t2", vec![chunk("two", vec![1.0])])?;
        store.clear("t1");
        assert_eq!(store.count("t1"), 0);
        assert!(store.search("t1", &[1.0], SearchParams::default())?.is_empty());
        assert_eq!(store.get_all("t2")[0].id, "two");
        Ok(())
    }

    #[test]
    fn search_surfaces_dimension_mismatch() {
        let mut store = InMemoryVectorStore::default();
        store
            .add("t1", vec![chunk("one", vec![1.0, 0.0])])
            .expect("add");
        let err = store
            .search("t1", &[1.0], SearchParams::default())
            .unwrap_err();
        assert!(err.downcast_ref::<BenchError>().is_some());
    }

    #[test]
    fn builtin_store_registry_resolves_aliases() {
        let registry = builtin_stores().expect("registry");
        let factory = registry.lookup("brute-force").expect("memory store");
        assert_eq!(factory().count("t1"), 0);
    }

    proptest! {
        #[test]
        fn cosine_stays_in_bounds(
            pair in (1usize..16).prop_flat_map(|n| (vec(-100.0f32..100.0, n), vec(-100.0f32..100.0, n)))
        ) {
            let (a, b) = pair;
            let sim = cosine_similarity(&a, &b).unwrap();
            prop_assert!((-1.0..=1.0).contains(&sim));
        }

        #[test]
        fn cosine_of_vector_with_itself_is_one(a in vec(0.5f32..100.0, 1..16)) {
            let sim = cosine_similarity(&a, &a).unwrap();
            prop_assert!((sim - 1.0).abs() < 1e-5);
        }
    }
}
