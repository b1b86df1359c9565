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

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use clap::ValueEnum;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::embed_cache::EmbeddingStats;
use crate::metrics::RelevanceJudge;
use crate::metrics::RetrievalMetrics;
use crate::metrics::summarize;
use crate::model::BenchmarkItem;
use crate::model::EvalResult;
use crate::model::PreparedData;
use crate::model::SearchResult;
use crate::provider::Provider;
use crate::vector_store::SearchParams;

/// How benchmark items share vector-store namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum NamespaceMode {
    /// Each item gets its own namespace, cleared after the item.
    #[default]
    PerItem,
    /// All items search one shared corpus; contexts are de-duplicated by id.
    PerRun,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dataset: String,
    pub k_values: Vec<usize>,
    pub iou_threshold: f64,
    pub search_threshold: Option<f32>,
    pub namespace: NamespaceMode,
    /// Namespace used in [`NamespaceMode::PerRun`].
    pub run_tag: String,
    pub limit: Option<usize>,
    /// Documents indexed alongside every item's own contexts.
    pub corpus: Vec<PreparedData>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            k_values: vec![1, 3, 5, 10],
            iou_threshold: 0.0,
            search_threshold: None,
            namespace: NamespaceMode::PerItem,
            run_tag: "run".to_string(),
            limit: None,
            corpus: Vec::new(),
        }
    }
}

impl RunOptions {
    fn max_k(&self) -> usize {
        self.k_values.iter().copied().max().unwrap_or(1).max(1)
    }
}

/// The persisted outcome of one provider over one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub provider: String,
    pub dataset: String,
    pub k_values: Vec<usize>,
    pub iou_threshold: f64,
    pub metrics: RetrievalMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingStats>,
    pub results: Vec<EvalResult>,
}

/// Runs every item through `provider` and scores the results.
///
/// The provider is initialized before the first item, so a provider that
/// cannot start produces no results at all. `cleanup` runs even when an
/// item fails.
pub fn run_benchmark(
    provider: &mut dyn Provider,
    items: &[BenchmarkItem],
    options: &RunOptions,
) -> Result<RunReport> {
    let started = Instant::now();
    provider.initialize()?;
    let outcome = run_items(provider, items, options);
    let cleanup = provider.cleanup();
    let results = outcome?;
    cleanup.with_context(|| format!("clean up provider {}", provider.name()))?;

    let judge = RelevanceJudge::from_iou_threshold(options.iou_threshold);
    let metrics = summarize(&results, &options.k_values, judge);
    info!(
        provider = provider.name(),
        items = results.len(),
        accuracy = metrics.accuracy,
        mrr = metrics.mrr,
        took_ms = started.elapsed().as_millis() as u64,
        "benchmark run finished"
    );
    Ok(RunReport {
        provider: provider.name().to_string(),
        dataset: options.dataset.clone(),
        k_values: options.k_values.clone(),
        iou_threshold: options.iou_threshold,
        metrics,
        embedding: provider.embedding_stats(),
        results,
    })
}

fn run_items(
    provider: &mut dyn Provider,
    items: &[BenchmarkItem],
    options: &RunOptions,
) -> Result<Vec<EvalResult>> {
    let items = &items[..options.limit.unwrap_or(items.len()).min(items.len())];
    let judge = RelevanceJudge::from_iou_threshold(options.iou_threshold);
    let params = SearchParams {
        limit: options.max_k(),
        threshold: options.search_threshold,
    };

    if options.namespace == NamespaceMode::PerRun {
        let tag = options.run_tag.as_str();
        provider.clear(tag)?;
        let mut seen = HashSet::new();
        for document in &options.corpus {
            if seen.insert(document.id.as_str()) {
                provider
                    .add_context(document, tag)
                    .with_context(|| format!("add corpus document {}", document.id))?;
            }
        }
        for item in items {
            for context in &item.contexts {
                if seen.insert(context.id.as_str()) {
                    provider
                        .add_context(context, tag)
                        .with_context(|| format!("add context {} of item {}", context.id, item.id))?;
                }
            }
        }
        provider.check_failure_rate(tag)?;
        debug!(run_tag = tag, contexts = seen.len(), "shared corpus indexed");
    }

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let tag = match options.namespace {
            NamespaceMode::PerItem => item.id.as_str(),
            NamespaceMode::PerRun => options.run_tag.as_str(),
        };
        if options.namespace == NamespaceMode::PerItem {
            provider.clear(tag)?;
            for document in &options.corpus {
                provider
                    .add_context(document, tag)
                    .with_context(|| format!("add corpus document {}", document.id))?;
            }
            for context in &item.contexts {
                provider
                    .add_context(context, tag)
                    .with_context(|| format!("add context {} of item {}", context.id, item.id))?;
            }
            provider.check_failure_rate(tag)?;
        }

        let hits = provider
            .search_query(&item.question, tag, params)
            .with_context(|| format!("search item {}", item.id))?;
        let result = evaluate(item, hits, judge, params.limit);
        debug!(item = %item.id, correct = result.correct, score = result.score, "item evaluated");
        results.push(result);

        if options.namespace == NamespaceMode::PerItem {
            provider.clear(tag)?;
        }
    }
    Ok(results)
}

fn evaluate(
    item: &BenchmarkItem,
    hits: Vec<SearchResult>,
    judge: RelevanceJudge,
    max_k: usize,
) -> EvalResult {
    let (actual, score) = hits
        .first()
        .map(|top| (top.content.clone(), top.score))
        .unwrap_or_default();
    let mut result = EvalResult {
        id: item.id.clone(),
        question: item.question.clone(),
        expected: item.answer.clone(),
        actual,
        score,
        correct: false,
        retrieved_context: hits,
        metadata: item.metadata.clone(),
    };
    result.correct = result
        .retrieved_context
        .iter()
        .take(max_k)
        .any(|hit| judge.is_relevant(&result, hit));
    result
}
