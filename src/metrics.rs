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

//! Retrieval metrics over evaluated items.
//!
//! Every aggregate is the mean of [`per_item_scores`] for the same metric, so
//! the numbers in a summary and the samples fed to the comparison engine never
//! disagree. Empty input yields 0.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::BenchError;
use crate::model::EvalResult;
use crate::model::SearchResult;
use crate::relevance::LineRange;
use crate::relevance::is_location_relevant;
use crate::relevance::location_iou;

/// How a retrieved hit is judged relevant to an item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelevanceJudge {
    /// The hit text contains the expected answer (case-insensitive).
    Containment,
    /// The hit's location matches `metadata.groundTruth`. Items without
    /// ground truth have no relevant hits.
    Location { iou_threshold: Option<f64> },
    /// Location when the item carries ground truth, containment otherwise.
    Auto { iou_threshold: Option<f64> },
}

impl RelevanceJudge {
    pub fn from_iou_threshold(iou_threshold: f64) -> Self {
        RelevanceJudge::Auto {
            iou_threshold: Some(iou_threshold).filter(|t| *t > 0.0),
        }
    }

    pub fn is_relevant(&self, item: &EvalResult, hit: &SearchResult) -> bool {
        match *self {
            RelevanceJudge::Containment => contains_answer(&item.expected, &hit.content),
            RelevanceJudge::Location { iou_threshold } => {
                location_relevant(item, hit, iou_threshold).unwrap_or(false)
            }
            RelevanceJudge::Auto { iou_threshold } => location_relevant(item, hit, iou_threshold)
                .unwrap_or_else(|| contains_answer(&item.expected, &hit.content)),
        }
    }
}

fn location_relevant(item: &EvalResult, hit: &SearchResult, threshold: Option<f64>) -> Option<bool> {
    let gt = item.ground_truth()?;
    Some(is_location_relevant(
        &hit.location(),
        &gt.file,
        LineRange::from(&gt),
        threshold,
    ))
}

fn contains_answer(expected: &str, content: &str) -> bool {
    let needle = expected.trim().to_lowercase();
    !needle.is_empty() && content.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Accuracy,
    RecallAt(usize),
    PrecisionAt(usize),
    Mrr,
    IouAt(usize),
}

impl Metric {
    /// The metrics a run summary reports for `k_values`.
    pub fn standard(k_values: &[usize]) -> Vec<Metric> {
        let mut metrics = vec![Metric::Accuracy];
        metrics.extend(k_values.iter().map(|k| Metric::RecallAt(*k)));
        metrics.extend(k_values.iter().map(|k| Metric::PrecisionAt(*k)));
        metrics.push(Metric::Mrr);
        metrics.extend(k_values.iter().map(|k| Metric::IouAt(*k)));
        metrics
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Accuracy => f.write_str("accuracy"),
            Metric::RecallAt(k) => write!(f, "recall@{k}"),
            Metric::PrecisionAt(k) => write!(f, "precision@{k}"),
            Metric::Mrr => f.write_str("mrr"),
            Metric::IouAt(k) => write!(f, "iou@{k}"),
        }
    }
}

impl FromStr for Metric {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let unknown = || BenchError::UnknownName {
            kind: "metric",
            name: s.trim().to_string(),
            available: "accuracy, recall@k, precision@k, mrr, iou@k".to_string(),
        };
        match name.as_str() {
            "accuracy" => return Ok(Metric::Accuracy),
            "mrr" => return Ok(Metric::Mrr),
            _ => {}
        }
        let (base, k) = name.split_once('@').ok_or_else(unknown)?;
        let k: usize = k.parse().ok().filter(|k| *k > 0).ok_or_else(unknown)?;
        match base {
            "recall" => Ok(Metric::RecallAt(k)),
            "precision" => Ok(Metric::PrecisionAt(k)),
            "iou" => Ok(Metric::IouAt(k)),
            _ => Err(unknown()),
        }
    }
}

/// One score per item, keyed by item id.
///
/// Items a metric is undefined for are left out: precision skips items with
/// nothing retrieved, IoU skips items without ground truth.
pub fn per_item_scores(
    results: &[EvalResult],
    metric: Metric,
    judge: RelevanceJudge,
) -> Vec<(String, f64)> {
    results
        .iter()
        .filter_map(|item| item_score(item, metric, judge).map(|score| (item.id.clone(), score)))
        .collect()
}

fn item_score(item: &EvalResult, metric: Metric, judge: RelevanceJudge) -> Option<f64> {
    let hits = &item.retrieved_context;
    match metric {
        Metric::Accuracy => Some(if item.correct { 1.0 } else { 0.0 }),
        Metric::RecallAt(k) => {
            let hit = hits.iter().take(k).any(|h| judge.is_relevant(item, h));
            Some(if hit { 1.0 } else { 0.0 })
        }
        Metric::PrecisionAt(k) => {
            let top = &hits[..hits.len().min(k)];
            if top.is_empty() {
                return None;
            }
            let relevant = top.iter().filter(|h| judge.is_relevant(item, h)).count();
            Some(relevant as f64 / top.len() as f64)
        }
        Metric::Mrr => Some(
            hits.iter()
                .position(|h| judge.is_relevant(item, h))
                .map_or(0.0, |rank| 1.0 / (rank + 1) as f64),
        ),
        Metric::IouAt(k) => {
            let gt = item.ground_truth()?;
            let range = LineRange::from(&gt);
            Some(
                hits.iter()
                    .take(k)
                    .map(|h| location_iou(&h.location(), &gt.file, range))
                    .fold(0.0, f64::max),
            )
        }
    }
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

pub fn metric_value(results: &[EvalResult], metric: Metric, judge: RelevanceJudge) -> f64 {
    mean(
        per_item_scores(results, metric, judge)
            .into_iter()
            .map(|(_, score)| score),
    )
}

pub fn accuracy(results: &[EvalResult]) -> f64 {
    metric_value(results, Metric::Accuracy, RelevanceJudge::Containment)
}

pub fn recall_at_k(results: &[EvalResult], k: usize, judge: RelevanceJudge) -> f64 {
    metric_value(results, Metric::RecallAt(k), judge)
}

pub fn precision_at_k(results: &[EvalResult], k: usize, judge: RelevanceJudge) -> f64 {
    metric_value(results, Metric::PrecisionAt(k), judge)
}

pub fn mrr(results: &[EvalResult], judge: RelevanceJudge) -> f64 {
    metric_value(results, Metric::Mrr, judge)
}

pub fn iou_at_k(results: &[EvalResult], k: usize) -> f64 {
    metric_value(results, Metric::IouAt(k), RelevanceJudge::Containment)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub n: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedAccuracy {
    pub field: String,
    pub groups: BTreeMap<String, GroupStats>,
    /// Unweighted mean of the group accuracies.
    pub mean_accuracy: f64,
}

/// Accuracy per distinct value of `metadata[field]`. Items without the
/// field land in the `unknown` group.
pub fn grouped_accuracy(results: &[EvalResult], field: &str) -> GroupedAccuracy {
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for item in results {
        let key = match item.metadata.get(field) {
            None | Some(Value::Null) => "unknown".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let entry = counts.entry(key).or_default();
        entry.0 += 1;
        entry.1 += usize::from(item.correct);
    }
    let groups: BTreeMap<String, GroupStats> = counts
        .into_iter()
        .map(|(key, (n, correct))| {
            let stats = GroupStats {
                n,
                correct,
                accuracy: correct as f64 / n as f64,
            };
            (key, stats)
        })
        .collect();
    GroupedAccuracy {
        field: field.to_string(),
        mean_accuracy: mean(groups.values().map(|g| g.accuracy)),
        groups,
    }
}

pub fn by_question_type(results: &[EvalResult]) -> GroupedAccuracy {
    grouped_accuracy(results, "questionType")
}

pub fn by_category(results: &[EvalResult]) -> GroupedAccuracy {
    grouped_accuracy(results, "categoryId")
}

pub fn is_abstention(item: &EvalResult) -> bool {
    item.id.contains("_abs")
        || item.metadata.get("categoryId").and_then(Value::as_f64) == Some(5.0)
        || item.metadata.get("isAbstention").and_then(Value::as_bool) == Some(true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstentionAccuracy {
    pub n: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Set when no item qualified; `accuracy` is then 0.
    pub no_abstention_items: bool,
}

pub fn abstention_accuracy(results: &[EvalResult]) -> AbstentionAccuracy {
    let subset: Vec<&EvalResult> = results.iter().filter(|r| is_abstention(r)).collect();
    let correct = subset.iter().filter(|r| r.correct).count();
    AbstentionAccuracy {
        n: subset.len(),
        correct,
        accuracy: if subset.is_empty() {
            0.0
        } else {
            correct as f64 / subset.len() as f64
        },
        no_abstention_items: subset.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalMetrics {
    pub n: usize,
    pub accuracy: f64,
    pub recall_at_k: BTreeMap<usize, f64>,
    pub precision_at_k: BTreeMap<usize, f64>,
    pub mrr: f64,
    pub iou_at_k: BTreeMap<usize, f64>,
}

pub fn summarize(results: &[EvalResult], k_values: &[usize], judge: RelevanceJudge) -> RetrievalMetrics {
    let per_k = |metric: fn(usize) -> Metric| -> BTreeMap<usize, f64> {
        k_values
            .iter()
            .map(|k| (*k, metric_value(results, metric(*k), judge)))
            .collect()
    };
    RetrievalMetrics {
        n: results.len(),
        accuracy: accuracy(results),
        recall_at_k: per_k(Metric::RecallAt),
        precision_at_k: per_k(Metric::PrecisionAt),
        mrr: mrr(results, judge),
        iou_at_k: per_k(Metric::IouAt),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::Metadata;

    fn hit(content: &str, file: &str, start: u32, end: u32) -> SearchResult {
        let mut metadata = Metadata::new();
        metadata.insert("filepath".into(), json!(file));
        metadata.insert("startLine".into(), json!(start));
        metadata.insert("endLine".into(), json!(end));
        SearchResult {
            id: format!("{file}:{start}"),
            content: content.into(),
            score: 0.0,
            chunks: Vec::new(),
            metadata,
        }
    }

    fn item(id: &str, expected: &str, correct: bool, hits: Vec<SearchResult>) -> EvalResult {
        EvalResult {
            id: id.into(),
            question: "q".into(),
            expected: expected.into(),
            actual: String::new(),
            score: 0.0,
            correct,
            retrieved_context: hits,
            metadata: Metadata::new(),
        }
    }

    fn with_gt(mut item: EvalResult, file: &str, start: u32, end: u32) -> EvalResult {
        item.metadata.insert(
            "groundTruth".into(),
            json!({"file": file, "startLine": start, "endLine": end}),
        );
        item
    }

    #[test]
    fn empty_input_scores_zero() {
        let judge = RelevanceJudge::Containment;
        assert_eq!(accuracy(&[]), 0.0);
        assert_eq!(recall_at_k(&[], 5, judge), 0.0);
        assert_eq!(precision_at_k(&[], 5, judge), 0.0);
        assert_eq!(mrr(&[], judge), 0.0);
        assert_eq!(iou_at_k(&[], 5), 0.0);
        let summary = summarize(&[], &[1, 5], judge);
        assert_eq!(summary.n, 0);
        assert_eq!(summary.recall_at_k[&5], 0.0);
    }

    #[test]
    fn containment_metrics() {
        let judge = RelevanceJudge::Containment;
        let results = vec![
            item(
                "a",
                "Paris",
                true,
                vec![hit("london", "x", 1, 1), hit("capital is paris", "x", 2, 2)],
            ),
            item("b", "Rome", false, vec![hit("nothing", "x", 1, 1)]),
            item("c", "Oslo", false, Vec::new()),
        ];
        assert!((accuracy(&results) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(recall_at_k(&results, 1, judge), 0.0);
        assert!((recall_at_k(&results, 2, judge) - 1.0 / 3.0).abs() < 1e-12);
        // "c" retrieved nothing and is skipped
        assert_eq!(precision_at_k(&results, 2, judge), (0.5 + 0.0) / 2.0);
        assert!((mrr(&results, judge) - 0.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_expected_answer_is_never_contained() {
        let results = vec![item("a", "  ", true, vec![hit("anything", "x", 1, 1)])];
        assert_eq!(recall_at_k(&results, 1, RelevanceJudge::Containment), 0.0);
    }

    #[test]
    fn location_judge_uses_ground_truth_and_iou() {
        let results = vec![with_gt(
            item(
                "q1",
                "",
                false,
                vec![
                    hit("other", "src/b.rs", 1, 20),
                    hit("wide", "src/a.rs", 1, 62),
                    hit("tight", "src/a.rs", 1, 20),
                ],
            ),
            "src/a.rs",
            1,
            20,
        )];
        let loose = RelevanceJudge::Location { iou_threshold: None };
        let strict = RelevanceJudge::Location {
            iou_threshold: Some(0.5),
        };
        assert_eq!(mrr(&results, loose), 0.5);
        assert!((mrr(&results, strict) - 1.0 / 3.0).abs() < 1e-12);
        assert!((iou_at_k(&results, 2) - 20.0 / 62.0).abs() < 1e-12);
        assert_eq!(iou_at_k(&results, 3), 1.0);
    }

    #[test]
    fn location_judge_without_ground_truth_finds_nothing() {
        let results = vec![item("q", "alpha", false, vec![hit("alpha", "a.rs", 1, 2)])];
        let judge = RelevanceJudge::Location { iou_threshold: None };
        assert_eq!(recall_at_k(&results, 1, judge), 0.0);
        let auto = RelevanceJudge::Auto { iou_threshold: None };
        assert_eq!(recall_at_k(&results, 1, auto), 1.0);
        assert!(per_item_scores(&results, Metric::IouAt(1), judge).is_empty());
    }

    #[test]
    fn grouped_accuracy_reports_unweighted_mean() {
        let mut a = item("1", "", true, Vec::new());
        a.metadata.insert("questionType".into(), json!("temporal"));
        let mut b = item("2", "", false, Vec::new());
        b.metadata.insert("questionType".into(), json!("temporal"));
        let mut c = item("3", "", true, Vec::new());
        c.metadata.insert("questionType".into(), json!("multi-hop"));
        let d = item("4", "", false, Vec::new());
        let grouped = by_question_type(&[a, b, c, d]);
        assert_eq!(grouped.groups.len(), 3);
        assert_eq!(grouped.groups["temporal"].accuracy, 0.5);
        assert_eq!(grouped.groups["unknown"].n, 1);
        assert!((grouped.mean_accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn abstention_subset_matches_any_marker() {
        let by_id = item("conv_3_abs", "", true, Vec::new());
        let mut by_category = item("x", "", false, Vec::new());
        by_category.metadata.insert("categoryId".into(), json!(5));
        let mut by_flag = item("y", "", true, Vec::new());
        by_flag.metadata.insert("isAbstention".into(), json!(true));
        let plain = item("z", "", false, Vec::new());

        let summary = abstention_accuracy(&[by_id, by_category, by_flag, plain.clone()]);
        assert_eq!(summary.n, 3);
        assert_eq!(summary.correct, 2);
        assert!(!summary.no_abstention_items);

        let empty = abstention_accuracy(&[plain]);
        assert_eq!(empty.accuracy, 0.0);
        assert!(empty.no_abstention_items);
    }

    #[test]
    fn metric_names_round_trip() -> Result<(), BenchError> {
        for name in ["accuracy", "recall@5", "precision@1", "mrr", "iou@10"] {
            assert_eq!(name.parse::<Metric>()?.to_string(), name);
        }
        assert_eq!("Recall@3".parse::<Metric>()?, Metric::RecallAt(3));
        assert!("recall@0".parse::<Metric>().is_err());
        assert!("ndcg@5".parse::<Metric>().is_err());
        assert!("recall".parse::<Metric>().is_err());
        Ok(())
    }
}
