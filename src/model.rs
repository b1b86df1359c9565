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

//! Shared domain types used across chunking, retrieval, and evaluation.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

pub type Metadata = Map<String, Value>;

/// One ingestible document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedData {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PreparedData {
    /// The identifier used for chunk ids and relevance checks.
    pub fn filepath(&self) -> &str {
        self.metadata
            .get("filepath")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<SearchResult>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchResult {
    pub fn location(&self) -> Location<'_> {
        Location {
            filepath: self
                .metadata
                .get("filepath")
                .and_then(Value::as_str)
                .unwrap_or(""),
            start_line: metadata_line(&self.metadata, "startLine"),
            end_line: metadata_line(&self.metadata, "endLine"),
        }
    }
}

/// A retrieved span as seen by the relevance engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub filepath: &'a str,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruth {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl GroundTruth {
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        let value = metadata.get("groundTruth")?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Shifts a ground truth expressed with `line_base` onto 1-indexed lines.
    pub fn rebased(self, line_base: u32) -> Self {
        let shift = 1u32.saturating_sub(line_base);
        Self {
            file: self.file,
            start_line: self.start_line.saturating_add(shift),
            end_line: self.end_line.saturating_add(shift),
        }
    }
}

/// One benchmark question with its corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkItem {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub contexts: Vec<PreparedData>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub id: String,
    pub question: String,
    pub expected: String,
    pub actual: String,
    pub score: f32,
    pub correct: bool,
    #[serde(default)]
    pub retrieved_context: Vec<SearchResult>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EvalResult {
    pub fn ground_truth(&self) -> Option<GroundTruth> {
        GroundTruth::from_metadata(&self.metadata)
    }
}

fn metadata_line(metadata: &Metadata, key: &str) -> Option<u32> {
    metadata
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|line| u32::try_from(line).ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filepath_falls_back_to_id() {
        let mut doc = PreparedData {
            id: "doc-1".into(),
            content: String::new(),
            metadata: Metadata::new(),
        };
        assert_eq!(doc.filepath(), "doc-1");
        doc.metadata.insert("filepath".into(), json!("src/lib.rs"));
        assert_eq!(doc.filepath(), "src/lib.rs");
    }

    #[test]
    fn ground_truth_rebases_zero_indexed_lines() {
        let mut metadata = Metadata::new();
        metadata.insert(
            "groundTruth".into(),
            json!({"file": "a.rs", "startLine": 0, "endLine": 19}),
        );
        let gt = GroundTruth::from_metadata(&metadata).expect("gt").rebased(0);
        assert_eq!((gt.start_line, gt.end_line), (1, 20));
        let gt = gt.rebased(1);
        assert_eq!((gt.start_line, gt.end_line), (1, 20));
    }

    #[test]
    fn rebasing_saturates_at_the_line_limit() {
        let gt = GroundTruth {
            file: "a.rs".into(),
            start_line: u32::MAX - 1,
            end_line: u32::MAX,
        }
        .rebased(0);
        assert_eq!((gt.start_line, gt.end_line), (u32::MAX, u32::MAX));
    }

    #[test]
    fn search_result_location_reads_metadata() {
        let result: SearchResult = serde_json::from_value(json!({
            "id": "a.rs:0",
            "content": "fn a() {}",
            "score": 0.5,
            "metadata": {"filepath": "a.rs", "startLine": 3, "endLine": 9}
        }))
        .expect("parse");
        let loc = result.location();
        assert_eq!(loc.filepath, "a.rs");
        assert_eq!(loc.start_line, Some(3));
        assert_eq!(loc.end_line, Some(9));
    }
}
