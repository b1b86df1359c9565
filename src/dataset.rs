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

//! Benchmark datasets (JSON Lines of [`BenchmarkItem`]) and run reports.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use serde_json::Value;

use crate::model::BenchmarkItem;
use crate::model::GroundTruth;
use crate::runner::RunReport;

/// Loads a dataset. Blank lines are ignored; ground truth is normalized to
/// 1-indexed lines.
pub fn read_items(path: &Path) -> Result<Vec<BenchmarkItem>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_items(&text).with_context(|| format!("load dataset {}", path.display()))
}

pub fn parse_items(text: &str) -> Result<Vec<BenchmarkItem>> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let item: BenchmarkItem =
            serde_json::from_str(line).with_context(|| format!("line {line_no}: invalid item"))?;
        let item = normalize_item(item).with_context(|| format!("line {line_no}"))?;
        if !seen.insert(item.id.clone()) {
            bail!("line {line_no}: duplicate item id '{}'", item.id);
        }
        items.push(item);
    }
    Ok(items)
}

/// Rebases `metadata.groundTruth` from `metadata.lineBase` (default 1) onto
/// 1-indexed lines and records the new base.
pub fn normalize_item(mut item: BenchmarkItem) -> Result<BenchmarkItem> {
    if item.id.trim().is_empty() {
        bail!("item id must not be empty");
    }
    let line_base = match item.metadata.get("lineBase") {
        None => 1,
        Some(value) => match value.as_u64() {
            Some(base @ (0 | 1)) => base as u32,
            _ => bail!("item '{}': lineBase must be 0 or 1, got {value}", item.id),
        },
    };
    if item.metadata.contains_key("groundTruth") {
        let gt = GroundTruth::from_metadata(&item.metadata).with_context(|| {
            format!(
                "item '{}': groundTruth must be {{file, startLine, endLine}}",
                item.id
            )
        })?;
        if gt.start_line > gt.end_line {
            bail!(
                "item '{}': groundTruth startLine {} is after endLine {}",
                item.id,
                gt.start_line,
                gt.end_line
            );
        }
        let gt = gt.rebased(line_base);
        item.metadata
            .insert("groundTruth".into(), serde_json::to_value(gt)?);
        item.metadata.insert("lineBase".into(), Value::from(1));
    }
    Ok(item)
}

pub fn write_run_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn read_run_report(path: &Path) -> Result<RunReport> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse run report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_items_and_skips_blank_lines() -> Result<()> {
        let text = r#"
{"id": "q1", "question": "where is parse?", "answer": "fn parse", "contexts": [{"id": "a", "content": "fn parse() {}", "metadata": {"filepath": "src/a.rs"}}]}

{"id": "q2", "question": "who?"}
"#;
        let items = parse_items(text)?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].contexts[0].filepath(), "src/a.rs");
        assert_eq!(items[1].answer, "");
        assert!(items[1].contexts.is_empty());
        Ok(())
    }

    #[test]
    fn zero_based_ground_truth_is_rebased() -> Result<()> {
        let text = r#"{"id": "q", "question": "?", "metadata": {"lineBase": 0, "groundTruth": {"file": "a.rs", "startLine": 0, "endLine": 19}}}"#;
        let items = parse_items(text)?;
        assert_eq!(
            items[0].metadata["groundTruth"],
            json!({"file": "a.rs", "startLine": 1, "endLine": 20})
        );
        assert_eq!(items[0].metadata["lineBase"], json!(1));

        let text = r#"{"id": "q", "question": "?", "metadata": {"groundTruth": {"file": "a.rs", "startLine": 3, "endLine": 4}}}"#;
        let items = parse_items(text)?;
        assert_eq!(items[0].metadata["groundTruth"]["startLine"], json!(3));
        Ok(())
    }

    #[test]
    fn rejects_bad_items_with_line_numbers() {
        let dup = "{\"id\": \"q\", \"question\": \"a\"}\n{\"id\": \"q\", \"question\": \"b\"}";
        let err = parse_items(dup).unwrap_err();
        assert!(err.to_string().contains("line 2: duplicate item id 'q'"), "{err}");

        let bad_gt = r#"{"id": "q", "question": "?", "metadata": {"groundTruth": {"file": "a.rs"}}}"#;
        assert!(parse_items(bad_gt).is_err());

        let reversed = r#"{"id": "q", "question": "?", "metadata": {"groundTruth": {"file": "a.rs", "startLine": 9, "endLine": 2}}}"#;
        assert!(parse_items(reversed).is_err());

        let bad_base = r#"{"id": "q", "question": "?", "metadata": {"lineBase": 2}}"#;
        assert!(parse_items(bad_base).is_err());

        assert!(parse_items("not json").is_err());
    }
}
