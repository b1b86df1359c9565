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

//! Turns files on disk into [`PreparedData`] documents.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use walkdir::WalkDir;

use crate::model::Metadata;
use crate::model::PreparedData;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub glob: Option<String>,
    pub ignore: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<PreparedData>,
    pub warnings: Vec<String>,
}

/// Collects documents from files and directories.
///
/// Directories are walked in file-name order. Inside a directory the
/// document id and `filepath` are relative to that directory with `/`
/// separators, so ground truth written against a repository checkout matches
/// no matter where it is checked out. Globs match the same relative path.
pub fn collect_documents(paths: Vec<PathBuf>, opts: &IngestOptions) -> Result<IngestReport> {
    let include_set = build_globset(opts.glob.as_deref())?;
    let ignore_set = build_ignore_set(&opts.ignore)?;
    let mut report = IngestReport::default();

    for path in resolve_paths(paths) {
        if path.is_file() {
            let rel = display_path(&path);
            load_file(&path, &rel, &include_set, &ignore_set, &mut report)?;
        } else if path.is_dir() {
            for entry in WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    let rel = entry
                        .path()
                        .strip_prefix(&path)
                        .map(display_path)
                        .unwrap_or_else(|_| display_path(entry.path()));
                    load_file(entry.path(), &rel, &include_set, &ignore_set, &mut report)?;
                }
            }
        } else {
            report
                .warnings
                .push(format!("skip missing path: {}", path.display()));
        }
    }

    debug!(
        documents = report.documents.len(),
        warnings = report.warnings.len(),
        "documents collected"
    );
    Ok(report)
}

fn resolve_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths
    }
}

fn build_globset(pattern: Option<&str>) -> Result<Option<GlobSet>> {
    if let Some(pat) = pattern {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pat).with_context(|| format!("invalid glob {pat}"))?);
        let set = builder.build()?;
        Ok(Some(set))
    } else {
        Ok(None)
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).with_context(|| format!("invalid ignore glob {pat}"))?);
    }
    Ok(builder.build()?)
}

fn display_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn load_file(
    path: &Path,
    rel: &str,
    include_set: &Option<GlobSet>,
    ignore_set: &GlobSet,
    report: &mut IngestReport,
) -> Result<()> {
    if !ignore_set.is_empty() && ignore_set.is_match(rel) {
        return Ok(());
    }
    if let Some(set) = include_set
        && !set.is_match(rel)
    {
        return Ok(());
    }

    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => {
            report.warnings.push(format!("skip non-text file: {rel}"));
            return Ok(());
        }
    };
    let fs_meta = std::fs::metadata(path).with_context(|| format!("metadata {rel}"))?;
    let mtime = fs_meta
        .modified()
        .ok()
        .and_then(|t| OffsetDateTime::from(t).format(&Rfc3339).ok());

    let mut metadata = Metadata::new();
    metadata.insert("filepath".into(), Value::from(rel));
    metadata.insert("bytes".into(), Value::from(fs_meta.len()));
    metadata.insert("sha256".into(), Value::from(sha256_hex(text.as_bytes())));
    if let Some(mtime) = mtime {
        metadata.insert("mtime".into(), Value::from(mtime));
    }
    report.documents.push(PreparedData {
        id: rel.to_string(),
        content: text,
        metadata,
    });
    Ok(())
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn directories_yield_relative_ids_in_name_order() -> Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("src/nested"))?;
        std::fs::write(dir.path().join("src/b.rs"), "fn b() {}\n")?;
        std::fs::write(dir.path().join("src/a.rs"), "fn a() {}\n")?;
        std::fs::write(dir.path().join("src/nested/c.md"), "# c\n")?;
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00])?;

        let report = collect_documents(vec![dir.path().to_path_buf()], &IngestOptions::default())?;
        let ids: Vec<_> = report.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["src/a.rs", "src/b.rs", "src/nested/c.md"]);
        assert_eq!(report.documents[0].filepath(), "src/a.rs");
        assert_eq!(report.documents[0].metadata["bytes"], Value::from(10));
        assert_eq!(report.warnings, ["skip non-text file: blob.bin"]);
        Ok(())
    }

    #[test]
    fn globs_filter_relative_paths() -> Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("src"))?;
        std::fs::write(dir.path().join("src/a.rs"), "fn a() {}\n")?;
        std::fs::write(dir.path().join("src/gen.rs"), "// generated\n")?;
        std::fs::write(dir.path().join("README.md"), "readme\n")?;

        let opts = IngestOptions {
            glob: Some("**/*.rs".into()),
            ignore: vec!["**/gen.rs".into()],
        };
        let report = collect_documents(vec![dir.path().to_path_buf()], &opts)?;
        let ids: Vec<_> = report.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["src/a.rs"]);
        Ok(())
    }

    #[test]
    fn missing_paths_are_warnings_and_bad_globs_are_errors() -> Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("nope");
        let report = collect_documents(vec![missing], &IngestOptions::default())?;
        assert!(report.documents.is_empty());
        assert_eq!(report.warnings.len(), 1);

        let opts = IngestOptions {
            glob: Some("[".into()),
            ignore: Vec::new(),
        };
        assert!(collect_documents(vec![dir.path().to_path_buf()], &opts).is_err());
        Ok(())
    }
}
