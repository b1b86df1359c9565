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

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::chunk::CHUNKER_FIXED;
use crate::chunk::DEFAULT_CHUNK_OVERLAP;
use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::embed::EMBEDDING_HASH;
use crate::error::BenchError;
use crate::provider::FailurePolicy;
use crate::stats::PValueMethod;
use crate::vector_store::STORE_MEMORY;

pub const CONFIG_FILE: &str = "ragbench.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunker: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_fallback: bool,
    pub bridge_program: Option<String>,
    pub bridge_args: Vec<String>,
    pub bridge_preflight_args: Vec<String>,

    pub embedding: String,
    pub embedding_model: Option<String>,
    pub embedding_dim: usize,
    pub embedding_dimensions: Option<usize>,
    pub embedding_batch_size: usize,
    pub embedding_base_url: Option<String>,
    pub embedding_timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,

    pub vector_store: String,
    pub search_threshold: Option<f32>,

    pub failure_policy: FailurePolicy,
    pub failure_threshold: f64,

    pub k_values: Vec<usize>,
    pub iou_threshold: f64,

    pub bootstrap_iterations: usize,
    pub alpha: f64,
    pub seed: Option<u64>,
    pub p_value_method: PValueMethod,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunker: CHUNKER_FIXED.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            chunk_fallback: true,
            bridge_program: None,
            bridge_args: Vec::new(),
            bridge_preflight_args: vec!["--version".to_string()],
            embedding: EMBEDDING_HASH.to_string(),
            embedding_model: None,
            embedding_dim: 256,
            embedding_dimensions: None,
            embedding_batch_size: 64,
            embedding_base_url: None,
            embedding_timeout_secs: 60,
            cache_dir: None,
            vector_store: STORE_MEMORY.to_string(),
            search_threshold: None,
            failure_policy: FailurePolicy::Permissive,
            failure_threshold: 0.1,
            k_values: vec![1, 3, 5, 10],
            iou_threshold: 0.0,
            bootstrap_iterations: 10_000,
            alpha: 0.05,
            seed: None,
            p_value_method: PValueMethod::Exact,
        }
    }
}

impl Config {
    /// Rejects settings no run could succeed with.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.chunk_size == 0 {
            return Err(BenchError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(BenchError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(BenchError::InvalidConfig(format!(
                "failure_threshold must be within [0, 1], got {}",
                self.failure_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(BenchError::InvalidConfig(format!(
                "iou_threshold must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(BenchError::InvalidConfig(format!(
                "alpha must be within (0, 1), got {}",
                self.alpha
            )));
        }
        if self.k_values.is_empty() || self.k_values.contains(&0) {
            return Err(BenchError::InvalidConfig(
                "k_values must be a non-empty list of positive integers".into(),
            ));
        }
        if self.bootstrap_iterations == 0 {
            return Err(BenchError::InvalidConfig(
                "bootstrap_iterations must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn max_k(&self) -> usize {
        self.k_values.iter().copied().max().unwrap_or(1)
    }
}

fn config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata));
        }
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile).join("AppData").join("Roaming"));
        }
        return None;
    }

    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support"),
        );
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config"))
}

pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("ragbench").join(CONFIG_FILE))
}

/// Loads `explicit` when given, else the global config, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    match global_config_path() {
        Some(path) if path.exists() => read_config(&path),
        _ => Ok(Config::default()),
    }
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(config).context("serialize config")?;
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
