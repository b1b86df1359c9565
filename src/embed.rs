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

use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::config::Config;
use crate::error::BenchError;
use crate::registry::Registry;

pub const EMBEDDING_HASH: &str = "hash";
pub const EMBEDDING_OPENAI: &str = "openai";
pub const EMBEDDING_VOYAGE: &str = "voyage";

/// Raw vectors from one backend call, in input order.
#[derive(Debug, Clone, Default)]
pub struct RawEmbeddings {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: Option<u64>,
}

/// A backend that turns text into vectors. Callers never pass more than
/// `max_batch_size` texts at once.
pub trait EmbeddingSource {
    fn model_id(&self) -> &str;

    fn max_batch_size(&self) -> usize;

    fn embed_texts(&self, texts: &[&str]) -> Result<RawEmbeddings>;
}

pub type SourceFactory = fn(&Config) -> Result<Box<dyn EmbeddingSource>>;

pub fn builtin_sources() -> Result<Registry<SourceFactory>, BenchError> {
    let mut registry: Registry<SourceFactory> = Registry::new("embedding provider");
    registry.register(EMBEDDING_HASH, &["local"], |config| {
        Ok(Box::new(HashEmbedder::new(config.embedding_dim)))
    })?;
    registry.register(EMBEDDING_OPENAI, &["openai-compatible"], |config| {
        Ok(Box::new(RemoteEmbedder::new(
            RemoteApi::OPENAI,
            config,
        )?))
    })?;
    registry.register(EMBEDDING_VOYAGE, &["voyage-compatible"], |config| {
        Ok(Box::new(RemoteEmbedder::new(
            RemoteApi::VOYAGE,
            config,
        )?))
    })?;
    Ok(registry)
}

pub fn build_source(config: &Config) -> Result<Box<dyn EmbeddingSource>> {
    let registry = builtin_sources()?;
    let factory = registry.lookup(&config.embedding)?;
    factory(config)
}

/// Signed feature hashing over whitespace tokens. Needs no credentials and
/// is fully deterministic, which makes it the default for local runs.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            model: format!("{EMBEDDING_HASH}-{dim}"),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let (idx, sign) = hash_token_feature(token, self.dim);
            vec[idx] += sign;
        }
        l2_normalize(vec)
    }
}

impl EmbeddingSource for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        usize::MAX
    }

    fn embed_texts(&self, texts: &[&str]) -> Result<RawEmbeddings> {
        let mut total = 0u64;
        let vectors = texts
            .iter()
            .map(|text| {
                total += text.split_whitespace().count() as u64;
                self.embed(text)
            })
            .collect();
        Ok(RawEmbeddings {
            vectors,
            total_tokens: Some(total),
        })
    }
}

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let mut norm = 0.0f32;
    for v in &vec {
        norm += v * v;
    }
    if norm > 0.0 {
        let inv = 1.0 / norm.sqrt();
        for v in &mut vec {
            *v *= inv;
        }
    }
    vec
}

fn hash_token_feature(token: &str, dim: usize) -> (usize, f32) {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    let val = u64::from_le_bytes(bytes);
    let idx = (val as usize) % dim;
    let sign = if (val & (1 << 63)) != 0 { 1.0 } else { -1.0 };
    (idx, sign)
}

/// Endpoint facts for an OpenAI-shaped `/embeddings` API.
#[derive(Debug, Clone, Copy)]
pub struct RemoteApi {
    pub name: &'static str,
    pub key_var: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub max_batch: usize,
}

impl RemoteApi {
    pub const OPENAI: RemoteApi = RemoteApi {
        name: EMBEDDING_OPENAI,
        key_var: "OPENAI_API_KEY",
        base_url: "https://api.openai.com/v1",
        default_model: "text-embedding-3-small",
        max_batch: 2048,
    };

    pub const VOYAGE: RemoteApi = RemoteApi {
        name: EMBEDDING_VOYAGE,
        key_var: "VOYAGE_API_KEY",
        base_url: "https://api.voyageai.com/v1",
        default_model: "voyage-code-3",
        max_batch: 128,
    };
}

/// Blocking client for OpenAI-compatible embedding endpoints. Errors are
/// returned as-is; retrying is the caller's decision.
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl RemoteEmbedder {
    pub fn new(api: RemoteApi, config: &Config) -> Result<Self> {
        let api_key = std::env::var(api.key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(BenchError::MissingCredential {
                provider: api.name,
                var: api.key_var,
            })?;
        let model = config
            .embedding_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| api.default_model.to_string());
        let base_url = config
            .embedding_base_url
            .clone()
            .unwrap_or_else(|| api.base_url.to_string());

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).with_context(|| format!("invalid {}", api.key_var))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(Duration::from_secs(config.embedding_timeout_secs))
            .default_headers(headers)
            .build()
            .context("build embedding HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimensions: config.embedding_dimensions,
            batch_size: config.embedding_batch_size.clamp(1, api.max_batch),
        })
    }
}

impl EmbeddingSource for RemoteEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[&str]) -> Result<RawEmbeddings> {
        if texts.is_empty() {
            return Ok(RawEmbeddings::default());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("embedding request failed ({status}): {body}");
        }
        let mut parsed: EmbeddingResponse =
            resp.json().context("parse embedding response")?;
        parsed.data.sort_by_key(|entry| entry.index);
        anyhow::ensure!(
            parsed.data.len() == texts.len(),
            "embedding API returned {} vectors for {} inputs",
            parsed.data.len(),
            texts.len()
        );
        Ok(RawEmbeddings {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
            total_tokens: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedding_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("fn parse_config(path: &Path)");
        let b = embedder.embed("fn parse_config(path: &Path)");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.model_id(), "hash-64");
    }

    #[test]
    fn hash_embedding_of_blank_text_is_zero() {
        let vec = HashEmbedder::new(8).embed("   \n");
        assert!(vec.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn hash_source_preserves_order_and_counts_tokens() -> Result<()> {
        let embedder = HashEmbedder::new(16);
        let raw = embedder.embed_texts(&["a b", "c"])?;
        assert_eq!(raw.vectors.len(), 2);
        assert_eq!(raw.vectors[1], embedder.embed("c"));
        assert_eq!(raw.total_tokens, Some(3));
        Ok(())
    }

    #[test]
    fn remote_source_requires_credentials_at_construction() {
        let api = RemoteApi {
            key_var: "RAGBENCH_TEST_UNSET_EMBEDDING_KEY",
            ..RemoteApi::VOYAGE
        };
        let err = RemoteEmbedder::new(api, &Config::default()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BenchError>(),
            Some(&BenchError::MissingCredential {
                provider: EMBEDDING_VOYAGE,
                var: "RAGBENCH_TEST_UNSET_EMBEDDING_KEY",
            })
        );
    }

    #[test]
    fn unknown_source_is_a_configuration_error() {
        let config = Config {
            embedding: "nope".into(),
            ..Default::default()
        };
        let err = build_source(&config).err().expect("error");
        assert!(err.to_string().contains("unknown embedding provider 'nope'"));
    }
}
