//! OpenAI-compatible embedding provider using the `/embeddings` endpoint.
//!
//! Blocking client: the pipeline already runs provider calls on the blocking
//! pool. Requests ask for [`EMBEDDING_DIM`] dimensions so vectors fit the vec0
//! tables regardless of the model's native width.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{ensure_dimensions, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

pub struct OpenAiEmbeddingProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("openai embedding provider needs OPENAI_API_KEY or embedding.api_key")?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build HTTP client")?;

        let model = if config.model == EmbeddingConfig::default().model {
            "text-embedding-3-small".to_string()
        } else {
            config.model.clone()
        };

        tracing::info!(endpoint = %config.api_base, model = %model, "openai embedding provider ready");

        Ok(Self {
            client,
            endpoint: embeddings_endpoint(&config.api_base),
            api_key,
            model,
        })
    }
}

/// Resolve the embeddings URL from a base that may or may not carry `/v1`.
fn embeddings_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/embeddings") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/embeddings")
    } else {
        format!("{base}/v1/embeddings")
    }
}

impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: EMBEDDING_DIM,
        };

        let mut response: EmbeddingResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding endpoint returned an error")?
            .json()
            .context("malformed embedding response")?;

        anyhow::ensure!(
            response.data.len() == texts.len(),
            "embedding response has {} vectors for {} inputs",
            response.data.len(),
            texts.len()
        );

        response.data.sort_by_key(|d| d.index);
        response
            .data
            .into_iter()
            .map(|d| {
                ensure_dimensions(&d.embedding)?;
                Ok(d.embedding)
            })
            .collect()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
