//! Text-to-vector embedding providers.
//!
//! Provides the [`EmbeddingProvider`] trait, a local ONNX implementation of
//! all-MiniLM-L6-v2, and a client for OpenAI-compatible embedding endpoints.
//! Both produce [`EMBEDDING_DIM`]-dimensional vectors.

pub mod local;
pub mod openai;

use std::sync::Arc;

use anyhow::{Context, Result};

/// Number of dimensions in the stored embedding vectors.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Identifier recorded in `schema_meta` after a full re-embed.
    fn model_name(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// `"local"` needs model files on disk. Run `familiar model download` first.
/// `"openai"` needs an API key (`OPENAI_API_KEY` or `embedding.api_key`).
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        "openai" => {
            let provider = openai::OpenAiEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, openai"),
    }
}

/// [`create_provider`] for async callers.
///
/// Construction runs on the blocking pool: the ONNX session load is slow, and
/// the OpenAI provider's `reqwest::blocking` client must not be built on a
/// runtime thread.
pub async fn load_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let config = config.clone();
    let provider = tokio::task::spawn_blocking(move || create_provider(&config))
        .await
        .context("embedding provider setup task failed")??;
    Ok(Arc::from(provider))
}

/// Check that a provider returned a vector of the stored dimension.
pub fn ensure_dimensions(embedding: &[f32]) -> Result<()> {
    anyhow::ensure!(
        embedding.len() == EMBEDDING_DIM,
        "embedding has {} dimensions, expected {EMBEDDING_DIM}",
        embedding.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".into(),
            ..EmbeddingConfig::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("unknown embedding provider"));
    }

    #[tokio::test]
    async fn openai_provider_loads_from_async_context() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key: Some("sk-test".into()),
            ..EmbeddingConfig::default()
        };
        let provider = load_provider(&config).await.unwrap();
        assert_eq!(provider.model_name(), "text-embedding-3-small");
        assert_eq!(provider.dimensions(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn load_provider_reports_setup_errors() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key: None,
            ..EmbeddingConfig::default()
        };
        let err = load_provider(&config).await.err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn dimension_check() {
        assert!(ensure_dimensions(&vec![0.0; EMBEDDING_DIM]).is_ok());
        assert!(ensure_dimensions(&[0.0; 3]).is_err());
    }
}
