//! In-process embedding provider backed by fastembed.
//!
//! Lets the recommender run without a remote embedding API:
//! - Model downloaded into `<base>/models` on first use
//! - Same [`EmbeddingProvider`] contract as the remote client

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;
use std::sync::Mutex;

use super::provider::{EmbeddingProvider, ProviderError};

/// `embedding.local_model` values, matched case-insensitively.
const SUPPORTED_MODELS: &[(&str, EmbeddingModel)] = &[
    ("all-minilm-l6-v2", EmbeddingModel::AllMiniLML6V2),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15),
    ("bge-large-en-v1.5", EmbeddingModel::BGELargeENV15),
    ("multilingual-e5-small", EmbeddingModel::MultilingualE5Small),
    ("multilingual-e5-base", EmbeddingModel::MultilingualE5Base),
];

/// `TextEmbedding::embed` takes `&mut self`, hence the Mutex.
pub struct LocalEmbeddingProvider {
    model: Mutex<TextEmbedding>,
    model_name: String,
}

impl LocalEmbeddingProvider {
    /// Load `model_name`, downloading it into `<base>/models` when missing.
    pub fn new(model_name: &str, base_dir: &Path) -> Result<Self, ProviderError> {
        let model = lookup_model(model_name)?;

        let models_dir = base_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|err| {
            ProviderError::Config(format!(
                "couldnt create {}: {err}",
                models_dir.display()
            ))
        })?;

        let options = InitOptions::new(model)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let model = TextEmbedding::try_new(options).map_err(|err| {
            ProviderError::Config(format!("couldnt load local model '{model_name}': {err}"))
        })?;

        log::info!("loaded local embedding model '{model_name}'");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }
}

fn lookup_model(name: &str) -> Result<EmbeddingModel, ProviderError> {
    let wanted = name.trim().to_lowercase();
    SUPPORTED_MODELS
        .iter()
        .find(|(key, _)| *key == wanted)
        .map(|(_, model)| model.clone())
        .ok_or_else(|| {
            let known: Vec<&str> = SUPPORTED_MODELS.iter().map(|(key, _)| *key).collect();
            ProviderError::Config(format!(
                "embedding.local_model '{name}' is not supported (one of: {})",
                known.join(", ")
            ))
        })
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self
            .model
            .lock()
            .map_err(|_| ProviderError::Transport("local model lock poisoned".to_string()))?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_lookup_ignores_case() {
        assert!(lookup_model("BGE-Base-EN-v1.5").is_ok());
        assert!(lookup_model(" all-MiniLM-L6-v2 ").is_ok());
    }

    #[test]
    fn test_invalid_model_name() {
        let tmp = tempfile::tempdir().unwrap();
        let result = LocalEmbeddingProvider::new("nonexistent-model", tmp.path());
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_embedding_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = LocalEmbeddingProvider::new("all-MiniLM-L6-v2", tmp.path()).unwrap();

        let vectors = provider
            .embed_texts(&["type: dog. breed: maltese".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 384);
    }
}
