use crate::{
    config::{Config, EmbeddingBackend},
    embedding::{
        ChatProvider, ClientConfig, EmbeddingProvider, ProviderError, RemoteChatProvider,
        RemoteEmbeddingProvider,
    },
};
use anyhow::{anyhow, Context, Result};
use homedir::my_home;
use std::sync::Arc;

pub const BASE_PATH_ENV: &str = "PETMATCH_BASE_PATH";

/// External model clients, built once per process.
#[derive(Clone)]
pub struct Providers {
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub chat: Option<Arc<dyn ChatProvider>>,
}

impl Providers {
    /// Build providers from the loaded config. Must run outside of an async
    /// runtime: the remote clients are blocking.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let client = ClientConfig::from(&config.provider);
        log::debug!("provider client: {client:?}");

        let embedding: Arc<dyn EmbeddingProvider> = match config.embedding.backend {
            EmbeddingBackend::Remote => Arc::new(RemoteEmbeddingProvider::new(client.clone())?),
            EmbeddingBackend::Local => Self::local_embedding(config)?,
        };

        let chat: Arc<dyn ChatProvider> = Arc::new(RemoteChatProvider::new(client)?);

        Ok(Self {
            embedding,
            chat: Some(chat),
        })
    }

    #[cfg(feature = "local-embeddings")]
    fn local_embedding(config: &Config) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        use crate::embedding::local::LocalEmbeddingProvider;

        let provider = LocalEmbeddingProvider::new(
            &config.embedding.local_model,
            std::path::Path::new(config.base_path()),
        )?;
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn local_embedding(_config: &Config) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        Err(ProviderError::Config(
            "embedding.backend is 'local' but petmatch was built without the local-embeddings feature"
                .to_string(),
        ))
    }
}

/// `PETMATCH_BASE_PATH`, or `~/.local/share/petmatch`. Created if missing.
pub fn base_path() -> Result<String> {
    let base_path = match std::env::var(BASE_PATH_ENV) {
        Ok(path) => path,
        Err(_) => {
            let home = my_home()
                .map_err(|err| anyhow!("couldnt find home dir: {err:?}"))?
                .context("couldnt find home dir")?;
            format!("{}/.local/share/petmatch", home.to_string_lossy())
        }
    };

    // Ensure base directory exists
    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("Failed to create application base directory {base_path}"))?;

    Ok(base_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_providers_build_without_network() {
        let providers = Providers::from_config(&Config::default()).unwrap();
        assert_eq!(providers.embedding.name(), "embedding-passage");
        assert!(providers.chat.is_some());
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_local_backend_requires_feature() {
        let mut config = Config::default();
        config.embedding.backend = EmbeddingBackend::Local;
        assert!(matches!(
            Providers::from_config(&config),
            Err(ProviderError::Config(_))
        ));
    }
}
