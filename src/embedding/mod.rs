//! Entity embeddings: text building, providers, storage and generation.

pub mod codec;
pub mod describe;
pub mod generator;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod provider;
pub mod store;

pub use codec::CodecError;
pub use describe::describe_animal;
pub use generator::{
    BatchCounts, BatchReport, EmbeddingGenerator, GenerateError, GenerateOutcome,
};
pub use provider::{
    ChatProvider, ClientConfig, EmbeddingProvider, ProviderError, RemoteChatProvider,
    RemoteEmbeddingProvider,
};
pub use store::{EmbeddingStore, StoreError, VectorStore};

/// A vector owned by an entity (animal) or a user (preference vector).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub owner_id: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(owner_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            owner_id: owner_id.into(),
            vector,
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Supplies the ids of all embeddable entities and their embedding input text.
pub trait EntityTextSource: Send + Sync {
    fn entity_ids(&self) -> Result<Vec<String>, SourceError>;
    fn describe(&self, entity_id: &str) -> Result<String, SourceError>;
}
