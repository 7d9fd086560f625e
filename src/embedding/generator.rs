//! Embedding generation for entities.
//!
//! One entity: describe -> embed -> upsert. A batch runs every entity
//! independently on a rayon pool and turns each outcome into an
//! [`ItemResult`]; the batch itself only fails when the entity list or the
//! final store write fails.

use std::{sync::Arc, time::Instant};

use rayon::prelude::*;
use serde::Serialize;

use super::{
    Embedding, EmbeddingProvider, EmbeddingStore, EntityTextSource, ProviderError, SourceError,
    StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The entity has no usable text.
    EmptyInput,
    /// The provider returned no vector for the text.
    NoVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateOutcome {
    Stored { dimension: usize },
    Skipped(SkipReason),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SourceError> for GenerateError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(id) => GenerateError::NotFound(id),
            SourceError::Other(err) => GenerateError::Other(err),
        }
    }
}

/// Result of one entity within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemResult {
    Stored { dimension: usize },
    Skipped { reason: SkipReason },
    Failed { reason: String },
}

impl ItemResult {
    /// Skips count as successes: nothing to do is not a failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, ItemResult::Failed { .. })
    }
}

impl From<Result<GenerateOutcome, GenerateError>> for ItemResult {
    fn from(result: Result<GenerateOutcome, GenerateError>) -> Self {
        match result {
            Ok(GenerateOutcome::Stored { dimension }) => ItemResult::Stored { dimension },
            Ok(GenerateOutcome::Skipped(reason)) => ItemResult::Skipped { reason },
            Err(err) => ItemResult::Failed {
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct BatchCounts {
    pub success_count: usize,
    pub fail_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub items: Vec<(String, ItemResult)>,
}

impl BatchReport {
    pub fn from_items(items: Vec<(String, ItemResult)>) -> Self {
        let success_count = items.iter().filter(|(_, item)| item.is_success()).count();
        Self {
            success_count,
            fail_count: items.len() - success_count,
            items,
        }
    }

    pub fn counts(&self) -> BatchCounts {
        BatchCounts {
            success_count: self.success_count,
            fail_count: self.fail_count,
        }
    }
}

pub struct EmbeddingGenerator {
    source: Arc<dyn EntityTextSource>,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn EmbeddingStore>,
    /// rayon pool size for batches; `None` lets rayon decide
    parallelism: Option<usize>,
}

impl EmbeddingGenerator {
    pub fn new(
        source: Arc<dyn EntityTextSource>,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn EmbeddingStore>,
    ) -> Self {
        Self {
            source,
            provider,
            store,
            parallelism: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn generate(&self, entity_id: &str) -> Result<GenerateOutcome, GenerateError> {
        let text = self.source.describe(entity_id)?;
        if text.trim().is_empty() {
            log::debug!("no embedding input for {entity_id}, skipping");
            return Ok(GenerateOutcome::Skipped(SkipReason::EmptyInput));
        }

        let vector = match self.provider.embed_texts(&[text])?.into_iter().next() {
            Some(vector) if !vector.is_empty() => vector,
            _ => {
                log::warn!(
                    "{} returned no vector for {entity_id}",
                    self.provider.name()
                );
                return Ok(GenerateOutcome::Skipped(SkipReason::NoVector));
            }
        };

        let dimension = vector.len();
        self.store.put(Embedding::new(entity_id, vector))?;

        log::debug!("stored {dimension}-d embedding for {entity_id}");
        Ok(GenerateOutcome::Stored { dimension })
    }

    pub fn generate_all(&self) -> Result<BatchReport, GenerateError> {
        let ids = self.source.entity_ids()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism.unwrap_or(0))
            .build()
            .map_err(|err| anyhow::anyhow!("couldnt build embedding pool: {err}"))?;

        let now = Instant::now();
        log::info!("generating embeddings for {} entities", ids.len());

        let mut items: Vec<(String, ItemResult)> = Vec::with_capacity(ids.len());
        self.store.write_batch(&mut || {
            items = pool.install(|| {
                ids.par_iter()
                    .map(|id| {
                        let item = ItemResult::from(self.generate(id));
                        if let ItemResult::Failed { reason } = &item {
                            log::warn!("failed to generate embedding for {id}: {reason}");
                        }
                        (id.clone(), item)
                    })
                    .collect()
            });
        })?;

        let report = BatchReport::from_items(items);
        log::info!(
            "generated embeddings: {} succeeded, {} failed in {}ms",
            report.success_count,
            report.fail_count,
            now.elapsed().as_millis()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;
    use crate::embedding::VectorStore;

    struct MapSource(Vec<(&'static str, &'static str)>);

    impl EntityTextSource for MapSource {
        fn entity_ids(&self) -> Result<Vec<String>, SourceError> {
            Ok(self.0.iter().map(|(id, _)| id.to_string()).collect())
        }

        fn describe(&self, entity_id: &str) -> Result<String, SourceError> {
            self.0
                .iter()
                .find(|(id, _)| *id == entity_id)
                .map(|(_, text)| text.to_string())
                .ok_or_else(|| SourceError::NotFound(entity_id.to_string()))
        }
    }

    /// Returns a fixed vector per text; "fail" errors out, "none" yields nothing.
    struct ScriptedProvider {
        vectors: HashMap<&'static str, Vec<f32>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            match texts[0].as_str() {
                "fail" => Err(ProviderError::Transport("connection reset".into())),
                "none" => Ok(vec![]),
                text => Ok(vec![self.vectors.get(text).cloned().unwrap_or(vec![1.0, 1.0])]),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn generator(
        entities: Vec<(&'static str, &'static str)>,
    ) -> (EmbeddingGenerator, Arc<ScriptedProvider>, Arc<VectorStore>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::open(tmp.path().join("v.bin"), "scripted").unwrap());
        let provider = Arc::new(ScriptedProvider {
            vectors: HashMap::from([("dog", vec![1.0, 0.0, 0.0])]),
            calls: Mutex::new(vec![]),
        });
        let generator = EmbeddingGenerator::new(
            Arc::new(MapSource(entities)),
            provider.clone(),
            store.clone(),
        )
        .with_parallelism(Some(2));
        (generator, provider, store, tmp)
    }

    #[test]
    fn test_generate_sends_one_input_and_upserts() {
        let (generator, provider, store, _tmp) = generator(vec![("A", "dog")]);

        assert_eq!(
            generator.generate("A").unwrap(),
            GenerateOutcome::Stored { dimension: 3 }
        );
        assert_eq!(*provider.calls.lock().unwrap(), vec![vec!["dog".to_string()]]);
        assert_eq!(store.get("A").unwrap().unwrap().vector, vec![1.0, 0.0, 0.0]);

        generator.generate("A").unwrap();
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_blank_text_is_skipped_without_provider_call() {
        let (generator, provider, store, _tmp) = generator(vec![("A", "  ")]);

        assert_eq!(
            generator.generate("A").unwrap(),
            GenerateOutcome::Skipped(SkipReason::EmptyInput)
        );
        assert!(provider.calls.lock().unwrap().is_empty());
        assert!(store.get("A").unwrap().is_none());
    }

    #[test]
    fn test_zero_vectors_is_not_an_error() {
        let (generator, _provider, store, _tmp) = generator(vec![("A", "none")]);
        assert_eq!(
            generator.generate("A").unwrap(),
            GenerateOutcome::Skipped(SkipReason::NoVector)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_errors_surface_for_single_generation() {
        let (generator, _provider, _store, _tmp) = generator(vec![("A", "fail")]);
        assert!(matches!(
            generator.generate("A"),
            Err(GenerateError::Provider(ProviderError::Transport(_)))
        ));
        assert!(matches!(
            generator.generate("missing"),
            Err(GenerateError::NotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let (generator, _provider, store, _tmp) = generator(vec![
            ("A", "dog"),
            ("B", "fail"),
            ("C", "cat"),
            ("D", ""),
            ("E", "none"),
        ]);

        let report = generator.generate_all().unwrap();
        assert_eq!(report.success_count, 4);
        assert_eq!(report.fail_count, 1);
        assert_eq!(
            report.counts(),
            BatchCounts {
                success_count: 4,
                fail_count: 1
            }
        );

        let ids: Vec<_> = report.items.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D", "E"]);
        assert!(matches!(report.items[1].1, ItemResult::Failed { .. }));
        assert_eq!(
            report.items[3].1,
            ItemResult::Skipped {
                reason: SkipReason::EmptyInput
            }
        );

        let stored: Vec<_> = store.all().unwrap().into_iter().map(|e| e.owner_id).collect();
        assert_eq!(stored, vec!["A", "C"]);
    }

    #[test]
    fn test_empty_batch() {
        let (generator, _provider, _store, _tmp) = generator(vec![]);
        let report = generator.generate_all().unwrap();
        assert_eq!(report.counts(), BatchCounts::default());
    }
}
