mod scenario;

use std::{collections::HashMap, path::Path, sync::Arc};

use crate::{
    animals::{Animal, AnimalManager, AnimalTable, AnimalType},
    app::{App, Providers},
    config::Config,
    embedding::{ChatProvider, EmbeddingProvider, ProviderError},
};

/// Embeds an animal by the breed in its description. Unknown breeds get no vector.
pub struct BreedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl BreedEmbedder {
    pub fn new(vectors: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: vectors
                .iter()
                .map(|(breed, v)| (breed.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl EmbeddingProvider for BreedEmbedder {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .filter_map(|text| {
                let breed = text
                    .split(". ")
                    .find_map(|segment| segment.strip_prefix("breed: "))?;
                self.vectors.get(breed).cloned()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "breed-embedder"
    }
}

pub struct CannedChat(pub String);

impl ChatProvider for CannedChat {
    fn complete(&self, _system_prompt: &str, _user_content: &str) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Creates an isolated App in its own temp directory.
pub fn create_app(
    embedder: BreedEmbedder,
    chat: Option<CannedChat>,
) -> (App, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let base_path = tmp.path().to_str().unwrap().to_string();
    let config = Config::load_with(&base_path).expect("failed to load config");

    let providers = Providers {
        embedding: Arc::new(embedder),
        chat: chat.map(|c| Arc::new(c) as Arc<dyn ChatProvider>),
    };

    let app = App::open(config, providers).expect("failed to open app");
    (app, tmp)
}

pub fn dog(id: &str, breed: &str) -> Animal {
    Animal {
        desertion_no: id.to_string(),
        animal_type: Some(AnimalType::Dog),
        breed_name: Some(breed.to_string()),
        ..Default::default()
    }
}

/// Imports animals through a CSV the same way the CLI does.
pub fn seed_animals(app: &App, dir: &Path, animals: Vec<Animal>) {
    let path = dir.join("import.csv");
    let staging = AnimalTable::load(&path).unwrap();
    for animal in animals {
        staging.upsert(animal).unwrap();
    }
    app.import_animals(&path).unwrap();
}

/// Three animals with orthogonal 3-d embeddings already generated, and one user.
pub fn abc_app() -> (App, tempfile::TempDir, u64) {
    let embedder = BreedEmbedder::new(&[
        ("alpha", vec![1.0, 0.0, 0.0]),
        ("beta", vec![0.0, 1.0, 0.0]),
        ("gamma", vec![0.0, 0.0, 1.0]),
    ]);
    let (app, tmp) = create_app(embedder, None);
    seed_animals(
        &app,
        tmp.path(),
        vec![dog("A", "alpha"), dog("B", "beta"), dog("C", "gamma")],
    );

    let report = app.generate_all_embeddings().unwrap();
    assert_eq!(report.counts().success_count, 3);

    let user = app.add_user("tester").unwrap();
    (app, tmp, user.id)
}
