use crate::{
    animals::{Animal, AnimalManager, AnimalTable, ImportReport},
    config::Config,
    eid::Eid,
    embedding::{
        BatchReport, ChatProvider, Embedding, EmbeddingGenerator, EmbeddingStore,
        GenerateOutcome, ProviderError, VectorStore,
    },
    recommend::{build_weight_map, preference, ranker, summary, PreferenceSummary, WeightMap},
    signals::{EventLog, EventTable, InterestEvent, LikeFlag, LikeStore, LikeTable},
    storage::BackendLocal,
    users::{User, UserDirectory, UserTable},
};

use super::{
    errors::{AppError, NotFound},
    factory::Providers,
    task_runner::{self, Status, Task, TaskQueue},
};
use anyhow::anyhow;
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    time::Instant,
};

/// Outcome of a preference recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Recompute {
    /// A new preference vector replaced the stored one.
    Stored {
        dimension: usize,
        contributing: usize,
    },
    /// Nothing to build from; the stored preference vector was removed.
    Cleared,
}

pub struct App {
    animals: Arc<AnimalTable>,
    users: Arc<dyn UserDirectory>,
    events: Arc<dyn EventLog>,
    likes: Arc<dyn LikeStore>,

    animal_vectors: Arc<dyn EmbeddingStore>,
    user_vectors: Arc<dyn EmbeddingStore>,
    generator: Arc<EmbeddingGenerator>,
    chat: Option<Arc<dyn ChatProvider>>,

    task_queue: Arc<TaskQueue>,
    task_tx: Option<mpsc::Sender<(Eid, Task)>>,
    task_queue_handle: Option<std::thread::JoinHandle<()>>,

    config: Arc<Config>,
}

impl App {
    /// Open every table and vector store under the config's base path.
    pub fn open(config: Config, providers: Providers) -> Result<Self, AppError> {
        let base = PathBuf::from(config.base_path());
        std::fs::create_dir_all(&base)?;

        let now = Instant::now();

        let animals = Arc::new(AnimalTable::load(base.join("animals.csv"))?);
        let users = Arc::new(UserTable::load(base.join("users.csv"))?);
        let events = Arc::new(EventTable::load(base.join("events.csv"))?);
        let likes = Arc::new(LikeTable::load(base.join("likes.csv"))?);

        let model = config.embedding.model_name(&config.provider).to_string();
        let animal_vectors: Arc<dyn EmbeddingStore> =
            Arc::new(VectorStore::open(base.join("animal_vectors.bin"), &model)?);
        let user_vectors: Arc<dyn EmbeddingStore> =
            Arc::new(VectorStore::open(base.join("user_vectors.bin"), &model)?);

        let generator = Arc::new(
            EmbeddingGenerator::new(animals.clone(), providers.embedding, animal_vectors.clone())
                .with_parallelism(config.embedding.parallelism()),
        );

        let task_queue = Arc::new(TaskQueue::new(Arc::new(BackendLocal::new(&base)?)));

        log::debug!(
            "opened {} in {}ms",
            base.display(),
            now.elapsed().as_millis()
        );

        Ok(Self {
            animals,
            users,
            events,
            likes,
            animal_vectors,
            user_vectors,
            generator,
            chat: providers.chat,
            task_queue,
            task_tx: None,
            task_queue_handle: None,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the background worker, re-queueing tasks a previous run left unfinished.
    pub fn run_queue(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<(Eid, Task)>();

        for task in self.task_queue.take_unfinished() {
            log::info!("restarting interrupted task \"{task:?}\"");
            let id = self.task_queue.save_task(task.clone(), Status::Pending);
            if let Err(err) = task_tx.send((id, task)) {
                log::error!("failed to initialize interrupted task: {err:?}");
            }
        }

        let handle = std::thread::spawn({
            let queue = self.task_queue.clone();
            let generator = self.generator.clone();
            move || task_runner::start_queue(task_rx, queue, generator)
        });

        self.task_queue_handle = Some(handle);
        self.task_tx = Some(task_tx);
    }

    /// Stop the worker after the tasks already queued, and wait for it.
    pub fn shutdown(&mut self) {
        if let Some(task_tx) = self.task_tx.take() {
            let _ = task_tx.send((Eid::new(), Task::Shutdown));
        }

        if let Some(handle) = self.task_queue_handle.take() {
            log::warn!("waiting for task queue to stop");
            if handle.join().is_err() {
                log::error!("task queue thread panicked");
            }
        }
    }

    pub fn task_queue(&self) -> task_runner::QueueDump {
        self.task_queue.read_dump()
    }

    fn require_user(&self, user_id: u64) -> Result<User, AppError> {
        self.users
            .get(user_id)?
            .ok_or_else(|| NotFound::User(user_id).into())
    }

    fn require_animal(&self, entity_id: &str) -> Result<Animal, AppError> {
        self.animals
            .get(entity_id)?
            .ok_or_else(|| NotFound::Animal(entity_id.to_string()).into())
    }

    // animals & users

    pub fn import_animals(&self, path: &Path) -> Result<ImportReport, AppError> {
        let report = self.animals.import(path)?;
        log::info!(
            "imported animals from {}: {} created, {} updated",
            path.display(),
            report.created,
            report.updated
        );
        Ok(report)
    }

    /// Insert or replace animals by `desertion_no`.
    pub fn upsert_animals(&self, animals: Vec<Animal>) -> Result<ImportReport, AppError> {
        if let Some(animal) = animals.iter().find(|a| a.desertion_no.trim().is_empty()) {
            return Err(AppError::BadRequest(format!(
                "animal without desertion_no: {animal:?}"
            )));
        }

        let mut report = ImportReport::default();
        for animal in animals {
            if self.animals.upsert(animal)? {
                report.created += 1;
            } else {
                report.updated += 1;
            }
        }
        log::info!(
            "upserted animals: {} created, {} updated",
            report.created,
            report.updated
        );
        Ok(report)
    }

    pub fn list_animals(&self) -> Result<Vec<Animal>, AppError> {
        Ok(self.animals.all()?)
    }

    pub fn get_animal(&self, entity_id: &str) -> Result<Animal, AppError> {
        self.require_animal(entity_id)
    }

    /// Animals for the given ids, in order. Ids whose animal is gone are dropped.
    pub fn resolve_animals(&self, entity_ids: &[String]) -> Result<Vec<Animal>, AppError> {
        let mut animals = Vec::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            match self.animals.get(entity_id)? {
                Some(animal) => animals.push(animal),
                None => log::debug!("animal {entity_id} has an embedding but no record"),
            }
        }
        Ok(animals)
    }

    pub fn add_user(&self, name: &str) -> Result<User, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("user name is empty".to_string()));
        }
        Ok(self.users.create(name)?)
    }

    pub fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.users.list()?)
    }

    // signals

    pub fn record_interest(
        &self,
        user_id: u64,
        entity_id: &str,
        dwell_seconds: Option<u32>,
    ) -> Result<InterestEvent, AppError> {
        self.require_user(user_id)?;
        self.require_animal(entity_id)?;

        let event = InterestEvent::new(user_id, entity_id, dwell_seconds.unwrap_or(0));
        self.events.append(event.clone())?;
        Ok(event)
    }

    pub fn set_like(&self, user_id: u64, entity_id: &str, liked: bool) -> Result<LikeFlag, AppError> {
        self.require_user(user_id)?;
        self.require_animal(entity_id)?;

        let flag = LikeFlag {
            user_id,
            entity_id: entity_id.to_string(),
            liked,
        };
        self.likes.set(flag.clone())?;
        Ok(flag)
    }

    pub fn liked_entities(&self, user_id: u64) -> Result<Vec<String>, AppError> {
        self.require_user(user_id)?;
        Ok(self
            .likes
            .find_liked_by_user(user_id)?
            .into_iter()
            .map(|flag| flag.entity_id)
            .collect())
    }

    fn weight_map(&self, user_id: u64) -> Result<WeightMap, AppError> {
        let events = self.events.find_by_user(user_id)?;
        let likes = self.likes.find_liked_by_user(user_id)?;
        Ok(build_weight_map(&events, &likes))
    }

    // embeddings

    pub fn generate_embedding(&self, entity_id: &str) -> Result<GenerateOutcome, AppError> {
        Ok(self.generator.generate(entity_id)?)
    }

    pub fn generate_all_embeddings(&self) -> Result<BatchReport, AppError> {
        Ok(self.generator.generate_all()?)
    }

    /// Queue [`Self::generate_all_embeddings`] on the background worker.
    pub fn enqueue_generate_all(&self) -> Result<Eid, AppError> {
        let task_tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("task queue is not running"))?;

        let task = Task::GenerateAllEmbeddings;
        let id = self.task_queue.save_task(task.clone(), Status::Pending);
        if let Err(err) = task_tx.send((id.clone(), task)) {
            self.task_queue.set_status(&id, Status::Error(err.to_string()));
            return Err(anyhow!("task queue is gone: {err}").into());
        }

        Ok(id)
    }

    // preference

    pub fn recompute_preference_vector(&self, user_id: u64) -> Result<Recompute, AppError> {
        self.require_user(user_id)?;
        let weights = self.weight_map(user_id)?;

        let mut embeddings = HashMap::with_capacity(weights.len());
        for entity_id in weights.keys() {
            if let Some(embedding) = self.animal_vectors.get(entity_id)? {
                embeddings.insert(entity_id.as_str(), embedding);
            }
        }

        let owner_id = user_id.to_string();
        let computed = preference::compute(&owner_id, &weights, |id| embeddings.get(id).cloned());

        match computed {
            Some(pref) => {
                let dimension = pref.dimension();
                let contributing = embeddings
                    .values()
                    .filter(|e| e.dimension() == dimension)
                    .count();

                self.user_vectors.put(pref)?;
                log::info!(
                    "stored {dimension}-d preference for user {user_id} from {contributing} animals"
                );
                Ok(Recompute::Stored {
                    dimension,
                    contributing,
                })
            }
            None => {
                if self.user_vectors.remove(&owner_id)? {
                    log::info!("cleared preference for user {user_id}");
                }
                Ok(Recompute::Cleared)
            }
        }
    }

    pub fn preference_vector(&self, user_id: u64) -> Result<Embedding, AppError> {
        self.require_user(user_id)?;
        self.user_vectors
            .get(&user_id.to_string())?
            .ok_or_else(|| NotFound::Preference(user_id).into())
    }

    /// Up to `top_n` animal ids (config default when `None`), ranked by the
    /// stored preference vector or in store order without one.
    pub fn recommend(&self, user_id: u64, top_n: Option<usize>) -> Result<Vec<String>, AppError> {
        self.require_user(user_id)?;
        let top_n = top_n.unwrap_or(self.config.recommend.default_top_n);

        let pref = self.user_vectors.get(&user_id.to_string())?;
        let candidates = self.animal_vectors.all()?;

        if pref.is_none() {
            log::debug!("no preference for user {user_id}, using fallback order");
        }

        Ok(ranker::recommend(pref.as_ref(), &candidates, top_n))
    }

    pub fn summarize_preference(&self, user_id: u64) -> Result<PreferenceSummary, AppError> {
        self.require_user(user_id)?;
        let weights = self.weight_map(user_id)?;

        let mut animals = vec![];
        for (entity_id, _) in summary::top_weighted(&weights, self.config.recommend.summary_top_n) {
            match self.animals.get(entity_id)? {
                Some(animal) => animals.push(animal),
                None => log::debug!("summary: animal {entity_id} no longer exists"),
            }
        }

        if animals.is_empty() {
            return Ok(PreferenceSummary::no_preference());
        }

        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| ProviderError::Config("no chat provider configured".to_string()))?;

        summary::summarize(&animals, chat.as_ref()).map_err(|err| {
            log::error!("preference summary failed for user {user_id}: {err}");
            err.into()
        })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
