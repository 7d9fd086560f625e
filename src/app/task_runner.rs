use std::{
    sync::{mpsc, Arc, Mutex},
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    eid::Eid,
    embedding::{BatchCounts, EmbeddingGenerator},
    storage::StorageManager,
};

const QUEUE_DUMP_FILE: &str = "task-queue.json";

/// How long finished tasks stay visible in the dump.
const FINISHED_TASK_TTL: Duration = Duration::from_secs(30);

pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    InProgress,
    Done(BatchCounts),
    Error(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

impl Default for QueueDump {
    fn default() -> Self {
        Self {
            queue: vec![],
            now: now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: Eid,
    pub task: Task,
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    /// regenerate embeddings for every animal
    GenerateAllEmbeddings,

    /// request to gracefully shutdown task queue
    Shutdown,
}

impl Task {
    pub fn run(&self, generator: &EmbeddingGenerator) -> Status {
        match self {
            Task::GenerateAllEmbeddings => match generator.generate_all() {
                Ok(report) => Status::Done(report.counts()),
                Err(err) => Status::Error(err.to_string()),
            },
            Task::Shutdown => Status::Done(BatchCounts::default()),
        }
    }
}

/// Task statuses persisted to `task-queue.json`.
pub struct TaskQueue {
    storage: Arc<dyn StorageManager>,
    lock: Mutex<()>,
}

impl TaskQueue {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    pub fn read_dump(&self) -> QueueDump {
        let _guard = self.lock.lock().unwrap_or_else(|err| err.into_inner());
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> QueueDump {
        if !self.storage.exists(QUEUE_DUMP_FILE) {
            return QueueDump::default();
        }

        let data = match self.storage.read(QUEUE_DUMP_FILE) {
            Ok(data) => data,
            Err(err) => {
                log::error!("failed to read queue dump: {err}");
                return QueueDump::default();
            }
        };

        serde_json::from_slice(&data).unwrap_or_else(|err| {
            log::error!("queue dump is malformed, starting over: {err}");
            QueueDump::default()
        })
    }

    fn write_unlocked(&self, queue_dump: &QueueDump) {
        let queue_dump_str = match serde_json::to_string_pretty(queue_dump) {
            Ok(s) => s,
            Err(err) => {
                log::error!("failed to serialize queue dump: {err}");
                return;
            }
        };

        if let Err(err) = self.storage.write(QUEUE_DUMP_FILE, queue_dump_str.as_bytes()) {
            log::error!("failed to write queue dump: {err}");
        }
    }

    fn modify(&self, f: impl FnOnce(&mut QueueDump)) {
        let _guard = self.lock.lock().unwrap_or_else(|err| err.into_inner());
        let mut queue_dump = self.read_unlocked();
        f(&mut queue_dump);
        queue_dump.now = now();
        self.write_unlocked(&queue_dump);
    }

    pub fn save_task(&self, task: Task, status: Status) -> Eid {
        let id = Eid::new();
        self.modify(|dump| {
            dump.queue.push(TaskDump {
                id: id.clone(),
                task,
                status,
            })
        });
        id
    }

    pub fn set_status(&self, id: &Eid, status: Status) {
        self.modify(|dump| {
            if let Some(task_dump) = dump.queue.iter_mut().find(|td| &td.id == id) {
                task_dump.status = status;
            }
        });
    }

    pub fn remove_task(&self, id: &Eid) {
        self.modify(|dump| dump.queue.retain(|td| &td.id != id));
    }

    /// Empty the dump and return the tasks that never finished.
    pub fn take_unfinished(&self) -> Vec<Task> {
        let mut unfinished = vec![];
        self.modify(|dump| {
            unfinished = dump
                .queue
                .drain(..)
                .filter(|td| !matches!(td.status, Status::Done(_)))
                .map(|td| td.task)
                .collect();
        });
        unfinished
    }
}

/// Runs queued tasks one at a time until [`Task::Shutdown`] arrives.
///
/// Failed tasks are recorded as [`Status::Error`] and never retried.
pub fn start_queue(
    task_rx: mpsc::Receiver<(Eid, Task)>,
    queue: Arc<TaskQueue>,
    generator: Arc<EmbeddingGenerator>,
) {
    log::debug!("waiting for job");
    while let Ok((id, task)) = task_rx.recv() {
        // graceful shutdown
        if let Task::Shutdown = &task {
            log::info!("task queue stopped");
            return;
        }

        log::debug!("picked up {task:?} ({id})");
        queue.set_status(&id, Status::InProgress);

        let task_handle = std::thread::spawn({
            let generator = generator.clone();
            move || task.run(&generator)
        });

        // handle thread panics
        let status = task_handle.join().unwrap_or_else(|err| {
            log::error!("task {id} panicked: {err:?}");
            Status::Error("task panicked".to_string())
        });

        if let Status::Error(msg) = &status {
            log::error!("task {id} failed: {msg}");
        }
        queue.set_status(&id, status);

        // remove task a bit later to give client an opportunity to react
        std::thread::spawn({
            let queue = queue.clone();
            move || {
                sleep(FINISHED_TASK_TTL);
                queue.remove_task(&id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendLocal;

    fn queue(tmp: &tempfile::TempDir) -> TaskQueue {
        TaskQueue::new(Arc::new(BackendLocal::new(tmp.path()).unwrap()))
    }

    #[test]
    fn test_status_lifecycle_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue(&tmp);

        let id = queue.save_task(Task::GenerateAllEmbeddings, Status::Pending);
        queue.set_status(&id, Status::InProgress);

        let dump = queue.read_dump();
        assert_eq!(dump.queue.len(), 1);
        assert_eq!(dump.queue[0].status, Status::InProgress);
        assert!(tmp.path().join(QUEUE_DUMP_FILE).exists());

        let counts = BatchCounts {
            success_count: 3,
            fail_count: 1,
        };
        queue.set_status(&id, Status::Done(counts));
        assert_eq!(queue.read_dump().queue[0].status, Status::Done(counts));

        queue.remove_task(&id);
        assert!(queue.read_dump().queue.is_empty());
    }

    #[test]
    fn test_take_unfinished_skips_done() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue(&tmp);

        queue.save_task(Task::GenerateAllEmbeddings, Status::InProgress);
        queue.save_task(
            Task::GenerateAllEmbeddings,
            Status::Done(BatchCounts::default()),
        );

        assert_eq!(queue.take_unfinished(), vec![Task::GenerateAllEmbeddings]);
        assert!(queue.read_dump().queue.is_empty());
    }

    #[test]
    fn test_malformed_dump_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(QUEUE_DUMP_FILE), "{not json").unwrap();
        assert!(queue(&tmp).read_dump().queue.is_empty());
    }
}
