//! User interest signals: implicit detail-view dwell events and explicit likes.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{csv_table::CsvTable, eid::Eid};

/// One detail view of an animal. Append-only; repeated views all count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestEvent {
    pub id: Eid,
    pub user_id: u64,
    pub entity_id: String,
    pub dwell_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

impl InterestEvent {
    pub fn new(user_id: u64, entity_id: &str, dwell_seconds: u32) -> Self {
        Self {
            id: Eid::new(),
            user_id,
            entity_id: entity_id.to_string(),
            dwell_seconds,
            timestamp: Utc::now(),
        }
    }
}

/// Explicit like flag. One live record per (user, entity), last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeFlag {
    pub user_id: u64,
    pub entity_id: String,
    pub liked: bool,
}

pub trait EventLog: Send + Sync {
    fn append(&self, event: InterestEvent) -> anyhow::Result<()>;
    fn find_by_user(&self, user_id: u64) -> anyhow::Result<Vec<InterestEvent>>;
}

pub trait LikeStore: Send + Sync {
    fn set(&self, flag: LikeFlag) -> anyhow::Result<()>;
    fn find_by_user(&self, user_id: u64) -> anyhow::Result<Vec<LikeFlag>>;

    fn find_liked_by_user(&self, user_id: u64) -> anyhow::Result<Vec<LikeFlag>> {
        Ok(self
            .find_by_user(user_id)?
            .into_iter()
            .filter(|flag| flag.liked)
            .collect())
    }
}

pub struct EventTable {
    table: CsvTable<InterestEvent>,
}

impl EventTable {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self {
            table: CsvTable::load(path)?,
        })
    }
}

impl EventLog for EventTable {
    fn append(&self, event: InterestEvent) -> anyhow::Result<()> {
        log::debug!(
            "interest event user={} entity={} dwell={}s",
            event.user_id,
            event.entity_id,
            event.dwell_seconds
        );
        self.table.modify(|rows| rows.push(event))
    }

    fn find_by_user(&self, user_id: u64) -> anyhow::Result<Vec<InterestEvent>> {
        Ok(self
            .table
            .read()?
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

pub struct LikeTable {
    table: CsvTable<LikeFlag>,
}

impl LikeTable {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self {
            table: CsvTable::load(path)?,
        })
    }
}

impl LikeStore for LikeTable {
    fn set(&self, flag: LikeFlag) -> anyhow::Result<()> {
        self.table.modify(|rows| {
            match rows
                .iter_mut()
                .find(|f| f.user_id == flag.user_id && f.entity_id == flag.entity_id)
            {
                Some(existing) => existing.liked = flag.liked,
                None => rows.push(flag),
            }
        })
    }

    fn find_by_user(&self, user_id: u64) -> anyhow::Result<Vec<LikeFlag>> {
        Ok(self
            .table
            .read()?
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect())
    }
}
