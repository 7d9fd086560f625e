use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    csv_table::CsvTable,
    embedding::{describe_animal, EntityTextSource, SourceError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnimalType {
    Dog,
    Cat,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NeuterStatus {
    Yes,
    No,
    Unknown,
}

/// A shelter animal. `desertion_no` is the entity id used everywhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    pub desertion_no: String,
    pub animal_type: Option<AnimalType>,
    pub breed_name: Option<String>,
    pub color: Option<String>,
    pub age: Option<String>,
    pub sex: Option<Sex>,
    pub neuter_status: Option<NeuterStatus>,
    pub weight: Option<String>,
    pub personality: Option<String>,
    pub special_mark: Option<String>,
    pub health_info: Option<String>,
    pub shelter_name: Option<String>,
}

pub trait AnimalManager: Send + Sync {
    fn get(&self, desertion_no: &str) -> anyhow::Result<Option<Animal>>;
    fn all(&self) -> anyhow::Result<Vec<Animal>>;
    /// Insert or replace by `desertion_no`. Returns true when the animal is new.
    fn upsert(&self, animal: Animal) -> anyhow::Result<bool>;
}

pub struct AnimalTable {
    table: CsvTable<Animal>,
}

/// Counts reported by [`AnimalTable::import`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
}

impl AnimalTable {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self {
            table: CsvTable::load(path)?,
        })
    }

    /// Merge every row of another animals CSV into this table.
    pub fn import(&self, source: &Path) -> anyhow::Result<ImportReport> {
        let incoming = CsvTable::<Animal>::read_rows(source)
            .with_context(|| format!("couldnt import {}", source.display()))?;

        self.table.modify(|rows| {
            let mut report = ImportReport::default();
            for animal in incoming {
                if animal.desertion_no.trim().is_empty() {
                    log::warn!("skipping animal without desertion_no");
                    continue;
                }
                match rows.iter_mut().find(|a| a.desertion_no == animal.desertion_no) {
                    Some(existing) => {
                        *existing = animal;
                        report.updated += 1;
                    }
                    None => {
                        rows.push(animal);
                        report.created += 1;
                    }
                }
            }
            report
        })
    }
}

impl AnimalManager for AnimalTable {
    fn get(&self, desertion_no: &str) -> anyhow::Result<Option<Animal>> {
        Ok(self
            .table
            .read()?
            .iter()
            .find(|a| a.desertion_no == desertion_no)
            .cloned())
    }

    fn all(&self) -> anyhow::Result<Vec<Animal>> {
        Ok(self.table.read()?.clone())
    }

    fn upsert(&self, animal: Animal) -> anyhow::Result<bool> {
        self.table.modify(|rows| {
            match rows.iter_mut().find(|a| a.desertion_no == animal.desertion_no) {
                Some(existing) => {
                    *existing = animal;
                    false
                }
                None => {
                    rows.push(animal);
                    true
                }
            }
        })
    }
}

impl EntityTextSource for AnimalTable {
    fn entity_ids(&self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .table
            .read()?
            .iter()
            .map(|a| a.desertion_no.clone())
            .collect())
    }

    fn describe(&self, entity_id: &str) -> Result<String, SourceError> {
        let animal = self
            .get(entity_id)?
            .ok_or_else(|| SourceError::NotFound(entity_id.to_string()))?;

        Ok(describe_animal(&animal))
    }
}
