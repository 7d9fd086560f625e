//! Serde-backed CSV tables.
//!
//! Every persistence collaborator of the recommender (animals, users,
//! interest events, likes) is a small CSV file held fully in memory and
//! rewritten atomically on change.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard},
    time::Instant,
};

use anyhow::{anyhow, Context};
use serde::{de::DeserializeOwned, Serialize};

use crate::storage::write_atomic;

#[derive(Debug)]
pub struct CsvTable<T> {
    rows: RwLock<Vec<T>>,
    path: PathBuf,
}

impl<T> CsvTable<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Load the table at `path`, creating an empty file if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Err(err) = std::fs::metadata(&path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new table at {}", path.display());
                    std::fs::write(&path, b"")?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let rows = Self::read_rows(&path)?;

        log::debug!(
            "took {}ms to read {}",
            now.elapsed().as_micros() as f64 / 1000.0,
            path.display()
        );

        Ok(CsvTable {
            rows: RwLock::new(rows),
            path,
        })
    }

    /// Parse all rows from an arbitrary CSV file with this table's layout.
    pub fn read_rows(path: &Path) -> anyhow::Result<Vec<T>> {
        let mut csv_reader = csv::Reader::from_path(path)
            .with_context(|| format!("couldnt open {}", path.display()))?;

        let mut rows = vec![];
        for (line, record) in csv_reader.deserialize::<T>().enumerate() {
            let record =
                record.with_context(|| format!("malformed row {} in {}", line + 1, path.display()))?;
            rows.push(record);
        }

        Ok(rows)
    }

    pub fn read(&self) -> anyhow::Result<RwLockReadGuard<'_, Vec<T>>> {
        self.rows
            .read()
            .map_err(|err| anyhow!("table lock poisoned: {err}"))
    }

    /// Apply `f` to the rows and persist the result.
    ///
    /// The write lock is held across the save so concurrent writers are
    /// serialized and the file always reflects the latest in-memory state.
    pub fn modify<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> anyhow::Result<R> {
        let mut rows = self
            .rows
            .write()
            .map_err(|err| anyhow!("table lock poisoned: {err}"))?;

        let result = f(&mut rows);
        self.save(&rows)?;

        Ok(result)
    }

    fn save(&self, rows: &[T]) -> anyhow::Result<()> {
        let mut csv_wrt = csv::Writer::from_writer(vec![]);
        for row in rows {
            csv_wrt.serialize(row)?;
        }
        let data = csv_wrt
            .into_inner()
            .map_err(|err| anyhow!("couldnt flush csv: {err}"))?;

        write_atomic(&self.path, &data)
            .with_context(|| format!("couldnt write {}", self.path.display()))?;

        Ok(())
    }
}
