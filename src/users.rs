use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::csv_table::CsvTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

pub trait UserDirectory: Send + Sync {
    fn get(&self, id: u64) -> anyhow::Result<Option<User>>;
    fn create(&self, name: &str) -> anyhow::Result<User>;
    fn list(&self) -> anyhow::Result<Vec<User>>;

    fn exists(&self, id: u64) -> anyhow::Result<bool> {
        Ok(self.get(id)?.is_some())
    }
}

pub struct UserTable {
    table: CsvTable<User>,
}

impl UserTable {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self {
            table: CsvTable::load(path)?,
        })
    }
}

impl UserDirectory for UserTable {
    fn get(&self, id: u64) -> anyhow::Result<Option<User>> {
        Ok(self.table.read()?.iter().find(|u| u.id == id).cloned())
    }

    fn create(&self, name: &str) -> anyhow::Result<User> {
        self.table.modify(|rows| {
            let id = rows.iter().map(|u| u.id).max().unwrap_or(0) + 1;
            let user = User {
                id,
                name: name.trim().to_string(),
            };
            rows.push(user.clone());
            user
        })
    }

    fn list(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.table.read()?.clone())
    }
}
