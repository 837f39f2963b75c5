/*!
Durable stores for the tag registry.

Three backends ship by default: a pretty-printed JSON file, a SQLite
database, and an in-memory store for tests and ephemeral runs. Each store
holds the full registry snapshot; the registry rewrites it after every
mutation.
*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::StoreBackend;
use crate::core::registry::{TagId, TagRecord};
use crate::error::TrackerResult;

/// Durable backing for tag records
#[async_trait]
pub trait RegistryStore: Send {
    /// Human-readable description for startup logs
    fn describe(&self) -> String;

    /// Load every persisted record; an empty or missing store yields an empty list.
    ///
    /// Takes `&mut self` so store futures only have to be `Send`, not `Sync`;
    /// the SQLite connection is single-threaded and the registry owns its
    /// store exclusively anyway.
    async fn load(&mut self) -> TrackerResult<Vec<TagRecord>>;

    /// Write the full registry snapshot
    async fn persist(&mut self, records: &[TagRecord]) -> TrackerResult<()>;
}

/// Open the store selected by configuration
pub fn open_store(backend: &StoreBackend) -> TrackerResult<Box<dyn RegistryStore>> {
    match backend {
        StoreBackend::Json { path } => Ok(Box::new(JsonFileStore::new(path))),
        StoreBackend::Sqlite { path } => Ok(Box::new(SqliteStore::open(path)?)),
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new())),
    }
}

/// On-disk JSON shape: a map keyed by tag identifier
#[derive(Serialize, Deserialize)]
struct StoredTag {
    display_name: String,
    absence_timeout_secs: u64,
}

/// Whole-file JSON store, pretty-printed so the file stays hand-editable
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    fn describe(&self) -> String {
        format!("JSON file {}", self.path.display())
    }

    async fn load(&mut self) -> TrackerResult<Vec<TagRecord>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Registry file not found, starting empty");
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let stored: BTreeMap<String, StoredTag> = serde_json::from_str(&content)?;
        Ok(stored
            .into_iter()
            .map(|(id, tag)| TagRecord::new(TagId::new(id), tag.display_name, tag.absence_timeout_secs))
            .collect())
    }

    async fn persist(&mut self, records: &[TagRecord]) -> TrackerResult<()> {
        let stored: BTreeMap<&str, StoredTag> = records
            .iter()
            .map(|r| {
                (
                    r.id.as_str(),
                    StoredTag {
                        display_name: r.display_name.clone(),
                        absence_timeout_secs: r.absence_timeout_secs,
                    },
                )
            })
            .collect();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&stored)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// SQLite-backed store with one row per tag
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                absence_timeout_secs INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn, path })
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    fn describe(&self) -> String {
        format!("SQLite database {}", self.path.display())
    }

    async fn load(&mut self) -> TrackerResult<Vec<TagRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_name, absence_timeout_secs FROM tags ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(TagRecord::new(
                TagId::new(row.get::<_, String>(0)?),
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    async fn persist(&mut self, records: &[TagRecord]) -> TrackerResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for record in records {
            tx.execute(
                "INSERT OR REPLACE INTO tags (id, display_name, absence_timeout_secs)
                 VALUES (?1, ?2, ?3)",
                (
                    record.id.as_str(),
                    &record.display_name,
                    record.absence_timeout_secs,
                ),
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Keeps records in memory only; state is lost when the process exits
#[derive(Default)]
pub struct MemoryStore {
    records: Vec<TagRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    fn describe(&self) -> String {
        "in-memory store".to_string()
    }

    async fn load(&mut self) -> TrackerResult<Vec<TagRecord>> {
        Ok(self.records.clone())
    }

    async fn persist(&mut self, records: &[TagRecord]) -> TrackerResult<()> {
        self.records = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<TagRecord> {
        vec![
            TagRecord::new(TagId::from("04A1"), "Box A", 300),
            TagRecord::new(TagId::from("04B2"), "Box B", 0),
        ]
    }

    #[tokio::test]
    async fn json_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.json");
        let mut store = JsonFileStore::new(&path);

        store.persist(&sample_records()).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, sample_records());

        // The file stays hand-editable
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"display_name\": \"Box A\""));
    }

    #[tokio::test]
    async fn json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("tags.db")).unwrap();

        store.persist(&sample_records()).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, sample_records());
    }

    #[tokio::test]
    async fn sqlite_store_overwrites_on_second_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("tags.db")).unwrap();

        store.persist(&sample_records()).await.unwrap();

        let mut updated = sample_records();
        updated[0].display_name = "Renamed box".to_string();
        store.persist(&updated).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded[0].display_name, "Renamed box");
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn sqlite_store_reopens_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.persist(&sample_records()).await.unwrap();
        }
        let mut store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sqlite_store_works_behind_trait_object() {
        // The registry holds the store as Box<dyn RegistryStore> and runs on
        // a spawned task, so the store futures must be Send even though the
        // SQLite connection is not Sync
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.db");
        let records = tokio::spawn(async move {
            let mut store: Box<dyn RegistryStore> =
                Box::new(SqliteStore::open(&path).unwrap());
            store.persist(&sample_records()).await.unwrap();
            store.load().await.unwrap()
        })
        .await
        .unwrap();
        assert_eq!(records, sample_records());
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let mut store = MemoryStore::new();
        store.persist(&sample_records()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), sample_records());
    }
}
