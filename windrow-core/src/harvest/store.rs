use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::error::{HarvestError, HarvestResult};
use super::models::{Checkpoint, CompletedTarget, TargetRunRecord};

const HARVEST_SCHEMA: &str = include_str!("../../../sql/harvest.sql");

#[derive(Debug, Clone)]
pub struct HarvestStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for HarvestStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl HarvestStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> HarvestResult<HarvestStore> {
        let path = self.path.ok_or(HarvestError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(HarvestStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct HarvestStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl HarvestStore {
    pub fn builder() -> HarvestStoreBuilder {
        HarvestStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> HarvestResult<Self> {
        HarvestStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> HarvestResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            HarvestError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| HarvestError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> HarvestResult<()> {
        let conn = self.open()?;
        conn.execute_batch(HARVEST_SCHEMA)?;
        Ok(())
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> HarvestResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO checkpoints (target_id, root_url, last_completed_index, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target_id) DO UPDATE SET
                root_url = excluded.root_url,
                last_completed_index = excluded.last_completed_index,
                updated_at = excluded.updated_at",
            params![
                &checkpoint.target_id,
                &checkpoint.root_url,
                checkpoint.last_completed_index,
                checkpoint.updated_at.naive_utc(),
            ],
        )?;
        Ok(())
    }

    pub fn load_checkpoint(&self, target_id: &str) -> HarvestResult<Option<Checkpoint>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM checkpoints WHERE target_id = ?1")?;
        let checkpoint = stmt
            .query_row([target_id], |row| Checkpoint::from_row(row))
            .optional()?;
        Ok(checkpoint)
    }

    pub fn delete_checkpoint(&self, target_id: &str) -> HarvestResult<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM checkpoints WHERE target_id = ?1", [target_id])?;
        Ok(())
    }

    pub fn checkpoints(&self) -> HarvestResult<Vec<Checkpoint>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM checkpoints ORDER BY updated_at DESC")?;
        let rows = stmt
            .query_map([], |row| Checkpoint::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_completed(&self, completed: &CompletedTarget) -> HarvestResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO completed_targets (target_id, root_url, items_harvested, completed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target_id) DO UPDATE SET
                root_url = excluded.root_url,
                items_harvested = excluded.items_harvested,
                completed_at = excluded.completed_at",
            params![
                &completed.target_id,
                &completed.root_url,
                completed.items_harvested,
                completed.completed_at.naive_utc(),
            ],
        )?;
        Ok(())
    }

    pub fn is_completed(&self, target_id: &str) -> HarvestResult<bool> {
        let conn = self.open()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM completed_targets WHERE target_id = ?1",
                [target_id],
                |_row| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn completed_targets(&self) -> HarvestResult<Vec<CompletedTarget>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM completed_targets ORDER BY completed_at DESC")?;
        let rows = stmt
            .query_map([], |row| CompletedTarget::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_run(
        &self,
        target_id: &str,
        outcome: &str,
        items_processed: i64,
        items_failed: i64,
        detail: Option<&str>,
    ) -> HarvestResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO target_runs(target_id, outcome, items_processed, items_failed, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![target_id, outcome, items_processed, items_failed, detail],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> HarvestResult<Vec<TargetRunRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM target_runs
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| TargetRunRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA cache_size = -64000;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

/// Checkpoint reads and writes as the async traversal sees them. The sqlite
/// store bridges through `spawn_blocking`; tests substitute in-memory fakes.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load_checkpoint(&self, target_id: &str) -> HarvestResult<Option<Checkpoint>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> HarvestResult<()>;

    async fn delete_checkpoint(&self, target_id: &str) -> HarvestResult<()>;

    async fn is_completed(&self, target_id: &str) -> HarvestResult<bool>;

    async fn mark_completed(&self, completed: &CompletedTarget) -> HarvestResult<()>;

    async fn record_run(
        &self,
        target_id: &str,
        outcome: &str,
        items_processed: i64,
        items_failed: i64,
        detail: Option<&str>,
    ) -> HarvestResult<()>;
}

#[async_trait]
impl ProgressStore for HarvestStore {
    async fn load_checkpoint(&self, target_id: &str) -> HarvestResult<Option<Checkpoint>> {
        let store = self.clone();
        let target_id = target_id.to_string();
        tokio::task::spawn_blocking(move || HarvestStore::load_checkpoint(&store, &target_id))
            .await
            .map_err(|err| HarvestError::Io(std::io::Error::other(err)))?
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> HarvestResult<()> {
        let store = self.clone();
        let checkpoint = checkpoint.clone();
        tokio::task::spawn_blocking(move || HarvestStore::save_checkpoint(&store, &checkpoint))
            .await
            .map_err(|err| HarvestError::Io(std::io::Error::other(err)))?
    }

    async fn delete_checkpoint(&self, target_id: &str) -> HarvestResult<()> {
        let store = self.clone();
        let target_id = target_id.to_string();
        tokio::task::spawn_blocking(move || HarvestStore::delete_checkpoint(&store, &target_id))
            .await
            .map_err(|err| HarvestError::Io(std::io::Error::other(err)))?
    }

    async fn is_completed(&self, target_id: &str) -> HarvestResult<bool> {
        let store = self.clone();
        let target_id = target_id.to_string();
        tokio::task::spawn_blocking(move || HarvestStore::is_completed(&store, &target_id))
            .await
            .map_err(|err| HarvestError::Io(std::io::Error::other(err)))?
    }

    async fn mark_completed(&self, completed: &CompletedTarget) -> HarvestResult<()> {
        let store = self.clone();
        let completed = completed.clone();
        tokio::task::spawn_blocking(move || HarvestStore::mark_completed(&store, &completed))
            .await
            .map_err(|err| HarvestError::Io(std::io::Error::other(err)))?
    }

    async fn record_run(
        &self,
        target_id: &str,
        outcome: &str,
        items_processed: i64,
        items_failed: i64,
        detail: Option<&str>,
    ) -> HarvestResult<()> {
        let store = self.clone();
        let target_id = target_id.to_string();
        let outcome = outcome.to_string();
        let detail = detail.map(|value| value.to_string());
        tokio::task::spawn_blocking(move || {
            HarvestStore::record_run(
                &store,
                &target_id,
                &outcome,
                items_processed,
                items_failed,
                detail.as_deref(),
            )
        })
        .await
        .map_err(|err| HarvestError::Io(std::io::Error::other(err)))?
    }
}
