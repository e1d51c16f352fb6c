use crate::coordinates::BlockKey;
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self(err.to_string())
    }
}

/// Keyed blob store holding one encoded block per key. Writes become durable
/// at the next [`MapStore::commit`].
pub trait MapStore {
    fn block_ids(&self) -> Result<Vec<BlockKey>, StorageError>;
    fn read(&self, key: BlockKey) -> Result<Option<Vec<u8>>, StorageError>;
    /// Inserts or replaces the blob stored under `key`.
    fn write(&mut self, key: BlockKey, data: &[u8]) -> Result<(), StorageError>;
    fn remove(&mut self, key: BlockKey) -> Result<(), StorageError>;
    fn clear(&mut self) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// The `map.sqlite` layout: `blocks(pos INT PRIMARY KEY, data BLOB)`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|err| StorageError::new(format!("opening {}: {err}", path.display())))?;
        debug!("opened map database {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS `blocks` (`pos` INT PRIMARY KEY, `data` BLOB);",
        )?;
        Ok(Self { conn })
    }

    fn begin(&self) -> Result<(), StorageError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.conn.close().map_err(|(_, err)| err.into())
    }
}

impl MapStore for SqliteStore {
    fn block_ids(&self) -> Result<Vec<BlockKey>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT `pos` FROM `blocks`")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn read(&self, key: BlockKey) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self
            .conn
            .query_row(
                "SELECT `data` FROM `blocks` WHERE `pos` = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        if data.is_some() {
            debug!("read blob for block {key}");
        }
        Ok(data)
    }

    fn write(&mut self, key: BlockKey, data: &[u8]) -> Result<(), StorageError> {
        self.begin()?;
        self.conn.execute(
            "REPLACE INTO `blocks` (`pos`, `data`) VALUES (?1, ?2)",
            params![key, data],
        )?;
        debug!("wrote blob for block {key}");
        Ok(())
    }

    fn remove(&mut self, key: BlockKey) -> Result<(), StorageError> {
        self.begin()?;
        self.conn
            .execute("DELETE FROM `blocks` WHERE `pos` = ?1", params![key])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        warn!("removing every block from the map database");
        self.begin()?;
        self.conn.execute("DELETE FROM `blocks`", [])?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if !self.conn.is_autocommit() {
            debug!("committing map database");
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

/// In-process store with the same commit boundary as the database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    staged: BTreeMap<BlockKey, Vec<u8>>,
    committed: BTreeMap<BlockKey, Vec<u8>>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self, key: BlockKey) -> Option<&[u8]> {
        self.committed.get(&key).map(Vec::as_slice)
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    pub fn rollback(&mut self) {
        self.staged = self.committed.clone();
    }
}

impl MapStore for MemoryStore {
    fn block_ids(&self) -> Result<Vec<BlockKey>, StorageError> {
        Ok(self.staged.keys().copied().collect())
    }

    fn read(&self, key: BlockKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.staged.get(&key).cloned())
    }

    fn write(&mut self, key: BlockKey, data: &[u8]) -> Result<(), StorageError> {
        self.staged.insert(key, data.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: BlockKey) -> Result<(), StorageError> {
        self.staged.remove(&key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.staged.clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.committed = self.staged.clone();
        self.commits += 1;
        Ok(())
    }
}
