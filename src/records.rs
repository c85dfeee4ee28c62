//! Record store contract and a JSON-file backed implementation.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::atomic::AtomicFile;
use crate::record::FileRecord;

/// Key-value access to file records by identifier.
///
/// Each call is its own transaction: it either fully applies or leaves the
/// store unchanged.
pub trait RecordStore: Send + Sync {
    /// Fails with [`RecordStoreError::Duplicate`] if the id already exists.
    fn insert(
        &self,
        record: FileRecord,
    ) -> impl Future<Output = Result<(), RecordStoreError>> + Send;

    fn get(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<FileRecord>, RecordStoreError>> + Send;

    /// Replaces an existing record; fails with [`RecordStoreError::NotFound`] otherwise.
    fn update(
        &self,
        record: FileRecord,
    ) -> impl Future<Output = Result<FileRecord, RecordStoreError>> + Send;

    /// Removes a record and returns what was stored.
    fn delete(&self, id: Uuid)
    -> impl Future<Output = Result<FileRecord, RecordStoreError>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<FileRecord>, RecordStoreError>> + Send;
}

/// Failures of a [`RecordStore`].
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("record {0} already exists")]
    Duplicate(Uuid),
    #[error("record store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("record store data is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Records held in memory and mirrored to a JSON file after every change.
///
/// Mutations work on a copy of the table, persist it atomically, and only
/// then publish it, so a failed write leaves the visible state untouched.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: Option<PathBuf>,
    records: RwLock<HashMap<Uuid, FileRecord>>,
}

impl JsonRecordStore {
    /// Loads the store from `path`, starting empty if the file does not exist.
    pub async fn open(path: PathBuf) -> Result<Self, RecordStoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let records = match fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<FileRecord> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|record| (record.id, record)).collect()
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        info!(path = ?path, count = records.len(), "record store loaded");

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, records: &HashMap<Uuid, FileRecord>) -> Result<(), RecordStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut list: Vec<&FileRecord> = records.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let bytes = serde_json::to_vec_pretty(&list)?;
        AtomicFile::write(path, &bytes).await?;
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    async fn insert(&self, record: FileRecord) -> Result<(), RecordStoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RecordStoreError::Duplicate(record.id));
        }
        let mut next = records.clone();
        next.insert(record.id, record);
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, RecordStoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, record: FileRecord) -> Result<FileRecord, RecordStoreError> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(RecordStoreError::NotFound(record.id));
        }
        let mut next = records.clone();
        next.insert(record.id, record.clone());
        self.persist(&next).await?;
        *records = next;
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<FileRecord, RecordStoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let removed = next.remove(&id).ok_or(RecordStoreError::NotFound(id))?;
        self.persist(&next).await?;
        *records = next;
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<FileRecord>, RecordStoreError> {
        let mut list: Vec<FileRecord> = self.records.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }
}
