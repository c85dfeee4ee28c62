//! File item orchestration: keeps metadata records and physical files in step.

use chrono::{Duration as ChronoDuration, Utc};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::record::{
    FileRecord, derive_extension, display_filename, normalize_mime_type,
    validate_original_filename,
};
use crate::records::{RecordStore, RecordStoreError};
use crate::sandbox::validate_logical_path;
use crate::storage::{Storage, StorageError};

/// Everything the file item operations can fail with.
///
/// `PhysicalFileMissing` means the record exists but its bytes do not; it is
/// an integrity fault, not a lookup miss.
#[derive(Debug, Error)]
pub enum FileItemError {
    #[error("path '{path}' is not valid: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("file item {0} not found")]
    NotFound(Uuid),
    #[error("physical file for item {id} is missing: {path}")]
    PhysicalFileMissing { id: Uuid, path: String },
    #[error("storage I/O failed: {0}")]
    Io(#[source] io::Error),
    #[error(transparent)]
    Store(#[from] RecordStoreError),
}

impl From<StorageError> for FileItemError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath { path, reason } => {
                FileItemError::InvalidPath { path, reason }
            }
            StorageError::NotFound(path) => FileItemError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )),
            StorageError::Io(err) => FileItemError::Io(err),
        }
    }
}

/// An upload as handed over by the transport.
#[derive(Debug)]
pub struct NewFileItem {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub logical_path: String,
    /// Display name stem; the extension is appended automatically.
    pub display_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// An opened physical file ready to be streamed back.
#[derive(Debug)]
pub struct FileDownload {
    pub record: FileRecord,
    pub file: File,
    pub size: u64,
}

impl FileDownload {
    /// Name for `Content-Disposition`.
    pub fn filename(&self) -> &str {
        self.record.display_name()
    }

    pub fn mime_type(&self) -> &str {
        &self.record.mime_type
    }
}

/// Coordinates the physical store and the record store.
///
/// The record store is the source of truth for what exists; the physical
/// store only holds bytes at paths derived from records.
pub struct FileItemService<S> {
    storage: Storage,
    records: S,
}

impl<S: RecordStore> FileItemService<S> {
    pub fn new(storage: Storage, records: S) -> Self {
        Self { storage, records }
    }

    /// The physical store backing this service.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Stores a new file and its record.
    ///
    /// The record is inserted as pending before the bytes are written and
    /// marked stored once the write succeeds. If the write fails the record is
    /// deleted again; if that also fails the pending record is left for
    /// [`FileItemService::reconcile_orphans`].
    pub async fn create(&self, upload: NewFileItem) -> Result<FileRecord, FileItemError> {
        validate_logical_path(&upload.logical_path)?;
        validate_original_filename(&upload.original_filename)?;
        let file_extension = derive_extension(&upload.original_filename)?;
        let filename = upload
            .display_name
            .as_deref()
            .map(|stem| display_filename(stem, &file_extension))
            .transpose()?;

        let now = Utc::now();
        let mut record = FileRecord {
            id: Uuid::new_v4(),
            filename,
            original_filename: upload.original_filename,
            file_path: upload.logical_path,
            file_size: upload.bytes.len() as u64,
            mime_type: normalize_mime_type(upload.content_type.as_deref()),
            file_extension,
            created_at: now,
            updated_at: now,
            pending: true,
        };
        let target = self
            .storage
            .resolve(&record.file_path, &record.physical_filename())
            .await?;

        self.records.insert(record.clone()).await?;

        if let Err(err) = self.storage.write(&target, &upload.bytes).await {
            warn!(id = %record.id, error = %err, "physical write failed, removing record");
            if let Err(cleanup_err) = self.records.delete(record.id).await {
                error!(
                    id = %record.id,
                    error = %cleanup_err,
                    "failed to remove record after write failure"
                );
            }
            return Err(err.into());
        }

        record.pending = false;
        if let Err(err) = self.records.update(record.clone()).await {
            // The bytes are on disk; the sweep confirms the record later.
            warn!(id = %record.id, error = %err, "failed to mark record as stored");
        }

        info!(
            id = %record.id,
            path = record.file_path,
            size = record.file_size,
            "file item created"
        );
        Ok(record)
    }

    /// Looks up a record without touching the physical file.
    pub async fn find_by_id(&self, id: Uuid) -> Result<FileRecord, FileItemError> {
        let record = self.load(id).await?;
        debug!(id = %id, "file item found");
        Ok(record)
    }

    /// Opens the physical file behind a record.
    ///
    /// A record without its file is reported as
    /// [`FileItemError::PhysicalFileMissing`], never as `NotFound`.
    pub async fn download_by_id(&self, id: Uuid) -> Result<FileDownload, FileItemError> {
        let record = self.load(id).await?;
        let physical_filename = record.physical_filename();
        let target = self
            .storage
            .resolve(&record.file_path, &physical_filename)
            .await?;

        let (file, size) = match self.storage.open(&target).await {
            Ok(opened) => opened,
            Err(StorageError::NotFound(_)) => {
                error!(
                    id = %id,
                    path = record.file_path,
                    "record exists but physical file is missing"
                );
                return Err(FileItemError::PhysicalFileMissing {
                    id,
                    path: join_logical(&record.file_path, &physical_filename),
                });
            }
            Err(err) => return Err(err.into()),
        };

        debug!(id = %id, size, "file item download opened");
        Ok(FileDownload { record, file, size })
    }

    /// Changes the display name only; the physical file is untouched.
    pub async fn rename(&self, id: Uuid, new_stem: &str) -> Result<FileRecord, FileItemError> {
        let mut record = self.load(id).await?;
        record.rename(new_stem)?;
        let record = match self.records.update(record).await {
            Ok(record) => record,
            Err(RecordStoreError::NotFound(id)) => return Err(FileItemError::NotFound(id)),
            Err(err) => return Err(err.into()),
        };
        info!(id = %id, filename = record.display_name(), "file item renamed");
        Ok(record)
    }

    /// Removes the physical file (if present) and then the record.
    ///
    /// Returns the record as it was before deletion.
    pub async fn delete_by_id(&self, id: Uuid) -> Result<FileRecord, FileItemError> {
        let record = self.load(id).await?;
        let target = self
            .storage
            .resolve(&record.file_path, &record.physical_filename())
            .await?;

        let removed = self.storage.delete(&target).await?;
        if !removed {
            warn!(id = %id, "physical file was already absent during delete");
        }

        let record = match self.records.delete(id).await {
            Ok(record) => record,
            Err(RecordStoreError::NotFound(id)) => return Err(FileItemError::NotFound(id)),
            Err(err) => return Err(err.into()),
        };
        info!(id = %id, path = record.file_path, "file item deleted");
        Ok(record)
    }

    /// Settles records whose write was never confirmed.
    ///
    /// Only records still pending after `grace` are looked at: if their file
    /// exists they are marked stored, otherwise they are deleted. Stored
    /// records whose file went missing are kept so downloads keep reporting
    /// [`FileItemError::PhysicalFileMissing`]. Returns the number of records
    /// removed. Physical files without a record are not collected here.
    pub async fn reconcile_orphans(&self, grace: Duration) -> Result<usize, FileItemError> {
        let grace = ChronoDuration::from_std(grace).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now().checked_sub_signed(grace);
        let mut removed = 0;

        for mut record in self.records.list().await? {
            if !record.pending || cutoff.is_none_or(|cutoff| record.created_at > cutoff) {
                continue;
            }
            let target = match self
                .storage
                .resolve(&record.file_path, &record.physical_filename())
                .await
            {
                Ok(target) => target,
                Err(err) => {
                    warn!(id = %record.id, error = %err, "skipping unresolvable record");
                    continue;
                }
            };

            if self.storage.exists(&target).await? {
                record.pending = false;
                match self.records.update(record).await {
                    Ok(record) => info!(id = %record.id, "confirmed pending record"),
                    Err(RecordStoreError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                continue;
            }

            match self.records.delete(record.id).await {
                Ok(_) | Err(RecordStoreError::NotFound(_)) => {
                    warn!(id = %record.id, path = record.file_path, "removed orphaned record");
                    removed += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(removed)
    }

    async fn load(&self, id: Uuid) -> Result<FileRecord, FileItemError> {
        self.records
            .get(id)
            .await?
            .ok_or(FileItemError::NotFound(id))
    }
}

fn join_logical(folder: &str, filename: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::JsonRecordStore;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    fn make_service() -> (tempfile::TempDir, FileItemService<JsonRecordStore>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        let service = FileItemService::new(Storage::new(root), JsonRecordStore::in_memory());
        (temp, service)
    }

    fn upload(name: &str, path: &str, bytes: &[u8]) -> NewFileItem {
        NewFileItem {
            original_filename: name.into(),
            content_type: Some("application/pdf".into()),
            logical_path: path.into(),
            display_name: None,
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn create_stores_invoice_under_logical_path() {
        let (_temp, service) = make_service();
        let record = service
            .create(upload("invoice.PDF", "/finance/2024", b"abc"))
            .await
            .expect("create");

        assert_eq!(record.file_extension, "pdf");
        assert_eq!(record.file_size, 3);
        assert_eq!(record.original_filename, "invoice.PDF");
        assert_eq!(record.filename, None);

        let expected = service
            .storage()
            .root_path()
            .join("finance")
            .join("2024")
            .join(format!("{}.pdf", record.id));
        assert_eq!(std::fs::read(&expected).expect("read physical"), b"abc");
        let root_entries: Vec<_> = std::fs::read_dir(service.storage().root_path())
            .expect("read root")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(root_entries, vec![std::ffi::OsString::from("finance")]);
    }

    #[tokio::test]
    async fn create_find_download_round_trip() {
        let (_temp, service) = make_service();
        let bytes = b"\x00\x01binary\xffcontent".to_vec();
        let created = service
            .create(upload("data.bin", "/", &bytes))
            .await
            .expect("create");

        let found = service.find_by_id(created.id).await.expect("find");
        assert_eq!(found, created);
        assert_eq!(found.file_size, bytes.len() as u64);

        let mut download = service.download_by_id(created.id).await.expect("download");
        let mut content = Vec::new();
        download
            .file
            .read_to_end(&mut content)
            .await
            .expect("read download");
        assert_eq!(content, bytes);
        assert_eq!(download.size, bytes.len() as u64);
        assert_eq!(download.filename(), "data.bin");
        assert_eq!(download.mime_type(), "application/pdf");
    }

    #[tokio::test]
    async fn create_applies_display_name_with_extension() {
        let (_temp, service) = make_service();
        let mut item = upload("scan.JPG", "/photos", b"img");
        item.display_name = Some("holiday".into());
        let record = service.create(item).await.expect("create");
        assert_eq!(record.filename.as_deref(), Some("holiday.jpg"));
    }

    #[tokio::test]
    async fn create_rejects_malformed_path_without_record() {
        let (_temp, service) = make_service();
        for path in ["relative/dir", "/a/../../etc", "/./b", "/.hidden"] {
            let result = service.create(upload("a.txt", path, b"x")).await;
            assert!(
                matches!(result, Err(FileItemError::InvalidPath { .. })),
                "{path} should be rejected"
            );
        }
        assert!(service.records.list().await.expect("list").is_empty());
        assert_eq!(
            std::fs::read_dir(service.storage().root_path())
                .expect("read root")
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn create_under_file_component_leaves_no_record() {
        let (_temp, service) = make_service();
        std::fs::write(service.storage().root_path().join("blocked"), b"file")
            .expect("create blocking file");

        let result = service.create(upload("a.txt", "/blocked/inner", b"x")).await;
        assert!(matches!(result, Err(FileItemError::Io(_))));
        assert!(service.records.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rename_preserves_extension_and_physical_file() {
        let (_temp, service) = make_service();
        let created = service
            .create(upload("draft.pdf", "/docs", b"pdf"))
            .await
            .expect("create");
        let physical = service
            .storage()
            .root_path()
            .join("docs")
            .join(created.physical_filename());

        let renamed = service.rename(created.id, "report").await.expect("rename");
        assert_eq!(renamed.filename.as_deref(), Some("report.pdf"));
        assert_eq!(renamed.file_path, "/docs");
        assert_eq!(renamed.physical_filename(), created.physical_filename());
        assert_eq!(std::fs::read(&physical).expect("read"), b"pdf");

        let download = service.download_by_id(created.id).await.expect("download");
        assert_eq!(download.filename(), "report.pdf");
    }

    #[tokio::test]
    async fn rename_unknown_id_is_not_found() {
        let (_temp, service) = make_service();
        let result = service.rename(Uuid::new_v4(), "x").await;
        assert!(matches!(result, Err(FileItemError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let (_temp, service) = make_service();
        let created = service
            .create(upload("a.txt", "/docs", b"abc"))
            .await
            .expect("create");

        let deleted = service.delete_by_id(created.id).await.expect("delete");
        assert_eq!(deleted, created);
        assert!(
            !service
                .storage()
                .root_path()
                .join("docs")
                .join(created.physical_filename())
                .exists()
        );

        let second = service.delete_by_id(created.id).await;
        assert!(matches!(second, Err(FileItemError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_physical_file() {
        let (_temp, service) = make_service();
        let created = service
            .create(upload("a.txt", "/docs", b"abc"))
            .await
            .expect("create");
        std::fs::remove_file(
            service
                .storage()
                .root_path()
                .join("docs")
                .join(created.physical_filename()),
        )
        .expect("remove out of band");

        service.delete_by_id(created.id).await.expect("delete");
        assert!(matches!(
            service.find_by_id(created.id).await,
            Err(FileItemError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn download_missing_physical_file_is_integrity_error() {
        let (_temp, service) = make_service();
        let created = service
            .create(upload("a.txt", "/docs", b"abc"))
            .await
            .expect("create");
        std::fs::remove_file(
            service
                .storage()
                .root_path()
                .join("docs")
                .join(created.physical_filename()),
        )
        .expect("remove out of band");

        let result = service.download_by_id(created.id).await;
        assert!(matches!(
            result,
            Err(FileItemError::PhysicalFileMissing { id, .. }) if id == created.id
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (_temp, service) = make_service();
        let id = Uuid::new_v4();
        assert!(matches!(
            service.find_by_id(id).await,
            Err(FileItemError::NotFound(_))
        ));
        assert!(matches!(
            service.download_by_id(id).await,
            Err(FileItemError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reconcile_keeps_stored_record_whose_file_was_removed() {
        let (_temp, service) = make_service();
        let created = service
            .create(upload("a.txt", "/docs", b"abc"))
            .await
            .expect("create");
        assert!(!created.pending);
        std::fs::remove_file(
            service
                .storage()
                .root_path()
                .join("docs")
                .join(created.physical_filename()),
        )
        .expect("remove out of band");

        let removed = service
            .reconcile_orphans(Duration::ZERO)
            .await
            .expect("reconcile");
        assert_eq!(removed, 0);
        assert!(matches!(
            service.download_by_id(created.id).await,
            Err(FileItemError::PhysicalFileMissing { id, .. }) if id == created.id
        ));
    }

    fn pending_record(name: &str) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            filename: None,
            original_filename: name.into(),
            file_path: "/docs".into(),
            file_size: 3,
            mime_type: "text/plain".into(),
            file_extension: "txt".into(),
            created_at: now,
            updated_at: now,
            pending: true,
        }
    }

    #[tokio::test]
    async fn reconcile_settles_stale_pending_records() {
        let (_temp, service) = make_service();
        let orphan = pending_record("orphan.txt");
        let written = pending_record("written.txt");
        service.records.insert(orphan.clone()).await.expect("insert");
        service.records.insert(written.clone()).await.expect("insert");
        let docs = service.storage().root_path().join("docs");
        std::fs::create_dir_all(&docs).expect("create docs");
        std::fs::write(docs.join(written.physical_filename()), b"abc").expect("write");

        let within_grace = service
            .reconcile_orphans(Duration::from_secs(3600))
            .await
            .expect("reconcile");
        assert_eq!(within_grace, 0);
        assert!(service.find_by_id(orphan.id).await.expect("find").pending);

        let removed = service
            .reconcile_orphans(Duration::ZERO)
            .await
            .expect("reconcile");
        assert_eq!(removed, 1);
        assert!(matches!(
            service.find_by_id(orphan.id).await,
            Err(FileItemError::NotFound(_))
        ));
        let confirmed = service.find_by_id(written.id).await.expect("find");
        assert!(!confirmed.pending);
    }

    /// Occupies `/docs` with a plain file as the record lands, so the
    /// following physical write cannot create its parent directory.
    struct BlockingStore {
        inner: JsonRecordStore,
        root: std::path::PathBuf,
    }

    impl RecordStore for BlockingStore {
        async fn insert(&self, record: FileRecord) -> Result<(), RecordStoreError> {
            std::fs::write(self.root.join("docs"), b"x")?;
            self.inner.insert(record).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, RecordStoreError> {
            self.inner.get(id).await
        }

        async fn update(&self, record: FileRecord) -> Result<FileRecord, RecordStoreError> {
            self.inner.update(record).await
        }

        async fn delete(&self, id: Uuid) -> Result<FileRecord, RecordStoreError> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> Result<Vec<FileRecord>, RecordStoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn failed_write_after_insert_removes_record() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        let service = FileItemService::new(
            Storage::new(root.clone()),
            BlockingStore {
                inner: JsonRecordStore::in_memory(),
                root: root.clone(),
            },
        );

        let result = service.create(upload("a.txt", "/docs", b"abc")).await;
        assert!(matches!(result, Err(FileItemError::Io(_))));
        assert!(root.join("docs").is_file());
        assert!(service.records.list().await.expect("list").is_empty());
    }
}
