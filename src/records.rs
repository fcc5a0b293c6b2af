use crate::db::{is_foreign_key_violation, is_unique_violation, Database, StoreError};
use crate::models::{FileRecord, NewFileRecord, OwnerScope};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("a file with this name already exists")]
    DuplicateName,

    #[error("File not found")]
    NotFound,

    #[error("Account no longer exists")]
    UnknownOwner,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for RecordError {
    fn from(err: rusqlite::Error) -> Self {
        RecordError::Store(err.into())
    }
}

const RECORD_COLUMNS: &str = "id, owner_id, name, code_hash, stored_file_name, file_size, \
     mime_type, storage_url, storage_object_id, uploaded_at";

/// Metadata rows for uploaded files. Names are unique within an owner scope.
#[derive(Clone)]
pub struct FileRecordStore {
    db: Database,
}

impl FileRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Advisory check used to fail early with a friendly message. The unique
    /// index consulted by [`create`](Self::create) is what actually decides.
    pub async fn name_taken(&self, name: &str, scope: OwnerScope) -> Result<bool, RecordError> {
        let conn = self.db.lock().await;
        let exists = conn
            .query_row(
                "SELECT 1 FROM file_records WHERE IFNULL(owner_id, '') = ? AND name = ?",
                params![scope.key(), name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub async fn create(&self, new: NewFileRecord<'_>) -> Result<FileRecord, RecordError> {
        // Millisecond precision keeps the stored value equal to what clients see.
        let uploaded_at = DateTime::parse_from_rfc3339(
            &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        )
        .map_err(|e| StoreError::Corrupt(e.to_string()))?
        .with_timezone(&Utc);

        let record = FileRecord {
            id: Uuid::new_v4(),
            owner_id: new.scope.owner_id(),
            name: new.name.to_owned(),
            code_hash: new.code_hash.to_owned(),
            stored_file_name: new.stored_file_name.to_owned(),
            file_size: new.file_size,
            mime_type: new.mime_type.to_owned(),
            storage_url: new.storage_url.to_owned(),
            storage_object_id: new.storage_object_id.to_owned(),
            uploaded_at,
        };

        let conn = self.db.lock().await;
        conn.execute(
            &format!("INSERT INTO file_records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                record.id.to_string(),
                record.owner_id.map(|id| id.to_string()),
                record.name,
                record.code_hash,
                record.stored_file_name,
                record.file_size as i64,
                record.mime_type,
                record.storage_url,
                record.storage_object_id,
                record.uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                RecordError::DuplicateName
            } else if is_foreign_key_violation(&e) {
                RecordError::UnknownOwner
            } else {
                e.into()
            }
        })?;

        Ok(record)
    }

    pub async fn find_by_name(&self, name: &str, scope: OwnerScope) -> Result<FileRecord, RecordError> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM file_records WHERE IFNULL(owner_id, '') = ? AND name = ?"
                ),
                params![scope.key(), name],
                read_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(row.into_record()?),
            None => Err(RecordError::NotFound),
        }
    }

    /// All records in `scope`, oldest first.
    pub async fn list(&self, scope: OwnerScope) -> Result<Vec<FileRecord>, RecordError> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM file_records WHERE IFNULL(owner_id, '') = ? ORDER BY rowid"
        ))?;
        let rows = stmt.query_map([scope.key()], read_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

/// Raw column values; parsing into domain types happens outside the rusqlite callback.
struct RawRecord {
    id: String,
    owner_id: Option<String>,
    name: String,
    code_hash: String,
    stored_file_name: String,
    file_size: i64,
    mime_type: String,
    storage_url: String,
    storage_object_id: String,
    uploaded_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        code_hash: row.get(3)?,
        stored_file_name: row.get(4)?,
        file_size: row.get(5)?,
        mime_type: row.get(6)?,
        storage_url: row.get(7)?,
        storage_object_id: row.get(8)?,
        uploaded_at: row.get(9)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<FileRecord, StoreError> {
        let corrupt = |e: &dyn std::fmt::Display| StoreError::Corrupt(format!("file record {}: {}", self.id, e));

        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(&e))?;
        let owner_id = match self.owner_id.as_deref() {
            Some(owner) => Some(Uuid::parse_str(owner).map_err(|e| corrupt(&e))?),
            None => None,
        };
        let file_size = u64::try_from(self.file_size).map_err(|e| corrupt(&e))?;
        let uploaded_at = DateTime::parse_from_rfc3339(&self.uploaded_at)
            .map_err(|e| corrupt(&e))?
            .with_timezone(&Utc);

        Ok(FileRecord {
            id,
            owner_id,
            name: self.name,
            code_hash: self.code_hash,
            stored_file_name: self.stored_file_name,
            file_size,
            mime_type: self.mime_type,
            storage_url: self.storage_url,
            storage_object_id: self.storage_object_id,
            uploaded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(scope: OwnerScope, name: &str, size: u64) -> NewFileRecord<'_> {
        NewFileRecord {
            scope,
            name,
            code_hash: "$2b$04$hash",
            stored_file_name: "notes.txt",
            file_size: size,
            mime_type: "text/plain",
            storage_url: "http://localhost:5000/files/abc.txt",
            storage_object_id: "abc.txt",
        }
    }

    fn store() -> FileRecordStore {
        FileRecordStore::new(Database::open_in_memory().unwrap())
    }

    async fn account(store: &FileRecordStore) -> OwnerScope {
        let id = Uuid::new_v4();
        store
            .db
            .lock()
            .await
            .execute(
                "INSERT INTO accounts (id, pin_hash, created_at) VALUES (?, ?, ?)",
                params![id.to_string(), format!("$2b$04${}", id), Utc::now().to_rfc3339()],
            )
            .unwrap();
        OwnerScope::Account(id)
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = store();
        let created = store
            .create(new_record(OwnerScope::Global, "notes", 42))
            .await
            .unwrap();

        let found = store.find_by_name("notes", OwnerScope::Global).await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.owner_id, None);
        assert_eq!(found.file_size, 42);
        assert_eq!(found.uploaded_at, created.uploaded_at);
        assert_eq!(found.storage_object_id, "abc.txt");
    }

    #[tokio::test]
    async fn missing_name_is_not_found() {
        assert!(matches!(
            store().find_by_name("nope", OwnerScope::Global).await,
            Err(RecordError::NotFound)
        ));
    }

    #[tokio::test]
    async fn names_are_unique_per_scope() {
        let store = store();
        let alice = account(&store).await;
        let bob = account(&store).await;

        store.create(new_record(alice, "report", 1)).await.unwrap();
        assert!(store.name_taken("report", alice).await.unwrap());
        assert!(!store.name_taken("report", bob).await.unwrap());

        assert!(matches!(
            store.create(new_record(alice, "report", 1)).await,
            Err(RecordError::DuplicateName)
        ));
        store.create(new_record(bob, "report", 2)).await.unwrap();
        store.create(new_record(OwnerScope::Global, "report", 3)).await.unwrap();

        assert!(matches!(
            store.find_by_name("report", OwnerScope::Global).await,
            Ok(r) if r.file_size == 3
        ));
        assert!(matches!(
            store.find_by_name("report", bob).await,
            Ok(r) if r.file_size == 2
        ));
    }

    #[tokio::test]
    async fn ownerless_duplicates_are_rejected_by_the_index() {
        let store = store();
        store.create(new_record(OwnerScope::Global, "shared", 1)).await.unwrap();
        assert!(matches!(
            store.create(new_record(OwnerScope::Global, "shared", 1)).await,
            Err(RecordError::DuplicateName)
        ));
    }

    #[tokio::test]
    async fn list_is_scoped_and_ordered() {
        let store = store();
        let owner = account(&store).await;
        store.create(new_record(owner, "first", 1000)).await.unwrap();
        store.create(new_record(OwnerScope::Global, "other", 5)).await.unwrap();
        store.create(new_record(owner, "second", 2000)).await.unwrap();

        let names: Vec<_> = store
            .list(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(store.list(OwnerScope::Global).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_for_unknown_accounts_are_refused() {
        let store = store();
        let ghost = OwnerScope::Account(Uuid::new_v4());
        assert!(matches!(
            store.create(new_record(ghost, "fresh-name", 1)).await,
            Err(RecordError::UnknownOwner)
        ));
        assert!(store.list(ghost).await.unwrap().is_empty());
    }
}
