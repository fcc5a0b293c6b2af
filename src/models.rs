use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub pin_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub code_hash: String,
    pub stored_file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub storage_url: String,
    pub storage_object_id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewFileRecord<'a> {
    pub scope: OwnerScope,
    pub name: &'a str,
    pub code_hash: &'a str,
    pub stored_file_name: &'a str,
    pub file_size: u64,
    pub mime_type: &'a str,
    pub storage_url: &'a str,
    pub storage_object_id: &'a str,
}

/// Which file records a caller can see and which names it competes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerScope {
    /// Records owned by one account.
    Account(Uuid),
    /// Ownerless records of an anonymous deployment.
    Global,
}

impl OwnerScope {
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            OwnerScope::Account(id) => Some(*id),
            OwnerScope::Global => None,
        }
    }

    /// Value compared against `IFNULL(owner_id, '')`.
    pub(crate) fn key(&self) -> String {
        self.owner_id().map(|id| id.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub total_files: usize,
    pub total_size: u64,
    #[serde(rename = "totalSizeKB")]
    pub total_size_kb: String,
}

impl FileStats {
    pub fn from_records(records: &[FileRecord]) -> Self {
        let total_size: u64 = records.iter().map(|r| r.file_size).sum();
        Self {
            total_files: records.len(),
            total_size,
            total_size_kb: format!("{:.2}", total_size as f64 / 1024.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: u64) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            owner_id: None,
            name: format!("file-{}", size),
            code_hash: String::new(),
            stored_file_name: "a.bin".into(),
            file_size: size,
            mime_type: "application/octet-stream".into(),
            storage_url: "http://localhost/a.bin".into(),
            storage_object_id: "a".into(),
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn empty_stats() {
        let stats = FileStats::from_records(&[]);
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.total_size_kb, "0.00");
    }

    #[test]
    fn stats_round_to_two_decimals() {
        let stats = FileStats::from_records(&[record(1000), record(2000)]);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 3000);
        assert_eq!(stats.total_size_kb, "2.93");
    }

    #[test]
    fn stats_serialize_with_wire_names() {
        let json = serde_json::to_value(FileStats::from_records(&[record(1024)])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"totalFiles": 1, "totalSize": 1024, "totalSizeKB": "1.00"})
        );
    }

    #[test]
    fn scope_keys() {
        let id = Uuid::new_v4();
        assert_eq!(OwnerScope::Account(id).key(), id.to_string());
        assert_eq!(OwnerScope::Global.key(), "");
    }
}
