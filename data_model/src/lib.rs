pub mod config;
pub mod test_objects;

use std::{
    collections::HashMap,
    fmt::{self, Display},
    ops::AddAssign,
};

use blobvault_utils::to_epoch_nanos;
use chrono::{DateTime, Utc};
pub use config::{
    BlobStoreAttributes,
    BlobStoreConfiguration,
    BlobStoreType,
    FileAttributes,
    FillPolicyName,
    GroupAttributes,
    QuotaAttributes,
    QuotaType,
    S3Attributes,
    S3Encryption,
};
use serde::{Deserialize, Serialize};

/// Header carrying the logical name of a blob. Required on create.
pub const BLOB_NAME_HEADER: &str = "BlobStore.blob-name";
pub const CREATED_BY_HEADER: &str = "BlobStore.created-by";
pub const CONTENT_TYPE_HEADER: &str = "BlobStore.content-type";

pub type BlobHeaders = HashMap<String, String>;

/// Opaque identifier of a blob within one blob store. Never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMetrics {
    pub created_at: DateTime<Utc>,
    pub content_size: u64,
    pub sha256_hash: String,
}

/// Everything persisted about a blob besides its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobAttributes {
    pub headers: BlobHeaders,
    pub metrics: BlobMetrics,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BlobAttributes {
    pub fn new(headers: BlobHeaders, metrics: BlobMetrics) -> Self {
        Self {
            headers,
            metrics,
            deleted: false,
            deleted_reason: None,
            deleted_at: None,
        }
    }

    pub fn mark_deleted(&mut self, reason: &str, at: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_reason = Some(reason.to_string());
        self.deleted_at = Some(at);
    }

    pub fn blob_name(&self) -> Option<&str> {
        self.headers.get(BLOB_NAME_HEADER).map(String::as_str)
    }
}

/// A blob waiting in the soft-delete index for physical removal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SoftDeletedBlobRecord {
    pub blob_id: BlobId,
    pub blob_store_name: String,
    pub deleted_at: DateTime<Utc>,
}

impl SoftDeletedBlobRecord {
    pub fn new(blob_store_name: &str, blob_id: BlobId, deleted_at: DateTime<Utc>) -> Self {
        Self {
            blob_id,
            blob_store_name: blob_store_name.to_string(),
            deleted_at,
        }
    }

    /// Key prefix shared by all records of one store. The separator can't
    /// appear in store names (enforced by config validation).
    pub fn store_prefix(blob_store_name: &str) -> String {
        format!("{}|", blob_store_name)
    }

    /// Ordering key: store, zero padded deletion time in nanoseconds, blob
    /// id. Byte order equals deletion order within a store.
    pub fn key(&self) -> String {
        Self::key_from(&self.blob_store_name, &self.deleted_at, &self.blob_id)
    }

    pub fn key_from(blob_store_name: &str, deleted_at: &DateTime<Utc>, blob_id: &BlobId) -> String {
        format!(
            "{}|{:020}|{}",
            blob_store_name,
            to_epoch_nanos(deleted_at),
            blob_id
        )
    }

    /// Upper bound (exclusive) for keys of records deleted strictly before
    /// `cutoff`.
    pub fn cutoff_key(blob_store_name: &str, cutoff: &DateTime<Utc>) -> String {
        format!("{}|{:020}|", blob_store_name, to_epoch_nanos(cutoff))
    }

    pub fn id_key(blob_store_name: &str, blob_id: &BlobId) -> String {
        format!("{}|{}", blob_store_name, blob_id)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Get,
    Put,
    Exists,
    Attributes,
    SoftDelete,
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub successful_requests: u64,
    pub error_requests: u64,
    pub time_on_requests_ms: u64,
    pub blob_size: u64,
}

impl OperationMetrics {
    /// Counters accumulated since `earlier` was taken.
    pub fn since(&self, earlier: &OperationMetrics) -> OperationMetrics {
        OperationMetrics {
            successful_requests: self
                .successful_requests
                .saturating_sub(earlier.successful_requests),
            error_requests: self.error_requests.saturating_sub(earlier.error_requests),
            time_on_requests_ms: self
                .time_on_requests_ms
                .saturating_sub(earlier.time_on_requests_ms),
            blob_size: self.blob_size.saturating_sub(earlier.blob_size),
        }
    }
}

impl AddAssign for OperationMetrics {
    fn add_assign(&mut self, other: Self) {
        self.successful_requests += other.successful_requests;
        self.error_requests += other.error_requests;
        self.time_on_requests_ms += other.time_on_requests_ms;
        self.blob_size += other.blob_size;
    }
}

/// Usage of a blob store. Soft-deleted blobs still occupy storage and are
/// counted until they are hard deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreMetrics {
    pub blob_count: u64,
    pub total_size: u64,
    /// `None` when the store has no configured capacity.
    pub available_space: Option<u64>,
}

impl BlobStoreMetrics {
    pub fn unlimited(&self) -> bool {
        self.available_space.is_none()
    }
}

impl AddAssign for BlobStoreMetrics {
    fn add_assign(&mut self, other: Self) {
        self.blob_count += other.blob_count;
        self.total_size += other.total_size;
        self.available_space = match (self.available_space, other.available_space) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_record_keys_sort_by_deletion_time() {
        let now = Utc::now();
        let older = SoftDeletedBlobRecord::new("store", BlobId::from("zzz"), now);
        let newer =
            SoftDeletedBlobRecord::new("store", BlobId::from("aaa"), now + Duration::seconds(1));
        assert!(older.key() < newer.key());

        let cutoff = SoftDeletedBlobRecord::cutoff_key("store", &newer.deleted_at);
        assert!(older.key() < cutoff);
        assert!(newer.key() > cutoff);
    }

    #[test]
    fn test_record_keys_keep_sub_millisecond_order() {
        let base = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let older =
            SoftDeletedBlobRecord::new("store", BlobId::from("zzz"), base + Duration::microseconds(100));
        let newer =
            SoftDeletedBlobRecord::new("store", BlobId::from("aaa"), base + Duration::microseconds(600));
        assert!(older.key() < newer.key());

        let cutoff = SoftDeletedBlobRecord::cutoff_key("store", &(base + Duration::microseconds(300)));
        assert!(older.key() < cutoff);
        assert!(newer.key() > cutoff);
    }

    #[test]
    fn test_record_keys_are_scoped_by_store() {
        let now = Utc::now();
        let record = SoftDeletedBlobRecord::new("store-a", BlobId::from("1"), now);
        assert!(record
            .key()
            .starts_with(&SoftDeletedBlobRecord::store_prefix("store-a")));
        assert!(!record
            .key()
            .starts_with(&SoftDeletedBlobRecord::store_prefix("store")));
    }

    #[test]
    fn test_operation_metrics_since() {
        let earlier = OperationMetrics {
            successful_requests: 2,
            error_requests: 1,
            time_on_requests_ms: 10,
            blob_size: 100,
        };
        let mut later = earlier;
        later += OperationMetrics {
            successful_requests: 3,
            error_requests: 0,
            time_on_requests_ms: 5,
            blob_size: 50,
        };
        let delta = later.since(&earlier);
        assert_eq!(delta.successful_requests, 3);
        assert_eq!(delta.error_requests, 0);
        assert_eq!(delta.time_on_requests_ms, 5);
        assert_eq!(delta.blob_size, 50);
    }

    #[test]
    fn test_blob_store_metrics_sum() {
        let mut total = BlobStoreMetrics {
            blob_count: 1,
            total_size: 10,
            available_space: Some(90),
        };
        total += BlobStoreMetrics {
            blob_count: 2,
            total_size: 20,
            available_space: Some(80),
        };
        assert_eq!(total.blob_count, 3);
        assert_eq!(total.total_size, 30);
        assert_eq!(total.available_space, Some(170));

        total += BlobStoreMetrics::default();
        assert!(total.unlimited());
    }

    #[test]
    fn test_operation_type_names() {
        assert_eq!(OperationType::SoftDelete.to_string(), "SOFT_DELETE");
        assert_eq!(OperationType::Get.as_ref(), "GET");
    }
}
