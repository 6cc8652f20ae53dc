use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use metrics::IndexMetrics;
use rocksdb::{ColumnFamilyDescriptor, Options, TransactionDB, TransactionDBOptions};
use state_machine::BlobStoreColumns;
use strum::IntoEnumIterator;
use tracing::info;

pub mod scanner;
pub mod serializer;
pub mod soft_deleted_blob_index;
pub mod state_machine;
pub mod test_state_store;

pub use soft_deleted_blob_index::{RecordsBefore, SoftDeletedBlobIndex};

/// Durable state shared by every blob store of the process. Each soft-delete
/// index is a view over the same database scoped by store name.
pub struct StateStore {
    pub db: Arc<TransactionDB>,
    pub metrics: Arc<IndexMetrics>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Result<Arc<Self>> {
        fs::create_dir_all(path.clone())
            .map_err(|e| anyhow!("failed to create state store dir: {}", e))?;

        let column_families = BlobStoreColumns::iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        let db = Arc::new(
            TransactionDB::open_cf_descriptors(
                &db_opts,
                &TransactionDBOptions::default(),
                &path,
                column_families,
            )
            .map_err(|e| anyhow!("failed to open db: {}", e))?,
        );
        info!(path = %path.display(), "initialized state store");

        Ok(Arc::new(Self {
            db,
            metrics: Arc::new(IndexMetrics::new()),
        }))
    }

    /// A new, unbound soft-delete index backed by this state store.
    pub fn soft_deleted_blob_index(self: &Arc<Self>) -> SoftDeletedBlobIndex {
        SoftDeletedBlobIndex::new(self.clone())
    }
}
