//! Durable index of blobs that were soft deleted but whose bytes are still
//! in the blob store.
//!
//! Records are keyed by `(store, deletion time, blob id)`, so a forward scan
//! over a store's prefix yields the oldest deletion first. A second column
//! maps `(store, blob id)` to the record key, giving exactly one record per
//! blob and O(1) removal by id. Both entries are written in one transaction.

use std::{
    collections::VecDeque,
    sync::{Arc, OnceLock},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use data_model::{BlobId, SoftDeletedBlobRecord};
use metrics::Timer;
use tracing::{debug, info};

use crate::{
    scanner::{ScanOptions, StateReader},
    serializer::decode_record,
    state_machine::{self, BlobStoreColumns},
    StateStore,
};

const RECORDS_PAGE_SIZE: usize = 100;
const DELETE_ALL_BATCH_SIZE: usize = 1000;

pub struct SoftDeletedBlobIndex {
    state: Arc<StateStore>,
    blob_store_name: OnceLock<String>,
}

impl SoftDeletedBlobIndex {
    pub fn new(state: Arc<StateStore>) -> Self {
        Self {
            state,
            blob_store_name: OnceLock::new(),
        }
    }

    /// Binds the index to a blob store. Binding again to the same store is a
    /// no-op, binding to a different store is an error.
    pub fn init(&self, blob_store_name: &str) -> Result<()> {
        let bound = self
            .blob_store_name
            .get_or_init(|| blob_store_name.to_string());
        if bound != blob_store_name {
            return Err(anyhow!(
                "soft delete index already bound to blob store {}, can't bind to {}",
                bound,
                blob_store_name
            ));
        }
        debug!(blob_store = blob_store_name, "soft delete index bound");
        Ok(())
    }

    pub fn blob_store_name(&self) -> Result<&str> {
        self.blob_store_name
            .get()
            .map(String::as_str)
            .ok_or(anyhow!("soft delete index is not initialized"))
    }

    fn reader(&self) -> StateReader {
        StateReader::new(self.state.db.clone())
    }

    fn prefix(&self) -> Result<String> {
        Ok(SoftDeletedBlobRecord::store_prefix(self.blob_store_name()?))
    }

    /// Records `blob_id` as pending hard deletion as of now.
    pub fn create_record(&self, blob_id: &BlobId) -> Result<bool> {
        self.create_record_at(blob_id, Utc::now())
    }

    /// Records `blob_id` as pending hard deletion as of `deleted_at`. Returns
    /// false if the blob already has a record, which is left untouched.
    pub fn create_record_at(&self, blob_id: &BlobId, deleted_at: DateTime<Utc>) -> Result<bool> {
        let _timer = Timer::start_with_labels(&self.state.metrics.writes, &[]);
        let record = SoftDeletedBlobRecord::new(self.blob_store_name()?, blob_id.clone(), deleted_at);
        let txn = self.state.db.transaction();
        let created = state_machine::insert_soft_deleted_record(&self.state.db, &txn, &record)?;
        txn.commit()
            .map_err(|e| anyhow!("failed to commit soft delete record for {}: {}", blob_id, e))?;
        if created {
            self.state.metrics.records_created.add(1, &[]);
        }
        Ok(created)
    }

    /// The oldest pending record, left in place.
    pub fn get_next_available_record(&self) -> Result<Option<BlobId>> {
        let _timer = Timer::start_with_labels(&self.state.metrics.reads, &[]);
        let prefix = self.prefix()?;
        let row = self
            .reader()
            .first_row(BlobStoreColumns::SoftDeletedBlobs, prefix.as_bytes())?;
        match row {
            Some((_, value)) => {
                let record = decode_record(&value)?;
                Ok(Some(record.blob_id))
            }
            None => Ok(None),
        }
    }

    pub fn get_record(&self, blob_id: &BlobId) -> Result<Option<SoftDeletedBlobRecord>> {
        let id_key = SoftDeletedBlobRecord::id_key(self.blob_store_name()?, blob_id);
        let ids_cf = BlobStoreColumns::SoftDeletedBlobIds.cf_db(&self.state.db)?;
        let Some(record_key) = self.state.db.get_cf(&ids_cf, id_key)? else {
            return Ok(None);
        };
        let records_cf = BlobStoreColumns::SoftDeletedBlobs.cf_db(&self.state.db)?;
        match self.state.db.get_cf(&records_cf, record_key)? {
            Some(value) => Ok(Some(decode_record(&value)?)),
            None => Ok(None),
        }
    }

    /// Removes the record of `blob_id`. Returns false if there was none.
    pub fn delete_record(&self, blob_id: &BlobId) -> Result<bool> {
        let _timer = Timer::start_with_labels(&self.state.metrics.writes, &[]);
        let blob_store_name = self.blob_store_name()?;
        let txn = self.state.db.transaction();
        let deleted = state_machine::remove_soft_deleted_record(
            &self.state.db,
            &txn,
            blob_store_name,
            blob_id,
        )?;
        txn.commit()
            .map_err(|e| anyhow!("failed to delete soft delete record for {}: {}", blob_id, e))?;
        if deleted {
            self.state.metrics.records_deleted.add(1, &[]);
        }
        Ok(deleted)
    }

    /// Removes every record of the bound store. Returns how many were removed.
    pub fn delete_all_records(&self) -> Result<usize> {
        let blob_store_name = self.blob_store_name()?.to_string();
        let prefix = self.prefix()?;
        let mut total = 0;
        loop {
            let (rows, _) = self.reader().get_rows_with_limits(
                BlobStoreColumns::SoftDeletedBlobs,
                ScanOptions {
                    prefix: prefix.as_bytes(),
                    limit: Some(DELETE_ALL_BATCH_SIZE),
                    ..Default::default()
                },
            )?;
            if rows.is_empty() {
                break;
            }
            let txn = self.state.db.transaction();
            for (key, value) in rows.iter() {
                let record = decode_record(value)?;
                state_machine::remove_soft_deleted_record_by_key(
                    &self.state.db,
                    &txn,
                    key,
                    &record,
                )?;
            }
            txn.commit()
                .map_err(|e| anyhow!("failed to clear soft delete records: {}", e))?;
            total += rows.len();
        }
        self.state.metrics.records_deleted.add(total as u64, &[]);
        info!(
            blob_store = blob_store_name,
            records = total,
            "cleared soft delete index"
        );
        Ok(total)
    }

    /// Lazily enumerates the ids of records deleted strictly before `cutoff`,
    /// oldest first.
    pub fn get_records_before(&self, cutoff: DateTime<Utc>) -> Result<RecordsBefore> {
        let blob_store_name = self.blob_store_name()?;
        Ok(RecordsBefore::new(
            StateReader::new(self.state.db.clone()),
            SoftDeletedBlobRecord::store_prefix(blob_store_name),
            SoftDeletedBlobRecord::cutoff_key(blob_store_name, &cutoff),
        ))
    }

    pub fn size(&self) -> Result<usize> {
        let prefix = self.prefix()?;
        self.reader()
            .count_keys(BlobStoreColumns::SoftDeletedBlobs, prefix.as_bytes(), None)
    }

    /// Number of records deleted strictly before `cutoff`.
    pub fn count(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let blob_store_name = self.blob_store_name()?;
        let prefix = SoftDeletedBlobRecord::store_prefix(blob_store_name);
        let upper_bound = SoftDeletedBlobRecord::cutoff_key(blob_store_name, &cutoff);
        self.reader().count_keys(
            BlobStoreColumns::SoftDeletedBlobs,
            prefix.as_bytes(),
            Some(upper_bound.as_bytes()),
        )
    }
}

/// Paged, restartable scan over the records older than a cutoff. Each page
/// is read fresh from the database, so records removed while iterating are
/// not returned by later pages.
pub struct RecordsBefore {
    reader: StateReader,
    prefix: String,
    upper_bound: String,
    restart_key: Option<Vec<u8>>,
    buffer: VecDeque<BlobId>,
    exhausted: bool,
}

impl RecordsBefore {
    fn new(reader: StateReader, prefix: String, upper_bound: String) -> Self {
        Self {
            reader,
            prefix,
            upper_bound,
            restart_key: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Starts the enumeration over from the oldest record.
    pub fn restart(&mut self) {
        self.restart_key = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch_page(&mut self) -> Result<()> {
        let (rows, restart_key) = self.reader.get_rows_with_limits(
            BlobStoreColumns::SoftDeletedBlobs,
            ScanOptions {
                prefix: self.prefix.as_bytes(),
                restart_key: self.restart_key.as_deref(),
                upper_bound: Some(self.upper_bound.as_bytes()),
                limit: Some(RECORDS_PAGE_SIZE),
            },
        )?;
        for (_, value) in rows {
            let record = decode_record(&value)?;
            self.buffer.push_back(record.blob_id);
        }
        self.exhausted = restart_key.is_none();
        self.restart_key = restart_key;
        Ok(())
    }
}

impl Iterator for RecordsBefore {
    type Item = Result<BlobId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
