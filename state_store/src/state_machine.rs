use std::sync::Arc;

use anyhow::{anyhow, Result};
use data_model::{BlobId, SoftDeletedBlobRecord};
use rocksdb::{BoundColumnFamily, Transaction, TransactionDB};
use strum::AsRefStr;

use crate::serializer::encode_record;

#[derive(AsRefStr, strum::Display, strum::EnumIter)]
pub enum BlobStoreColumns {
    SoftDeletedBlobs,   //  Store_DeletedAtNanos_BlobId -> SoftDeletedBlobRecord
    SoftDeletedBlobIds, //  Store_BlobId -> SoftDeletedBlobs key
}

impl BlobStoreColumns {
    pub fn cf_db<'a>(&'a self, db: &'a TransactionDB) -> Result<Arc<BoundColumnFamily<'a>>> {
        db.cf_handle(self.as_ref())
            .ok_or(anyhow!("failed to get column family handle for {}", self))
    }
}

/// Inserts a record and its by-id entry in `txn`. Returns false, without
/// writing, when the blob already has a record.
pub(crate) fn insert_soft_deleted_record(
    db: &TransactionDB,
    txn: &Transaction<TransactionDB>,
    record: &SoftDeletedBlobRecord,
) -> Result<bool> {
    let records_cf = BlobStoreColumns::SoftDeletedBlobs.cf_db(db)?;
    let ids_cf = BlobStoreColumns::SoftDeletedBlobIds.cf_db(db)?;

    let id_key = SoftDeletedBlobRecord::id_key(&record.blob_store_name, &record.blob_id);
    if txn.get_for_update_cf(&ids_cf, &id_key, true)?.is_some() {
        return Ok(false);
    }
    let record_key = record.key();
    let serialized_record = encode_record(record)?;
    txn.put_cf(&records_cf, &record_key, serialized_record)?;
    txn.put_cf(&ids_cf, &id_key, &record_key)?;
    Ok(true)
}

/// Removes the record of `blob_id` in `txn`. Returns false when the blob has
/// no record.
pub(crate) fn remove_soft_deleted_record(
    db: &TransactionDB,
    txn: &Transaction<TransactionDB>,
    blob_store_name: &str,
    blob_id: &BlobId,
) -> Result<bool> {
    let records_cf = BlobStoreColumns::SoftDeletedBlobs.cf_db(db)?;
    let ids_cf = BlobStoreColumns::SoftDeletedBlobIds.cf_db(db)?;

    let id_key = SoftDeletedBlobRecord::id_key(blob_store_name, blob_id);
    let Some(record_key) = txn.get_for_update_cf(&ids_cf, &id_key, true)? else {
        return Ok(false);
    };
    txn.delete_cf(&records_cf, &record_key)?;
    txn.delete_cf(&ids_cf, &id_key)?;
    Ok(true)
}

/// Removes a record found by a scan, given its primary key.
pub(crate) fn remove_soft_deleted_record_by_key(
    db: &TransactionDB,
    txn: &Transaction<TransactionDB>,
    record_key: &[u8],
    record: &SoftDeletedBlobRecord,
) -> Result<()> {
    let records_cf = BlobStoreColumns::SoftDeletedBlobs.cf_db(db)?;
    let ids_cf = BlobStoreColumns::SoftDeletedBlobIds.cf_db(db)?;

    txn.delete_cf(&records_cf, record_key)?;
    txn.delete_cf(
        &ids_cf,
        SoftDeletedBlobRecord::id_key(&record.blob_store_name, &record.blob_id),
    )?;
    Ok(())
}
