use anyhow::{Context, Result};
use data_model::SoftDeletedBlobRecord;

/// JSON encoding of index records.
pub fn encode_record(record: &SoftDeletedBlobRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).with_context(|| {
        format!(
            "encoding soft-deleted record for blob {} in {}",
            record.blob_id, record.blob_store_name
        )
    })
}

pub fn decode_record(bytes: &[u8]) -> Result<SoftDeletedBlobRecord> {
    serde_json::from_slice(bytes).context("decoding soft-deleted record")
}
