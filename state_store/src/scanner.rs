use std::sync::Arc;

use anyhow::Result;
use rocksdb::{Direction, IteratorMode, ReadOptions, TransactionDB};

use crate::state_machine::BlobStoreColumns;

pub type KVBytes = (Vec<u8>, Vec<u8>);

/// Bounds of a forward scan: keys starting with `prefix`, at or after
/// `restart_key` if set, and strictly below `upper_bound` if set.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions<'a> {
    pub prefix: &'a [u8],
    pub restart_key: Option<&'a [u8]>,
    pub upper_bound: Option<&'a [u8]>,
    pub limit: Option<usize>,
}

pub struct StateReader {
    db: Arc<TransactionDB>,
}

impl StateReader {
    pub fn new(db: Arc<TransactionDB>) -> Self {
        Self { db }
    }

    /// Returns up to `limit` rows and the key to restart from when more rows
    /// remain.
    pub fn get_rows_with_limits(
        &self,
        column: BlobStoreColumns,
        options: ScanOptions<'_>,
    ) -> Result<(Vec<KVBytes>, Option<Vec<u8>>)> {
        let cf_handle = column.cf_db(&self.db)?;

        let mut read_options = ReadOptions::default();
        read_options.set_readahead_size(4_194_304);
        let iterator_mode = match options.restart_key {
            Some(restart_key) => IteratorMode::From(restart_key, Direction::Forward),
            None => IteratorMode::From(options.prefix, Direction::Forward),
        };
        let iter = self
            .db
            .iterator_cf_opt(&cf_handle, read_options, iterator_mode);

        let mut items = Vec::new();
        let limit = options.limit.unwrap_or(usize::MAX);
        let mut restart_key = None;
        for kv in iter {
            let (key, value) = kv?;
            if !key.starts_with(options.prefix) {
                break;
            }
            if let Some(upper_bound) = options.upper_bound {
                if key.as_ref() >= upper_bound {
                    break;
                }
            }
            if items.len() < limit {
                items.push((key.to_vec(), value.to_vec()));
            } else {
                restart_key.replace(key.to_vec());
                break;
            }
        }
        Ok((items, restart_key))
    }

    pub fn first_row(
        &self,
        column: BlobStoreColumns,
        prefix: &[u8],
    ) -> Result<Option<KVBytes>> {
        let (mut rows, _) = self.get_rows_with_limits(
            column,
            ScanOptions {
                prefix,
                limit: Some(1),
                ..Default::default()
            },
        )?;
        Ok(rows.pop())
    }

    pub fn count_keys(
        &self,
        column: BlobStoreColumns,
        prefix: &[u8],
        upper_bound: Option<&[u8]>,
    ) -> Result<usize> {
        let cf_handle = column.cf_db(&self.db)?;
        let iter = self.db.iterator_cf(
            &cf_handle,
            IteratorMode::From(prefix, Direction::Forward),
        );
        let mut count = 0;
        for kv in iter {
            let (key, _) = kv?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(upper_bound) = upper_bound {
                if key.as_ref() >= upper_bound {
                    break;
                }
            }
            count += 1;
        }
        Ok(count)
    }
}
