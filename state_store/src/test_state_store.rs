use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use crate::{SoftDeletedBlobIndex, StateStore};

pub struct TestStateStore {
    pub state: Arc<StateStore>,
    // dropping the dir deletes the database
    _temp_dir: TempDir,
}

impl TestStateStore {
    pub fn new() -> Result<TestStateStore> {
        let temp_dir = tempfile::tempdir()?;
        let state = StateStore::new(temp_dir.path().join("state"))?;
        Ok(TestStateStore {
            state,
            _temp_dir: temp_dir,
        })
    }

    pub fn index(&self) -> SoftDeletedBlobIndex {
        self.state.soft_deleted_blob_index()
    }

    pub fn bound_index(&self, blob_store_name: &str) -> Result<SoftDeletedBlobIndex> {
        let index = self.index();
        index.init(blob_store_name)?;
        Ok(index)
    }
}
