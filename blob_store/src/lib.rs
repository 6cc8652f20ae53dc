//! Blob storage with soft delete.
//!
//! - [`ObjectBlobStore`] stores blobs on a filesystem, S3 or in memory
//! - [`BlobStoreGroup`] spreads writes over member stores with a
//!   [`FillPolicy`]
//! - [`MeteredBlobStore`] wraps any store with per-operation counters
//! - [`BlobStoreQuotaService`] checks usage against configured quotas
//!
//! Deleting a blob only soft deletes it: the blob disappears from reads and
//! a record is added to the store's
//! [`SoftDeletedBlobIndex`](state_store::SoftDeletedBlobIndex). The bytes are
//! removed later by [`BlobStore::delete_hard`].

pub mod backends;
pub mod error;
pub mod fill_policy;
pub mod group;
pub mod metered;
pub mod quota;
pub mod traits;

pub use backends::{build_object_store, ObjectBlobStore};
pub use error::{BlobStoreError, BlobStoreResult};
pub use fill_policy::{fill_policy_for, FillPolicy, RoundRobinFillPolicy, WriteToFirstFillPolicy};
pub use group::BlobStoreGroup;
pub use metered::MeteredBlobStore;
pub use quota::{BlobStoreQuotaResult, BlobStoreQuotaService, QuotaService};
pub use traits::{Blob, BlobStore};
