//! Object store backends.
//!
//! Every leaf store type (`file`, `s3`, `memory`) is served by
//! [`ObjectBlobStore`] over an [`object_store::ObjectStore`]; this module
//! builds the right object store for a configuration.

mod object;

use std::{fs, sync::Arc};

use data_model::{BlobStoreConfiguration, BlobStoreType};
pub use object::ObjectBlobStore;
use object_store::{
    aws::AmazonS3Builder,
    local::LocalFileSystem,
    memory::InMemory,
    path::Path,
    ObjectStore,
};
use tracing::info;

use crate::{BlobStoreError, BlobStoreResult};

/// Builds the object store backing a leaf blob store, and the root path its
/// content lives under.
pub fn build_object_store(
    config: &BlobStoreConfiguration,
) -> BlobStoreResult<(Arc<dyn ObjectStore>, Path)> {
    match config.store_type {
        BlobStoreType::File => {
            let file = config.attributes.file.as_ref().ok_or_else(|| {
                BlobStoreError::invalid_configuration(format!(
                    "file blob store {} has no path",
                    config.name
                ))
            })?;
            fs::create_dir_all(&file.path)?;
            let store = LocalFileSystem::new_with_prefix(&file.path)?.with_automatic_cleanup(true);
            info!(blob_store = %config.name, path = %file.path, "using file blob store");
            Ok((Arc::new(store), Path::default()))
        }
        BlobStoreType::Memory => Ok((Arc::new(InMemory::new()), Path::default())),
        BlobStoreType::S3 => {
            let s3 = config.attributes.s3.as_ref().ok_or_else(|| {
                BlobStoreError::invalid_configuration(format!(
                    "s3 blob store {} has no bucket",
                    config.name
                ))
            })?;
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(&s3.bucket);
            if let Some(region) = &s3.region {
                builder = builder.with_region(region);
            }
            // minio/localstack
            if let Some(endpoint) = &s3.endpoint {
                builder = builder.with_endpoint(endpoint);
                if endpoint.starts_with("http://") {
                    builder = builder.with_allow_http(true);
                }
            }
            if let Some(encryption) = &s3.encryption {
                builder = builder.with_sse_kms_encryption(&encryption.kms_key_id);
            }
            let store = builder.build()?;
            let root = s3
                .prefix
                .as_deref()
                .map(Path::from)
                .unwrap_or_default();
            info!(
                blob_store = %config.name,
                bucket = %s3.bucket,
                prefix = %root,
                "using s3 blob store"
            );
            Ok((Arc::new(store), root))
        }
        BlobStoreType::Group => Err(BlobStoreError::invalid_configuration(format!(
            "blob store group {} has no backend of its own",
            config.name
        ))),
    }
}
