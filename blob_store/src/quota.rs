//! Quota evaluation against a blob store's usage.

use data_model::{BlobStoreConfiguration, QuotaAttributes, QuotaType};
use serde::Serialize;

use crate::{BlobStore, BlobStoreError, BlobStoreResult};

/// Outcome of checking one store against its quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobStoreQuotaResult {
    pub violation: bool,
    pub blob_store_name: String,
    pub message: String,
}

pub trait QuotaService: Send + Sync {
    /// Rejects a store whose quota settings can't be checked.
    fn validate(&self, _store: &dyn BlobStore) -> BlobStoreResult<()> {
        Ok(())
    }

    /// Returns `None` when the store has no quota configured.
    fn check_quota(&self, store: &dyn BlobStore) -> BlobStoreResult<Option<BlobStoreQuotaResult>>;
}

/// Evaluates the quota types a store can be configured with.
#[derive(Debug, Default, Clone)]
pub struct BlobStoreQuotaService;

impl BlobStoreQuotaService {
    pub fn new() -> Self {
        Self
    }

    /// Rejects quota settings that could never be evaluated.
    pub fn validate_quota_config(config: &BlobStoreConfiguration) -> BlobStoreResult<()> {
        let Some(quota) = config.attributes.quota else {
            return Ok(());
        };
        if quota.limit == 0 {
            return Err(BlobStoreError::invalid_configuration(format!(
                "quota limit of blob store {} must be positive",
                config.name
            )));
        }
        if quota.quota_type == QuotaType::SpaceRemaining &&
            !config.is_group() &&
            config.attributes.capacity_bytes.is_none()
        {
            return Err(BlobStoreError::invalid_configuration(format!(
                "{} on blob store {} requires capacity_bytes",
                quota.quota_type, config.name
            )));
        }
        Ok(())
    }

    fn evaluate(name: &str, quota: QuotaAttributes, store: &dyn BlobStore) -> BlobStoreQuotaResult {
        let usage = store.metrics();
        let limit = quota.limit;
        let (violation, message) = match quota.quota_type {
            QuotaType::SpaceUsed => (
                usage.total_size > limit,
                format!("space used {} bytes, limit {} bytes", usage.total_size, limit),
            ),
            QuotaType::SpaceRemaining => match usage.available_space {
                Some(available) => (
                    available < limit,
                    format!(
                        "space remaining {} bytes, minimum {} bytes",
                        available, limit
                    ),
                ),
                None => (false, "space remaining is unlimited".to_string()),
            },
            QuotaType::BlobCount => (
                usage.blob_count > limit,
                format!("blob count {}, limit {}", usage.blob_count, limit),
            ),
        };
        BlobStoreQuotaResult {
            violation,
            blob_store_name: name.to_string(),
            message: format!("{}: {}", quota.quota_type, message),
        }
    }
}

impl QuotaService for BlobStoreQuotaService {
    fn validate(&self, store: &dyn BlobStore) -> BlobStoreResult<()> {
        Self::validate_quota_config(store.configuration())
    }

    fn check_quota(&self, store: &dyn BlobStore) -> BlobStoreResult<Option<BlobStoreQuotaResult>> {
        let config = store.configuration();
        Self::validate_quota_config(config)?;
        if !store.is_started() {
            return Err(BlobStoreError::NotStarted {
                store: store.name().to_string(),
            });
        }
        Ok(config
            .attributes
            .quota
            .map(|quota| Self::evaluate(store.name(), quota, store)))
    }
}
