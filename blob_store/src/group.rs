//! Blob store groups: several member stores behind one logical store.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use data_model::{
    BlobAttributes,
    BlobHeaders,
    BlobId,
    BlobStoreConfiguration,
    BlobStoreMetrics,
};
use tracing::{info, warn};

use crate::{
    fill_policy::fill_policy_for,
    Blob,
    BlobStore,
    BlobStoreError,
    BlobStoreResult,
    FillPolicy,
};

/// A group writes each new blob to one member picked by its [`FillPolicy`]
/// and serves reads and deletes from whichever member holds the blob.
///
/// The group keeps no placement map of its own; lookups fan out over the
/// members in order and the first match wins.
pub struct BlobStoreGroup {
    config: BlobStoreConfiguration,
    members: Vec<Arc<dyn BlobStore>>,
    fill_policy: Box<dyn FillPolicy>,
    started: AtomicBool,
    writable: AtomicBool,
}

impl BlobStoreGroup {
    pub fn new(
        config: BlobStoreConfiguration,
        members: Vec<Arc<dyn BlobStore>>,
    ) -> BlobStoreResult<Self> {
        let group = config.attributes.group.as_ref().ok_or_else(|| {
            BlobStoreError::invalid_configuration(format!(
                "blob store group {} has no group attributes",
                config.name
            ))
        })?;
        let fill_policy = fill_policy_for(group.fill_policy);
        Ok(Self::with_fill_policy(config, members, fill_policy))
    }

    pub fn with_fill_policy(
        config: BlobStoreConfiguration,
        members: Vec<Arc<dyn BlobStore>>,
        fill_policy: Box<dyn FillPolicy>,
    ) -> Self {
        let writable = config.attributes.writable;
        Self {
            config,
            members,
            fill_policy,
            started: AtomicBool::new(false),
            writable: AtomicBool::new(writable),
        }
    }

    pub fn members(&self) -> &[Arc<dyn BlobStore>] {
        &self.members
    }

    pub fn fill_policy(&self) -> &dyn FillPolicy {
        self.fill_policy.as_ref()
    }

    fn ensure_started(&self) -> BlobStoreResult<()> {
        if !self.is_started() {
            return Err(BlobStoreError::NotStarted {
                store: self.config.name.clone(),
            });
        }
        Ok(())
    }

    /// Member holding `blob_id`, live or soft deleted.
    async fn member_of(&self, blob_id: &BlobId) -> BlobStoreResult<Option<&Arc<dyn BlobStore>>> {
        for member in &self.members {
            if member.get_blob_attributes(blob_id).await?.is_some() {
                return Ok(Some(member));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BlobStore for BlobStoreGroup {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn configuration(&self) -> &BlobStoreConfiguration {
        &self.config
    }

    /// Members are started by their owner; the group only checks that it
    /// has some.
    async fn start(&self) -> BlobStoreResult<()> {
        if self.members.is_empty() {
            return Err(BlobStoreError::invalid_configuration(format!(
                "blob store group {} has no members",
                self.config.name
            )));
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            info!(
                blob_store = %self.config.name,
                members = self.members.len(),
                fill_policy = %self.fill_policy.name(),
                "started blob store group"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> BlobStoreResult<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.is_started() &&
            self.writable.load(Ordering::SeqCst) &&
            self.members.iter().any(|member| member.is_writable())
    }

    fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    fn has_capacity_for(&self, size: u64) -> bool {
        self.is_writable() && self.members.iter().any(|member| member.has_capacity_for(size))
    }

    async fn create(&self, content: Bytes, headers: BlobHeaders) -> BlobStoreResult<Blob> {
        self.ensure_started()?;
        let no_member = || BlobStoreError::NoMemberAvailable {
            group: self.config.name.clone(),
        };
        if !self.writable.load(Ordering::SeqCst) {
            return Err(no_member());
        }
        let size = content.len() as u64;
        let first = self
            .fill_policy
            .choose_member(&self.members, size)
            .ok_or_else(no_member)?;

        let len = self.members.len();
        for idx in (0..len).map(|offset| (first + offset) % len) {
            let member = &self.members[idx];
            // the chosen member already passed the policy's check
            if idx != first && !member.has_capacity_for(size) {
                continue;
            }
            match member.create(content.clone(), headers.clone()).await {
                Ok(blob) => return Ok(blob),
                Err(err @ BlobStoreError::MissingHeader { .. }) => return Err(err),
                Err(err) => {
                    warn!(
                        blob_store = %self.config.name,
                        member = member.name(),
                        "member rejected write, trying next: {}",
                        err
                    );
                }
            }
        }
        Err(no_member())
    }

    async fn get(&self, blob_id: &BlobId) -> BlobStoreResult<Option<Blob>> {
        self.ensure_started()?;
        for member in &self.members {
            if let Some(blob) = member.get(blob_id).await? {
                return Ok(Some(blob));
            }
        }
        Ok(None)
    }

    async fn exists(&self, blob_id: &BlobId) -> BlobStoreResult<bool> {
        self.ensure_started()?;
        for member in &self.members {
            if member.exists(blob_id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_blob_attributes(
        &self,
        blob_id: &BlobId,
    ) -> BlobStoreResult<Option<BlobAttributes>> {
        self.ensure_started()?;
        for member in &self.members {
            if let Some(attributes) = member.get_blob_attributes(blob_id).await? {
                return Ok(Some(attributes));
            }
        }
        Ok(None)
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> BlobStoreResult<bool> {
        self.ensure_started()?;
        for member in &self.members {
            if member.delete(blob_id, reason).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> BlobStoreResult<bool> {
        self.ensure_started()?;
        match self.member_of(blob_id).await? {
            Some(member) => member.delete_hard(blob_id).await,
            None => Ok(false),
        }
    }

    fn metrics(&self) -> BlobStoreMetrics {
        let mut total = match self.members.first() {
            Some(first) => first.metrics(),
            None => BlobStoreMetrics::default(),
        };
        for member in self.members.iter().skip(1) {
            total += member.metrics();
        }
        total
    }
}
