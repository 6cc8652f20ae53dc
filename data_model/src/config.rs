use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BlobStoreType {
    File,
    S3,
    Memory,
    Group,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FillPolicyName {
    #[default]
    RoundRobin,
    WriteToFirst,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum QuotaType {
    #[serde(rename = "spaceUsedQuota")]
    #[strum(serialize = "spaceUsedQuota")]
    SpaceUsed,
    #[serde(rename = "spaceRemainingQuota")]
    #[strum(serialize = "spaceRemainingQuota")]
    SpaceRemaining,
    #[serde(rename = "blobCountQuota")]
    #[strum(serialize = "blobCountQuota")]
    BlobCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Encryption {
    pub kms_key_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Attributes {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// For minio/localstack style endpoints.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub encryption: Option<S3Encryption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAttributes {
    pub members: Vec<String>,
    #[serde(default)]
    pub fill_policy: FillPolicyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAttributes {
    #[serde(rename = "type")]
    pub quota_type: QuotaType,
    pub limit: u64,
}

fn default_writable() -> bool {
    true
}

/// Typed attribute bag of a blob store. Which sections are required depends
/// on the store type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreAttributes {
    #[serde(default)]
    pub file: Option<FileAttributes>,
    #[serde(default)]
    pub s3: Option<S3Attributes>,
    #[serde(default)]
    pub group: Option<GroupAttributes>,
    #[serde(default)]
    pub quota: Option<QuotaAttributes>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    /// Seconds a soft-deleted blob is retained before the reconciliation
    /// sweep hard deletes it.
    #[serde(default)]
    pub soft_delete_retention: Option<u64>,
    #[serde(default = "default_writable")]
    pub writable: bool,
}

impl Default for BlobStoreAttributes {
    fn default() -> Self {
        Self {
            file: None,
            s3: None,
            group: None,
            quota: None,
            capacity_bytes: None,
            soft_delete_retention: None,
            writable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreConfiguration {
    pub name: String,
    #[serde(rename = "type")]
    pub store_type: BlobStoreType,
    #[serde(default)]
    pub attributes: BlobStoreAttributes,
}

impl BlobStoreConfiguration {
    pub fn file(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            store_type: BlobStoreType::File,
            attributes: BlobStoreAttributes {
                file: Some(FileAttributes {
                    path: path.to_string(),
                }),
                ..Default::default()
            },
        }
    }

    pub fn memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store_type: BlobStoreType::Memory,
            attributes: Default::default(),
        }
    }

    pub fn group(name: &str, members: &[&str], fill_policy: FillPolicyName) -> Self {
        Self {
            name: name.to_string(),
            store_type: BlobStoreType::Group,
            attributes: BlobStoreAttributes {
                group: Some(GroupAttributes {
                    members: members.iter().map(|m| m.to_string()).collect(),
                    fill_policy,
                }),
                ..Default::default()
            },
        }
    }

    pub fn with_quota(mut self, quota_type: QuotaType, limit: u64) -> Self {
        self.attributes.quota = Some(QuotaAttributes { quota_type, limit });
        self
    }

    pub fn with_capacity(mut self, capacity_bytes: u64) -> Self {
        self.attributes.capacity_bytes = Some(capacity_bytes);
        self
    }

    pub fn soft_delete_retention(&self) -> Option<Duration> {
        self.attributes.soft_delete_retention.map(Duration::from_secs)
    }

    pub fn is_group(&self) -> bool {
        self.store_type == BlobStoreType::Group
    }

    /// Checks the configuration of this store in isolation. Cross-store
    /// rules (group membership) are checked by the server config.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("blob store name must not be empty"));
        }
        if self.name.contains('|') {
            return Err(anyhow!(
                "blob store name must not contain '|': {}",
                self.name
            ));
        }
        let attrs = &self.attributes;
        match self.store_type {
            BlobStoreType::File => {
                let file = attrs.file.as_ref().ok_or(anyhow!(
                    "file blob store {} requires a file.path attribute",
                    self.name
                ))?;
                if file.path.is_empty() {
                    return Err(anyhow!("file blob store {} has an empty path", self.name));
                }
            }
            BlobStoreType::S3 => {
                let s3 = attrs.s3.as_ref().ok_or(anyhow!(
                    "s3 blob store {} requires an s3.bucket attribute",
                    self.name
                ))?;
                if s3.bucket.is_empty() {
                    return Err(anyhow!("s3 blob store {} has an empty bucket", self.name));
                }
            }
            BlobStoreType::Memory => {}
            BlobStoreType::Group => {
                let group = attrs.group.as_ref().ok_or(anyhow!(
                    "group blob store {} requires group.members",
                    self.name
                ))?;
                if group.members.is_empty() {
                    return Err(anyhow!("group blob store {} has no members", self.name));
                }
                if group.members.iter().any(|m| m == &self.name) {
                    return Err(anyhow!("group blob store {} contains itself", self.name));
                }
                let mut members = group.members.clone();
                members.sort();
                members.dedup();
                if members.len() != group.members.len() {
                    return Err(anyhow!(
                        "group blob store {} lists a member twice",
                        self.name
                    ));
                }
            }
        }
        if let Some(quota) = &attrs.quota {
            if quota.limit == 0 {
                return Err(anyhow!(
                    "quota limit for blob store {} must be positive",
                    self.name
                ));
            }
        }
        if attrs.soft_delete_retention == Some(0) {
            return Err(anyhow!(
                "soft delete retention for blob store {} must be positive",
                self.name
            ));
        }
        Ok(())
    }
}
