use std::{collections::HashMap, env, fmt::Debug, time::Duration};

use anyhow::{anyhow, Context, Result};
use blob_store::BlobStoreQuotaService;
use data_model::BlobStoreConfiguration;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default)]
    pub enable_tracing: bool,
    /// OTLP collector endpoint, defaults to the exporter's own default.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Seconds between metric exports.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            enable_tracing: false,
            endpoint: None,
            metrics_interval: default_metrics_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Seconds between sweeps of each store.
    #[serde(default = "default_reconciliation_interval")]
    pub interval: u64,
    /// Seconds a soft-deleted blob is kept before it is hard deleted.
    #[serde(default = "default_retention")]
    pub retention: u64,
}

fn default_reconciliation_interval() -> u64 {
    3600
}

fn default_retention() -> u64 {
    86400
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: default_reconciliation_interval(),
            retention: default_retention(),
        }
    }
}

fn default_io_timeout() -> u64 {
    30
}

fn default_quota_check_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub state_store_path: String,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub structured_logging: bool,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Seconds before a backend call fails with a timeout.
    #[serde(default = "default_io_timeout")]
    pub io_timeout: u64,
    /// Seconds between quota checks of each store.
    #[serde(default = "default_quota_check_interval")]
    pub quota_check_interval: u64,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub blob_stores: Vec<BlobStoreConfiguration>,
}

fn default_env() -> String {
    "local".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        let storage = env::current_dir()
            .unwrap_or_else(|_| env::temp_dir())
            .join("blobvault_storage");
        ServerConfig {
            state_store_path: storage.join("state").to_string_lossy().to_string(),
            env: default_env(),
            instance_id: None,
            structured_logging: false,
            telemetry: TelemetryConfig::default(),
            io_timeout: default_io_timeout(),
            quota_check_interval: default_quota_check_interval(),
            reconciliation: ReconciliationConfig::default(),
            blob_stores: vec![BlobStoreConfiguration::file(
                "default",
                &storage.join("blobs").to_string_lossy(),
            )],
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str =
            std::fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn structured_logging(&self) -> bool {
        self.structured_logging
    }

    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-blobvault", self.env))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout)
    }

    pub fn quota_check_interval(&self) -> Duration {
        Duration::from_secs(self.quota_check_interval)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.interval)
    }

    /// Retention of `store`, falling back to the global one.
    pub fn retention_for(&self, store: &BlobStoreConfiguration) -> Duration {
        store
            .soft_delete_retention()
            .unwrap_or(Duration::from_secs(self.reconciliation.retention))
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_timeout == 0 {
            return Err(anyhow!("io_timeout must be positive"));
        }
        if self.quota_check_interval == 0 {
            return Err(anyhow!("quota_check_interval must be positive"));
        }
        if self.reconciliation.interval == 0 {
            return Err(anyhow!("reconciliation interval must be positive"));
        }

        let mut stores = HashMap::new();
        for store in &self.blob_stores {
            store
                .validate()
                .with_context(|| format!("invalid blob store {}", store.name))?;
            BlobStoreQuotaService::validate_quota_config(store)?;
            if stores.insert(store.name.as_str(), store).is_some() {
                return Err(anyhow!("duplicate blob store name {}", store.name));
            }
        }

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for group in self.blob_stores.iter().filter(|store| store.is_group()) {
            let Some(attributes) = &group.attributes.group else {
                continue;
            };
            for member in &attributes.members {
                match stores.get(member.as_str()) {
                    None => {
                        return Err(anyhow!(
                            "group {} has unknown member {}",
                            group.name,
                            member
                        ))
                    }
                    Some(store) if store.is_group() => {
                        return Err(anyhow!(
                            "group {} can't contain group {}",
                            group.name,
                            member
                        ))
                    }
                    Some(_) => {}
                }
                if let Some(owner) = owners.insert(member.as_str(), group.name.as_str()) {
                    return Err(anyhow!(
                        "blob store {} is a member of both {} and {}",
                        member,
                        owner,
                        group.name
                    ));
                }
            }
        }
        Ok(())
    }
}
