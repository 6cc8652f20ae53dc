use anyhow::Result;
use data_model::{
    test_objects::tests::{TEST_BLOB_STORE, TEST_GROUP, TEST_MEMBER_A, TEST_MEMBER_B},
    BlobStoreConfiguration,
    FillPolicyName,
};
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ServerConfig, service::Service};

pub struct TestService {
    pub service: Service,
    pub temp_dir: TempDir,
}

impl TestService {
    /// A file store, two memory stores and a round robin group over them.
    pub async fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let blob_stores = vec![
            BlobStoreConfiguration::file(
                TEST_BLOB_STORE,
                &temp_dir.path().join("blobs").to_string_lossy(),
            ),
            BlobStoreConfiguration::memory(TEST_MEMBER_A),
            BlobStoreConfiguration::memory(TEST_MEMBER_B),
            BlobStoreConfiguration::group(
                TEST_GROUP,
                &[TEST_MEMBER_A, TEST_MEMBER_B],
                FillPolicyName::RoundRobin,
            ),
        ];
        Self::with_config(temp_dir, |config| config.blob_stores = blob_stores).await
    }

    pub async fn with_config(
        temp_dir: TempDir,
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let mut cfg = ServerConfig {
            state_store_path: temp_dir
                .path()
                .join("state_store")
                .to_string_lossy()
                .to_string(),
            env: "test".to_string(),
            ..Default::default()
        };
        configure(&mut cfg);
        cfg.validate()?;
        let srv = Service::new(cfg).await?;

        Ok(Self {
            service: srv,
            temp_dir,
        })
    }
}
