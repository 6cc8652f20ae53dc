use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use blob_store::{BlobStore, BlobStoreGroup, MeteredBlobStore, ObjectBlobStore};
use dashmap::DashMap;
use data_model::BlobStoreConfiguration;
use processor::SoftDeleteReconciler;
use state_store::{SoftDeletedBlobIndex, StateStore};
use tracing::{info, warn};

#[derive(Clone)]
struct ManagedStore {
    store: Arc<dyn BlobStore>,
    /// Leaf stores only; a group's records live in its members' indexes.
    index: Option<Arc<SoftDeletedBlobIndex>>,
}

/// Owns every configured blob store for the lifetime of the process.
pub struct BlobStoreManager {
    state: Arc<StateStore>,
    reconciler: Arc<SoftDeleteReconciler>,
    io_timeout: Duration,
    stores: DashMap<String, ManagedStore>,
}

impl BlobStoreManager {
    pub fn new(
        state: Arc<StateStore>,
        reconciler: Arc<SoftDeleteReconciler>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            state,
            reconciler,
            io_timeout,
            stores: DashMap::new(),
        }
    }

    /// Builds and starts `configs`, leaf stores before the groups using them.
    pub async fn start_all(&self, configs: &[BlobStoreConfiguration]) -> Result<()> {
        let (groups, leaves): (Vec<_>, Vec<_>) = configs.iter().partition(|c| c.is_group());
        for config in leaves {
            self.add_leaf(config.clone()).await?;
        }
        for config in groups {
            self.add_group(config.clone()).await?;
        }
        Ok(())
    }

    async fn add_leaf(&self, config: BlobStoreConfiguration) -> Result<()> {
        let name = config.name.clone();
        let backend = ObjectBlobStore::from_configuration(config, &self.state, self.io_timeout)
            .with_context(|| format!("building blob store {}", name))?;
        let index = backend.soft_deleted_blob_index();
        let store: Arc<dyn BlobStore> = Arc::new(MeteredBlobStore::new(Arc::new(backend)));
        store
            .start()
            .await
            .with_context(|| format!("starting blob store {}", name))?;
        self.insert(
            name,
            ManagedStore {
                store,
                index: Some(index),
            },
        )
    }

    async fn add_group(&self, config: BlobStoreConfiguration) -> Result<()> {
        let name = config.name.clone();
        let member_names = config
            .attributes
            .group
            .as_ref()
            .map(|group| group.members.clone())
            .unwrap_or_default();
        let members = member_names
            .iter()
            .map(|member| {
                self.get(member)
                    .ok_or_else(|| anyhow!("group {} has unknown member {}", name, member))
            })
            .collect::<Result<Vec<_>>>()?;
        let group = BlobStoreGroup::new(config, members)?;
        let store: Arc<dyn BlobStore> = Arc::new(MeteredBlobStore::new(Arc::new(group)));
        store
            .start()
            .await
            .with_context(|| format!("starting blob store group {}", name))?;
        self.insert(name, ManagedStore { store, index: None })
    }

    fn insert(&self, name: String, managed: ManagedStore) -> Result<()> {
        if self.stores.contains_key(&name) {
            return Err(anyhow!("blob store {} already exists", name));
        }
        self.stores.insert(name, managed);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BlobStore>> {
        self.stores.get(name).map(|managed| managed.store.clone())
    }

    pub fn soft_deleted_blob_index(&self, name: &str) -> Option<Arc<SoftDeletedBlobIndex>> {
        self.stores
            .get(name)
            .and_then(|managed| managed.index.clone())
    }

    pub fn stores(&self) -> Vec<Arc<dyn BlobStore>> {
        self.stores
            .iter()
            .map(|managed| managed.store.clone())
            .collect()
    }

    /// Leaf stores with their soft-delete indexes.
    pub fn leaf_stores(&self) -> Vec<(Arc<dyn BlobStore>, Arc<SoftDeletedBlobIndex>)> {
        self.stores
            .iter()
            .filter_map(|managed| {
                managed
                    .index
                    .clone()
                    .map(|index| (managed.store.clone(), index))
            })
            .collect()
    }

    fn group_containing(&self, name: &str) -> Option<String> {
        self.stores.iter().find_map(|managed| {
            let group = managed.store.configuration().attributes.group.as_ref()?;
            group
                .members
                .iter()
                .any(|member| member == name)
                .then(|| managed.key().clone())
        })
    }

    pub fn ensure_removable(&self, name: &str) -> Result<()> {
        if !self.stores.contains_key(name) {
            return Err(anyhow!("unknown blob store {}", name));
        }
        if let Some(group) = self.group_containing(name) {
            return Err(anyhow!(
                "blob store {} is a member of group {}",
                name,
                group
            ));
        }
        Ok(())
    }

    /// Decommissions a store: stops it and clears its soft-delete index.
    /// Members of a group can't be removed while the group exists.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.ensure_removable(name)?;
        let managed = self
            .stores
            .get(name)
            .map(|managed| managed.clone())
            .ok_or_else(|| anyhow!("unknown blob store {}", name))?;

        self.reconciler.wait_for_sweep(name).await;
        managed.store.stop().await?;
        if let Some(index) = &managed.index {
            let cleared = index.delete_all_records()?;
            info!(blob_store = name, records = cleared, "cleared soft delete index");
        }
        self.stores.remove(name);
        info!(blob_store = name, "removed blob store");
        Ok(())
    }

    /// Stops every store, groups first. In-flight sweeps finish before the
    /// store they work on is stopped.
    pub async fn stop_all(&self) {
        let (groups, leaves): (Vec<_>, Vec<_>) =
            self.stores().into_iter().partition(|store| store.configuration().is_group());
        for store in groups.into_iter().chain(leaves) {
            self.reconciler.wait_for_sweep(store.name()).await;
            if let Err(err) = store.stop().await {
                warn!(blob_store = store.name(), "failed to stop blob store: {}", err);
            }
        }
    }
}
