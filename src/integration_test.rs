#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use bytes::Bytes;
    use chrono::Utc;
    use data_model::{
        test_objects::tests::{
            mock_headers,
            TEST_BLOB_STORE,
            TEST_GROUP,
            TEST_MEMBER_A,
            TEST_MEMBER_B,
        },
        BlobStoreConfiguration,
        FillPolicyName,
        OperationType,
        QuotaType,
    };

    use crate::{config::ServerConfig, service::Service, testing::TestService};

    #[tokio::test]
    async fn test_soft_delete_then_sweep() -> Result<()> {
        let test_srv = TestService::new().await?;
        let manager = &test_srv.service.manager;
        let store = manager.get(TEST_BLOB_STORE).unwrap();
        let index = manager.soft_deleted_blob_index(TEST_BLOB_STORE).unwrap();

        let blob = store
            .create(Bytes::from_static(b"hello"), mock_headers("hello.txt"))
            .await?;
        let fetched = store.get(&blob.id).await?.unwrap();
        assert_eq!(fetched.content, Bytes::from_static(b"hello"));
        assert_eq!(store.metrics().blob_count, 1);

        assert!(store.delete(&blob.id, "no longer needed").await?);
        assert!(!store.exists(&blob.id).await?);
        assert!(store.get(&blob.id).await?.is_none());
        let attributes = store.get_blob_attributes(&blob.id).await?.unwrap();
        assert!(attributes.deleted);
        assert_eq!(attributes.deleted_reason.as_deref(), Some("no longer needed"));
        assert_eq!(index.size()?, 1);
        // soft-deleted blobs still count until they are reclaimed
        assert_eq!(store.metrics().total_size, 5);

        // not yet past retention
        let summary = test_srv
            .service
            .reconciler
            .sweep(store.as_ref(), &index, Utc::now() - chrono::Duration::hours(1))
            .await?
            .unwrap();
        assert_eq!(summary.examined, 0);
        assert_eq!(index.size()?, 1);

        let summary = test_srv
            .service
            .reconciler
            .sweep(
                store.as_ref(),
                &index,
                Utc::now() + chrono::Duration::seconds(1),
            )
            .await?
            .unwrap();
        assert_eq!(summary.hard_deleted, 1);
        assert_eq!(index.size()?, 0);
        assert!(store.get_blob_attributes(&blob.id).await?.is_none());
        assert_eq!(store.metrics().blob_count, 0);
        assert_eq!(store.metrics().total_size, 0);

        let operations = store.operation_metrics();
        assert_eq!(operations[&OperationType::Put].successful_requests, 1);
        assert_eq!(operations[&OperationType::Put].blob_size, 5);
        assert_eq!(operations[&OperationType::SoftDelete].successful_requests, 1);
        assert_eq!(operations[&OperationType::Delete].successful_requests, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() -> Result<()> {
        let test_srv = TestService::new().await?;
        let manager = &test_srv.service.manager;
        let store = manager.get(TEST_BLOB_STORE).unwrap();

        let kept = store
            .create(Bytes::from_static(b"kept"), mock_headers("kept"))
            .await?;
        let deleted = store
            .create(Bytes::from_static(b"deleted"), mock_headers("deleted"))
            .await?;
        store.delete(&deleted.id, "test").await?;

        store.stop().await?;
        assert!(store.get(&kept.id).await.is_err());
        store.start().await?;

        assert_eq!(store.metrics().blob_count, 2);
        assert_eq!(store.metrics().total_size, 11);
        assert!(store.exists(&kept.id).await?);
        assert!(!store.exists(&deleted.id).await?);
        let index = manager.soft_deleted_blob_index(TEST_BLOB_STORE).unwrap();
        assert!(index.get_record(&deleted.id)?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_group_places_and_reclaims_across_members() -> Result<()> {
        let test_srv = TestService::new().await?;
        let manager = &test_srv.service.manager;
        let group = manager.get(TEST_GROUP).unwrap();
        let member_a = manager.get(TEST_MEMBER_A).unwrap();
        let member_b = manager.get(TEST_MEMBER_B).unwrap();

        let mut blobs = Vec::new();
        for i in 0..4 {
            blobs.push(
                group
                    .create(Bytes::from(format!("blob-{}", i)), mock_headers("g"))
                    .await?,
            );
        }
        // round robin alternates between the members
        assert_eq!(member_a.metrics().blob_count, 2);
        assert_eq!(member_b.metrics().blob_count, 2);
        assert_eq!(group.metrics().blob_count, 4);
        for blob in &blobs {
            assert!(group.exists(&blob.id).await?);
        }

        for blob in &blobs {
            assert!(group.delete(&blob.id, "cleanup").await?);
        }
        let index_a = manager.soft_deleted_blob_index(TEST_MEMBER_A).unwrap();
        let index_b = manager.soft_deleted_blob_index(TEST_MEMBER_B).unwrap();
        assert_eq!(index_a.size()? + index_b.size()?, 4);

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        for (store, index) in manager.leaf_stores() {
            test_srv
                .service
                .reconciler
                .sweep(store.as_ref(), &index, cutoff)
                .await?;
        }
        assert_eq!(index_a.size()? + index_b.size()?, 0);
        assert_eq!(group.metrics().blob_count, 0);

        // a read-only member is skipped
        member_a.set_writable(false);
        let blob = group
            .create(Bytes::from_static(b"only b"), mock_headers("g"))
            .await?;
        assert!(member_b.exists(&blob.id).await?);
        assert!(!member_a.exists(&blob.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_decommission_store() -> Result<()> {
        let test_srv = TestService::new().await?;
        let manager = &test_srv.service.manager;
        let store = manager.get(TEST_BLOB_STORE).unwrap();
        let index = manager.soft_deleted_blob_index(TEST_BLOB_STORE).unwrap();
        let blob = store
            .create(Bytes::from_static(b"bye"), mock_headers("bye"))
            .await?;
        store.delete(&blob.id, "test").await?;

        manager.remove(TEST_BLOB_STORE).await?;
        assert_eq!(index.size()?, 0);
        assert!(manager.get(TEST_BLOB_STORE).is_none());
        // other stores are untouched
        assert!(manager.get(TEST_MEMBER_A).unwrap().is_started());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_jobs() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let test_srv = TestService::with_config(temp_dir, |config| {
            config.reconciliation.interval = 10;
            config.quota_check_interval = 5;
            config.blob_stores = vec![
                BlobStoreConfiguration::memory(TEST_BLOB_STORE).with_quota(QuotaType::BlobCount, 1)
            ];
        })
        .await?;
        let service = &test_srv.service;
        let store = service.manager.get(TEST_BLOB_STORE).unwrap();
        let index = service
            .manager
            .soft_deleted_blob_index(TEST_BLOB_STORE)
            .unwrap();

        service.start_jobs().await?;
        let checker = service.quota_checker(TEST_BLOB_STORE).await.unwrap();
        assert!(checker.is_started());

        let old = store
            .create(Bytes::from_static(b"old"), mock_headers("old"))
            .await?;
        store
            .create(Bytes::from_static(b"new"), mock_headers("new"))
            .await?;
        store.delete(&old.id, "expired").await?;
        // backdate the record past the default retention
        index.delete_record(&old.id)?;
        index.create_record_at(&old.id, Utc::now() - chrono::Duration::days(2))?;

        tokio::time::sleep(Duration::from_secs(6)).await;
        let result = checker.latest_result().unwrap();
        assert!(result.violation);
        assert_eq!(result.blob_store_name, TEST_BLOB_STORE);

        tokio::time::sleep(Duration::from_secs(5)).await;
        service.reconciler.wait_for_sweep(TEST_BLOB_STORE).await;
        assert_eq!(index.size()?, 0);
        assert!(store.get_blob_attributes(&old.id).await?.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!checker.latest_result().unwrap().violation);

        service.shutdown().await;
        assert!(!checker.is_started());
        assert!(!service.scheduler.is_running());
        assert!(!store.is_started());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_store_stops_its_jobs() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let test_srv = TestService::with_config(temp_dir, |config| {
            config.reconciliation.interval = 10;
            config.quota_check_interval = 5;
            config.blob_stores = vec![
                BlobStoreConfiguration::memory(TEST_BLOB_STORE)
                    .with_quota(QuotaType::BlobCount, 10),
                BlobStoreConfiguration::memory(TEST_MEMBER_A).with_quota(QuotaType::BlobCount, 10),
                BlobStoreConfiguration::memory(TEST_MEMBER_B),
                BlobStoreConfiguration::group(
                    TEST_GROUP,
                    &[TEST_MEMBER_A, TEST_MEMBER_B],
                    FillPolicyName::RoundRobin,
                ),
            ];
        })
        .await?;
        let service = &test_srv.service;
        service.start_jobs().await?;
        let store = service.manager.get(TEST_BLOB_STORE).unwrap();
        let index = service
            .manager
            .soft_deleted_blob_index(TEST_BLOB_STORE)
            .unwrap();
        let checker = service.quota_checker(TEST_BLOB_STORE).await.unwrap();
        assert!(service.has_reconciliation_job(TEST_BLOB_STORE).await);

        let blob = store
            .create(Bytes::from_static(b"bye"), mock_headers("bye"))
            .await?;
        store.delete(&blob.id, "decommission").await?;

        // group members can't be removed on their own, and keep their jobs
        assert!(service.remove_store(TEST_MEMBER_A).await.is_err());
        assert!(service.quota_checker(TEST_MEMBER_A).await.unwrap().is_started());
        assert!(service.has_reconciliation_job(TEST_MEMBER_A).await);
        assert!(service.remove_store("unknown").await.is_err());

        service.remove_store(TEST_BLOB_STORE).await?;
        assert!(!checker.is_started());
        assert!(service.quota_checker(TEST_BLOB_STORE).await.is_none());
        assert!(!service.has_reconciliation_job(TEST_BLOB_STORE).await);
        assert!(service.manager.get(TEST_BLOB_STORE).is_none());
        assert!(!store.is_started());
        assert_eq!(index.size()?, 0);

        // the remaining jobs keep running on schedule
        let result_before = checker.latest_result();
        let member_checker = service.quota_checker(TEST_MEMBER_A).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(service.scheduler.is_running());
        assert!(member_checker.latest_result().is_some());
        assert_eq!(checker.latest_result(), result_before);

        service.shutdown().await;
        assert!(!service.scheduler.is_running());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_quota_config_fails_service_creation() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = ServerConfig {
            state_store_path: temp_dir
                .path()
                .join("state_store")
                .to_string_lossy()
                .to_string(),
            blob_stores: vec![BlobStoreConfiguration::memory(TEST_BLOB_STORE)
                .with_quota(QuotaType::SpaceRemaining, 10)],
            ..Default::default()
        };
        let err = match Service::new(config).await {
            Ok(_) => panic!("service created with an unusable quota"),
            Err(err) => err,
        };
        assert!(format!("{:#}", err).contains("requires capacity_bytes"));
        Ok(())
    }
}
