//! Placement of new blobs within a blob store group.

use std::sync::{Arc, Mutex, PoisonError};

use data_model::FillPolicyName;

use crate::BlobStore;

/// Chooses which member of a group receives the next write.
pub trait FillPolicy: Send + Sync {
    fn name(&self) -> FillPolicyName;

    /// Index of the member to write a blob of `size` bytes to, or `None` if
    /// no member is writable with room for it.
    fn choose_member(&self, members: &[Arc<dyn BlobStore>], size: u64) -> Option<usize>;
}

/// Rotates through the members. Unwritable or full members are skipped
/// without resetting the rotation.
#[derive(Default)]
pub struct RoundRobinFillPolicy {
    cursor: Mutex<usize>,
}

impl FillPolicy for RoundRobinFillPolicy {
    fn name(&self) -> FillPolicyName {
        FillPolicyName::RoundRobin
    }

    fn choose_member(&self, members: &[Arc<dyn BlobStore>], size: u64) -> Option<usize> {
        if members.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let start = *cursor % members.len();
        let chosen = (0..members.len())
            .map(|offset| (start + offset) % members.len())
            .find(|&idx| members[idx].has_capacity_for(size))?;
        *cursor = chosen + 1;
        Some(chosen)
    }
}

/// Always the first writable member with room for the blob.
#[derive(Default)]
pub struct WriteToFirstFillPolicy;

impl FillPolicy for WriteToFirstFillPolicy {
    fn name(&self) -> FillPolicyName {
        FillPolicyName::WriteToFirst
    }

    fn choose_member(&self, members: &[Arc<dyn BlobStore>], size: u64) -> Option<usize> {
        members
            .iter()
            .position(|member| member.has_capacity_for(size))
    }
}

pub fn fill_policy_for(name: FillPolicyName) -> Box<dyn FillPolicy> {
    match name {
        FillPolicyName::RoundRobin => Box::new(RoundRobinFillPolicy::default()),
        FillPolicyName::WriteToFirst => Box::new(WriteToFirstFillPolicy),
    }
}

#[cfg(test)]
mod tests {
    use data_model::{
        test_objects::tests::{TEST_MEMBER_A, TEST_MEMBER_B},
        BlobStoreConfiguration,
    };
    use state_store::test_state_store::TestStateStore;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::ObjectBlobStore;

    async fn members(test_state: &TestStateStore, names: &[&str]) -> Vec<Arc<dyn BlobStore>> {
        let configs = names
            .iter()
            .map(|name| BlobStoreConfiguration::memory(name))
            .collect();
        members_from(test_state, configs).await
    }

    async fn members_from(
        test_state: &TestStateStore,
        configs: Vec<BlobStoreConfiguration>,
    ) -> Vec<Arc<dyn BlobStore>> {
        let mut members: Vec<Arc<dyn BlobStore>> = Vec::new();
        for config in configs {
            let store = ObjectBlobStore::from_configuration(
                config,
                &test_state.state,
                std::time::Duration::from_secs(5),
            )
            .unwrap();
            store.start().await.unwrap();
            members.push(Arc::new(store));
        }
        members
    }

    fn choices(policy: &dyn FillPolicy, members: &[Arc<dyn BlobStore>], n: usize) -> Vec<usize> {
        (0..n)
            .map(|_| policy.choose_member(members, 1).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let test_state = TestStateStore::new().unwrap();
        let members = members(&test_state, &[TEST_MEMBER_A, TEST_MEMBER_B]).await;
        let policy = RoundRobinFillPolicy::default();

        assert_eq!(choices(&policy, &members, 4), vec![0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn test_round_robin_skips_unwritable() {
        let test_state = TestStateStore::new().unwrap();
        let members = members(&test_state, &["a", "b", "c"]).await;
        let policy = RoundRobinFillPolicy::default();

        assert_eq!(policy.choose_member(&members, 1), Some(0));
        members[1].set_writable(false);
        assert_eq!(choices(&policy, &members, 3), vec![2, 0, 2]);

        members[1].set_writable(true);
        assert_eq!(choices(&policy, &members, 3), vec![0, 1, 2]);

        for member in &members {
            member.set_writable(false);
        }
        assert_eq!(policy.choose_member(&members, 1), None);
        assert_eq!(policy.choose_member(&[], 1), None);
    }

    #[tokio::test]
    async fn test_write_to_first() {
        let test_state = TestStateStore::new().unwrap();
        let members = members(&test_state, &[TEST_MEMBER_A, TEST_MEMBER_B]).await;
        let policy = WriteToFirstFillPolicy;

        assert_eq!(choices(&policy, &members, 3), vec![0, 0, 0]);
        members[0].set_writable(false);
        assert_eq!(choices(&policy, &members, 2), vec![1, 1]);
        members[0].set_writable(true);
        assert_eq!(policy.choose_member(&members, 1), Some(0));
    }

    #[tokio::test]
    async fn test_policies_skip_members_without_room() {
        let test_state = TestStateStore::new().unwrap();
        let members = members_from(
            &test_state,
            vec![
                BlobStoreConfiguration::memory("small").with_capacity(10),
                BlobStoreConfiguration::memory("large").with_capacity(100),
            ],
        )
        .await;

        assert_eq!(WriteToFirstFillPolicy.choose_member(&members, 10), Some(0));
        assert_eq!(WriteToFirstFillPolicy.choose_member(&members, 20), Some(1));
        assert_eq!(WriteToFirstFillPolicy.choose_member(&members, 101), None);

        let round_robin = RoundRobinFillPolicy::default();
        let chosen: Vec<_> = (0..3)
            .map(|_| round_robin.choose_member(&members, 20).unwrap())
            .collect();
        assert_eq!(chosen, vec![1, 1, 1]);
        assert_eq!(round_robin.choose_member(&members, 5), Some(0));
    }

    #[test]
    fn test_fill_policy_for_every_name() {
        for name in FillPolicyName::iter() {
            assert_eq!(fill_policy_for(name).name(), name);
        }
    }
}
