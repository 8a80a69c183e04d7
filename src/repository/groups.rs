//! Group repository: profiles, membership and join codes.
//!
//! Membership rows are the only record of group size. A user's groups are
//! found through the index (`USER#<id>` / `GROUP#...`), a group's members
//! through the base table.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Limits;
use crate::model::{attr, Entity, Group, GroupCode, Membership};
use crate::storage::{keys, query_all, Condition, Key, Query, Store, Update};

use super::{RepositoryError, Result};

/// Characters used in join codes. Excludes look-alikes (0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Source of candidate join codes.
pub type CodeGenerator = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// Random join code of `length` characters.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Repository for groups.
pub struct GroupRepository {
    store: Arc<dyn Store>,
    limits: Limits,
    codes: CodeGenerator,
}

impl GroupRepository {
    pub fn new(store: Arc<dyn Store>, limits: Limits) -> Self {
        Self {
            store,
            limits,
            codes: Arc::new(generate_code),
        }
    }

    /// Replace the code generator.
    pub fn with_code_generator(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    /// Create a group owned by `owner_id`, with the owner as first member and a fresh code.
    pub async fn create(&self, owner_id: &str, name: &str) -> Result<(Group, String)> {
        self.check_group_limit(owner_id).await?;

        let now = Utc::now();
        let group = Group {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            created_at: now,
        };
        self.store
            .put(group.to_item()?, Some(Condition::NotExists))
            .await?;

        let membership = Membership {
            group_id: group.id.clone(),
            user_id: owner_id.to_string(),
            joined_at: now,
        };
        self.store.put(membership.to_item()?, None).await?;

        let code = match self.assign_code(&group.id).await {
            Ok(code) => code,
            Err(e) => {
                warn!(group_id = %group.id, error = %e, "Rolling back group without a code");
                if let Err(cleanup) = self
                    .store
                    .delete(&Key::membership(&group.id, owner_id), None)
                    .await
                {
                    warn!(group_id = %group.id, error = %cleanup, "Could not remove owner membership");
                }
                if let Err(cleanup) = self.store.delete(&group.key(), None).await {
                    warn!(group_id = %group.id, error = %cleanup, "Could not remove group profile");
                }
                return Err(e);
            }
        };
        info!(group_id = %group.id, owner_id = %owner_id, "Created group");
        Ok((group, code))
    }

    pub async fn get(&self, group_id: &str) -> Result<Option<Group>> {
        match self.store.get(&Key::group_profile(group_id)).await? {
            Some(item) => Ok(Some(Group::from_item(&item)?)),
            None => Ok(None),
        }
    }

    /// Current join code of a group.
    pub async fn code(&self, group_id: &str) -> Result<Option<String>> {
        match self.store.get(&Key::group_code(group_id)).await? {
            Some(item) => Ok(Some(GroupCode::from_item(&item)?.code)),
            None => Ok(None),
        }
    }

    /// Members of a group, oldest first.
    pub async fn members(&self, group_id: &str) -> Result<Vec<Membership>> {
        let items = query_all(
            self.store.as_ref(),
            Query::table(keys::group(group_id)).begins_with(keys::USER_PREFIX),
        )
        .await?;
        let mut members = items
            .iter()
            .map(Membership::from_item)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(members)
    }

    /// Ids of the groups a user belongs to.
    pub async fn groups_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let items = query_all(
            self.store.as_ref(),
            Query::index(keys::user(user_id)).begins_with(keys::GROUP_PREFIX),
        )
        .await?;
        Ok(items
            .iter()
            .filter_map(|item| keys::strip(&item.key.pk, keys::GROUP_PREFIX))
            .map(str::to_string)
            .collect())
    }

    /// Group id currently using `code`.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<String>> {
        let page = self
            .store
            .query(Query::index(keys::code(code)).limit(1))
            .await?;
        match page.items.first() {
            Some(item) => Ok(Some(GroupCode::from_item(item)?.group_id)),
            None => Ok(None),
        }
    }

    /// Join the group using `code`. Joining a group twice is a no-op.
    pub async fn join(&self, code: &str, user_id: &str) -> Result<Group> {
        let group_id = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| RepositoryError::UnknownCode(code.to_string()))?;
        let group = self
            .get(&group_id)
            .await?
            .ok_or_else(|| RepositoryError::GroupMissing(group_id.clone()))?;

        if self.is_member(&group_id, user_id).await? {
            debug!(group_id = %group_id, user_id = %user_id, "Already a member");
            return Ok(group);
        }
        self.check_group_limit(user_id).await?;

        let membership = Membership {
            group_id: group_id.clone(),
            user_id: user_id.to_string(),
            joined_at: Utc::now(),
        };
        match self
            .store
            .put(membership.to_item()?, Some(Condition::NotExists))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e.into()),
        }
        info!(group_id = %group_id, user_id = %user_id, "Joined group");
        Ok(group)
    }

    /// Leave a group.
    ///
    /// An owner leaving hands the group to the longest-standing remaining
    /// member. The last member leaving deletes the group and its code.
    pub async fn leave(&self, group_id: &str, user_id: &str) -> Result<()> {
        let group = self
            .get(group_id)
            .await?
            .ok_or_else(|| RepositoryError::GroupMissing(group_id.to_string()))?;
        if !self.is_member(group_id, user_id).await? {
            return Err(self.not_member(group_id, user_id));
        }

        self.store
            .delete(&Key::membership(group_id, user_id), None)
            .await?;

        let remaining = self.members(group_id).await?;
        match remaining.first() {
            None => {
                let code = self.code(group_id).await?;
                self.store.delete(&Key::group_code(group_id), None).await?;
                if let Some(code) = code {
                    self.release_code(&code, group_id).await;
                }
                self.store
                    .delete(&Key::group_profile(group_id), None)
                    .await?;
                info!(group_id = %group_id, "Deleted empty group");
            }
            Some(successor) if group.owner_id == user_id => {
                self.set_owner(group_id, user_id, &successor.user_id)
                    .await?;
                info!(
                    group_id = %group_id,
                    from = %user_id,
                    to = %successor.user_id,
                    "Handed over ownership"
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Transfer ownership from the current owner to another member.
    pub async fn transfer_ownership(&self, group_id: &str, from: &str, to: &str) -> Result<()> {
        if !self.is_member(group_id, to).await? {
            return Err(self.not_member(group_id, to));
        }
        self.set_owner(group_id, from, to).await
    }

    /// Replace a group's code with a fresh unused one.
    pub async fn regenerate_code(&self, group_id: &str) -> Result<String> {
        if self.get(group_id).await?.is_none() {
            return Err(RepositoryError::GroupMissing(group_id.to_string()));
        }
        self.assign_code(group_id).await
    }

    /// Claim an unused code and point the group at it.
    ///
    /// Each attempt reserves `CODE#<code>` conditionally, so two groups can
    /// never hold the same code; a taken code uses up the attempt. The
    /// group's previous code is released once the new one is in place.
    async fn assign_code(&self, group_id: &str) -> Result<String> {
        let previous = self.code(group_id).await?;
        let attempts = self.limits.code_attempts.max(1);
        for attempt in 1..=attempts {
            let entry = GroupCode {
                group_id: group_id.to_string(),
                code: (self.codes)(self.limits.code_length),
            };
            match self
                .store
                .put(entry.reservation()?, Some(Condition::NotExists))
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    warn!(group_id = %group_id, attempt, "Group code already in use");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if let Err(e) = self.store.put(entry.to_item()?, None).await {
                self.release_code(&entry.code, group_id).await;
                return Err(e.into());
            }
            if let Some(old) = previous.as_deref().filter(|old| *old != entry.code) {
                self.release_code(old, group_id).await;
            }
            debug!(group_id = %group_id, "Assigned group code");
            return Ok(entry.code);
        }
        Err(RepositoryError::CodeExhausted { attempts })
    }

    /// Drop the reservation for `code` if `group_id` still holds it.
    async fn release_code(&self, code: &str, group_id: &str) {
        let held = Condition::attribute_equals(attr::GROUP_ID, group_id);
        match self
            .store
            .delete(&Key::code_reservation(code), Some(held))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!(group_id = %group_id, code = %code, "Code reserved by another group");
            }
            Err(e) => {
                warn!(group_id = %group_id, code = %code, error = %e, "Could not release group code");
            }
        }
    }

    async fn set_owner(&self, group_id: &str, from: &str, to: &str) -> Result<()> {
        let update = Update::new()
            .set(attr::OWNER_ID, to)
            .when(Condition::Exists.and(Condition::attribute_equals(attr::OWNER_ID, from)));
        match self.store.update(&Key::group_profile(group_id), update).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(RepositoryError::NotOwner {
                group_id: group_id.to_string(),
                user_id: from.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&Key::membership(group_id, user_id))
            .await?
            .is_some())
    }

    async fn check_group_limit(&self, user_id: &str) -> Result<()> {
        let count = self.groups_for_user(user_id).await?.len();
        if count >= self.limits.max_groups {
            return Err(RepositoryError::GroupLimit {
                user_id: user_id.to_string(),
                limit: self.limits.max_groups,
            });
        }
        Ok(())
    }

    fn not_member(&self, group_id: &str, user_id: &str) -> RepositoryError {
        RepositoryError::NotMember {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::{Item, MemoryStore, Page, StorageError};

    /// Yields before every call so concurrent operations interleave.
    struct InterleavingStore(MemoryStore);

    #[async_trait]
    impl Store for InterleavingStore {
        async fn put(
            &self,
            item: Item,
            condition: Option<Condition>,
        ) -> std::result::Result<(), StorageError> {
            tokio::task::yield_now().await;
            self.0.put(item, condition).await
        }

        async fn get(&self, key: &Key) -> std::result::Result<Option<Item>, StorageError> {
            tokio::task::yield_now().await;
            self.0.get(key).await
        }

        async fn query(&self, query: Query) -> std::result::Result<Page, StorageError> {
            tokio::task::yield_now().await;
            self.0.query(query).await
        }

        async fn update(&self, key: &Key, update: Update) -> std::result::Result<Item, StorageError> {
            tokio::task::yield_now().await;
            self.0.update(key, update).await
        }

        async fn delete(
            &self,
            key: &Key,
            condition: Option<Condition>,
        ) -> std::result::Result<(), StorageError> {
            tokio::task::yield_now().await;
            self.0.delete(key, condition).await
        }
    }

    fn repo() -> GroupRepository {
        GroupRepository::new(Arc::new(MemoryStore::new()), Limits::default())
    }

    #[test]
    fn test_generate_code_uses_alphabet() {
        let code = generate_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_create_adds_owner_and_code() {
        let groups = repo();
        let (group, code) = groups.create("u1", "Night Owls").await.unwrap();

        assert_eq!(group.owner_id, "u1");
        let members = groups.members(&group.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "u1");
        assert_eq!(groups.find_by_code(&code).await.unwrap(), Some(group.id.clone()));
        assert_eq!(groups.groups_for_user("u1").await.unwrap(), vec![group.id]);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let groups = repo();
        let (group, code) = groups.create("u1", "Night Owls").await.unwrap();

        groups.join(&code, "u2").await.unwrap();
        groups.join(&code, "u2").await.unwrap();
        assert_eq!(groups.members(&group.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let err = repo().join("ZZZZZZ", "u2").await.unwrap_err();
        assert!(matches!(err, RepositoryError::UnknownCode(_)));
    }

    #[tokio::test]
    async fn test_group_limit() {
        let limits = Limits {
            max_groups: 2,
            ..Default::default()
        };
        let groups = GroupRepository::new(Arc::new(MemoryStore::new()), limits);
        groups.create("u1", "a").await.unwrap();
        let (_, code) = groups.create("u2", "b").await.unwrap();
        groups.join(&code, "u1").await.unwrap();

        let err = groups.create("u1", "c").await.unwrap_err();
        assert!(matches!(err, RepositoryError::GroupLimit { limit: 2, .. }));
    }

    #[tokio::test]
    async fn test_owner_leaving_hands_over_to_oldest_member() {
        let groups = repo();
        let (group, code) = groups.create("u1", "Night Owls").await.unwrap();
        groups.join(&code, "u2").await.unwrap();
        groups.join(&code, "u3").await.unwrap();

        groups.leave(&group.id, "u1").await.unwrap();
        let group = groups.get(&group.id).await.unwrap().unwrap();
        assert_eq!(group.owner_id, "u2");
        assert_eq!(groups.members(&group.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_last_member_leaving_deletes_group() {
        let groups = repo();
        let (group, code) = groups.create("u1", "Night Owls").await.unwrap();
        groups.leave(&group.id, "u1").await.unwrap();

        assert!(groups.get(&group.id).await.unwrap().is_none());
        assert!(groups.find_by_code(&code).await.unwrap().is_none());
        assert!(groups.groups_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_requires_membership() {
        let groups = repo();
        let (group, _) = groups.create("u1", "Night Owls").await.unwrap();
        let err = groups.leave(&group.id, "u9").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotMember { .. }));
    }

    #[tokio::test]
    async fn test_transfer_ownership() {
        let groups = repo();
        let (group, code) = groups.create("u1", "Night Owls").await.unwrap();

        let err = groups
            .transfer_ownership(&group.id, "u1", "u2")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotMember { .. }));

        groups.join(&code, "u2").await.unwrap();
        groups
            .transfer_ownership(&group.id, "u1", "u2")
            .await
            .unwrap();
        assert_eq!(groups.get(&group.id).await.unwrap().unwrap().owner_id, "u2");

        let err = groups
            .transfer_ownership(&group.id, "u1", "u2")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_regenerate_code_replaces_old_code() {
        let groups = repo();
        let (group, old) = groups.create("u1", "Night Owls").await.unwrap();
        let new = groups.regenerate_code(&group.id).await.unwrap();

        assert_eq!(groups.code(&group.id).await.unwrap(), Some(new.clone()));
        assert_eq!(groups.find_by_code(&new).await.unwrap(), Some(group.id));
        if old != new {
            assert!(groups.find_by_code(&old).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_code_exhaustion() {
        let fixed: CodeGenerator = Arc::new(|_| "SAME01".to_string());
        let limits = Limits {
            code_attempts: 3,
            ..Default::default()
        };
        let groups = GroupRepository::new(Arc::new(MemoryStore::new()), limits)
            .with_code_generator(fixed);

        groups.create("u1", "first").await.unwrap();
        let err = groups.create("u2", "second").await.unwrap_err();
        assert!(matches!(err, RepositoryError::CodeExhausted { attempts: 3 }));
        assert!(groups.groups_for_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_code_collision_retries() {
        let queue = Arc::new(Mutex::new(vec!["BBBBBB", "AAAAAA", "AAAAAA"]));
        let generator: CodeGenerator = {
            let queue = queue.clone();
            Arc::new(move |_| queue.lock().unwrap().pop().unwrap_or("CCCCCC").to_string())
        };
        let groups = GroupRepository::new(Arc::new(MemoryStore::new()), Limits::default())
            .with_code_generator(generator);

        let (_, first) = groups.create("u1", "first").await.unwrap();
        let (_, second) = groups.create("u2", "second").await.unwrap();
        assert_eq!(first, "AAAAAA");
        assert_eq!(second, "BBBBBB");
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_share_a_code() {
        let store: Arc<dyn Store> = Arc::new(InterleavingStore(MemoryStore::new()));
        let fixed: CodeGenerator = Arc::new(|_| "AAAAAA".to_string());
        let a = GroupRepository::new(store.clone(), Limits::default())
            .with_code_generator(fixed.clone());
        let b = GroupRepository::new(store.clone(), Limits::default()).with_code_generator(fixed);

        let (first, second) = tokio::join!(a.create("u1", "A"), b.create("u2", "B"));
        let created: Vec<_> = [first, second].into_iter().filter_map(|r| r.ok()).collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].1, "AAAAAA");

        let holders = store
            .query(Query::index(keys::code("AAAAAA")))
            .await
            .unwrap()
            .items;
        assert_eq!(holders.len(), 1);
        assert_eq!(
            a.find_by_code("AAAAAA").await.unwrap(),
            Some(created[0].0.id.clone())
        );
    }

    #[tokio::test]
    async fn test_regenerated_code_frees_the_old_one() {
        let queue = Arc::new(Mutex::new(vec!["AAAAAA", "BBBBBB", "AAAAAA"]));
        let generator: CodeGenerator = {
            let queue = queue.clone();
            Arc::new(move |_| queue.lock().unwrap().pop().unwrap_or("CCCCCC").to_string())
        };
        let groups = GroupRepository::new(Arc::new(MemoryStore::new()), Limits::default())
            .with_code_generator(generator);

        let (first, code) = groups.create("u1", "first").await.unwrap();
        assert_eq!(code, "AAAAAA");
        assert_eq!(groups.regenerate_code(&first.id).await.unwrap(), "BBBBBB");

        let (second, code) = groups.create("u2", "second").await.unwrap();
        assert_eq!(code, "AAAAAA");
        assert_eq!(groups.find_by_code("AAAAAA").await.unwrap(), Some(second.id));
    }

    #[tokio::test]
    async fn test_deleted_group_frees_its_code() {
        let store = Arc::new(MemoryStore::new());
        let fixed: CodeGenerator = Arc::new(|_| "AAAAAA".to_string());
        let groups =
            GroupRepository::new(store.clone(), Limits::default()).with_code_generator(fixed);

        let (group, _) = groups.create("u1", "first").await.unwrap();
        groups.leave(&group.id, "u1").await.unwrap();
        assert!(store
            .get(&Key::code_reservation("AAAAAA"))
            .await
            .unwrap()
            .is_none());

        let (_, code) = groups.create("u2", "second").await.unwrap();
        assert_eq!(code, "AAAAAA");
    }
}
