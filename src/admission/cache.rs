use crate::admission::roles::{AuxRole, Role};
use crate::db::{AdmittedUser, AdmittedUserStore, AuxRoleAssignment};
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cached admitted-user lookup
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub user: AdmittedUser,
    pub created_at: Instant,
}

impl CacheEntry {
    pub fn new(user: AdmittedUser) -> Self {
        Self {
            user,
            created_at: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Read-through cache over [`AdmittedUserStore`], plus the role-granting
/// permission policy that depends on it.
///
/// Every write goes through here so the cached entry for that user is
/// invalidated.
pub struct AdmittedUserCache {
    store: AdmittedUserStore,
    owner_id: Option<String>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_size: usize,
}

impl std::fmt::Debug for AdmittedUserCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedUserCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl AdmittedUserCache {
    pub fn new(
        store: AdmittedUserStore,
        owner_id: Option<String>,
        ttl_secs: u64,
        max_size: usize,
    ) -> Self {
        Self {
            store,
            owner_id,
            cache: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
            max_size,
        }
    }

    /// Look up an admitted user, from cache if fresh
    pub async fn get(&self, user_id: &str) -> AppResult<Option<AdmittedUser>> {
        if let Some(entry) = self.cache.get(user_id) {
            if !entry.is_expired(self.ttl) {
                return Ok(Some(entry.user.clone()));
            }
            drop(entry);
            self.cache.remove(user_id);
        }

        let user = self.store.get_user(user_id).await?;
        if let Some(user) = &user {
            self.insert(user.clone());
        }
        Ok(user)
    }

    pub async fn get_aux_roles(&self, user_id: &str) -> AppResult<Vec<AuxRoleAssignment>> {
        self.store.get_aux_roles(user_id).await
    }

    /// Record a newly admitted user with their roles
    pub async fn record_admission(
        &self,
        user_id: &str,
        role: Role,
        aux_roles: &[AuxRole],
    ) -> AppResult<()> {
        self.store.upsert_user(user_id, role).await?;
        for aux in aux_roles {
            self.store.add_aux_role(user_id, *aux).await?;
        }
        self.invalidate(user_id);
        Ok(())
    }

    /// Delete a user from the store and the cache
    pub async fn remove(&self, user_id: &str) -> AppResult<bool> {
        let removed = self.store.delete_user(user_id).await?;
        self.invalidate(user_id);
        Ok(removed)
    }

    pub fn invalidate(&self, user_id: &str) {
        self.cache.remove(user_id);
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    /// Role of a requester that must already be admitted
    async fn requester_role(&self, requester: &str) -> AppResult<Role> {
        self.get(requester)
            .await?
            .map(|u| u.role)
            .ok_or_else(|| AppError::Forbidden(format!("{} is not an admitted user", requester)))
    }

    pub async fn is_moderator(&self, requester: &str) -> AppResult<bool> {
        if self.is_owner(requester) {
            return Ok(true);
        }
        Ok(self.requester_role(requester).await? == Role::Moderator)
    }

    /// Whether `requester` may grant `desired`. Non-moderators may only grant
    /// roles strictly below their own.
    pub async fn is_permitted(&self, requester: &str, desired: Role) -> AppResult<bool> {
        if self.is_owner(requester) {
            return Ok(true);
        }
        let role = self.requester_role(requester).await?;
        Ok(role == Role::Moderator || role > desired)
    }

    fn insert(&self, user: AdmittedUser) {
        if self.cache.len() >= self.max_size {
            self.evict_expired();
        }

        if self.cache.len() >= self.max_size {
            let keys_to_remove: Vec<_> = self
                .cache
                .iter()
                .take((self.max_size / 10).max(1))
                .map(|r| r.key().clone())
                .collect();
            for k in keys_to_remove {
                self.cache.remove(&k);
            }
        }

        self.cache.insert(user.user_id.clone(), CacheEntry::new(user));
    }

    fn evict_expired(&self) {
        let keys_to_remove: Vec<_> = self
            .cache
            .iter()
            .filter(|r| r.value().is_expired(self.ttl))
            .map(|r| r.key().clone())
            .collect();

        if !keys_to_remove.is_empty() {
            debug!("Evicting {} expired admitted-user entries", keys_to_remove.len());
        }
        for key in keys_to_remove {
            self.cache.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_test_db;

    async fn cache(owner: Option<&str>, ttl_secs: u64, max_size: usize) -> AdmittedUserCache {
        let store = AdmittedUserStore::new(setup_test_db().await);
        AdmittedUserCache::new(store, owner.map(String::from), ttl_secs, max_size)
    }

    #[tokio::test]
    async fn test_read_through() {
        let cache = cache(None, 3600, 100).await;
        assert_eq!(cache.get("u1").await.unwrap(), None);
        assert!(cache.is_empty());

        cache.record_admission("u1", Role::Member, &[]).await.unwrap();
        let user = cache.get("u1").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Member);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_record_admission_invalidates() {
        let cache = cache(None, 3600, 100).await;
        cache.record_admission("u1", Role::Guest, &[]).await.unwrap();
        assert_eq!(cache.get("u1").await.unwrap().unwrap().role, Role::Guest);

        cache
            .record_admission("u1", Role::Member, &[AuxRole::Irl])
            .await
            .unwrap();
        assert_eq!(cache.get("u1").await.unwrap().unwrap().role, Role::Member);
        assert_eq!(cache.get_aux_roles("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_invalidates() {
        let cache = cache(None, 3600, 100).await;
        cache.record_admission("u1", Role::Member, &[]).await.unwrap();
        cache.get("u1").await.unwrap();

        assert!(cache.remove("u1").await.unwrap());
        assert_eq!(cache.get("u1").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_eviction_at_capacity() {
        let cache = cache(None, 3600, 10).await;
        for i in 0..15 {
            let id = format!("u{}", i);
            cache.record_admission(&id, Role::Guest, &[]).await.unwrap();
            cache.get(&id).await.unwrap();
        }
        assert!(cache.len() <= 10);
    }

    #[tokio::test]
    async fn test_expired_entries() {
        let cache = cache(None, 0, 100).await;
        cache.record_admission("u1", Role::Guest, &[]).await.unwrap();
        cache.get("u1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(cache.len(), 1);
        cache.evict_expired();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_permissions() {
        let cache = cache(Some("owner"), 3600, 100).await;
        cache.record_admission("mod", Role::Moderator, &[]).await.unwrap();
        cache.record_admission("member", Role::Member, &[]).await.unwrap();
        cache.record_admission("guest", Role::Guest, &[]).await.unwrap();

        assert!(cache.is_permitted("owner", Role::Moderator).await.unwrap());
        assert!(cache.is_permitted("mod", Role::Moderator).await.unwrap());
        assert!(cache.is_permitted("member", Role::Guest).await.unwrap());
        assert!(!cache.is_permitted("member", Role::Member).await.unwrap());
        assert!(!cache.is_permitted("guest", Role::Guest).await.unwrap());

        assert!(cache.is_moderator("owner").await.unwrap());
        assert!(cache.is_moderator("mod").await.unwrap());
        assert!(!cache.is_moderator("member").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_requester_forbidden() {
        let cache = cache(None, 3600, 100).await;
        assert!(matches!(
            cache.is_permitted("stranger", Role::Guest).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
