//! Revocable preview links.
//!
//! A link grants access to one resource without authentication until it
//! expires, runs out of uses, or its owner revokes it. Validity is checked at
//! consumption time. The use-count increment is the same conditional write
//! that grants access. Revoked and swept links leave a tombstone so the
//! owner can repeat a revoke.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use uuid::Uuid;

use crate::database::{LinkStore, MediaResource, PreviewLink, ResourceDirectory};
use crate::error::AppError;
use crate::store::{StoreError, with_timeout};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOptions {
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i32>,
}

/// A granted consumption: the link after its use was counted, and the
/// resource it opens.
#[derive(Debug, Clone)]
pub struct PreviewGrant {
    pub link: PreviewLink,
    pub resource: MediaResource,
}

pub struct PreviewService {
    links: Arc<dyn LinkStore>,
    resources: Arc<dyn ResourceDirectory>,
    timeout: Duration,
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl PreviewService {
    pub fn new(
        links: Arc<dyn LinkStore>,
        resources: Arc<dyn ResourceDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            links,
            resources,
            timeout,
        }
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        with_timeout(self.timeout, fut).await.map_err(|e| {
            tracing::error!(op, error = %e, "preview link store call failed");
            AppError::from(e)
        })
    }

    async fn resource(&self, resource_id: Uuid) -> Result<Option<MediaResource>, AppError> {
        self.call("find_resource", self.resources.find(resource_id))
            .await
    }

    pub async fn create(
        &self,
        resource_id: Uuid,
        creator: &str,
        options: PreviewOptions,
    ) -> Result<PreviewLink, AppError> {
        let now = Utc::now();
        if let Some(max_uses) = options.max_uses {
            if max_uses < 1 {
                return Err(AppError::BadRequest("maxUses must be at least 1".into()));
            }
        }
        if let Some(expires_at) = options.expires_at {
            if expires_at <= now {
                return Err(AppError::BadRequest("expiresAt must be in the future".into()));
            }
        }

        let resource = self
            .resource(resource_id)
            .await?
            .ok_or(AppError::NotFound("resource"))?;
        if resource.owner_id != creator {
            return Err(AppError::Forbidden);
        }

        let link = PreviewLink {
            id: Uuid::new_v4(),
            token: generate_token(),
            resource_id,
            created_by: creator.to_string(),
            expires_at: options.expires_at,
            max_uses: options.max_uses,
            use_count: 0,
            created_at: now,
        };
        self.call("create", self.links.create(&link)).await?;

        tracing::info!(link_id = %link.id, %resource_id, creator, "preview link created");
        Ok(link)
    }

    pub async fn consume(&self, token: &str) -> Result<PreviewGrant, AppError> {
        self.consume_at(token, Utc::now()).await
    }

    pub async fn consume_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<PreviewGrant, AppError> {
        let snapshot = self
            .call("find_by_token", self.links.find_by_token(token))
            .await?
            .ok_or(AppError::NotFound("preview link"))?;
        reject_unusable(&snapshot, now)?;

        // Resolve the resource first so a missing one never spends a use.
        let resource = self
            .resource(snapshot.resource_id)
            .await?
            .ok_or(AppError::NotFound("resource"))?;

        let Some(link) = self
            .call("consume_use", self.links.consume_use(token, now))
            .await?
        else {
            // Lost a race with another consumer, a revocation or the sweeper.
            // The sweeper runs on its own clock, so classify against a fresh one.
            let recheck = Utc::now().max(now);
            let current = self
                .call("find_by_token", self.links.find_by_token(token))
                .await?;
            return Err(match current {
                Some(current) => reject_unusable(&current, recheck)
                    .err()
                    .unwrap_or(AppError::ExhaustedUses),
                None if snapshot.is_expired(recheck) => AppError::Expired,
                None => AppError::NotFound("preview link"),
            });
        };

        tracing::debug!(link_id = %link.id, use_count = link.use_count, "preview link consumed");
        Ok(PreviewGrant { link, resource })
    }

    pub async fn revoke(&self, id: Uuid, owner: &str) -> Result<(), AppError> {
        let Some(link) = self.call("find_by_id", self.links.find_by_id(id)).await? else {
            // Already revoked or swept: a no-op for its creator, unknown to anyone else.
            return match self.call("find_removed", self.links.find_removed(id)).await? {
                Some(creator) if creator == owner => Ok(()),
                _ => Err(AppError::NotFound("preview link")),
            };
        };

        let resource_owner = self
            .resource(link.resource_id)
            .await?
            .map(|r| r.owner_id)
            .unwrap_or_else(|| link.created_by.clone());
        if resource_owner != owner {
            return Err(AppError::Forbidden);
        }

        if self.call("delete", self.links.delete(id, Utc::now())).await? {
            tracing::info!(link_id = %id, owner, "preview link revoked");
        }
        Ok(())
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<PreviewLink>, AppError> {
        self.call("find_by_creator", self.links.find_by_creator(owner))
            .await
    }

    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let deleted = self
            .call("delete_expired_before", self.links.delete_expired_before(now))
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, "swept expired preview links");
        }
        Ok(deleted)
    }
}

fn reject_unusable(link: &PreviewLink, now: DateTime<Utc>) -> Result<(), AppError> {
    if link.is_expired(now) {
        Err(AppError::Expired)
    } else if link.is_exhausted() {
        Err(AppError::ExhaustedUses)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryLinkStore, MemoryResourceDirectory};
    use chrono::Duration as ChronoDuration;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    struct Fixture {
        service: Arc<PreviewService>,
        links: Arc<MemoryLinkStore>,
        resource_id: Uuid,
    }

    fn catalog() -> (Arc<MemoryResourceDirectory>, Uuid) {
        let resources = Arc::new(MemoryResourceDirectory::new());
        let resource_id = Uuid::new_v4();
        resources.insert(MediaResource {
            id: resource_id,
            owner_id: "owner".into(),
            title: "Rough cut".into(),
            content_type: "video/mp4".into(),
            storage_path: "/media/rough-cut.mp4".into(),
        });
        (resources, resource_id)
    }

    fn fixture() -> Fixture {
        let links = Arc::new(MemoryLinkStore::new());
        let (resources, resource_id) = catalog();
        let service = Arc::new(PreviewService::new(
            links.clone(),
            resources,
            std::time::Duration::from_millis(250),
        ));
        Fixture {
            service,
            links,
            resource_id,
        }
    }

    fn limited(max_uses: i32) -> PreviewOptions {
        PreviewOptions {
            expires_at: None,
            max_uses: Some(max_uses),
        }
    }

    #[tokio::test]
    async fn only_the_owner_can_create() {
        let f = fixture();
        let err = f
            .service
            .create(f.resource_id, "intruder", PreviewOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let err = f
            .service
            .create(Uuid::new_v4(), "owner", PreviewOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn tokens_are_long_and_distinct() {
        let f = fixture();
        let a = f.service.create(f.resource_id, "owner", PreviewOptions::default()).await.unwrap();
        let b = f.service.create(f.resource_id, "owner", PreviewOptions::default()).await.unwrap();
        assert_eq!(a.token.len(), 43);
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn single_use_link_is_exhausted_after_first_consume() {
        let f = fixture();
        let link = f.service.create(f.resource_id, "owner", limited(1)).await.unwrap();

        let grant = f.service.consume(&link.token).await.unwrap();
        assert_eq!(grant.resource.id, f.resource_id);
        assert_eq!(grant.link.use_count, 1);

        let err = f.service.consume(&link.token).await.unwrap_err();
        assert!(matches!(err, AppError::ExhaustedUses));
    }

    /// Holds every consumer after its validity snapshot until all of them
    /// have taken one, so they all race on the conditional write.
    struct GatedSnapshots {
        inner: MemoryLinkStore,
        barrier: Barrier,
        gated: usize,
        snapshots: AtomicUsize,
        writes: AtomicUsize,
        lost: AtomicUsize,
    }

    impl GatedSnapshots {
        fn new(gated: usize) -> Self {
            Self {
                inner: MemoryLinkStore::new(),
                barrier: Barrier::new(gated),
                gated,
                snapshots: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                lost: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LinkStore for GatedSnapshots {
        async fn create(&self, link: &PreviewLink) -> Result<(), StoreError> {
            self.inner.create(link).await
        }

        async fn find_by_token(&self, token: &str) -> Result<Option<PreviewLink>, StoreError> {
            let found = self.inner.find_by_token(token).await;
            if self.snapshots.fetch_add(1, Ordering::SeqCst) < self.gated {
                self.barrier.wait().await;
            }
            found
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<PreviewLink>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_creator(&self, creator: &str) -> Result<Vec<PreviewLink>, StoreError> {
            self.inner.find_by_creator(creator).await
        }

        async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.delete(id, now).await
        }

        async fn find_removed(&self, id: Uuid) -> Result<Option<String>, StoreError> {
            self.inner.find_removed(id).await
        }

        async fn consume_use(
            &self,
            token: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<PreviewLink>, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let granted = self.inner.consume_use(token, now).await?;
            if granted.is_none() {
                self.lost.fetch_add(1, Ordering::SeqCst);
            }
            Ok(granted)
        }

        async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_expired_before(now).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_share_the_use_budget() {
        const CONSUMERS: usize = 20;
        let (resources, resource_id) = catalog();
        let links = Arc::new(GatedSnapshots::new(CONSUMERS));
        let service = Arc::new(PreviewService::new(
            links.clone(),
            resources,
            std::time::Duration::from_secs(5),
        ));
        let link = service.create(resource_id, "owner", limited(3)).await.unwrap();

        let attempts = (0..CONSUMERS).map(|_| {
            let service = service.clone();
            let token = link.token.clone();
            tokio::spawn(async move { service.consume(&token).await })
        });
        let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, AppError::ExhaustedUses))
        );
        // Every consumer passed the snapshot check, so the losers were
        // turned away by the conditional write itself.
        assert_eq!(links.writes.load(Ordering::SeqCst), CONSUMERS);
        assert_eq!(links.lost.load(Ordering::SeqCst), CONSUMERS - 3);

        let stored = links.inner.find_by_token(&link.token).await.unwrap().unwrap();
        assert_eq!(stored.use_count, 3);
    }

    #[tokio::test]
    async fn expired_link_is_rejected_even_with_uses_left() {
        let f = fixture();
        let expires_at = Utc::now() + ChronoDuration::minutes(5);
        let link = f
            .service
            .create(
                f.resource_id,
                "owner",
                PreviewOptions {
                    expires_at: Some(expires_at),
                    max_uses: Some(10),
                },
            )
            .await
            .unwrap();

        assert!(f.service.consume_at(&link.token, expires_at).await.is_ok());
        let err = f
            .service
            .consume_at(&link.token, expires_at + ChronoDuration::seconds(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Expired));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let f = fixture();
        let err = f.service.consume("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_resource_does_not_spend_a_use() {
        let f = fixture();
        let link = f.service.create(f.resource_id, "owner", limited(1)).await.unwrap();

        let orphaned = PreviewService::new(
            f.links.clone(),
            Arc::new(MemoryResourceDirectory::new()),
            std::time::Duration::from_millis(250),
        );
        assert!(matches!(
            orphaned.consume(&link.token).await,
            Err(AppError::NotFound("resource"))
        ));

        let stored = f.links.find_by_id(link.id).await.unwrap().unwrap();
        assert_eq!(stored.use_count, 0);
        assert!(f.service.consume(&link.token).await.is_ok());
    }

    #[tokio::test]
    async fn creation_rejects_past_expiry_and_zero_uses() {
        let f = fixture();
        let past = PreviewOptions {
            expires_at: Some(Utc::now() - ChronoDuration::seconds(1)),
            max_uses: None,
        };
        assert!(matches!(
            f.service.create(f.resource_id, "owner", past).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.service.create(f.resource_id, "owner", limited(0)).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn revoke_is_owner_only_and_repeatable() {
        let f = fixture();
        let link = f.service.create(f.resource_id, "owner", PreviewOptions::default()).await.unwrap();

        assert!(matches!(
            f.service.revoke(link.id, "intruder").await,
            Err(AppError::Forbidden)
        ));
        f.service.revoke(link.id, "owner").await.unwrap();
        f.service.revoke(link.id, "owner").await.unwrap();

        assert!(matches!(
            f.service.consume(&link.token).await,
            Err(AppError::NotFound(_))
        ));
        assert!(f.service.list("owner").await.unwrap().is_empty());
        assert!(matches!(
            f.service.revoke(link.id, "intruder").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.service.revoke(Uuid::new_v4(), "owner").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn revoke_stays_repeatable_after_a_sweep() {
        let f = fixture();
        let now = Utc::now();
        let revoked = f.service.create(f.resource_id, "owner", PreviewOptions::default()).await.unwrap();
        let expiring = f
            .service
            .create(
                f.resource_id,
                "owner",
                PreviewOptions {
                    expires_at: Some(now + ChronoDuration::minutes(1)),
                    max_uses: None,
                },
            )
            .await
            .unwrap();

        f.service.revoke(revoked.id, "owner").await.unwrap();
        f.service.sweep_expired_at(now + ChronoDuration::minutes(2)).await.unwrap();

        f.service.revoke(revoked.id, "owner").await.unwrap();
        f.service.revoke(expiring.id, "owner").await.unwrap();
        assert!(matches!(
            f.service.revoke(expiring.id, "intruder").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_links() {
        let f = fixture();
        let now = Utc::now();
        let soon = PreviewOptions {
            expires_at: Some(now + ChronoDuration::minutes(1)),
            max_uses: None,
        };
        let expiring = f.service.create(f.resource_id, "owner", soon).await.unwrap();
        let forever = f.service.create(f.resource_id, "owner", PreviewOptions::default()).await.unwrap();

        let later = now + ChronoDuration::minutes(2);
        assert_eq!(f.service.sweep_expired_at(later).await.unwrap(), 1);
        assert_eq!(f.service.sweep_expired_at(later).await.unwrap(), 0);

        assert!(f.links.find_by_id(expiring.id).await.unwrap().is_none());
        assert_eq!(
            f.links.find_removed(expiring.id).await.unwrap().as_deref(),
            Some("owner")
        );
        assert!(f.links.find_by_id(forever.id).await.unwrap().is_some());
    }

    /// Runs the sweeper between the validity check and the conditional write.
    struct SweepDuringConsume {
        inner: MemoryLinkStore,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl LinkStore for SweepDuringConsume {
        async fn create(&self, link: &PreviewLink) -> Result<(), StoreError> {
            self.inner.create(link).await
        }

        async fn find_by_token(&self, token: &str) -> Result<Option<PreviewLink>, StoreError> {
            self.inner.find_by_token(token).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<PreviewLink>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_creator(&self, creator: &str) -> Result<Vec<PreviewLink>, StoreError> {
            self.inner.find_by_creator(creator).await
        }

        async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.delete(id, now).await
        }

        async fn find_removed(&self, id: Uuid) -> Result<Option<String>, StoreError> {
            self.inner.find_removed(id).await
        }

        async fn consume_use(
            &self,
            token: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<PreviewLink>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete_expired_before(Utc::now()).await?;
            self.inner.consume_use(token, now).await
        }

        async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_expired_before(now).await
        }
    }

    #[tokio::test]
    async fn link_swept_mid_consume_resolves_to_expired() {
        let (resources, resource_id) = catalog();
        let links = Arc::new(SweepDuringConsume {
            inner: MemoryLinkStore::new(),
            delay: std::time::Duration::from_millis(200),
        });
        let service = PreviewService::new(links, resources, std::time::Duration::from_secs(2));

        let link = service
            .create(
                resource_id,
                "owner",
                PreviewOptions {
                    expires_at: Some(Utc::now() + ChronoDuration::milliseconds(50)),
                    max_uses: None,
                },
            )
            .await
            .unwrap();

        let err = service.consume_at(&link.token, link.created_at).await.unwrap_err();
        assert!(matches!(err, AppError::Expired));
    }
}
