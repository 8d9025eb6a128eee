use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{media::MediaResource, preview_link::PreviewLink};
use super::repositories::{media::ResourceDirectory, preview_link::LinkStore};
use crate::store::StoreError;

#[derive(Default)]
struct LinkTable {
    live: HashMap<Uuid, PreviewLink>,
    // id -> creator of links that were deleted or swept
    removed: HashMap<Uuid, String>,
}

impl LinkTable {
    fn remove(&mut self, id: Uuid) -> bool {
        match self.live.remove(&id) {
            Some(link) => {
                self.removed.entry(id).or_insert(link.created_by);
                true
            }
            None => false,
        }
    }
}

/// Process-local link store. Each call holds the lock for its whole
/// read-modify-write, matching a single conditional statement in Postgres.
#[derive(Default)]
pub struct MemoryLinkStore {
    table: Mutex<LinkTable>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn create(&self, link: &PreviewLink) -> Result<(), StoreError> {
        self.lock().live.insert(link.id, link.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<PreviewLink>, StoreError> {
        Ok(self.lock().live.values().find(|l| l.token == token).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PreviewLink>, StoreError> {
        Ok(self.lock().live.get(&id).cloned())
    }

    async fn find_by_creator(&self, creator: &str) -> Result<Vec<PreviewLink>, StoreError> {
        let mut links: Vec<_> = self
            .lock()
            .live
            .values()
            .filter(|l| l.created_by == creator)
            .cloned()
            .collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(links)
    }

    async fn delete(&self, id: Uuid, _now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.lock().remove(id))
    }

    async fn find_removed(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.lock().removed.get(&id).cloned())
    }

    async fn consume_use(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewLink>, StoreError> {
        let mut table = self.lock();
        let Some(link) = table.live.values_mut().find(|l| l.token == token) else {
            return Ok(None);
        };
        if !link.is_consumable(now) {
            return Ok(None);
        }
        link.use_count += 1;
        Ok(Some(link.clone()))
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut table = self.lock();
        let expired: Vec<Uuid> = table
            .live
            .values()
            .filter(|l| l.expires_at.is_some_and(|at| at < now))
            .map(|l| l.id)
            .collect();
        for id in &expired {
            table.remove(*id);
        }
        Ok(expired.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryResourceDirectory {
    resources: Mutex<HashMap<Uuid, MediaResource>>,
}

impl MemoryResourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: MediaResource) {
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource.id, resource);
    }
}

#[async_trait]
impl ResourceDirectory for MemoryResourceDirectory {
    async fn find(&self, resource_id: Uuid) -> Result<Option<MediaResource>, StoreError> {
        Ok(self
            .resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&resource_id)
            .cloned())
    }
}
