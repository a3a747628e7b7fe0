use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::dashboard::{DashboardCacheStore, DashboardRefreshQueue, DashboardSnapshot};
use crate::error::OrchestratorResult;

#[derive(Default)]
pub struct MemoryDashboardCacheStore {
    rows: Arc<RwLock<HashMap<Uuid, DashboardSnapshot>>>,
}

impl MemoryDashboardCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DashboardCacheStore for MemoryDashboardCacheStore {
    async fn get(&self, user_id: Uuid) -> OrchestratorResult<Option<DashboardSnapshot>> {
        Ok(self.rows.read().get(&user_id).cloned())
    }

    async fn put(&self, snapshot: DashboardSnapshot) -> OrchestratorResult<()> {
        self.rows.write().insert(snapshot.user_id, snapshot);
        Ok(())
    }
}

/// One row per user is sufficient: `enqueue` on an already-pending
/// user is a no-op, backed by a `HashSet` rather than a growing list.
#[derive(Default)]
pub struct MemoryDashboardRefreshQueue {
    pending: Arc<RwLock<HashSet<Uuid>>>,
}

impl MemoryDashboardRefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DashboardRefreshQueue for MemoryDashboardRefreshQueue {
    async fn enqueue(&self, user_id: Uuid) -> OrchestratorResult<()> {
        self.pending.write().insert(user_id);
        Ok(())
    }

    async fn claim_batch(&self, batch_size: usize) -> OrchestratorResult<Vec<Uuid>> {
        let mut pending = self.pending.write();
        let claimed: Vec<Uuid> = pending.iter().take(batch_size).copied().collect();
        for id in &claimed {
            pending.remove(id);
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_is_idempotent_per_user() {
        let queue = MemoryDashboardRefreshQueue::new();
        let user = Uuid::new_v4();
        queue.enqueue(user).await.unwrap();
        queue.enqueue(user).await.unwrap();
        assert_eq!(queue.claim_batch(10).await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn claim_removes_from_pending() {
        let queue = MemoryDashboardRefreshQueue::new();
        let user = Uuid::new_v4();
        queue.enqueue(user).await.unwrap();
        queue.claim_batch(10).await.unwrap();
        assert!(queue.claim_batch(10).await.unwrap().is_empty());
    }
}
