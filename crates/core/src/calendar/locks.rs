//! Per-integration async locks

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per integration id, created on first use.
#[derive(Debug, Default)]
pub struct IntegrationLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl IntegrationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock for `id` is free.
    pub async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        self.entry(id).lock_owned().await
    }

    /// Take the lock for `id` only if nobody holds it.
    pub fn try_lock(&self, id: Uuid) -> Option<OwnedMutexGuard<()>> {
        self.entry(id).try_lock_owned().ok()
    }

    fn entry(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_lock_fails_while_held() {
        let locks = IntegrationLocks::new();
        let id = Uuid::now_v7();

        let guard = locks.try_lock(id);
        assert!(guard.is_some());
        assert!(locks.try_lock(id).is_none());
        assert!(locks.try_lock(Uuid::now_v7()).is_some());

        drop(guard);
        assert!(locks.try_lock(id).is_some());
    }
}
