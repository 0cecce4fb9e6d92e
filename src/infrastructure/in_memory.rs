use crate::domain::ports::SnapshotStore;
use crate::domain::snapshot::LedgerSnapshot;
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory snapshot store.
///
/// Clones share the same document, so a test can keep a handle and inspect
/// what the ledger persisted. Writes can be made to fail on demand.
#[derive(Default, Clone)]
pub struct InMemorySnapshotStore {
    snapshot: Arc<RwLock<Option<LedgerSnapshot>>>,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemorySnapshotStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.snapshot.try_write() {
            *slot = Some(snapshot);
        }
        store
    }

    pub async fn persisted(&self) -> Option<LedgerSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn read(&self) -> Result<Option<LedgerSnapshot>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn write(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated write failure").into());
        }
        let mut slot = self.snapshot.write().await;
        let persisted = slot.as_ref().map(|s| s.revision);
        if let Some(persisted) = persisted.filter(|&p| p >= snapshot.revision) {
            return Err(MarketError::StaleLedgerError {
                location: "memory".to_string(),
                persisted,
                attempted: snapshot.revision,
            });
        }
        *slot = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::user::{PhoneNumber, User};

    #[tokio::test]
    async fn test_in_memory_snapshot_store() {
        let store = InMemorySnapshotStore::new();
        assert!(store.read().await.unwrap().is_none());

        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .users
            .push(User::new(PhoneNumber::parse("712345678").unwrap()));
        store.write(&snapshot).await.unwrap();

        assert_eq!(store.read().await.unwrap(), Some(snapshot.clone()));
        assert_eq!(store.write_count(), 1);

        let seeded = InMemorySnapshotStore::with_snapshot(snapshot.clone());
        assert_eq!(seeded.persisted().await, Some(snapshot));
    }
}
