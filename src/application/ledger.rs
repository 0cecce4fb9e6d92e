use crate::domain::ports::SnapshotStoreBox;
use crate::domain::snapshot::{Entity, LedgerSnapshot};
use crate::error::Result;
use log::*;
use tokio::sync::Mutex;

/// Single owner of the marketplace state.
///
/// Every mutation runs against a working copy of the whole snapshot, is
/// persisted through the backing [`SnapshotStore`](crate::domain::ports::SnapshotStore),
/// and only then becomes visible. Writers are serialized by one lock; it is
/// never held across anything but the store reads and writes.
///
/// Before each commit the ledger adopts any newer revision another process
/// persisted, so the mutation applies on top of it. A commit that still loses
/// the race is refused by the store with `StaleLedgerError`.
pub struct Ledger {
    store: SnapshotStoreBox,
    state: Mutex<LedgerSnapshot>,
}

impl Ledger {
    /// Opens the ledger on top of `store`, starting empty if nothing was persisted.
    ///
    /// A store that holds unreadable data fails here with `CorruptStateError`;
    /// it is never silently replaced by an empty ledger.
    pub async fn open(store: SnapshotStoreBox) -> Result<Self> {
        let snapshot = store.read().await?.unwrap_or_default();
        info!(
            "Ledger opened: {} users, {} jobs, {} transactions, {} reviews",
            snapshot.users.len(),
            snapshot.jobs.len(),
            snapshot.transactions.len(),
            snapshot.reviews.len()
        );
        Ok(Self {
            store,
            state: Mutex::new(snapshot),
        })
    }

    /// Reads the persisted document straight from the store.
    pub async fn load(&self) -> Result<LedgerSnapshot> {
        Ok(self.store.read().await?.unwrap_or_default())
    }

    /// Read-only copy of the committed state.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().await.clone()
    }

    /// Like [`snapshot`](Self::snapshot), after adopting any revision
    /// another process committed since ours.
    pub async fn refresh(&self) -> Result<LedgerSnapshot> {
        let mut state = self.state.lock().await;
        self.catch_up(&mut state).await?;
        Ok(state.clone())
    }

    async fn catch_up(&self, state: &mut LedgerSnapshot) -> Result<()> {
        let newer = self
            .store
            .read()
            .await?
            .filter(|latest| latest.revision > state.revision);
        if let Some(latest) = newer {
            info!(
                "Ledger moved from revision {} to {} in another process, reloading",
                state.revision, latest.revision
            );
            *state = latest;
        }
        Ok(())
    }

    pub async fn get<E: Entity>(&self, id: E::Id) -> Result<E> {
        self.state.lock().await.get::<E>(id).cloned()
    }

    /// Applies `f` to a working copy and commits it in one durable write.
    ///
    /// If `f` or the write fails, the committed state is untouched. A working
    /// copy that ends up identical to the committed one is not rewritten.
    pub async fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerSnapshot) -> Result<T> + Send,
        T: Send,
    {
        let mut state = self.state.lock().await;
        self.catch_up(&mut state).await?;
        let mut working = state.clone();
        let value = f(&mut working)?;
        if working != *state {
            working.revision = state.revision + 1;
            if let Err(e) = self.store.write(&working).await {
                error!("Ledger commit failed, keeping previous state: {e}");
                return Err(e);
            }
            *state = working;
            trace!("Ledger commit persisted");
        }
        Ok(value)
    }

    pub async fn append<E: Entity>(&self, record: E) -> Result<E::Id> {
        let id = self.transact(move |snapshot| snapshot.insert(record)).await?;
        debug!("Appended {} {id}", E::KIND);
        Ok(id)
    }

    /// Mutates one record in place and returns its committed value.
    pub async fn update<E, F>(&self, id: E::Id, mutator: F) -> Result<E>
    where
        E: Entity,
        F: FnOnce(&mut E) -> Result<()> + Send,
    {
        self.transact(move |snapshot| {
            let record = snapshot.get_mut::<E>(id)?;
            mutator(record)?;
            Ok(record.clone())
        })
        .await
    }
}
