use crate::domain::ports::SnapshotStore;
use crate::domain::snapshot::LedgerSnapshot;
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use log::*;
use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persists the ledger as one pretty-printed JSON document.
///
/// Writes go to a temporary file in the target directory which is synced and
/// then renamed over the old document, so readers only ever see a complete file.
/// A write is refused when the document on disk already carries the same or a
/// later revision, which happens when two processes share one ledger file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn read(&self) -> Result<Option<LedgerSnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| MarketError::CorruptStateError {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn write(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let path = self.path.clone();
        let revision = snapshot.revision;
        tokio::task::spawn_blocking(move || {
            check_revision(&path, revision)?;
            write_atomically(&path, &bytes).map_err(MarketError::from)
        })
        .await
        .map_err(|e| MarketError::IoError(io::Error::other(e)))?
    }
}

#[derive(Deserialize)]
struct Revision {
    #[serde(default)]
    revision: u64,
}

fn check_revision(path: &Path, attempted: u64) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let persisted = serde_json::from_slice::<Revision>(&bytes)
        .map_err(|e| MarketError::CorruptStateError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
        .revision;
    if persisted >= attempted {
        warn!(
            "Ledger {} is at revision {persisted}, refusing stale revision {attempted}",
            path.display()
        );
        return Err(MarketError::StaleLedgerError {
            location: path.display().to_string(),
            persisted,
            attempted,
        });
    }
    Ok(())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable.
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{Job, NewJob};
    use crate::domain::money::Amount;
    use crate::domain::review::{Rating, Review};
    use crate::domain::transaction::{Purpose, Transaction};
    use crate::domain::user::{PhoneNumber, User};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn populated_snapshot() -> LedgerSnapshot {
        let client = User::new(PhoneNumber::parse("712345678").unwrap());
        let tasker = User::new(PhoneNumber::parse("798765432").unwrap());
        let mut job = Job::post(
            client.id,
            NewJob {
                title: "Paint fence".to_string(),
                description: "Two coats".to_string(),
                budget: Amount::new(dec!(2500.50)).unwrap(),
                location: "Kilimani".to_string(),
            },
        )
        .unwrap();
        job.assign(tasker.id).unwrap();
        job.complete().unwrap();

        let mut tx = Transaction::initiate(client.id, Amount::new(dec!(100)).unwrap(), Purpose::Job(job.id));
        tx.mark_push_sent("ws_CO_191220191020363925".to_string()).unwrap();
        tx.confirm("NLJ7RT61SV").unwrap();

        let review = Review::new(job.id, tasker.id, client.id, Rating::new(4).unwrap(), "Neat work");
        LedgerSnapshot {
            revision: 1,
            users: vec![client, tasker],
            jobs: vec![job],
            transactions: vec![tx],
            reviews: vec![review],
        }
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data.json"));
        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("data.json"));
        let snapshot = populated_snapshot();

        store.write(&snapshot).await.unwrap();
        let restored = store.read().await.unwrap().unwrap();
        assert_eq!(restored, snapshot);
    }

    #[tokio::test]
    async fn test_rewrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data.json"));
        store.write(&LedgerSnapshot::default()).await.unwrap();
        store.write(&populated_snapshot()).await.unwrap();
        let mut next = populated_snapshot();
        next.revision = 2;
        store.write(&next).await.unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, b"{\"users\": [ {\"id\": ").unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.read().await.unwrap_err();
        assert!(matches!(err, MarketError::CorruptStateError { .. }));
        // The damaged document must still be there for recovery.
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_document_layout_has_four_collections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        JsonFileStore::new(&path).write(&populated_snapshot()).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        for key in ["users", "jobs", "transactions", "reviews"] {
            assert!(raw[key].is_array(), "{key} should be an array");
        }
        assert_eq!(raw["transactions"][0]["status"], "confirmed");
        assert_eq!(raw["users"][0]["phone"], "+254712345678");
    }

    #[tokio::test]
    async fn test_stale_revision_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let first = JsonFileStore::new(&path);
        let second = JsonFileStore::new(&path);

        first.write(&populated_snapshot()).await.unwrap();
        let mut stale = LedgerSnapshot::default();
        stale.revision = 1;
        let err = second.write(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            MarketError::StaleLedgerError {
                persisted: 1,
                attempted: 1,
                ..
            }
        ));

        let kept = first.read().await.unwrap().unwrap();
        assert_eq!(kept.revision, 1);
        assert_eq!(kept.users.len(), 2);
    }
}
