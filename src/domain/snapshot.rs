use super::ids::{EntityKind, JobId, ReviewId, TransactionId, UserId};
use super::job::Job;
use super::review::Review;
use super::transaction::Transaction;
use super::user::{PhoneNumber, User};
use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The full persisted document: four ordered collections.
///
/// `revision` counts commits. Each write carries a revision one past the
/// state it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

/// A record type that lives in one of the snapshot's collections.
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    type Id: Copy + Eq + fmt::Display + Send + Sync + 'static;
    const KIND: EntityKind;

    fn id(&self) -> Self::Id;
    fn collection(snapshot: &LedgerSnapshot) -> &[Self];
    fn collection_mut(snapshot: &mut LedgerSnapshot) -> &mut Vec<Self>;
}

macro_rules! entity {
    ($record:ty, $id:ty, $kind:expr, $field:ident) => {
        impl Entity for $record {
            type Id = $id;
            const KIND: EntityKind = $kind;

            fn id(&self) -> Self::Id {
                self.id
            }

            fn collection(snapshot: &LedgerSnapshot) -> &[Self] {
                &snapshot.$field
            }

            fn collection_mut(snapshot: &mut LedgerSnapshot) -> &mut Vec<Self> {
                &mut snapshot.$field
            }
        }
    };
}

entity!(User, UserId, EntityKind::User, users);
entity!(Job, JobId, EntityKind::Job, jobs);
entity!(Transaction, TransactionId, EntityKind::Transaction, transactions);
entity!(Review, ReviewId, EntityKind::Review, reviews);

impl LedgerSnapshot {
    pub fn find<E: Entity>(&self, id: E::Id) -> Option<&E> {
        E::collection(self).iter().find(|record| record.id() == id)
    }

    pub fn get<E: Entity>(&self, id: E::Id) -> Result<&E> {
        self.find(id)
            .ok_or_else(|| MarketError::not_found(E::KIND, id))
    }

    pub fn get_mut<E: Entity>(&mut self, id: E::Id) -> Result<&mut E> {
        E::collection_mut(self)
            .iter_mut()
            .find(|record| record.id() == id)
            .ok_or_else(|| MarketError::not_found(E::KIND, id))
    }

    /// Appends `record` unless a record with its id is already present.
    ///
    /// Re-inserting an identical record is a no-op, so a retried append never
    /// duplicates. A different record under the same id is a conflict.
    pub fn insert<E: Entity>(&mut self, record: E) -> Result<E::Id> {
        let id = record.id();
        match self.find::<E>(id).map(|existing| *existing == record) {
            Some(true) => Ok(id),
            Some(false) => Err(MarketError::ConcurrentWriteError {
                kind: E::KIND,
                id: id.to_string(),
            }),
            None => {
                E::collection_mut(self).push(record);
                Ok(id)
            }
        }
    }

    pub fn user_by_phone(&self, phone: &PhoneNumber) -> Option<&User> {
        self.users.iter().find(|user| &user.phone == phone)
    }

    pub fn transaction_by_push_reference(&self, push_reference: &str) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| tx.push_reference.as_deref() == Some(push_reference))
    }
}
