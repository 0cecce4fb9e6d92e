use super::money::Amount;
use super::payment::{AccessToken, PushAcceptance};
use super::snapshot::LedgerSnapshot;
use super::user::PhoneNumber;
use crate::error::{GatewayResult, Result};
use async_trait::async_trait;

/// Durable home of the whole ledger document.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when nothing has been persisted yet.
    async fn read(&self) -> Result<Option<LedgerSnapshot>>;
    /// Replaces the persisted document. Must be all-or-nothing.
    ///
    /// Fails with `StaleLedgerError` when the persisted revision is already
    /// at or past `snapshot.revision`.
    async fn write(&self, snapshot: &LedgerSnapshot) -> Result<()>;
}

pub type SnapshotStoreBox = Box<dyn SnapshotStore>;

/// A mobile-money provider that can push payment prompts to a phone.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authenticate(&self) -> GatewayResult<AccessToken>;

    async fn request_payment(
        &self,
        payer: &PhoneNumber,
        amount: Amount,
        reference: &str,
    ) -> GatewayResult<PushAcceptance>;
}

#[async_trait]
pub trait OtpProvider: Send + Sync {
    async fn send_code(&self, phone: &PhoneNumber) -> Result<()>;
    async fn verify(&self, phone: &PhoneNumber, code: &str) -> Result<bool>;
}
