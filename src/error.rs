use crate::domain::ids::{EntityKind, TransactionId};
use crate::domain::transaction::TransactionStatus;
use thiserror::Error;

/// Failures reported by a payment provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Payment provider refused our credentials: {0}. Check MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET")]
    AuthError(String),
    #[error("Payment provider rejected the push request (code {code}): {message}")]
    RejectedError { code: String, message: String },
    #[error("Payment provider did not answer in time: {0}")]
    TimeoutError(String),
    #[error("Payment provider is unreachable: {0}. Try again in a few minutes")]
    UnavailableError(String),
}

impl GatewayError {
    /// Transport failures are worth another attempt; credential and payer failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimeoutError(_) | Self::UnavailableError(_))
    }
}

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Invalid input: {0}")]
    ValidationError(String),
    #[error("No {kind} with id {id} exists")]
    NotFoundError { kind: EntityKind, id: String },
    #[error(transparent)]
    GatewayError(#[from] GatewayError),
    #[error("Transaction {id} is already {status}; start a new payment instead")]
    AlreadySettledError {
        id: TransactionId,
        status: TransactionStatus,
    },
    #[error("Payment {id} was declined on the payer's phone: {reason}")]
    PaymentDeclinedError { id: TransactionId, reason: String },
    #[error(
        "Payment {id} was not confirmed in time. It is recorded as timed_out and can be reconciled later"
    )]
    ConfirmationTimedOutError { id: TransactionId },
    #[error(
        "Ledger file {path} is corrupt ({reason}). Refusing to start; restore it from a backup or move it aside"
    )]
    CorruptStateError { path: String, reason: String },
    #[error("{kind} {id} is being written concurrently with different content")]
    ConcurrentWriteError { kind: EntityKind, id: String },
    #[error(
        "Ledger {location} was changed by another process (revision {persisted}); refusing to write revision {attempted} over it. Retry the command"
    )]
    StaleLedgerError {
        location: String,
        persisted: u64,
        attempted: u64,
    },
    #[error("Payment {id} is already being executed; wait for it to settle")]
    PaymentInProgressError { id: TransactionId },
    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidTransitionError {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Ledger IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Ledger serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl MarketError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFoundError {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation",
            Self::NotFoundError { .. } => "not_found",
            Self::GatewayError(GatewayError::AuthError(_)) => "gateway_auth",
            Self::GatewayError(GatewayError::RejectedError { .. }) => "gateway_rejected",
            Self::GatewayError(GatewayError::TimeoutError(_)) => "gateway_timeout",
            Self::GatewayError(GatewayError::UnavailableError(_)) => "gateway_unavailable",
            Self::AlreadySettledError { .. } => "already_settled",
            Self::PaymentDeclinedError { .. } => "payment_declined",
            Self::ConfirmationTimedOutError { .. } => "confirmation_timed_out",
            Self::CorruptStateError { .. } => "corrupt_state",
            Self::ConcurrentWriteError { .. } => "concurrent_write",
            Self::StaleLedgerError { .. } => "stale_ledger",
            Self::PaymentInProgressError { .. } => "payment_in_progress",
            Self::InvalidTransitionError { .. } => "invalid_transition",
            Self::IoError(_) => "io",
            Self::SerializationError(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
