use super::ids::{JobId, TransactionId, UserId};
use super::money::Amount;
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a mobile-money payment.
///
/// ```text
/// Initiated ──> PushSent ──> Confirmed
///     │             ├──────> Failed
///     └──> Failed   └──────> TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initiated,
    PushSent,
    Confirmed,
    Failed,
    TimedOut,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::TimedOut)
    }

    pub fn can_advance_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initiated, Self::PushSent | Self::Failed)
                | (Self::PushSent, Self::Confirmed | Self::Failed | Self::TimedOut)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initiated => "initiated",
            Self::PushSent => "push_sent",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Why a payment is being made. Stored as its free-text tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Purpose {
    /// One-off platform fee; leaves balances untouched.
    Registration,
    /// Money loaded into the payer's own balance.
    TopUp,
    /// Payment for a job, credited to its assigned tasker.
    Job(JobId),
    Other(String),
}

impl Purpose {
    pub fn parse(tag: &str) -> Result<Self, MarketError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(MarketError::ValidationError(
                "payment purpose must not be empty".to_string(),
            ));
        }
        match tag.to_ascii_lowercase().as_str() {
            "registration" => return Ok(Self::Registration),
            "topup" => return Ok(Self::TopUp),
            _ => {}
        }
        match tag.strip_prefix("job:") {
            Some(job_id) => Ok(Self::Job(job_id.parse()?)),
            None => Ok(Self::Other(tag.to_string())),
        }
    }
}

impl TryFrom<String> for Purpose {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Purpose> for String {
    fn from(purpose: Purpose) -> Self {
        purpose.to_string()
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration => f.write_str("registration"),
            Self::TopUp => f.write_str("topup"),
            Self::Job(id) => write!(f, "job:{id}"),
            Self::Other(tag) => f.write_str(tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub payer_id: UserId,
    pub amount: Amount,
    pub purpose: Purpose,
    pub status: TransactionStatus,
    /// Provider handle for the push, used to match the asynchronous outcome.
    pub push_reference: Option<String>,
    /// Provider receipt, present on every confirmed transaction.
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn initiate(payer_id: UserId, amount: Amount, purpose: Purpose) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::random(),
            payer_id,
            amount,
            purpose,
            status: TransactionStatus::Initiated,
            push_reference: None,
            provider_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Short reference shown on the payer's phone; the provider caps it at 12 characters.
    pub fn account_reference(&self) -> String {
        let simple = self.id.0.simple().to_string();
        format!("TX{}", &simple[..10]).to_ascii_uppercase()
    }

    fn advance(&mut self, next: TransactionStatus) -> Result<(), MarketError> {
        if !self.status.can_advance_to(next) {
            return Err(MarketError::InvalidTransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_push_sent(&mut self, push_reference: String) -> Result<(), MarketError> {
        self.advance(TransactionStatus::PushSent)?;
        self.push_reference = Some(push_reference);
        Ok(())
    }

    pub fn confirm(&mut self, provider_reference: &str) -> Result<(), MarketError> {
        let provider_reference = provider_reference.trim();
        if provider_reference.is_empty() {
            return Err(MarketError::ValidationError(format!(
                "transaction {} cannot be confirmed without a provider reference",
                self.id
            )));
        }
        self.advance(TransactionStatus::Confirmed)?;
        self.provider_reference = Some(provider_reference.to_string());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), MarketError> {
        self.advance(TransactionStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn time_out(&mut self) -> Result<(), MarketError> {
        self.advance(TransactionStatus::TimedOut)
    }

    /// Records a receipt that arrived after the transaction had already ended.
    ///
    /// The status is left untouched; only the provider reference may still change
    /// on a terminal transaction.
    pub fn record_late_receipt(&mut self, provider_reference: &str) -> Result<(), MarketError> {
        if !matches!(
            self.status,
            TransactionStatus::TimedOut | TransactionStatus::Failed
        ) {
            return Err(MarketError::InvalidTransitionError {
                id: self.id,
                from: self.status,
                to: self.status,
            });
        }
        self.provider_reference = Some(provider_reference.trim().to_string());
        self.updated_at = Utc::now();
        Ok(())
    }
}
