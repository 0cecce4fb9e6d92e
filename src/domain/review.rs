use super::ids::{JobId, ReviewId, UserId};
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// A single review score, always within `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Self, MarketError> {
        if (MIN_RATING..=MAX_RATING).contains(&value) {
            Ok(Self(value))
        } else {
            Err(MarketError::ValidationError(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {value}"
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = MarketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// Aggregate rating of a tasker.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct RatingValue(pub Decimal);

impl RatingValue {
    pub const ZERO: Self = Self(Decimal::ZERO);
}

impl fmt::Display for RatingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub job_id: JobId,
    pub tasker_id: UserId,
    pub client_id: UserId,
    pub rating: Rating,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn new(
        job_id: JobId,
        tasker_id: UserId,
        client_id: UserId,
        rating: Rating,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            id: ReviewId::random(),
            job_id,
            tasker_id,
            client_id,
            rating,
            comment: comment.into(),
            created_at: Utc::now(),
        }
    }
}
