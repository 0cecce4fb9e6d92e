use super::ids::{ReviewId, UserId};
use super::money::Balance;
use super::review::RatingValue;
use crate::error::MarketError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const COUNTRY_PREFIX: &str = "+254";

/// A Kenyan mobile number in canonical `+2547XXXXXXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Accepts the subscriber number as typed (`712345678`), or with a
    /// trunk `0`, `254` or `+254` prefix.
    pub fn parse(raw: &str) -> Result<Self, MarketError> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        let local = compact
            .strip_prefix(COUNTRY_PREFIX)
            .or_else(|| compact.strip_prefix("254"))
            .or_else(|| compact.strip_prefix('0'))
            .unwrap_or(&compact);

        if local.len() == 9 && local.starts_with('7') && local.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(format!("{COUNTRY_PREFIX}{local}")))
        } else {
            Err(MarketError::ValidationError(format!(
                "'{raw}' is not a valid Safaricom number; expected 9 digits starting with 7, e.g. 712345678"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The number as the provider expects it: `2547XXXXXXXX`, no plus sign.
    pub fn msisdn(&self) -> &str {
        self.0.trim_start_matches('+')
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Tasker,
}

impl FromStr for Role {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "tasker" => Ok(Self::Tasker),
            other => Err(MarketError::ValidationError(format!(
                "unknown role '{other}', expected 'client' or 'tasker'"
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Tasker => f.write_str("tasker"),
        }
    }
}

/// A registered marketplace participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone: PhoneNumber,
    pub role: Role,
    pub balance: Balance,
    /// Mean of every review left for this user; kept in step by the orchestrator.
    pub rating: RatingValue,
    #[serde(default)]
    pub reviews: Vec<ReviewId>,
}

impl User {
    pub fn new(phone: PhoneNumber) -> Self {
        Self {
            id: UserId::random(),
            phone,
            role: Role::Client,
            balance: Balance::ZERO,
            rating: RatingValue::ZERO,
            reviews: Vec::new(),
        }
    }

    pub fn is_tasker(&self) -> bool {
        self.role == Role::Tasker
    }
}
