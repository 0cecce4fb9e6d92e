use crate::domain::money::Amount;
use crate::domain::payment::{AccessToken, PaymentOutcome, PushAcceptance};
use crate::domain::ports::{OtpProvider, PaymentGateway};
use crate::domain::user::PhoneNumber;
use crate::error::{GatewayError, GatewayResult, MarketError, Result};
use async_trait::async_trait;
use log::*;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// How the simulated provider answers every push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulatedBehaviour {
    /// Accepts the push and confirms it inline.
    #[default]
    Confirm,
    /// Accepts the push; the payer then cancels on the phone.
    Decline,
    /// Refuses the push outright with a non-zero response code.
    Reject,
    /// Accepts the push and never reports back.
    Silent,
    /// Cannot be reached at all.
    Unavailable,
}

impl FromStr for SimulatedBehaviour {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => Ok(Self::Confirm),
            "decline" => Ok(Self::Decline),
            "reject" => Ok(Self::Reject),
            "silent" => Ok(Self::Silent),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(MarketError::ValidationError(format!(
                "unknown simulated behaviour '{other}', expected confirm, decline, reject, silent or unavailable"
            ))),
        }
    }
}

impl fmt::Display for SimulatedBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Confirm => "confirm",
            Self::Decline => "decline",
            Self::Reject => "reject",
            Self::Silent => "silent",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Offline stand-in for the M-Pesa gateway.
///
/// Push references and receipts are random, so runs that share one ledger
/// file never hand out the same reference twice.
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    behaviour: SimulatedBehaviour,
    pushes: AtomicU64,
}

impl SimulatedGateway {
    pub fn new(behaviour: SimulatedBehaviour) -> Self {
        Self {
            behaviour,
            pushes: AtomicU64::new(0),
        }
    }

    /// Number of push requests this gateway has received.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authenticate(&self) -> GatewayResult<AccessToken> {
        match self.behaviour {
            SimulatedBehaviour::Unavailable => Err(GatewayError::UnavailableError(
                "simulated provider is offline".to_string(),
            )),
            _ => Ok(AccessToken::new("simulated-token")),
        }
    }

    async fn request_payment(
        &self,
        payer: &PhoneNumber,
        amount: Amount,
        reference: &str,
    ) -> GatewayResult<PushAcceptance> {
        self.authenticate().await?;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let token = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        let push_reference = format!("ws_CO_SIM_{token}");
        debug!("Simulated push {push_reference}: {amount} from {payer} for {reference}");

        let outcome = match self.behaviour {
            SimulatedBehaviour::Confirm => Some(PaymentOutcome::succeeded(
                &push_reference,
                format!("SIM{}", &token[..10]),
            )),
            SimulatedBehaviour::Decline => Some(PaymentOutcome::failed(
                &push_reference,
                "Request cancelled by user",
            )),
            SimulatedBehaviour::Reject => {
                return Err(GatewayError::RejectedError {
                    code: "1".to_string(),
                    message: "The balance is insufficient for the transaction".to_string(),
                });
            }
            SimulatedBehaviour::Silent => None,
            SimulatedBehaviour::Unavailable => {
                return Err(GatewayError::UnavailableError(
                    "simulated provider is offline".to_string(),
                ));
            }
        };
        Ok(PushAcceptance {
            push_reference,
            customer_message: "Success. Request accepted for processing".to_string(),
            outcome,
        })
    }
}

/// Passcode "delivery" that always issues the same code.
#[derive(Debug, Clone)]
pub struct FixedOtpProvider {
    code: String,
}

impl FixedOtpProvider {
    pub const DEFAULT_CODE: &'static str = "1234";

    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl Default for FixedOtpProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CODE)
    }
}

#[async_trait]
impl OtpProvider for FixedOtpProvider {
    async fn send_code(&self, phone: &PhoneNumber) -> Result<()> {
        info!("One-time passcode for {phone} is {}", self.code);
        Ok(())
    }

    async fn verify(&self, _phone: &PhoneNumber, code: &str) -> Result<bool> {
        Ok(code.trim() == self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn phone() -> PhoneNumber {
        PhoneNumber::parse("712345678").unwrap()
    }

    #[tokio::test]
    async fn test_confirm_carries_inline_outcome() {
        let gateway = SimulatedGateway::new(SimulatedBehaviour::Confirm);
        let acceptance = gateway
            .request_payment(&phone(), Amount::new(dec!(100)).unwrap(), "TX1")
            .await
            .unwrap();
        let outcome = acceptance.outcome.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.push_reference, acceptance.push_reference);
        assert!(outcome.provider_reference.is_some());
        assert_eq!(gateway.push_count(), 1);
    }

    #[tokio::test]
    async fn test_reject_and_unavailable() {
        let amount = Amount::new(dec!(100)).unwrap();
        let rejected = SimulatedGateway::new(SimulatedBehaviour::Reject)
            .request_payment(&phone(), amount, "TX1")
            .await;
        assert!(matches!(rejected, Err(GatewayError::RejectedError { .. })));

        let offline = SimulatedGateway::new(SimulatedBehaviour::Unavailable);
        let result = offline.request_payment(&phone(), amount, "TX1").await;
        assert!(matches!(result, Err(GatewayError::UnavailableError(_))));
        assert_eq!(offline.push_count(), 0);
    }

    #[tokio::test]
    async fn test_fixed_otp() {
        let otp = FixedOtpProvider::default();
        otp.send_code(&phone()).await.unwrap();
        assert!(otp.verify(&phone(), "1234").await.unwrap());
        assert!(!otp.verify(&phone(), "0000").await.unwrap());
    }

    #[test]
    fn test_behaviour_names() {
        assert_eq!("Silent".parse::<SimulatedBehaviour>().unwrap(), SimulatedBehaviour::Silent);
        assert!("sometimes".parse::<SimulatedBehaviour>().is_err());
    }

    #[tokio::test]
    async fn test_separate_gateways_never_share_references() {
        let amount = Amount::new(dec!(100)).unwrap();
        let first = SimulatedGateway::new(SimulatedBehaviour::Confirm)
            .request_payment(&phone(), amount, "TX1")
            .await
            .unwrap();
        let second = SimulatedGateway::new(SimulatedBehaviour::Confirm)
            .request_payment(&phone(), amount, "TX1")
            .await
            .unwrap();

        assert!(first.push_reference.starts_with("ws_CO_SIM_"));
        assert_ne!(first.push_reference, second.push_reference);
        assert_ne!(
            first.outcome.unwrap().provider_reference,
            second.outcome.unwrap().provider_reference
        );
    }
}
