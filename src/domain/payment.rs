use crate::config::Secret;
use serde::Serialize;

/// Short-lived bearer token issued by the payment provider.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(Secret<String>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    pub fn reveal(&self) -> &str {
        self.0.reveal()
    }
}

/// The provider accepted the push and forwarded it to the payer's phone.
///
/// This says nothing about whether money moved. Gateways without a callback
/// channel may carry the outcome inline in `outcome`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAcceptance {
    pub push_reference: String,
    pub customer_message: String,
    pub outcome: Option<PaymentOutcome>,
}

/// Final word from the provider on a push, matched by `push_reference`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub push_reference: String,
    pub succeeded: bool,
    pub provider_reference: Option<String>,
    pub description: String,
}

impl PaymentOutcome {
    pub fn succeeded(push_reference: impl Into<String>, provider_reference: impl Into<String>) -> Self {
        Self {
            push_reference: push_reference.into(),
            succeeded: true,
            provider_reference: Some(provider_reference.into()),
            description: "The service request is processed successfully.".to_string(),
        }
    }

    pub fn failed(push_reference: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            push_reference: push_reference.into(),
            succeeded: false,
            provider_reference: None,
            description: description.into(),
        }
    }
}
