//! Safaricom Daraja (M-Pesa Express / STK Push) client.
//!
//! Every push performs a fresh client-credentials token exchange; nothing is
//! cached between calls. The asynchronous result of a push is posted by the
//! provider to the configured callback URL and parsed with [`StkCallbackEnvelope`].

use crate::config::MpesaConfig;
use crate::domain::money::Amount;
use crate::domain::payment::{AccessToken, PaymentOutcome, PushAcceptance};
use crate::domain::ports::PaymentGateway;
use crate::domain::user::PhoneNumber;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use log::*;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const TOKEN_PATH: &str = "/oauth/v1/generate";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
const TRANSACTION_DESC: &str = "TaskerApp Transaction";
const ACCEPTED_CODE: &str = "0";
/// Daraja timestamps are in East Africa Time.
const EAT_OFFSET_HOURS: i64 = 3;

#[derive(Clone)]
pub struct MpesaGateway {
    config: MpesaConfig,
    client: Client,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::UnavailableError(format!("could not build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn push_request<'a>(
        &'a self,
        payer: &PhoneNumber,
        amount: u64,
        reference: &'a str,
        now: DateTime<Utc>,
    ) -> StkPushRequest<'a> {
        let timestamp = timestamp(now);
        StkPushRequest {
            business_short_code: &self.config.shortcode,
            password: password(&self.config.shortcode, self.config.passkey.reveal(), &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount,
            party_a: payer.msisdn().to_string(),
            party_b: &self.config.shortcode,
            phone_number: payer.msisdn().to_string(),
            call_back_url: &self.config.callback_url,
            account_reference: reference,
            transaction_desc: TRANSACTION_DESC,
        }
    }
}

/// `YYYYMMDDHHmmss` in East Africa Time.
pub fn timestamp(now: DateTime<Utc>) -> String {
    (now.naive_utc() + Duration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// `base64(shortcode + passkey + timestamp)`
pub fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

fn basic_credentials(key: &str, secret: &str) -> String {
    STANDARD.encode(format!("{key}:{secret}"))
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::TimeoutError(e.to_string())
    } else {
        GatewayError::UnavailableError(e.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: u64,
    party_a: String,
    party_b: &'a str,
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
}

/// Error body Daraja returns with non-2xx statuses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_code: Option<String>,
    error_message: Option<String>,
}

pub(crate) fn interpret_token_response(status: u16, body: &str) -> GatewayResult<AccessToken> {
    if !(200..300).contains(&status) {
        return Err(GatewayError::AuthError(format!(
            "token endpoint answered HTTP {status}: {body}"
        )));
    }
    let token = serde_json::from_str::<TokenResponse>(body)
        .map_err(|e| GatewayError::AuthError(format!("malformed token response: {e}")))?
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::AuthError("token response carried no access_token".to_string()))?;
    Ok(AccessToken::new(token))
}

pub(crate) fn interpret_push_response(status: u16, body: &str) -> GatewayResult<PushAcceptance> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<ErrorResponse>(body).ok();
        let code = detail
            .as_ref()
            .and_then(|d| d.error_code.clone())
            .unwrap_or_else(|| status.to_string());
        let message = detail
            .and_then(|d| d.error_message)
            .unwrap_or_else(|| body.to_string());
        return Err(match status {
            401 | 403 => GatewayError::AuthError(message),
            408 | 504 => GatewayError::TimeoutError(message),
            500..=599 => GatewayError::UnavailableError(format!("HTTP {status}: {message}")),
            _ => GatewayError::RejectedError { code, message },
        });
    }

    let response: StkPushResponse = serde_json::from_str(body).map_err(|e| {
        GatewayError::UnavailableError(format!("malformed push response: {e}"))
    })?;
    let code = response.response_code.unwrap_or_default();
    if code != ACCEPTED_CODE {
        return Err(GatewayError::RejectedError {
            code,
            message: response.response_description.unwrap_or_default(),
        });
    }
    let push_reference = response
        .checkout_request_id
        .filter(|r| !r.is_empty())
        .ok_or_else(|| GatewayError::UnavailableError("accepted push carried no CheckoutRequestID".to_string()))?;
    Ok(PushAcceptance {
        push_reference,
        customer_message: response.customer_message.unwrap_or_default(),
        outcome: None,
    })
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn authenticate(&self) -> GatewayResult<AccessToken> {
        let credentials = basic_credentials(&self.config.consumer_key, self.config.consumer_secret.reveal());
        trace!("Requesting M-Pesa access token");
        let response = self
            .client
            .get(self.url(TOKEN_PATH))
            .query(&[("grant_type", "client_credentials")])
            .header(AUTHORIZATION, format!("Basic {credentials}"))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        interpret_token_response(status, &body)
    }

    async fn request_payment(
        &self,
        payer: &PhoneNumber,
        amount: Amount,
        reference: &str,
    ) -> GatewayResult<PushAcceptance> {
        let whole_amount = amount
            .value()
            .to_u64()
            .filter(|whole| amount.value() == Decimal::from(*whole))
            .ok_or_else(|| GatewayError::RejectedError {
                code: "amount".to_string(),
                message: format!("M-Pesa only accepts whole shilling amounts, got {}", amount.value()),
            })?;

        let token = self.authenticate().await?;
        let request = self.push_request(payer, whole_amount, reference, Utc::now());
        debug!("Sending STK push of KES {whole_amount} to {payer} ({reference})");
        let response = self
            .client
            .post(self.url(STK_PUSH_PATH))
            .bearer_auth(token.reveal())
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        let acceptance = interpret_push_response(status, &body)?;
        info!(
            "M-Pesa accepted push {} for {reference}: {}",
            acceptance.push_reference, acceptance.customer_message
        );
        Ok(acceptance)
    }
}

/// Body the provider posts to the callback URL once the payer has acted.
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    result_code: i64,
    #[serde(default)]
    result_desc: String,
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    item: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
struct CallbackItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

impl From<StkCallbackEnvelope> for PaymentOutcome {
    fn from(envelope: StkCallbackEnvelope) -> Self {
        let callback = envelope.body.stk_callback;
        let receipt = callback
            .callback_metadata
            .into_iter()
            .flat_map(|metadata| metadata.item)
            .find(|item| item.name == "MpesaReceiptNumber")
            .and_then(|item| match item.value {
                Some(Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
                None => None,
            });
        Self {
            push_reference: callback.checkout_request_id,
            succeeded: callback.result_code == 0,
            provider_reference: receipt,
            description: callback.result_desc,
        }
    }
}
