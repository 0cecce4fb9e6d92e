use crate::application::orchestrator::Orchestrator;
use crate::domain::ids::UserId;
use crate::domain::job::Job;
use crate::domain::money::Amount;
use crate::domain::payment::PaymentOutcome;
use crate::domain::transaction::{Purpose, Transaction};
use crate::domain::user::User;
use crate::error::{MarketError, Result};
use crate::infrastructure::mpesa::StkCallbackEnvelope;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::*;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

type AppState = Arc<Orchestrator>;

pub fn router(orchestrator: AppState) -> Router {
    Router::new()
        .route("/mpesa/callback", post(mpesa_callback))
        .route("/payments", post(create_payment))
        .route("/users/:id", get(get_user))
        .route("/jobs", get(list_jobs))
        .with_state(orchestrator)
}

/// Serves the router on every interface until interrupted.
pub async fn serve(orchestrator: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening for provider callbacks on http://{addr}");
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for shutdown signal: {e}");
            }
        })
        .await?;
    info!("Server stopped");
    Ok(())
}

/// Error body: `{"error": <kind>, "message": <text>}`.
struct ApiError(MarketError);

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "validation" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "already_settled" | "concurrent_write" | "stale_ledger" | "payment_in_progress" => {
                StatusCode::CONFLICT
            }
            "gateway_rejected" | "payment_declined" => StatusCode::PAYMENT_REQUIRED,
            "gateway_auth" => StatusCode::BAD_GATEWAY,
            "gateway_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            "gateway_timeout" | "confirmation_timed_out" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = json!({ "error": kind, "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn mpesa_callback(
    State(orchestrator): State<AppState>,
    Json(envelope): Json<StkCallbackEnvelope>,
) -> std::result::Result<Json<Value>, ApiError> {
    let outcome = PaymentOutcome::from(envelope);
    info!(
        "Callback for push {}: {}",
        outcome.push_reference,
        if outcome.succeeded { "paid" } else { "not paid" }
    );
    orchestrator.on_payment_outcome(outcome).await?;
    Ok(Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })))
}

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    payer_id: UserId,
    amount: Amount,
    #[serde(default = "default_purpose")]
    purpose: Purpose,
}

fn default_purpose() -> Purpose {
    Purpose::Registration
}

async fn create_payment(
    State(orchestrator): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> std::result::Result<Json<Transaction>, ApiError> {
    let id = orchestrator
        .pay_now(request.payer_id, request.amount, request.purpose)
        .await?;
    Ok(Json(orchestrator.get_transaction(id).await?))
}

async fn get_user(
    State(orchestrator): State<AppState>,
    Path(id): Path<UserId>,
) -> std::result::Result<Json<User>, ApiError> {
    Ok(Json(orchestrator.get_user(id).await?))
}

async fn list_jobs(State(orchestrator): State<AppState>) -> Json<Vec<Job>> {
    Json(orchestrator.list_jobs().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::Ledger;
    use crate::application::orchestrator::OrchestratorConfig;
    use crate::domain::transaction::TransactionStatus;
    use crate::infrastructure::in_memory::InMemorySnapshotStore;
    use crate::infrastructure::simulated::{FixedOtpProvider, SimulatedBehaviour, SimulatedGateway};
    use std::time::Duration;

    async fn start(behaviour: SimulatedBehaviour) -> (Arc<Orchestrator>, String) {
        let ledger = Arc::new(
            Ledger::open(Box::new(InMemorySnapshotStore::new()))
                .await
                .unwrap(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            ledger,
            Arc::new(SimulatedGateway::new(behaviour)),
            Arc::new(FixedOtpProvider::default()),
            OrchestratorConfig {
                confirmation_deadline: Duration::from_secs(5),
                ..OrchestratorConfig::default()
            },
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = router(Arc::clone(&orchestrator));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (orchestrator, base)
    }

    #[tokio::test]
    async fn test_unknown_user_is_404() {
        let (_, base) = start(SimulatedBehaviour::Confirm).await;
        let response = reqwest::get(format!("{base}/users/{}", UserId::random()))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_declined_payment_is_402() {
        let (orchestrator, base) = start(SimulatedBehaviour::Decline).await;
        let payer = orchestrator.login("712345678", "1234").await.unwrap();

        let response = reqwest::Client::new()
            .post(format!("{base}/payments"))
            .json(&json!({ "payer_id": payer, "amount": "100" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_callback_completes_pending_payment() {
        let (orchestrator, base) = start(SimulatedBehaviour::Silent).await;
        let payer = orchestrator.login("712345678", "1234").await.unwrap();
        let client = reqwest::Client::new();

        let payment = {
            let client = client.clone();
            let url = format!("{base}/payments");
            tokio::spawn(async move {
                client
                    .post(url)
                    .json(&json!({ "payer_id": payer, "amount": 250, "purpose": "topup" }))
                    .send()
                    .await
                    .unwrap()
            })
        };

        let mut push_reference = None;
        for _ in 0..200 {
            let snapshot = orchestrator.ledger().snapshot().await;
            push_reference = snapshot
                .transactions
                .first()
                .and_then(|tx| tx.push_reference.clone());
            if push_reference.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let push_reference = push_reference.unwrap();

        let callback = json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": push_reference,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": { "Item": [
                    { "Name": "Amount", "Value": 250 },
                    { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                    { "Name": "PhoneNumber", "Value": 254712345678u64 }
                ]}
            }}
        });
        let ack = client
            .post(format!("{base}/mpesa/callback"))
            .json(&callback)
            .send()
            .await
            .unwrap();
        assert!(ack.status().is_success());
        let ack: Value = ack.json().await.unwrap();
        assert_eq!(ack["ResultCode"], 0);

        let response = payment.await.unwrap();
        assert!(response.status().is_success());
        let tx: Value = response.json().await.unwrap();
        assert_eq!(tx["status"], "confirmed");
        assert_eq!(tx["provider_reference"], "NLJ7RT61SV");
        let settled = orchestrator.ledger().snapshot().await.transactions[0].clone();
        assert_eq!(settled.status, TransactionStatus::Confirmed);
    }

    #[test]
    fn test_conflicts_map_to_409() {
        let busy = ApiError(MarketError::PaymentInProgressError {
            id: crate::domain::ids::TransactionId::random(),
        });
        assert_eq!(busy.into_response().status(), StatusCode::CONFLICT);
        let stale = ApiError(MarketError::StaleLedgerError {
            location: "data.json".to_string(),
            persisted: 4,
            attempted: 4,
        });
        assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_malformed_callback_is_refused() {
        let (_, base) = start(SimulatedBehaviour::Confirm).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/mpesa/callback"))
            .json(&json!({ "Body": {} }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
