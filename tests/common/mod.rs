#![allow(dead_code)]

use assert_cmd::cargo_bin;
use rust_decimal::Decimal;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use taskerpay::application::ledger::Ledger;
use taskerpay::application::orchestrator::{Orchestrator, OrchestratorConfig};
use taskerpay::domain::ids::{JobId, UserId};
use taskerpay::domain::job::NewJob;
use taskerpay::domain::money::Amount;
use taskerpay::domain::ports::PaymentGateway;
use taskerpay::domain::user::Role;
use taskerpay::infrastructure::in_memory::InMemorySnapshotStore;
use taskerpay::infrastructure::simulated::FixedOtpProvider;

pub const OTP: &str = "1234";

/// The binary, pointed at `ledger`.
pub fn taskerpay(ledger: &Path) -> Command {
    let mut cmd = Command::new(cargo_bin!("taskerpay"));
    cmd.arg("--ledger").arg(ledger).env_remove("RUST_LOG");
    cmd
}

/// Runs the binary, asserts success and returns trimmed stdout.
pub fn run_ok(ledger: &Path, args: &[&str]) -> String {
    let output = taskerpay(ledger).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        confirmation_deadline: Duration::from_millis(50),
        request_timeout: Duration::from_secs(1),
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
    }
}

pub async fn marketplace(gateway: Arc<dyn PaymentGateway>) -> (Arc<Orchestrator>, InMemorySnapshotStore) {
    let store = InMemorySnapshotStore::new();
    let ledger = Arc::new(Ledger::open(Box::new(store.clone())).await.unwrap());
    let orchestrator = Orchestrator::new(
        ledger,
        gateway,
        Arc::new(FixedOtpProvider::default()),
        fast_config(),
    );
    (Arc::new(orchestrator), store)
}

pub async fn user(orchestrator: &Orchestrator, phone: &str, role: Role) -> UserId {
    let id = orchestrator.login(phone, OTP).await.unwrap();
    orchestrator.select_role(id, role).await.unwrap();
    id
}

pub fn amount(value: i64) -> Amount {
    Amount::new(Decimal::from(value)).unwrap()
}

pub async fn posted_job(orchestrator: &Orchestrator, client: UserId) -> JobId {
    let new_job = NewJob {
        title: "Fix kitchen sink".to_string(),
        description: "Leaking under the counter".to_string(),
        budget: amount(1500),
        location: "Westlands".to_string(),
    };
    orchestrator.post_job(client, new_job).await.unwrap()
}

pub async fn completed_job(orchestrator: &Orchestrator, client: UserId, tasker: UserId) -> JobId {
    let job = posted_job(orchestrator, client).await;
    orchestrator.assign_tasker(job, tasker).await.unwrap();
    orchestrator.complete_job(job).await.unwrap();
    job
}
