mod common;

use assert_cmd::prelude::*;
use common::{run_ok, taskerpay};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_login_prints_the_same_id_for_one_phone() {
    let dir = tempdir().unwrap();
    let ledger = dir.path().join("data.json");

    let first = run_ok(&ledger, &["login", "0712345678", "--otp", "1234"]);
    let second = run_ok(&ledger, &["login", "+254712345678", "--otp", "1234"]);
    assert_eq!(first, second);
    assert_eq!(first.len(), 36);
}

#[test]
fn test_wrong_passcode_is_refused() {
    let dir = tempdir().unwrap();
    let ledger = dir.path().join("data.json");

    taskerpay(&ledger)
        .args(["login", "0712345678", "--otp", "0000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("passcode"));
    assert!(!ledger.exists());
}

#[test]
fn test_request_otp_names_the_canonical_number() {
    let dir = tempdir().unwrap();
    taskerpay(&dir.path().join("data.json"))
        .args(["request-otp", "0712 345 678"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+254712345678"));
}

#[test]
fn test_registration_payment_end_to_end() {
    let dir = tempdir().unwrap();
    let ledger = dir.path().join("data.json");
    let payer = run_ok(&ledger, &["login", "0712345678", "--otp", "1234"]);

    let tx = run_ok(&ledger, &["pay", "--payer", &payer, "--amount", "100"]);
    assert_eq!(tx.len(), 36);

    taskerpay(&ledger)
        .arg("snapshot")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("\"id\": \"{tx}\"")))
        .stdout(predicate::str::contains("\"status\": \"confirmed\""))
        .stdout(predicate::str::contains("\"purpose\": \"registration\""));
}

#[test]
fn test_declined_payment_exits_with_error() {
    let dir = tempdir().unwrap();
    let ledger = dir.path().join("data.json");
    let payer = run_ok(&ledger, &["login", "0712345678", "--otp", "1234"]);

    taskerpay(&ledger)
        .args(["pay", "--payer", &payer, "--amount", "100", "--simulate", "decline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("declined"));
    taskerpay(&ledger)
        .arg("snapshot")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"failed\""));
}

#[test]
fn test_non_positive_amount_is_rejected() {
    let dir = tempdir().unwrap();
    let ledger = dir.path().join("data.json");
    let payer = run_ok(&ledger, &["login", "0712345678", "--otp", "1234"]);

    taskerpay(&ledger)
        .args(["pay", "--payer", &payer, "--amount", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive"));
}

#[test]
fn test_review_flow() {
    let dir = tempdir().unwrap();
    let ledger = dir.path().join("data.json");
    let client = run_ok(&ledger, &["login", "0712345678", "--otp", "1234"]);
    let tasker = run_ok(&ledger, &["login", "0798765432", "--otp", "1234"]);
    run_ok(&ledger, &["role", &tasker, "tasker"]);

    let job = run_ok(
        &ledger,
        &[
            "post-job", "--client", &client, "--title", "Paint fence", "--budget", "2500",
            "--location", "Kilimani",
        ],
    );
    run_ok(&ledger, &["assign", &job, &tasker]);
    run_ok(&ledger, &["complete", &job]);
    run_ok(
        &ledger,
        &[
            "review", "--job", &job, "--tasker", &tasker, "--client", &client, "--rating", "5",
            "--comment", "Great",
        ],
    );

    assert_eq!(run_ok(&ledger, &["rating", &tasker]), "5");
    taskerpay(&ledger)
        .args(["user", &tasker])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rating\": \"5\""));

    taskerpay(&ledger)
        .args([
            "review", "--job", &job, "--tasker", &tasker, "--client", &client, "--rating", "6",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("between"));
}
