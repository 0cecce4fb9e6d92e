use super::ledger::Ledger;
use super::rating;
use crate::domain::ids::{JobId, ReviewId, TransactionId, UserId};
use crate::domain::job::{Job, NewJob};
use crate::domain::money::Amount;
use crate::domain::payment::{PaymentOutcome, PushAcceptance};
use crate::domain::ports::{OtpProvider, PaymentGateway};
use crate::domain::review::{Rating, RatingValue, Review};
use crate::domain::snapshot::LedgerSnapshot;
use crate::domain::transaction::{Purpose, Transaction, TransactionStatus};
use crate::domain::user::{PhoneNumber, Role, User};
use crate::error::{GatewayError, GatewayResult, MarketError, Result};
use log::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{self, Instant};

/// Upper bound on verdicts held for pushes this process has not recorded.
const MAX_PARKED_OUTCOMES: usize = 1024;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long to wait for the provider's verdict once a push is accepted.
    pub confirmation_deadline: Duration,
    /// Upper bound on a single gateway call.
    pub request_timeout: Duration,
    /// Push attempts made while the gateway is unreachable or slow.
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for every attempt after it.
    pub retry_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation_deadline: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

enum Pending {
    Waiting(oneshot::Sender<PaymentOutcome>),
    /// Outcome that showed up before anyone was waiting for it.
    Arrived {
        outcome: PaymentOutcome,
        at: Instant,
    },
}

enum Waiter {
    Ready(PaymentOutcome),
    Pending(oneshot::Receiver<PaymentOutcome>),
}

/// Drives payments through their state machine and records reviews.
///
/// Gateway calls always happen outside the ledger's write lock; only the
/// resulting state changes are committed through it.
pub struct Orchestrator {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    otp: Arc<dyn OtpProvider>,
    config: OrchestratorConfig,
    pending: Mutex<HashMap<String, Pending>>,
    in_flight: std::sync::Mutex<HashSet<TransactionId>>,
}

/// Claim on a transaction being executed, released when dropped.
///
/// Dropping covers cancellation too: an aborted `execute_payment` never
/// leaves its transaction locked out.
struct InFlight<'a> {
    set: &'a std::sync::Mutex<HashSet<TransactionId>>,
    id: TransactionId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        otp: Arc<dyn OtpProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            otp,
            config,
            pending: Mutex::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub async fn request_otp(&self, phone: &str) -> Result<PhoneNumber> {
        let phone = PhoneNumber::parse(phone)?;
        self.otp.send_code(&phone).await?;
        Ok(phone)
    }

    /// Verifies the passcode and returns the user for `phone`, registering it on first login.
    pub async fn login(&self, phone: &str, code: &str) -> Result<UserId> {
        let phone = PhoneNumber::parse(phone)?;
        if !self.otp.verify(&phone, code).await? {
            return Err(MarketError::ValidationError(format!(
                "incorrect one-time passcode for {phone}"
            )));
        }
        let (id, created) = self
            .ledger
            .transact(move |snapshot| {
                if let Some(user) = snapshot.user_by_phone(&phone) {
                    return Ok((user.id, false));
                }
                Ok((snapshot.insert(User::new(phone))?, true))
            })
            .await?;
        if created {
            info!("Registered user {id}");
        } else {
            debug!("User {id} logged in");
        }
        Ok(id)
    }

    pub async fn select_role(&self, user_id: UserId, role: Role) -> Result<User> {
        let user = self
            .ledger
            .update::<User, _>(user_id, move |user| {
                user.role = role;
                Ok(())
            })
            .await?;
        info!("User {user_id} is now a {role}");
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.ledger.get::<User>(id).await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.ledger.get::<Transaction>(id).await
    }

    pub async fn post_job(&self, client_id: UserId, new_job: NewJob) -> Result<JobId> {
        let job_id = self
            .ledger
            .transact(move |snapshot| {
                if snapshot.get::<User>(client_id)?.role != Role::Client {
                    return Err(MarketError::ValidationError(format!(
                        "user {client_id} is a tasker; switch to the client role to post jobs"
                    )));
                }
                snapshot.insert(Job::post(client_id, new_job)?)
            })
            .await?;
        info!("Client {client_id} posted job {job_id}");
        Ok(job_id)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.ledger.snapshot().await.jobs
    }

    pub async fn assign_tasker(&self, job_id: JobId, tasker_id: UserId) -> Result<Job> {
        self.ledger
            .transact(move |snapshot| {
                require_tasker(snapshot, tasker_id)?;
                let job = snapshot.get_mut::<Job>(job_id)?;
                if job.client_id == tasker_id {
                    return Err(MarketError::ValidationError(
                        "a client cannot take on their own job".to_string(),
                    ));
                }
                job.assign(tasker_id)?;
                Ok(job.clone())
            })
            .await
    }

    pub async fn complete_job(&self, job_id: JobId) -> Result<Job> {
        self.ledger
            .update::<Job, _>(job_id, |job| job.complete())
            .await
    }

    /// Records a payment intent in the `Initiated` state.
    pub async fn initiate_payment(
        &self,
        payer_id: UserId,
        amount: Amount,
        purpose: Purpose,
    ) -> Result<TransactionId> {
        let id = self
            .ledger
            .transact(move |snapshot| {
                snapshot.get::<User>(payer_id)?;
                if let Purpose::Job(job_id) = &purpose {
                    let job = snapshot.get::<Job>(*job_id)?;
                    if job.client_id != payer_id {
                        return Err(MarketError::ValidationError(format!(
                            "Only the client who posted job {job_id} can pay for it"
                        )));
                    }
                    if job.tasker_id.is_none() {
                        return Err(MarketError::ValidationError(format!(
                            "Job {job_id} has no tasker assigned yet; assign one before paying"
                        )));
                    }
                }
                snapshot.insert(Transaction::initiate(payer_id, amount, purpose))
            })
            .await?;
        info!("Transaction {id} initiated: {amount} from {payer_id}");
        Ok(id)
    }

    /// Initiates and executes a payment; returns once it is confirmed.
    pub async fn pay_now(
        &self,
        payer_id: UserId,
        amount: Amount,
        purpose: Purpose,
    ) -> Result<TransactionId> {
        let id = self.initiate_payment(payer_id, amount, purpose).await?;
        self.execute_payment(id).await?;
        Ok(id)
    }

    /// Pushes an `Initiated` transaction to the payer and waits for its verdict.
    ///
    /// Succeeds only once the transaction is `Confirmed`. A transaction is
    /// executed at most once; retrying a settled one yields `AlreadySettledError`
    /// and a concurrent attempt yields `PaymentInProgressError`.
    pub async fn execute_payment(&self, id: TransactionId) -> Result<Transaction> {
        let Some(_claim) = self.claim(id) else {
            return Err(MarketError::PaymentInProgressError { id });
        };
        self.drive(id).await
    }

    fn claim(&self, id: TransactionId) -> Option<InFlight<'_>> {
        let mut claimed = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.insert(id).then(|| InFlight {
            set: &self.in_flight,
            id,
        })
    }

    async fn drive(&self, id: TransactionId) -> Result<Transaction> {
        let tx = self.ledger.get::<Transaction>(id).await?;
        if tx.status != TransactionStatus::Initiated {
            return Err(MarketError::AlreadySettledError {
                id,
                status: tx.status,
            });
        }
        let payer = self.ledger.get::<User>(tx.payer_id).await?;

        let acceptance = match self
            .push_with_retry(&payer.phone, tx.amount, &tx.account_reference())
            .await
        {
            Ok(acceptance) => acceptance,
            Err(e) => {
                warn!("Push for transaction {id} failed: {e}");
                let reason = e.to_string();
                self.ledger
                    .update::<Transaction, _>(id, move |t| t.fail(reason))
                    .await?;
                return Err(e.into());
            }
        };

        let push_reference = acceptance.push_reference.clone();
        let waiter = self.register(&push_reference).await;
        let marked = {
            let push_reference = push_reference.clone();
            self.ledger
                .update::<Transaction, _>(id, move |t| t.mark_push_sent(push_reference))
                .await
        };
        if let Err(e) = marked {
            error!("Push {push_reference} for transaction {id} was accepted but could not be recorded: {e}");
            self.forget(&push_reference).await;
            return Err(e);
        }
        debug!("Transaction {id} pushed as {push_reference}");

        let outcome = match acceptance.outcome {
            Some(outcome) => Some(outcome),
            None => self.wait_for(&push_reference, waiter).await,
        };
        self.forget(&push_reference).await;
        self.finish(id, outcome).await
    }

    async fn push_with_retry(
        &self,
        payer: &PhoneNumber,
        amount: Amount,
        reference: &str,
    ) -> GatewayResult<PushAcceptance> {
        let mut attempt = 1;
        loop {
            let call = self.gateway.request_payment(payer, amount, reference);
            let result = match time::timeout(self.config.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::TimeoutError(format!(
                    "no answer within {:?}",
                    self.config.request_timeout
                ))),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Push attempt {attempt}/{} failed: {e}. Retrying in {backoff:?}",
                        self.config.max_attempts
                    );
                    time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn register(&self, push_reference: &str) -> Waiter {
        let mut pending = self.pending.lock().await;
        if let Some(Pending::Arrived { outcome, .. }) = pending.remove(push_reference) {
            return Waiter::Ready(outcome);
        }
        let (sender, receiver) = oneshot::channel();
        pending.insert(push_reference.to_string(), Pending::Waiting(sender));
        Waiter::Pending(receiver)
    }

    async fn forget(&self, push_reference: &str) {
        let mut pending = self.pending.lock().await;
        if matches!(pending.get(push_reference), Some(Pending::Waiting(_))) {
            pending.remove(push_reference);
        }
    }

    /// Waits for the verdict until the confirmation deadline.
    ///
    /// A channel closed without a verdict does not end the wait; the push is
    /// registered again so a held or later outcome still reaches it.
    async fn wait_for(&self, push_reference: &str, mut waiter: Waiter) -> Option<PaymentOutcome> {
        let deadline = Instant::now() + self.config.confirmation_deadline;
        loop {
            let receiver = match waiter {
                Waiter::Ready(outcome) => return Some(outcome),
                Waiter::Pending(receiver) => receiver,
            };
            match time::timeout_at(deadline, receiver).await {
                Ok(Ok(outcome)) => return Some(outcome),
                Err(_) => return None,
                Ok(Err(_)) => {
                    debug!("Waiter for push {push_reference} was dropped, registering again");
                    waiter = self.register(push_reference).await;
                }
            }
        }
    }

    async fn finish(&self, id: TransactionId, outcome: Option<PaymentOutcome>) -> Result<Transaction> {
        let (tx, credited) = self
            .ledger
            .transact(move |snapshot| settle(snapshot, id, outcome))
            .await?;
        match tx.status {
            TransactionStatus::Confirmed => {
                info!(
                    "Transaction {id} confirmed with receipt {}",
                    tx.provider_reference.as_deref().unwrap_or_default()
                );
                if let Some(user_id) = credited {
                    info!("Credited {} to user {user_id}", tx.amount);
                }
                Ok(tx)
            }
            TransactionStatus::Failed => {
                info!("Transaction {id} failed");
                Err(MarketError::PaymentDeclinedError {
                    id,
                    reason: tx.failure_reason.unwrap_or_default(),
                })
            }
            TransactionStatus::TimedOut => {
                warn!(
                    "Transaction {id} timed out after {:?} waiting for push {}",
                    self.config.confirmation_deadline,
                    tx.push_reference.as_deref().unwrap_or_default()
                );
                Err(MarketError::ConfirmationTimedOutError { id })
            }
            status => Err(MarketError::InvalidTransitionError {
                id,
                from: status,
                to: TransactionStatus::Confirmed,
            }),
        }
    }

    /// Entry point for provider verdicts, whatever channel they arrive on.
    pub async fn on_payment_outcome(&self, outcome: PaymentOutcome) -> Result<()> {
        let outcome = {
            let mut pending = self.pending.lock().await;
            match pending.remove(&outcome.push_reference) {
                Some(Pending::Waiting(sender)) => match sender.send(outcome) {
                    Ok(()) => return Ok(()),
                    Err(returned) => returned,
                },
                _ => outcome,
            }
        };
        self.reconcile(outcome).await
    }

    /// Handles a verdict nobody was waiting for when it arrived.
    async fn reconcile(&self, mut outcome: PaymentOutcome) -> Result<()> {
        let (id, status) = loop {
            let found = self
                .ledger
                .refresh()
                .await?
                .transaction_by_push_reference(&outcome.push_reference)
                .map(|tx| (tx.id, tx.status));
            if let Some(found) = found {
                break found;
            }

            // The push may have been registered while the ledger was read.
            let mut pending = self.pending.lock().await;
            match pending.remove(&outcome.push_reference) {
                Some(Pending::Waiting(sender)) => match sender.send(outcome) {
                    Ok(()) => return Ok(()),
                    Err(returned) => outcome = returned,
                },
                _ => {
                    self.park(&mut pending, outcome);
                    return Ok(());
                }
            }
        };

        match status {
            TransactionStatus::PushSent => match self.finish(id, Some(outcome)).await {
                Ok(_) | Err(MarketError::PaymentDeclinedError { .. }) => Ok(()),
                Err(e) => Err(e),
            },
            TransactionStatus::TimedOut | TransactionStatus::Failed if outcome.succeeded => {
                let Some(receipt) = outcome.provider_reference.filter(|r| !r.trim().is_empty()) else {
                    return Ok(());
                };
                let logged = receipt.clone();
                self.ledger
                    .update::<Transaction, _>(id, move |t| t.record_late_receipt(&receipt))
                    .await?;
                warn!(
                    "Late confirmation {logged} for {status} transaction {id}; it needs manual reconciliation"
                );
                Ok(())
            }
            status => {
                debug!("Ignoring repeated outcome for {status} transaction {id}");
                Ok(())
            }
        }
    }

    fn park(&self, pending: &mut HashMap<String, Pending>, outcome: PaymentOutcome) {
        let max_age = self.config.confirmation_deadline;
        pending.retain(|_, entry| match entry {
            Pending::Waiting(sender) => !sender.is_closed(),
            Pending::Arrived { at, .. } => at.elapsed() < max_age,
        });
        let parked = pending
            .values()
            .filter(|entry| matches!(entry, Pending::Arrived { .. }))
            .count();
        if parked >= MAX_PARKED_OUTCOMES {
            warn!(
                "Dropping outcome for unknown push {}: {parked} outcomes are already held",
                outcome.push_reference
            );
            return;
        }
        debug!(
            "Holding outcome for push {} until its transaction is recorded",
            outcome.push_reference
        );
        pending.insert(
            outcome.push_reference.clone(),
            Pending::Arrived {
                outcome,
                at: Instant::now(),
            },
        );
    }

    /// Records a review for a completed job and refreshes the tasker's rating.
    pub async fn submit_review(
        &self,
        job_id: JobId,
        tasker_id: UserId,
        client_id: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<ReviewId> {
        let score = Rating::new(rating)?;
        let comment = comment.trim().to_string();
        let (review_id, new_rating) = self
            .ledger
            .transact(move |snapshot| {
                require_tasker(snapshot, tasker_id)?;
                snapshot.get::<User>(client_id)?;
                let job = snapshot.get::<Job>(job_id)?;
                if job.client_id != client_id {
                    return Err(MarketError::ValidationError(format!(
                        "job {job_id} was posted by a different client"
                    )));
                }
                if job.tasker_id != Some(tasker_id) {
                    return Err(MarketError::ValidationError(format!(
                        "tasker {tasker_id} was not assigned to job {job_id}"
                    )));
                }
                if !job.completed {
                    return Err(MarketError::ValidationError(format!(
                        "job {job_id} is not completed yet"
                    )));
                }
                if snapshot.reviews.iter().any(|r| r.job_id == job_id) {
                    return Err(MarketError::ValidationError(format!(
                        "job {job_id} has already been reviewed"
                    )));
                }

                let review_id =
                    snapshot.insert(Review::new(job_id, tasker_id, client_id, score, comment))?;
                let new_rating = rating::recompute(&snapshot.reviews, tasker_id);
                let tasker = snapshot.get_mut::<User>(tasker_id)?;
                tasker.rating = new_rating;
                tasker.reviews.push(review_id);
                Ok((review_id, new_rating))
            })
            .await?;
        info!("Review {review_id} recorded; tasker {tasker_id} is now rated {new_rating}");
        Ok(review_id)
    }

    pub async fn recompute_rating(&self, tasker_id: UserId) -> Result<RatingValue> {
        let snapshot = self.ledger.snapshot().await;
        snapshot.get::<User>(tasker_id)?;
        Ok(rating::recompute(&snapshot.reviews, tasker_id))
    }
}

fn require_tasker(snapshot: &LedgerSnapshot, user_id: UserId) -> Result<()> {
    if snapshot.get::<User>(user_id)?.is_tasker() {
        Ok(())
    } else {
        Err(MarketError::ValidationError(format!(
            "user {user_id} is not a tasker"
        )))
    }
}

/// Applies a verdict to a `PushSent` transaction and credits the beneficiary on success.
///
/// A transaction that already left `PushSent` is returned untouched.
fn settle(
    snapshot: &mut LedgerSnapshot,
    id: TransactionId,
    outcome: Option<PaymentOutcome>,
) -> Result<(Transaction, Option<UserId>)> {
    let tx = snapshot.get_mut::<Transaction>(id)?;
    if tx.status != TransactionStatus::PushSent {
        return Ok((tx.clone(), None));
    }
    match outcome {
        None => tx.time_out()?,
        Some(outcome) if !outcome.succeeded => {
            let reason = if outcome.description.trim().is_empty() {
                "the payer did not complete the payment".to_string()
            } else {
                outcome.description
            };
            tx.fail(reason)?
        }
        Some(outcome) => match outcome
            .provider_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
        {
            Some(receipt) => tx.confirm(receipt)?,
            None => tx.fail("the provider reported success without a receipt number")?,
        },
    }
    let tx = tx.clone();
    let credited = match tx.status {
        TransactionStatus::Confirmed => credit(snapshot, &tx)?,
        _ => None,
    };
    Ok((tx, credited))
}

fn credit(snapshot: &mut LedgerSnapshot, tx: &Transaction) -> Result<Option<UserId>> {
    let beneficiary = match &tx.purpose {
        Purpose::TopUp => Some(tx.payer_id),
        Purpose::Job(job_id) => snapshot.get::<Job>(*job_id)?.tasker_id,
        Purpose::Registration | Purpose::Other(_) => None,
    };
    if let Some(user_id) = beneficiary {
        snapshot.get_mut::<User>(user_id)?.balance.credit(tx.amount);
    }
    Ok(beneficiary)
}
