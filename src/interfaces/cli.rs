use crate::application::ledger::Ledger;
use crate::application::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::config::EnvConfig;
use crate::domain::ids::{JobId, UserId};
use crate::domain::job::NewJob;
use crate::domain::money::Amount;
use crate::domain::ports::PaymentGateway;
use crate::domain::transaction::Purpose;
use crate::domain::user::Role;
use crate::error::Result;
use crate::infrastructure::json_file::JsonFileStore;
use crate::infrastructure::mpesa::{MpesaGateway, SANDBOX_BASE_URL};
use crate::infrastructure::simulated::{FixedOtpProvider, SimulatedBehaviour, SimulatedGateway};
use crate::interfaces::http;
use clap::{Parser, Subcommand, ValueEnum};
use log::*;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CALLBACK_URL: &str = "https://your-domain.com/callback";

#[derive(Parser, Debug)]
#[command(author, version, about = "Payments, reconciliation and ratings for a gig marketplace", long_about = None)]
pub struct Cli {
    /// Ledger document, created on first write
    #[arg(long, global = true, default_value = "data.json")]
    pub ledger: PathBuf,

    /// Payment provider to push payments through
    #[arg(long, global = true, value_enum, default_value_t = GatewayKind::Simulated)]
    pub gateway: GatewayKind,

    /// How the simulated provider answers: confirm, decline, reject, silent or unavailable
    #[arg(long, global = true, default_value = "confirm")]
    pub simulate: SimulatedBehaviour,

    /// Seconds to wait for the provider's confirmation after a push
    #[arg(long, global = true, default_value_t = 30)]
    pub confirmation_timeout: u64,

    #[arg(long, global = true, default_value = SANDBOX_BASE_URL)]
    pub mpesa_base_url: String,

    /// Where the provider should post its confirmation
    #[arg(long, global = true, default_value = DEFAULT_CALLBACK_URL)]
    pub callback_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GatewayKind {
    Simulated,
    Mpesa,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a one-time passcode to a phone number
    RequestOtp { phone: String },
    /// Verify a passcode and print the user id, registering on first login
    Login {
        phone: String,
        #[arg(long)]
        otp: String,
    },
    /// Switch a user between the client and tasker roles
    Role { user: UserId, role: Role },
    /// Post a job as a client
    PostJob {
        #[arg(long)]
        client: UserId,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        budget: Decimal,
        #[arg(long, default_value = "")]
        location: String,
    },
    /// List every job
    Jobs,
    /// Assign a tasker to a job
    Assign { job: JobId, tasker: UserId },
    /// Mark a job as completed
    Complete { job: JobId },
    /// Push a payment to the payer's phone and wait for its confirmation
    Pay {
        #[arg(long)]
        payer: UserId,
        #[arg(long)]
        amount: Decimal,
        /// registration, topup, job:<job id> or any other tag
        #[arg(long, default_value = "registration")]
        purpose: String,
    },
    /// Review the tasker of a completed job
    Review {
        #[arg(long)]
        job: JobId,
        #[arg(long)]
        tasker: UserId,
        #[arg(long)]
        client: UserId,
        /// Whole stars from 1 to 5
        #[arg(long)]
        rating: u8,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Print a user
    User { id: UserId },
    /// Recompute and print a tasker's rating
    Rating { tasker: UserId },
    /// Print the whole ledger
    Snapshot,
    /// Accept provider callbacks and payment requests over HTTP on $PORT
    Serve,
}

impl Cli {
    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            confirmation_deadline: Duration::from_secs(self.confirmation_timeout),
            ..OrchestratorConfig::default()
        }
    }

    fn gateway(&self, env: &EnvConfig, request_timeout: Duration) -> Result<Arc<dyn PaymentGateway>> {
        match self.gateway {
            GatewayKind::Simulated => {
                debug!("Using the simulated gateway ({})", self.simulate);
                Ok(Arc::new(SimulatedGateway::new(self.simulate)))
            }
            GatewayKind::Mpesa => {
                let config = env.mpesa(&self.mpesa_base_url, &self.callback_url, request_timeout)?;
                info!("Using the M-Pesa gateway at {}", config.base_url);
                Ok(Arc::new(MpesaGateway::new(config)?))
            }
        }
    }
}

/// Opens the ledger, wires the orchestrator and executes one command.
pub async fn run(cli: Cli) -> Result<()> {
    let env = EnvConfig::from_env();
    let config = cli.orchestrator_config();
    let gateway = cli.gateway(&env, config.request_timeout)?;
    let ledger = Arc::new(Ledger::open(Box::new(JsonFileStore::new(&cli.ledger))).await?);
    let orchestrator = Arc::new(Orchestrator::new(
        ledger,
        gateway,
        Arc::new(FixedOtpProvider::default()),
        config,
    ));

    match cli.command {
        Command::RequestOtp { phone } => {
            let phone = orchestrator.request_otp(&phone).await?;
            println!("Passcode sent to {phone}");
        }
        Command::Login { phone, otp } => {
            println!("{}", orchestrator.login(&phone, &otp).await?);
        }
        Command::Role { user, role } => print_json(&orchestrator.select_role(user, role).await?)?,
        Command::PostJob {
            client,
            title,
            description,
            budget,
            location,
        } => {
            let new_job = NewJob {
                title,
                description,
                budget: Amount::new(budget)?,
                location,
            };
            println!("{}", orchestrator.post_job(client, new_job).await?);
        }
        Command::Jobs => print_json(&orchestrator.list_jobs().await)?,
        Command::Assign { job, tasker } => print_json(&orchestrator.assign_tasker(job, tasker).await?)?,
        Command::Complete { job } => print_json(&orchestrator.complete_job(job).await?)?,
        Command::Pay {
            payer,
            amount,
            purpose,
        } => {
            let id = orchestrator
                .pay_now(payer, Amount::new(amount)?, Purpose::parse(&purpose)?)
                .await?;
            println!("{id}");
        }
        Command::Review {
            job,
            tasker,
            client,
            rating,
            comment,
        } => {
            let id = orchestrator
                .submit_review(job, tasker, client, rating, &comment)
                .await?;
            println!("{id}");
        }
        Command::User { id } => print_json(&orchestrator.get_user(id).await?)?,
        Command::Rating { tasker } => println!("{}", orchestrator.recompute_rating(tasker).await?),
        Command::Snapshot => print_json(&orchestrator.ledger().snapshot().await)?,
        Command::Serve => http::serve(orchestrator, env.port).await?,
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
