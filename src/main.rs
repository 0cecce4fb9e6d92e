use clap::Parser;
use miette::{IntoDiagnostic, Result};
use taskerpay::interfaces::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    cli::run(cli).await.into_diagnostic()
}
