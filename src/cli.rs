use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    api::{cors_layer, router},
    auth::issue_token,
    config::{DEFAULT_LOG_FILTER, ServeArgs, SimArgs},
    orders::AccountId,
    simulate::run_simulation,
    state::AppState,
    utils::{init_tracing, shutdown_token},
};

/// Spot exchange core: ledger, order books and matching behind an HTTP API
#[derive(Parser)]
#[command(name = "spot-exchange", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(ServeArgs),

    /// Mint a development bearer token for an account
    Token {
        /// Account id to put in the `sub` claim
        account: String,

        #[arg(long, env = "EXCHANGE_JWT_SECRET", hide_env_values = true)]
        jwt_secret: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },

    /// Drive randomized trading bots against a running server
    Simulate(SimArgs),
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let state = AppState::new(&args.db_path, &args.jwt_secret)
        .with_context(|| format!("opening trade store at {}", args.db_path.display()))?;
    let cors = cors_layer(&args.cors_origin).context("invalid --cors-origin")?;
    let app = router(state).layer(cors);

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %args.addr, "exchange listening");

    let token = shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("exchange stopped");
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(DEFAULT_LOG_FILTER);
    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Token {
            account,
            jwt_secret,
            ttl_secs,
        } => {
            let token = issue_token(
                &jwt_secret,
                &AccountId::new(account),
                Duration::from_secs(ttl_secs),
            )?;
            println!("{}", token);
            Ok(())
        }
        Commands::Simulate(args) => {
            let report = run_simulation(args, shutdown_token()).await?;
            println!(
                "--- done --- sent={} rejected={} trades={}",
                report.sent, report.rejected, report.trades
            );
            Ok(())
        }
    }
}
