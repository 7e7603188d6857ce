//utils for graceful shutdown that can be used on the
//any module in the project
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    //spawn once to listen for ctrl-c
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => {
                error!(error = %e, "failed to install ctrl-c handler");
                return;
            }
        }
        tc.cancel();
    });
    token
}

/// Installs the global `tracing` subscriber; `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
