use std::{net::SocketAddr, path::PathBuf};

use clap::Args;

pub const DEFAULT_LOG_FILTER: &str = "spot_exchange=info,tower_http=info";

/// Server settings; every flag can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "EXCHANGE_ADDR", default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,

    /// Directory of the trade history database
    #[arg(long, env = "EXCHANGE_DB_PATH", default_value = "data/trades")]
    pub db_path: PathBuf,

    /// Shared secret used to verify bearer tokens (HS256)
    #[arg(long, env = "EXCHANGE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Browser origin allowed to call the API
    #[arg(long, env = "EXCHANGE_CORS_ORIGIN", default_value = "http://localhost:3000")]
    pub cors_origin: String,
}

#[derive(Args, Debug, Clone)]
pub struct SimArgs {
    /// Base URL of a running exchange
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub api_base: String,

    /// Secret the exchange verifies tokens with
    #[arg(long, env = "EXCHANGE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Number of concurrent trading bots
    #[arg(long, default_value_t = 4)]
    pub bots: usize,

    /// Stop after this many seconds (runs until Ctrl-C if omitted)
    #[arg(long)]
    pub run_secs: Option<u64>,

    /// Mean orders per second per bot
    #[arg(long, default_value_t = 1.0)]
    pub rate_hz: f64,

    /// Std-dev of the mid-price random walk per order
    #[arg(long, default_value_t = 2.0)]
    pub noise_sigma: f64,

    /// Mean order size
    #[arg(long, default_value_t = 0.5)]
    pub mean_qty: f64,

    /// Starting mid price
    #[arg(long, default_value_t = 500.0)]
    pub mid_price: f64,
}
