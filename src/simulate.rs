//! Load generator that trades against a running exchange over HTTP.
//!
//! Each bot gets its own account and token, funds every wallet, then keeps
//! posting randomized limit orders:
//! - inter-arrival delays are drawn from `Exp(rate_hz)` (Poisson order flow)
//! - sizes are `Exp1 * mean_qty`, so most orders are small with a heavy tail
//! - each bot walks its own mid price with `N(0, noise_sigma)` noise and
//!   quotes one unit either side of it
//!
//! The run stops after `run_secs` or when the cancellation token fires.

use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use rand::Rng;
use rand_distr::{Distribution, Exp, Exp1, Normal};
use reqwest::Client;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde_json::json;
use tokio::{task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    auth::issue_token,
    config::SimArgs,
    instrument::{Asset, Pair},
    orders::AccountId,
};

const FUNDING: [(Asset, i64); 3] = [(Asset::BTC, 1_000), (Asset::ETH, 1_000), (Asset::USDC, 10_000_000)];

#[derive(Debug, Default, Clone, Copy)]
pub struct BotReport {
    pub sent: u64,
    pub rejected: u64,
    pub trades: u64,
}

struct Bot {
    client: Client,
    api_base: String,
    token: String,
}

impl Bot {
    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?)
    }

    async fn fund(&self) -> anyhow::Result<()> {
        for (asset, amount) in FUNDING {
            self.post(
                "/api/wallet/deposit",
                json!({ "currency": asset, "amount": amount }),
            )
            .await?
            .error_for_status()
            .with_context(|| format!("deposit of {asset} failed"))?;
        }
        Ok(())
    }

    /// Posts one order and returns how many trades it produced, or `None`
    /// if the exchange rejected it.
    async fn send_one_order(
        &self,
        currency: Asset,
        side: &str,
        price: Decimal,
        amount: Decimal,
    ) -> anyhow::Result<Option<usize>> {
        let resp = self
            .post(
                "/api/orderbook/create",
                json!({
                    "currency": currency,
                    "type": side,
                    "price": price,
                    "amount": amount,
                }),
            )
            .await?;
        if resp.status().is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%currency, side, %price, %amount, %body, "order rejected");
            return Ok(None);
        }
        let ack = resp.error_for_status()?.json::<serde_json::Value>().await?;
        Ok(Some(
            ack.get("trades")
                .and_then(|t| t.as_array())
                .map(|t| t.len())
                .unwrap_or(0),
        ))
    }
}

async fn run_bot(
    id: usize,
    cfg: SimArgs,
    cancel_token: CancellationToken,
) -> anyhow::Result<BotReport> {
    let account = AccountId::new(format!("bot-{id}"));
    let bot = Bot {
        client: Client::new(),
        api_base: cfg.api_base.trim_end_matches('/').to_string(),
        token: issue_token(&cfg.jwt_secret, &account, Duration::from_secs(24 * 3600))?,
    };
    bot.fund().await?;
    info!(%account, "bot funded");

    let ia_dist = Exp::new(cfg.rate_hz).map_err(|e| anyhow!("rate_hz must be > 0: {e}"))?;
    let drift = Normal::new(0.0, cfg.noise_sigma).map_err(|e| anyhow!("noise_sigma must be >= 0: {e}"))?;
    let tradable: Vec<Asset> = Pair::supported().iter().map(|p| p.base).collect();

    let mut report = BotReport::default();
    let mut mid_price = cfg.mid_price;
    let start = Instant::now();

    loop {
        if let Some(max_secs) = cfg.run_secs {
            if start.elapsed().as_secs() >= max_secs {
                break;
            }
        }
        let wait_secs = ia_dist.sample(&mut rand::rng());
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = sleep(Duration::from_secs_f64(wait_secs)) => {
                let (currency, side, price, amount) = {
                    let mut rng = rand::rng();
                    let raw: f64 = Exp1.sample(&mut rng);
                    mid_price = (mid_price + drift.sample(&mut rng)).max(2.0);
                    let (price, side) = if rng.random_bool(0.5) {
                        (mid_price - 1.0, "buy")
                    } else {
                        (mid_price + 1.0, "sell")
                    };
                    let currency = tradable[rng.random_range(0..tradable.len())];
                    (currency, side, price, raw * cfg.mean_qty)
                };
                let price = Decimal::from_f64(price).unwrap_or(Decimal::ONE).round_dp(2);
                let amount = Decimal::from_f64(amount)
                    .unwrap_or_default()
                    .round_dp(4)
                    .max(Decimal::new(1, 4));

                report.sent += 1;
                match bot.send_one_order(currency, side, price, amount).await? {
                    Some(trades) => report.trades += trades as u64,
                    None => report.rejected += 1,
                }
            }
        }
    }
    Ok(report)
}

/// Runs `cfg.bots` bots concurrently and sums their reports.
pub async fn run_simulation(cfg: SimArgs, cancel_token: CancellationToken) -> anyhow::Result<BotReport> {
    let mut bots = JoinSet::new();
    for id in 0..cfg.bots {
        bots.spawn(run_bot(id, cfg.clone(), cancel_token.clone()));
    }

    let mut total = BotReport::default();
    while let Some(joined) = bots.join_next().await {
        let report = joined??;
        total.sent += report.sent;
        total.rejected += report.rejected;
        total.trades += report.trades;
    }
    info!(sent = total.sent, rejected = total.rejected, trades = total.trades, "simulation finished");
    Ok(total)
}
