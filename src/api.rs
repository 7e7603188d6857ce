use axum::{
    Json, Router, debug_handler,
    extract::{FromRequest, Path, Query, Request, State, rejection::JsonRejection},
    http::{
        HeaderName, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, InvalidHeaderValue},
    },
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    auth::Authenticated,
    engine::NewOrder,
    errors::{ExchangeError, ExchangeResult},
    instrument::{Asset, Pair},
    leaderboard::{LEADERBOARD_SIZE, RankedStanding},
    orderbook::BookSnapshot,
    orders::{Order, OrderId, OrderStatus, Side},
    state::AppState,
    trade::{Trade, Transaction},
};

const DEFAULT_PAGE: usize = 100;
const MAX_PAGE: usize = 1000;
const RECENT_WINDOW_DAYS: i64 = 7;

const EFFECTIVE_LIMIT: HeaderName = HeaderName::from_static("x-effective-limit");

/// `Json` that logs why a body was rejected and answers `{"error": ...}`.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Send,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(LoggedJson(value)),
            Err(rejection) => {
                let reason = rejection.body_text();
                warn!(status = %rejection.status(), %reason, "rejected request body");
                Err((rejection.status(), Json(json!({ "error": reason }))))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub currency: String,
    #[serde(rename = "type")]
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderAck {
    pub message: String,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub trades: Vec<Trade>,
}

/// A resting order as its owner sees it.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderView {
    pub id: OrderId,
    pub currency: Asset,
    #[serde(rename = "type")]
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(o: Order) -> Self {
        OrderView {
            id: o.id,
            currency: o.pair.base,
            side: o.side,
            price: o.price,
            amount: o.quantity,
            remaining: o.remaining,
            status: o.status(),
            created_at: o.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletEntry {
    pub currency: Asset,
    /// Spendable balance.
    pub balance: Decimal,
    pub reserved: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

impl PageQuery {
    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSummary {
    pub total_buy_volume: Decimal,
    pub total_sell_volume: Decimal,
    pub recent_transactions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub points: i64,
    pub total_trades: u64,
    pub rank: u32,
    pub transactions: TradingSummary,
}

fn currency_pair(currency: &str) -> ExchangeResult<Pair> {
    Pair::for_currency(currency).map_err(ExchangeError::Validation)
}

fn asset(currency: &str) -> ExchangeResult<Asset> {
    currency.parse::<Asset>().map_err(ExchangeError::Validation)
}

/// Trades are already settled when this runs; a storage failure only costs
/// history, so it is logged rather than failing the order.
fn record_trades(state: &AppState, trades: &[Trade]) {
    if let Err(e) = state.store.insert_trades(trades) {
        error!(error = %e, trades = trades.len(), "failed to persist trades");
    }
}

#[debug_handler]
pub async fn create_order(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    LoggedJson(payload): LoggedJson<CreateOrderRequest>,
) -> ExchangeResult<(StatusCode, Json<OrderAck>)> {
    let pair = currency_pair(&payload.currency)?;
    let request = NewOrder {
        pair,
        side: payload.side,
        price: payload.price,
        quantity: payload.amount,
    };
    let exec = match state.engine.submit(&account, request) {
        Ok(exec) => exec,
        Err(ExchangeError::Halted {
            pair,
            reason,
            trades,
        }) => {
            record_trades(&state, &trades);
            return Err(ExchangeError::Halted {
                pair,
                reason,
                trades,
            });
        }
        Err(e) => return Err(e),
    };
    record_trades(&state, &exec.trades);

    let message = if exec.trades.is_empty() {
        "Order placed"
    } else {
        "Order created and matched successfully"
    };
    Ok((
        StatusCode::CREATED,
        Json(OrderAck {
            message: message.to_string(),
            order_id: exec.order.id,
            status: exec.status,
            filled: exec.order.filled(),
            remaining: exec.order.remaining,
            trades: exec.trades,
        }),
    ))
}

pub async fn get_order_book(
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> ExchangeResult<Json<BookSnapshot>> {
    let pair = currency_pair(&currency)?;
    Ok(Json(state.engine.snapshot(pair)?))
}

pub async fn get_open_orders(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Json<Vec<OrderView>> {
    Json(
        state
            .engine
            .open_orders(&account)
            .into_iter()
            .map(OrderView::from)
            .collect(),
    )
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    Path(order_id): Path<Uuid>,
) -> ExchangeResult<Json<OrderView>> {
    let mut order = OrderView::from(state.engine.cancel(&account, order_id)?);
    order.status = OrderStatus::Cancelled;
    Ok(Json(order))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> Json<Vec<WalletEntry>> {
    Json(
        state
            .engine
            .ledger()
            .balances(&account)
            .into_iter()
            .map(|(currency, b)| WalletEntry {
                currency,
                balance: b.available,
                reserved: b.reserved,
            })
            .collect(),
    )
}

pub async fn deposit(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    LoggedJson(payload): LoggedJson<AmountRequest>,
) -> ExchangeResult<Json<Value>> {
    let currency = asset(&payload.currency)?;
    let balance = state
        .engine
        .ledger()
        .deposit(&account, currency, payload.amount)?;
    Ok(Json(json!({
        "message": "Deposit successful",
        "currency": currency,
        "amount": payload.amount,
        "balance": balance.available,
    })))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    LoggedJson(payload): LoggedJson<AmountRequest>,
) -> ExchangeResult<Json<Value>> {
    let currency = asset(&payload.currency)?;
    let balance = state
        .engine
        .ledger()
        .withdraw(&account, currency, payload.amount)?;
    Ok(Json(json!({
        "message": "Withdrawal successful",
        "currency": currency,
        "remaining_balance": balance.available,
    })))
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
    Query(q): Query<PageQuery>,
) -> ExchangeResult<impl IntoResponse> {
    let limit = q.effective_limit();
    let (items, next) = state
        .store
        .page_transactions(&account, q.after.as_deref(), limit)
        .map_err(bad_cursor)?;
    Ok((
        [(EFFECTIVE_LIMIT, HeaderValue::from(limit))],
        Json(Page::<Transaction> { items, next }),
    ))
}

pub async fn get_trades(
    State(state): State<AppState>,
    Path(currency): Path<String>,
    Query(q): Query<PageQuery>,
) -> ExchangeResult<impl IntoResponse> {
    let pair = currency_pair(&currency)?;
    let limit = q.effective_limit();
    let (items, next) = state
        .store
        .page_trades(pair, q.after.as_deref(), limit)
        .map_err(bad_cursor)?;
    Ok((
        [(EFFECTIVE_LIMIT, HeaderValue::from(limit))],
        Json(Page::<Trade> { items, next }),
    ))
}

fn bad_cursor(e: crate::store::StoreError) -> ExchangeError {
    match e {
        crate::store::StoreError::BadCursor => ExchangeError::Validation("invalid cursor".into()),
        other => ExchangeError::Store(other),
    }
}

pub async fn popular_currencies() -> Json<Vec<Asset>> {
    Json(Asset::all().to_vec())
}

pub async fn get_leaderboard(State(state): State<AppState>) -> Json<Vec<RankedStanding>> {
    Json(state.engine.leaderboard().top(LEADERBOARD_SIZE))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Authenticated(account): Authenticated,
) -> ExchangeResult<Json<Profile>> {
    let leaderboard = state.engine.leaderboard();
    let standing = leaderboard.standing(&account).unwrap_or_default();
    let history = state.store.transactions(&account)?;
    let since = Utc::now() - Duration::days(RECENT_WINDOW_DAYS);

    let volume = |side: Side| -> Decimal {
        history
            .iter()
            .filter(|t| t.side == side)
            .fold(Decimal::ZERO, |sum, t| sum.saturating_add(t.volume()))
    };
    Ok(Json(Profile {
        user_id: account.to_string(),
        points: standing.points,
        total_trades: standing.total_trades,
        rank: leaderboard.rank_of(&account).unwrap_or(0),
        transactions: TradingSummary {
            total_buy_volume: volume(Side::Buy),
            total_sell_volume: volume(Side::Sell),
            recent_transactions: history.iter().filter(|t| t.date >= since).count(),
        },
    }))
}

pub async fn check_token(Authenticated(account): Authenticated) -> Json<Value> {
    Json(json!({ "user_id": account }))
}

/// CORS for the browser client served from `origin`.
pub fn cors_layer(origin: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/orderbook/create", post(create_order))
        .route("/api/orderbook/{currency}", get(get_order_book))
        .route("/api/orders", get(get_open_orders))
        .route("/api/orders/{id}", delete(cancel_order))
        .route("/api/wallet", get(get_wallet))
        .route("/api/wallet/deposit", post(deposit))
        .route("/api/wallet/withdraw", post(withdraw))
        .route("/api/transactions", get(get_transactions))
        .route("/api/trades/{currency}", get(get_trades))
        .route("/api/popular_currencies", get(popular_currencies))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/user/profile", get(get_profile))
        .route("/api/check", get(check_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
