use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    instrument::Pair, ledger::LedgerError, orderbook::BookError, store::StoreError, trade::Trade,
};

/// Every failure the exchange reports to a caller.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InsufficientFunds(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Settlement broke after a fill; the pair accepts nothing until an
    /// operator intervenes. `trades` were executed before the failure.
    #[error("market {pair} is halted: {reason}")]
    Halted {
        pair: Pair,
        reason: String,
        trades: Vec<Trade>,
    },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl From<LedgerError> for ExchangeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { .. } => ExchangeError::InsufficientFunds(e.to_string()),
            LedgerError::WalletNotFound { .. } => ExchangeError::NotFound(e.to_string()),
            LedgerError::NonPositiveAmount
            | LedgerError::TooPrecise { .. }
            | LedgerError::SupplyCap { .. }
            | LedgerError::Overflow { .. } => ExchangeError::Validation(e.to_string()),
            LedgerError::ReservationUnderflow { .. } => ExchangeError::Conflict(e.to_string()),
        }
    }
}

impl From<BookError> for ExchangeError {
    fn from(e: BookError) -> Self {
        match e {
            BookError::NotFound(_) => ExchangeError::NotFound(e.to_string()),
            BookError::WrongPair { .. } | BookError::NothingToRest(_) => {
                ExchangeError::Validation(e.to_string())
            }
        }
    }
}

impl ExchangeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ExchangeError::Validation(_) | ExchangeError::InsufficientFunds(_) => {
                StatusCode::BAD_REQUEST
            }
            ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::Conflict(_) => StatusCode::CONFLICT,
            ExchangeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ExchangeError::Halted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ExchangeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ExchangeError::Store(e) => {
                tracing::error!(error = %e, "storage failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
