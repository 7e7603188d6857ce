use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use bincode::{
    Decode, Encode,
    config::standard,
    error::{DecodeError, EncodeError},
};
use chrono::{DateTime, Utc};
use parity_db::{BTreeIterator, ColId, Db, Options};
use rust_decimal::Decimal;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    instrument::Pair,
    orders::{AccountId, Side},
    trade::{Trade, Transaction},
};

/// Trades, keyed by `len ++ "{pair}:" ++ ts_nanos ++ sequence ++ trade_id`.
const TRADES: ColId = 0;
/// Per-account transactions, keyed by `len ++ "{account}:" ++ ts_nanos ++ sequence ++ trade_id ++ side`.
const TRANSACTIONS: ColId = 1;

//Cursor (opaque to clients)
#[derive(serde::Serialize, serde::Deserialize)]
struct Cursor {
    ts_nanos: i64,
    sequence: u64,
    trade_id: Uuid,
    side: Option<Side>,
}

/// Errors from the key/value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),

    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),

    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Invalid cursor")]
    BadCursor,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk shape of a trade. Decimals are kept in their 16-byte form and
/// timestamps as Unix nanoseconds.
#[derive(Encode, Decode)]
struct StoredTrade {
    id: u128,
    sequence: u64,
    pair: String,
    buy_order_id: u128,
    sell_order_id: u128,
    buyer: String,
    seller: String,
    taker_is_buy: bool,
    price: [u8; 16],
    quantity: [u8; 16],
    ts_nanos: i64,
}

fn nanos(ts: DateTime<Utc>) -> i64 {
    // representable until the year 2262
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn side_byte(side: Side) -> u8 {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

impl From<&Trade> for StoredTrade {
    fn from(t: &Trade) -> Self {
        StoredTrade {
            id: t.id.as_u128(),
            sequence: t.sequence,
            pair: t.pair.code(),
            buy_order_id: t.buy_order_id.as_u128(),
            sell_order_id: t.sell_order_id.as_u128(),
            buyer: t.buyer.0.clone(),
            seller: t.seller.0.clone(),
            taker_is_buy: t.taker_side == Side::Buy,
            price: t.price.serialize(),
            quantity: t.quantity.serialize(),
            ts_nanos: nanos(t.timestamp),
        }
    }
}

impl TryFrom<StoredTrade> for Trade {
    type Error = StoreError;
    fn try_from(s: StoredTrade) -> StoreResult<Self> {
        Ok(Trade {
            id: Uuid::from_u128(s.id),
            sequence: s.sequence,
            pair: s.pair.parse::<Pair>().map_err(StoreError::Corrupt)?,
            buy_order_id: Uuid::from_u128(s.buy_order_id),
            sell_order_id: Uuid::from_u128(s.sell_order_id),
            buyer: AccountId(s.buyer),
            seller: AccountId(s.seller),
            taker_side: if s.taker_is_buy { Side::Buy } else { Side::Sell },
            price: Decimal::deserialize(s.price),
            quantity: Decimal::deserialize(s.quantity),
            timestamp: DateTime::from_timestamp_nanos(s.ts_nanos),
        })
    }
}

/// A ParityDB-backed, append-only record of executed trades and of each
/// account's side of them.
pub struct Store {
    db: Db,
}

impl Store {
    /// Open (or create) a ParityDB at `path`, with B-tree indexed columns for
    /// prefix scans.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), 2);
        opts.columns[TRADES as usize].btree_index = true;
        opts.columns[TRANSACTIONS as usize].btree_index = true;
        let db = Db::open_or_create(&opts)?;
        Ok(Store { db })
    }

    #[inline]
    fn prefix(scope: &str) -> Vec<u8> {
        // length first, so no scope is a byte prefix of another ("a" vs "a:b")
        let mut k = Vec::with_capacity(scope.len() + 5);
        k.extend_from_slice(&(scope.len() as u32).to_be_bytes());
        k.extend_from_slice(scope.as_bytes());
        k.push(b':');
        k
    }

    #[inline]
    fn key(scope: &str, ts_nanos: i64, sequence: u64, trade_id: Uuid, side: Option<Side>) -> Vec<u8> {
        let mut k = Self::prefix(scope);
        // flip the sign bit so big-endian bytes sort like the signed value
        k.extend_from_slice(&((ts_nanos as u64) ^ (1 << 63)).to_be_bytes());
        k.extend_from_slice(&sequence.to_be_bytes());
        k.extend_from_slice(trade_id.as_bytes());
        if let Some(side) = side {
            k.push(side_byte(side));
        }
        k
    }

    #[inline]
    fn encode_cursor(c: &Cursor) -> StoreResult<String> {
        let bytes = serde_json::to_vec(c).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(B64.encode(bytes))
    }

    #[inline]
    fn decode_cursor(s: &str) -> StoreResult<Cursor> {
        let bytes = B64.decode(s).map_err(|_| StoreError::BadCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::BadCursor)
    }

    /// Persist a trade under its pair and both of its transactions under
    /// their accounts, in one commit.
    pub fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        let value = bincode::encode_to_vec(StoredTrade::from(trade), standard())?;
        let ts = nanos(trade.timestamp);
        let mut batch = vec![(
            TRADES,
            Self::key(&trade.pair.code(), ts, trade.sequence, trade.id, None),
            Some(value.clone()),
        )];
        for tx in trade.transactions() {
            batch.push((
                TRANSACTIONS,
                Self::key(tx.account.as_str(), ts, trade.sequence, trade.id, Some(tx.side)),
                Some(value.clone()),
            ));
        }
        self.db.commit(batch)?;
        Ok(())
    }

    pub fn insert_trades<'a>(&self, trades: impl IntoIterator<Item = &'a Trade>) -> StoreResult<()> {
        for t in trades {
            self.insert_trade(t)?;
        }
        Ok(())
    }

    /// Walks one prefix in ascending key order, starting strictly after the
    /// cursor's key. The cursor must name a key that exists under `scope`.
    fn page<T>(
        &self,
        col: ColId,
        scope: &str,
        after: Option<&str>,
        limit: usize,
        decode: impl Fn(&[u8], Trade) -> StoreResult<(T, Cursor)>,
    ) -> StoreResult<(Vec<T>, Option<String>)> {
        let mut it: BTreeIterator<'_> = self.db.iter(col)?;
        let prefix = Self::prefix(scope);

        if let Some(s) = after {
            let c = Self::decode_cursor(s)?;
            let full = Self::key(scope, c.ts_nanos, c.sequence, c.trade_id, c.side);
            let mut check = self.db.iter(col)?;
            check.seek(&full)?;
            match check.next()? {
                Some((k, _)) if k == full => {}
                _ => return Err(StoreError::BadCursor),
            }
            // Start strictly after that exact key
            it.seek(&full)?;
            let _ = it.next()?; //consume the equal key
        } else {
            it.seek(&prefix)?;
        }

        let mut items = Vec::with_capacity(limit.min(256));
        let mut last_cursor: Option<String> = None;
        while items.len() < limit {
            match it.next()? {
                Some((k, v)) if k.starts_with(&prefix) => {
                    let (stored, _): (StoredTrade, usize) =
                        bincode::decode_from_slice(&v, standard())?;
                    let (item, cursor) = decode(&k, Trade::try_from(stored)?)?;
                    last_cursor = Some(Self::encode_cursor(&cursor)?);
                    items.push(item);
                }
                _ => break,
            }
        }
        Ok((items, last_cursor))
    }

    /// A page of `pair`'s trades, oldest first.
    pub fn page_trades(
        &self,
        pair: Pair,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Trade>, Option<String>)> {
        self.page(TRADES, &pair.code(), after, limit, |_, trade| {
            let cursor = Cursor {
                ts_nanos: nanos(trade.timestamp),
                sequence: trade.sequence,
                trade_id: trade.id,
                side: None,
            };
            Ok((trade, cursor))
        })
    }

    /// A page of `account`'s transactions, oldest first.
    pub fn page_transactions(
        &self,
        account: &AccountId,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Transaction>, Option<String>)> {
        self.page(TRANSACTIONS, account.as_str(), after, limit, |key, trade| {
            let side = match key.last() {
                Some(0) => Side::Buy,
                Some(1) => Side::Sell,
                _ => return Err(StoreError::Corrupt("transaction key without side".into())),
            };
            let [buy, sell] = trade.transactions();
            let tx = match side {
                Side::Buy => buy,
                Side::Sell => sell,
            };
            let cursor = Cursor {
                ts_nanos: nanos(tx.date),
                sequence: trade.sequence,
                trade_id: tx.trade_id,
                side: Some(side),
            };
            Ok((tx, cursor))
        })
    }

    /// The account's complete history, oldest first.
    pub fn transactions(&self, account: &AccountId) -> StoreResult<Vec<Transaction>> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let (page, next) = self.page_transactions(account, after.as_deref(), 512)?;
            let done = page.len() < 512;
            all.extend(page);
            if done || next.is_none() {
                return Ok(all);
            }
            after = next;
        }
    }
}
