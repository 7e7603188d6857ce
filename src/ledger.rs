//! Per-account, per-currency balances.
//!
//! Every wallet is split into `available` (spendable, withdrawable) and
//! `reserved` (locked behind open orders). All mutations go through one
//! lock, so a settlement touching two accounts is atomic with respect to
//! any other reservation, release or settlement.
//!
//! Deposits are the only source of funds, so capping each asset's supply at
//! [`MAX_SUPPLY`] bounds every balance and keeps all arithmetic exact.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    amount::{MAX_DECIMALS, MAX_SUPPLY, exact_add, exact_mul, exact_sub, within_precision},
    instrument::{Asset, Pair},
    orders::AccountId,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient {asset} balance: available {available}, requested {requested}")]
    InsufficientFunds {
        asset: Asset,
        available: Decimal,
        requested: Decimal,
    },
    #[error("no {asset} wallet for account {account}")]
    WalletNotFound { account: AccountId, asset: Asset },
    #[error("reserved {asset} of {account} is {reserved}, cannot take {requested}")]
    ReservationUnderflow {
        account: AccountId,
        asset: Asset,
        reserved: Decimal,
        requested: Decimal,
    },
    #[error("amount must be > 0")]
    NonPositiveAmount,
    #[error("{asset} amounts allow at most {max} decimal places, got {amount}", max = MAX_DECIMALS)]
    TooPrecise { asset: Asset, amount: Decimal },
    #[error("deposit of {requested} {asset} would take its supply of {supply} above {cap}", cap = MAX_SUPPLY)]
    SupplyCap {
        asset: Asset,
        supply: Decimal,
        requested: Decimal,
    },
    #[error("{asset} balance of {account} cannot be computed exactly")]
    Overflow { account: AccountId, asset: Asset },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Balance {
    pub available: Decimal,
    pub reserved: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.available.saturating_add(self.reserved)
    }
}

/// Ledger effect of one fill between a buyer and a seller.
///
/// `buyer_limit` is the limit price the buyer reserved quote at; the gap
/// between it and `price` flows back to the buyer's available balance.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub pair: Pair,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub buyer_limit: Decimal,
}

type Wallets = HashMap<AccountId, BTreeMap<Asset, Balance>>;

#[derive(Default)]
struct Accounts {
    wallets: Wallets,
    /// Deposits minus withdrawals, per asset. Trading never changes it.
    supply: BTreeMap<Asset, Decimal>,
}

#[derive(Default)]
pub struct Ledger {
    accounts: RwLock<Accounts>,
}

/// Copy-on-write view over the wallets a multi-leg operation touches.
/// Nothing reaches the ledger until the changes are committed, so a failing leg leaves
/// every balance untouched.
struct Staged<'a> {
    wallets: &'a Wallets,
    touched: HashMap<(AccountId, Asset), Balance>,
}

impl<'a> Staged<'a> {
    fn new(wallets: &'a Wallets) -> Self {
        Staged {
            wallets,
            touched: HashMap::new(),
        }
    }

    fn entry(&mut self, account: &AccountId, asset: Asset) -> &mut Balance {
        let wallets = self.wallets;
        self.touched
            .entry((account.clone(), asset))
            .or_insert_with(|| {
                wallets
                    .get(account)
                    .and_then(|w| w.get(&asset))
                    .copied()
                    .unwrap_or_default()
            })
    }

    fn take_reserved(
        &mut self,
        account: &AccountId,
        asset: Asset,
        amount: Decimal,
    ) -> LedgerResult<()> {
        let bal = self.entry(account, asset);
        if bal.reserved < amount {
            return Err(LedgerError::ReservationUnderflow {
                account: account.clone(),
                asset,
                reserved: bal.reserved,
                requested: amount,
            });
        }
        bal.reserved = exact_sub(bal.reserved, amount).ok_or_else(|| overflow(account, asset))?;
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, asset: Asset, amount: Decimal) -> LedgerResult<()> {
        let bal = self.entry(account, asset);
        bal.available = exact_add(bal.available, amount).ok_or_else(|| overflow(account, asset))?;
        Ok(())
    }

    fn into_changes(self) -> HashMap<(AccountId, Asset), Balance> {
        self.touched
    }
}

fn commit(wallets: &mut Wallets, changes: HashMap<(AccountId, Asset), Balance>) {
    for ((account, asset), bal) in changes {
        wallets.entry(account).or_default().insert(asset, bal);
    }
}

fn overflow(account: &AccountId, asset: Asset) -> LedgerError {
    LedgerError::Overflow {
        account: account.clone(),
        asset,
    }
}

/// A transfer amount must be positive and within [`MAX_DECIMALS`] places.
fn transfer_amount(asset: Asset, amount: Decimal) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount);
    }
    if !within_precision(amount) {
        return Err(LedgerError::TooPrecise { asset, amount });
    }
    Ok(())
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &AccountId, asset: Asset) -> Balance {
        self.accounts
            .read()
            .wallets
            .get(account)
            .and_then(|w| w.get(&asset))
            .copied()
            .unwrap_or_default()
    }

    /// Every wallet the account holds, ordered by currency.
    pub fn balances(&self, account: &AccountId) -> Vec<(Asset, Balance)> {
        self.accounts
            .read()
            .wallets
            .get(account)
            .map(|w| w.iter().map(|(a, b)| (*a, *b)).collect())
            .unwrap_or_default()
    }

    /// Sum of available + reserved over all accounts.
    pub fn total(&self, asset: Asset) -> Decimal {
        self.accounts
            .read()
            .wallets
            .values()
            .filter_map(|w| w.get(&asset))
            .fold(Decimal::ZERO, |sum, b| sum.saturating_add(b.total()))
    }

    /// Deposits minus withdrawals of `asset` so far.
    pub fn supply(&self, asset: Asset) -> Decimal {
        self.accounts
            .read()
            .supply
            .get(&asset)
            .copied()
            .unwrap_or_default()
    }

    pub fn deposit(
        &self,
        account: &AccountId,
        asset: Asset,
        amount: Decimal,
    ) -> LedgerResult<Balance> {
        transfer_amount(asset, amount)?;
        let mut guard = self.accounts.write();
        let Accounts { wallets, supply } = &mut *guard;

        let current = supply.get(&asset).copied().unwrap_or_default();
        let raised = exact_add(current, amount)
            .filter(|s| *s <= MAX_SUPPLY)
            .ok_or_else(|| {
                warn!(%account, %asset, %amount, supply = %current, "deposit over supply cap refused");
                LedgerError::SupplyCap {
                    asset,
                    supply: current,
                    requested: amount,
                }
            })?;
        let bal = wallets
            .entry(account.clone())
            .or_default()
            .entry(asset)
            .or_default();
        // within the supply cap, so exact
        bal.available = exact_add(bal.available, amount).ok_or_else(|| overflow(account, asset))?;
        supply.insert(asset, raised);
        debug!(%account, %asset, %amount, "deposit");
        Ok(*bal)
    }

    pub fn withdraw(
        &self,
        account: &AccountId,
        asset: Asset,
        amount: Decimal,
    ) -> LedgerResult<Balance> {
        transfer_amount(asset, amount)?;
        let mut guard = self.accounts.write();
        let Accounts { wallets, supply } = &mut *guard;
        let bal = wallets
            .get_mut(account)
            .and_then(|w| w.get_mut(&asset))
            .ok_or_else(|| LedgerError::WalletNotFound {
                account: account.clone(),
                asset,
            })?;
        if bal.available < amount {
            return Err(LedgerError::InsufficientFunds {
                asset,
                available: bal.available,
                requested: amount,
            });
        }
        bal.available = exact_sub(bal.available, amount).ok_or_else(|| overflow(account, asset))?;
        let current = supply.get(&asset).copied().unwrap_or_default();
        supply.insert(asset, exact_sub(current, amount).unwrap_or_default());
        debug!(%account, %asset, %amount, "withdraw");
        Ok(*bal)
    }

    /// Moves `amount` from available to reserved.
    pub fn reserve(&self, account: &AccountId, asset: Asset, amount: Decimal) -> LedgerResult<()> {
        let mut guard = self.accounts.write();
        let bal = guard
            .wallets
            .get_mut(account)
            .and_then(|w| w.get_mut(&asset));
        let available = bal.as_ref().map(|b| b.available).unwrap_or_default();
        match bal {
            Some(bal) if bal.available >= amount => {
                let moved = exact_sub(bal.available, amount)
                    .zip(exact_add(bal.reserved, amount))
                    .ok_or_else(|| overflow(account, asset))?;
                (bal.available, bal.reserved) = moved;
                Ok(())
            }
            _ => Err(LedgerError::InsufficientFunds {
                asset,
                available,
                requested: amount,
            }),
        }
    }

    /// Moves `amount` from reserved back to available.
    pub fn release(&self, account: &AccountId, asset: Asset, amount: Decimal) -> LedgerResult<()> {
        let mut guard = self.accounts.write();
        let changes = {
            let mut staged = Staged::new(&guard.wallets);
            staged.take_reserved(account, asset, amount)?;
            staged.credit(account, asset, amount)?;
            staged.into_changes()
        };
        commit(&mut guard.wallets, changes);
        Ok(())
    }

    /// Applies every leg of a fill or none of them.
    pub fn settle(&self, s: &Settlement) -> LedgerResult<()> {
        let quote = |account: &AccountId| overflow(account, s.pair.quote);
        let locked_quote = exact_mul(s.buyer_limit, s.quantity).ok_or_else(|| quote(&s.buyer))?;
        let paid = exact_mul(s.price, s.quantity).ok_or_else(|| quote(&s.seller))?;
        let improvement = exact_sub(locked_quote, paid).ok_or_else(|| quote(&s.buyer))?;

        let mut guard = self.accounts.write();
        let changes = {
            let mut staged = Staged::new(&guard.wallets);
            staged.take_reserved(&s.seller, s.pair.base, s.quantity)?;
            staged.take_reserved(&s.buyer, s.pair.quote, locked_quote)?;
            staged.credit(&s.buyer, s.pair.base, s.quantity)?;
            staged.credit(&s.seller, s.pair.quote, paid)?;
            if !improvement.is_zero() {
                staged.credit(&s.buyer, s.pair.quote, improvement)?;
            }
            staged.into_changes()
        };
        commit(&mut guard.wallets, changes);
        debug!(pair = %s.pair, buyer = %s.buyer, seller = %s.seller, price = %s.price, quantity = %s.quantity, "settled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::BTC_USDC;
    use rust_decimal_macros::dec;

    fn acct(s: &str) -> AccountId {
        AccountId::new(s)
    }

    #[test]
    fn reserve_moves_available_to_reserved() {
        let l = Ledger::new();
        l.deposit(&acct("a"), Asset::USDC, dec!(100)).unwrap();
        l.reserve(&acct("a"), Asset::USDC, dec!(40)).unwrap();
        let b = l.balance(&acct("a"), Asset::USDC);
        assert_eq!(b.available, dec!(60));
        assert_eq!(b.reserved, dec!(40));
    }

    #[test]
    fn reserve_rejects_overdraft_without_change() {
        let l = Ledger::new();
        l.deposit(&acct("a"), Asset::BTC, dec!(1)).unwrap();
        let err = l.reserve(&acct("a"), Asset::BTC, dec!(1.5)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(l.balance(&acct("a"), Asset::BTC).available, dec!(1));
        assert!(matches!(
            l.reserve(&acct("nobody"), Asset::BTC, dec!(1)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn release_returns_reserved() {
        let l = Ledger::new();
        l.deposit(&acct("a"), Asset::BTC, dec!(2)).unwrap();
        l.reserve(&acct("a"), Asset::BTC, dec!(2)).unwrap();
        l.release(&acct("a"), Asset::BTC, dec!(0.5)).unwrap();
        let b = l.balance(&acct("a"), Asset::BTC);
        assert_eq!(b.available, dec!(0.5));
        assert_eq!(b.reserved, dec!(1.5));
        assert!(matches!(
            l.release(&acct("a"), Asset::BTC, dec!(5)),
            Err(LedgerError::ReservationUnderflow { .. })
        ));
    }

    #[test]
    fn withdraw_checks_wallet_and_available() {
        let l = Ledger::new();
        assert!(matches!(
            l.withdraw(&acct("a"), Asset::ETH, dec!(1)),
            Err(LedgerError::WalletNotFound { .. })
        ));
        l.deposit(&acct("a"), Asset::ETH, dec!(3)).unwrap();
        l.reserve(&acct("a"), Asset::ETH, dec!(2)).unwrap();
        assert!(matches!(
            l.withdraw(&acct("a"), Asset::ETH, dec!(2)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        let b = l.withdraw(&acct("a"), Asset::ETH, dec!(1)).unwrap();
        assert_eq!(b.available, Decimal::ZERO);
        assert_eq!(b.reserved, dec!(2));
    }

    #[test]
    fn deposit_rejects_non_positive() {
        let l = Ledger::new();
        assert_eq!(
            l.deposit(&acct("a"), Asset::BTC, Decimal::ZERO),
            Err(LedgerError::NonPositiveAmount)
        );
        assert!(l.balances(&acct("a")).is_empty());
    }

    #[test]
    fn deposit_rejects_more_than_eight_places() {
        let l = Ledger::new();
        assert!(matches!(
            l.deposit(&acct("a"), Asset::BTC, dec!(0.000000001)),
            Err(LedgerError::TooPrecise { .. })
        ));
        l.deposit(&acct("a"), Asset::BTC, dec!(0.00000001)).unwrap();
    }

    #[test]
    fn huge_deposits_are_refused_not_panicking() {
        let l = Ledger::new();
        assert!(matches!(
            l.deposit(&acct("a"), Asset::USDC, Decimal::MAX),
            Err(LedgerError::SupplyCap { .. })
        ));
        l.deposit(&acct("a"), Asset::USDC, MAX_SUPPLY).unwrap();
        let err = l.deposit(&acct("b"), Asset::USDC, dec!(1)).unwrap_err();
        assert!(matches!(err, LedgerError::SupplyCap { .. }));
        assert!(l.balances(&acct("b")).is_empty());
        assert_eq!(l.supply(Asset::USDC), MAX_SUPPLY);

        // withdrawing frees room under the cap again
        l.withdraw(&acct("a"), Asset::USDC, dec!(10)).unwrap();
        l.deposit(&acct("b"), Asset::USDC, dec!(10)).unwrap();
        assert_eq!(l.total(Asset::USDC), MAX_SUPPLY);
    }

    #[test]
    fn settle_refuses_a_rounded_notional() {
        let l = Ledger::new();
        l.deposit(&acct("buyer"), Asset::USDC, dec!(10)).unwrap();
        l.reserve(&acct("buyer"), Asset::USDC, dec!(10)).unwrap();
        let err = l
            .settle(&Settlement {
                pair: BTC_USDC,
                buyer: acct("buyer"),
                seller: acct("seller"),
                price: dec!(1.0000000000000000000000000006),
                quantity: dec!(9),
                buyer_limit: dec!(1.0000000000000000000000000006),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(l.balance(&acct("buyer"), Asset::USDC).reserved, dec!(10));
    }

    #[test]
    fn settle_transfers_and_refunds_price_improvement() {
        let l = Ledger::new();
        l.deposit(&acct("buyer"), Asset::USDC, dec!(100)).unwrap();
        l.deposit(&acct("seller"), Asset::BTC, dec!(1)).unwrap();
        l.reserve(&acct("buyer"), Asset::USDC, dec!(100)).unwrap();
        l.reserve(&acct("seller"), Asset::BTC, dec!(1)).unwrap();

        l.settle(&Settlement {
            pair: BTC_USDC,
            buyer: acct("buyer"),
            seller: acct("seller"),
            price: dec!(95),
            quantity: dec!(1),
            buyer_limit: dec!(100),
        })
        .unwrap();

        let buyer_usdc = l.balance(&acct("buyer"), Asset::USDC);
        assert_eq!(buyer_usdc.available, dec!(5));
        assert_eq!(buyer_usdc.reserved, Decimal::ZERO);
        assert_eq!(l.balance(&acct("buyer"), Asset::BTC).available, dec!(1));
        assert_eq!(l.balance(&acct("seller"), Asset::USDC).available, dec!(95));
        assert_eq!(l.balance(&acct("seller"), Asset::BTC).total(), Decimal::ZERO);
        assert_eq!(l.total(Asset::USDC), dec!(100));
        assert_eq!(l.total(Asset::BTC), dec!(1));
    }

    #[test]
    fn settle_is_all_or_nothing() {
        let l = Ledger::new();
        l.deposit(&acct("seller"), Asset::BTC, dec!(1)).unwrap();
        l.reserve(&acct("seller"), Asset::BTC, dec!(1)).unwrap();
        // buyer never reserved any quote
        let err = l
            .settle(&Settlement {
                pair: BTC_USDC,
                buyer: acct("buyer"),
                seller: acct("seller"),
                price: dec!(10),
                quantity: dec!(1),
                buyer_limit: dec!(10),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::ReservationUnderflow { .. }));
        assert_eq!(l.balance(&acct("seller"), Asset::BTC).reserved, dec!(1));
        assert!(l.balances(&acct("buyer")).is_empty());
    }

    #[test]
    fn self_trade_settles_consistently() {
        let l = Ledger::new();
        let me = acct("me");
        l.deposit(&me, Asset::USDC, dec!(50)).unwrap();
        l.deposit(&me, Asset::BTC, dec!(1)).unwrap();
        l.reserve(&me, Asset::USDC, dec!(50)).unwrap();
        l.reserve(&me, Asset::BTC, dec!(1)).unwrap();
        l.settle(&Settlement {
            pair: BTC_USDC,
            buyer: me.clone(),
            seller: me.clone(),
            price: dec!(50),
            quantity: dec!(1),
            buyer_limit: dec!(50),
        })
        .unwrap();
        assert_eq!(l.balance(&me, Asset::USDC).available, dec!(50));
        assert_eq!(l.balance(&me, Asset::BTC).available, dec!(1));
        assert_eq!(l.balance(&me, Asset::BTC).reserved, Decimal::ZERO);
    }
}
