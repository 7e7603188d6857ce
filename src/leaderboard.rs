//! Trading points and the public ranking.
//!
//! Each accepted order earns `floor(10 * quantity)` points and counts as
//! one trade for its owner. Ranking is by points, highest first; accounts
//! with equal points share a rank and the next rank skips accordingly
//! (1, 1, 3).

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Serialize;

use crate::orders::AccountId;

/// How many standings the public leaderboard shows.
pub const LEADERBOARD_SIZE: usize = 100;

const POINTS_PER_UNIT: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub points: i64,
    #[serde(rename = "totalTrades")]
    pub total_trades: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedStanding {
    pub rank: u32,
    pub id: AccountId,
    pub points: i64,
    #[serde(rename = "totalTrades")]
    pub total_trades: u64,
}

pub fn points_for(quantity: Decimal) -> i64 {
    (quantity * Decimal::from(POINTS_PER_UNIT))
        .floor()
        .to_i64()
        .unwrap_or(i64::MAX)
}

#[derive(Default)]
pub struct Leaderboard {
    standings: RwLock<HashMap<AccountId, Standing>>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits an accepted order of `quantity` to `account`.
    pub fn record_order(&self, account: &AccountId, quantity: Decimal) -> Standing {
        let mut standings = self.standings.write();
        let s = standings.entry(account.clone()).or_default();
        s.points = s.points.saturating_add(points_for(quantity));
        s.total_trades += 1;
        *s
    }

    pub fn standing(&self, account: &AccountId) -> Option<Standing> {
        self.standings.read().get(account).copied()
    }

    /// Every standing in rank order. Ties on points are listed by account id
    /// so the output is stable.
    pub fn ranked(&self) -> Vec<RankedStanding> {
        let mut rows: Vec<(AccountId, Standing)> = self
            .standings
            .read()
            .iter()
            .map(|(a, s)| (a.clone(), *s))
            .collect();
        rows.sort_by(|(a1, s1), (a2, s2)| s2.points.cmp(&s1.points).then_with(|| a1.cmp(a2)));

        let mut ranked = Vec::with_capacity(rows.len());
        let mut rank = 0u32;
        let mut prev: Option<i64> = None;
        for (i, (id, s)) in rows.into_iter().enumerate() {
            if prev != Some(s.points) {
                rank = i as u32 + 1;
                prev = Some(s.points);
            }
            ranked.push(RankedStanding {
                rank,
                id,
                points: s.points,
                total_trades: s.total_trades,
            });
        }
        ranked
    }

    pub fn top(&self, n: usize) -> Vec<RankedStanding> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    /// Competition rank of `account`, or `None` if it never placed an order.
    pub fn rank_of(&self, account: &AccountId) -> Option<u32> {
        let standings = self.standings.read();
        let mine = standings.get(account)?.points;
        let ahead = standings.values().filter(|s| s.points > mine).count();
        Some(ahead as u32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn points_floor_ten_per_unit() {
        assert_eq!(points_for(dec!(1.0)), 10);
        assert_eq!(points_for(dec!(0.25)), 2);
        assert_eq!(points_for(dec!(0.05)), 0);
    }

    #[test]
    fn ties_share_rank_and_next_rank_skips() {
        let lb = Leaderboard::new();
        lb.record_order(&AccountId::new("a"), dec!(2));
        lb.record_order(&AccountId::new("b"), dec!(2));
        lb.record_order(&AccountId::new("c"), dec!(1));
        lb.record_order(&AccountId::new("c"), dec!(0.5));

        let ranked = lb.ranked();
        let ranks: Vec<(String, u32)> = ranked
            .iter()
            .map(|r| (r.id.to_string(), r.rank))
            .collect();
        assert_eq!(
            ranks,
            vec![("a".into(), 1), ("b".into(), 1), ("c".into(), 3)]
        );
        assert_eq!(ranked[2].total_trades, 2);
        assert_eq!(ranked[2].points, 15);
        assert_eq!(lb.rank_of(&AccountId::new("c")), Some(3));
        assert_eq!(lb.rank_of(&AccountId::new("b")), Some(1));
        assert_eq!(lb.rank_of(&AccountId::new("zed")), None);
    }

    #[test]
    fn top_truncates() {
        let lb = Leaderboard::new();
        for i in 0..5 {
            lb.record_order(&AccountId::new(format!("u{i}")), Decimal::from(i));
        }
        let top = lb.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, AccountId::new("u4"));
    }
}
