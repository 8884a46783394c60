//! Per-range fee accrual (LP fee state).
//!
//! Read from the pool's owed-fee accounting when it is exposed. Otherwise
//! each swap's fee-growth delta is attributed to the ranges containing the
//! pre- or post-swap tick, `Δ feeGrowthGlobal × L_range`, and the ledger is
//! flagged as an estimate.

use std::collections::BTreeMap;

use crate::pool::{Pool, PoolState};
use crate::tick_math::PriceCodec;
use crate::types::Range;

/// Accrued, uncollected fees of one range in raw token units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AccruedFees {
    pub fee0: f64,
    pub fee1: f64,
}

#[derive(Clone, Debug, Default)]
pub struct FeeLedger {
    entries: BTreeMap<(i32, i32), (u128, AccruedFees)>,
    estimated: bool,
}

impl FeeLedger {
    /// Empty ledger over the minted ranges.
    pub fn new(ranges: &[Range]) -> Self {
        let entries = ranges
            .iter()
            .map(|r| (r.key(), (r.liquidity, AccruedFees::default())))
            .collect();
        Self { entries, estimated: false }
    }

    /// Bring the ledger up to date after a filled swap.
    pub fn on_swap<P: Pool + ?Sized>(&mut self, pool: &P, before: &PoolState, after: &PoolState) {
        if !self.read_from_pool(pool) {
            self.estimate(before, after);
        }
    }

    /// Replace entries with the pool's own figures. False when the pool does
    /// not expose them.
    fn read_from_pool<P: Pool + ?Sized>(&mut self, pool: &P) -> bool {
        if self.estimated {
            return false;
        }
        for (&(lo, hi), (_, acc)) in self.entries.iter_mut() {
            let Some((f0, f1)) = pool.position_fees(lo, hi) else {
                self.estimated = true;
                return false;
            };
            // never decreases
            acc.fee0 = acc.fee0.max(f0);
            acc.fee1 = acc.fee1.max(f1);
        }
        true
    }

    fn estimate(&mut self, before: &PoolState, after: &PoolState) {
        self.estimated = true;
        let d0 = (after.fee_growth_global0 - before.fee_growth_global0).max(0.0);
        let d1 = (after.fee_growth_global1 - before.fee_growth_global1).max(0.0);
        if d0 == 0.0 && d1 == 0.0 {
            return;
        }
        for (&(lo, hi), (liq, acc)) in self.entries.iter_mut() {
            let touched = (lo <= before.tick && before.tick < hi) || (lo <= after.tick && after.tick < hi);
            if touched {
                acc.fee0 += d0 * *liq as f64;
                acc.fee1 += d1 * *liq as f64;
            }
        }
    }

    pub fn get(&self, lower: i32, upper: i32) -> Option<AccruedFees> {
        self.entries.get(&(lower, upper)).map(|&(_, acc)| acc)
    }

    /// Sum over all ranges, raw units.
    pub fn totals(&self) -> AccruedFees {
        self.entries.values().fold(AccruedFees::default(), |mut t, (_, a)| {
            t.fee0 += a.fee0;
            t.fee1 += a.fee1;
            t
        })
    }

    /// Total fees valued in quote units at `price`.
    pub fn value_quote(&self, codec: &PriceCodec, price: f64) -> f64 {
        let t = self.totals();
        codec.amount0_to_human(t.fee0) * price + codec.amount1_to_human(t.fee1)
    }

    pub fn is_estimated(&self) -> bool {
        self.estimated
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
