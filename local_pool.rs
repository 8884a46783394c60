//! In-memory concentrated-liquidity pool.
//!
//! Ticks live in a `BTreeMap` carrying `liquidity_net` and fee growth
//! outside; positions carry fee-growth snapshots so owed fees can be read
//! back exactly. Prices move in `f64` but every resting price is stored as an
//! exact `sqrtPriceX96`. The current tick is derived from it, except that a
//! boundary crossed downward leaves the tick one below the boundary.
//!
//! Swaps are exact-input and fill-or-revert: the whole input is consumed or
//! the call reverts and nothing changes.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use tracing::trace;

use crate::error::PoolError;
use crate::liquidity_math::{amount0_delta, amount1_delta, mint_amounts};
use crate::pool::{Pool, PoolState, SwapDelta};
use crate::tick_math::{
    f64_to_sqrt_price_x96, max_usable_tick, min_usable_tick, sqrt_price_x96_to_f64,
    sqrt_price_x96_to_tick, tick_to_sqrt_price_x96, MAX_SQRT_RATIO, MIN_SQRT_RATIO,
};
use crate::types::FEE_DENOMINATOR;

/// Input left over below this (raw units) counts as filled.
const DUST: f64 = 0.5;

#[derive(Clone, Debug, Default)]
struct TickInfo {
    liquidity_gross: u128,
    liquidity_net: i128,
    fee_growth_outside0: f64,
    fee_growth_outside1: f64,
}

#[derive(Clone, Debug, Default)]
struct PositionInfo {
    liquidity: u128,
    fee_growth_inside0_last: f64,
    fee_growth_inside1_last: f64,
    owed0: f64,
    owed1: f64,
}

#[derive(Clone, Debug)]
pub struct LocalPool {
    tick_spacing: i32,
    fee_ppm: u32,
    expose_fees: bool,
    initialized: bool,
    sqrt_price_x96: U256,
    tick: i32,
    liquidity: u128,
    fee_growth_global0: f64,
    fee_growth_global1: f64,
    ticks: BTreeMap<i32, TickInfo>,
    positions: BTreeMap<(i32, i32), PositionInfo>,
}

impl LocalPool {
    pub fn new(fee_ppm: u32, tick_spacing: i32) -> Self {
        Self {
            tick_spacing,
            fee_ppm,
            expose_fees: true,
            initialized: false,
            sqrt_price_x96: U256::ZERO,
            tick: 0,
            liquidity: 0,
            fee_growth_global0: 0.0,
            fee_growth_global1: 0.0,
            ticks: BTreeMap::new(),
            positions: BTreeMap::new(),
        }
    }

    /// Hide owed-fee introspection, so callers must estimate fees.
    pub fn without_fee_introspection(mut self) -> Self {
        self.expose_fees = false;
        self
    }

    pub fn position_liquidity(&self, lower: i32, upper: i32) -> u128 {
        self.positions.get(&(lower, upper)).map_or(0, |p| p.liquidity)
    }

    /// Next initialised tick at or below `tick` (down) or strictly above it (up).
    fn next_initialized_tick(&self, tick: i32, down: bool) -> Option<i32> {
        if down {
            self.ticks.range(..=tick).next_back().map(|(&t, _)| t)
        } else {
            self.ticks
                .range((std::ops::Bound::Excluded(tick), std::ops::Bound::Unbounded))
                .next()
                .map(|(&t, _)| t)
        }
    }

    fn fee_growth_inside(&self, lower: i32, upper: i32) -> (f64, f64) {
        let outside = |t: i32| {
            self.ticks
                .get(&t)
                .map_or((0.0, 0.0), |i| (i.fee_growth_outside0, i.fee_growth_outside1))
        };
        let (lo0, lo1) = outside(lower);
        let (hi0, hi1) = outside(upper);
        let (g0, g1) = (self.fee_growth_global0, self.fee_growth_global1);

        let (below0, below1) = if self.tick >= lower { (lo0, lo1) } else { (g0 - lo0, g1 - lo1) };
        let (above0, above1) = if self.tick < upper { (hi0, hi1) } else { (g0 - hi0, g1 - hi1) };
        (g0 - below0 - above0, g1 - below1 - above1)
    }

    fn update_tick(&mut self, tick: i32, liquidity: u128, is_upper: bool) {
        let (g0, g1, current) = (self.fee_growth_global0, self.fee_growth_global1, self.tick);
        let info = self.ticks.entry(tick).or_default();
        if info.liquidity_gross == 0 && tick <= current {
            info.fee_growth_outside0 = g0;
            info.fee_growth_outside1 = g1;
        }
        info.liquidity_gross += liquidity;
        if is_upper {
            info.liquidity_net -= liquidity as i128;
        } else {
            info.liquidity_net += liquidity as i128;
        }
    }

    fn check_range(&self, lower: i32, upper: i32) -> Result<(), PoolError> {
        let s = self.tick_spacing;
        if lower >= upper
            || lower < min_usable_tick(s)
            || upper > max_usable_tick(s)
            || lower.rem_euclid(s) != 0
            || upper.rem_euclid(s) != 0
        {
            return Err(PoolError::InvalidTickRange { lower, upper });
        }
        Ok(())
    }
}

/// Mutable part of the pool a swap works on before committing.
struct SwapState {
    sqrt_price_x96: U256,
    tick: i32,
    liquidity: u128,
    fee_growth_global0: f64,
    fee_growth_global1: f64,
    /// (tick, fee growth globals at the moment it was crossed)
    crossed: Vec<(i32, f64, f64)>,
}

impl SwapState {
    /// Credit `fee` (input token) to the liquidity active on this segment.
    fn accrue(&mut self, zero_for_one: bool, fee: f64, liquidity: f64) {
        if liquidity <= 0.0 {
            return;
        }
        if zero_for_one {
            self.fee_growth_global0 += fee / liquidity;
        } else {
            self.fee_growth_global1 += fee / liquidity;
        }
    }
}

fn tick_of(sqrt_price_x96: U256) -> Result<i32, PoolError> {
    sqrt_price_x96_to_tick(sqrt_price_x96).map_err(|e| PoolError::Call(e.to_string()))
}

fn sqrt_at(tick: i32) -> Result<U256, PoolError> {
    tick_to_sqrt_price_x96(tick).map_err(|e| PoolError::Call(e.to_string()))
}

impl Pool for LocalPool {
    fn initialize(&mut self, sqrt_price_x96: U256) -> Result<(), PoolError> {
        if self.initialized {
            return Err(PoolError::AlreadyInitialized);
        }
        self.tick = tick_of(sqrt_price_x96)?;
        self.sqrt_price_x96 = sqrt_price_x96;
        self.initialized = true;
        Ok(())
    }

    fn mint(&mut self, lower: i32, upper: i32, liquidity: u128) -> Result<(u128, u128), PoolError> {
        if !self.initialized {
            return Err(PoolError::NotInitialized);
        }
        self.check_range(lower, upper)?;
        if liquidity == 0 {
            return Err(PoolError::ZeroLiquidity);
        }

        self.update_tick(lower, liquidity, false);
        self.update_tick(upper, liquidity, true);
        if lower <= self.tick && self.tick < upper {
            self.liquidity += liquidity;
        }

        let (in0, in1) = self.fee_growth_inside(lower, upper);
        let pos = self.positions.entry((lower, upper)).or_default();
        let held = pos.liquidity as f64;
        pos.owed0 += (held * (in0 - pos.fee_growth_inside0_last)).max(0.0);
        pos.owed1 += (held * (in1 - pos.fee_growth_inside1_last)).max(0.0);
        pos.fee_growth_inside0_last = in0;
        pos.fee_growth_inside1_last = in1;
        pos.liquidity += liquidity;

        let s = sqrt_price_x96_to_f64(self.sqrt_price_x96);
        let sa = sqrt_price_x96_to_f64(sqrt_at(lower)?);
        let sb = sqrt_price_x96_to_f64(sqrt_at(upper)?);
        Ok(mint_amounts(s, sa, sb, liquidity))
    }

    fn swap(
        &mut self,
        zero_for_one: bool,
        amount_in: u128,
        sqrt_price_limit_x96: U256,
    ) -> Result<SwapDelta, PoolError> {
        if !self.initialized {
            return Err(PoolError::NotInitialized);
        }
        if amount_in == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let limit_ok = if zero_for_one {
            sqrt_price_limit_x96 < self.sqrt_price_x96 && sqrt_price_limit_x96 > MIN_SQRT_RATIO
        } else {
            sqrt_price_limit_x96 > self.sqrt_price_x96 && sqrt_price_limit_x96 < MAX_SQRT_RATIO
        };
        if !limit_ok {
            return Err(PoolError::InvalidPriceLimit { current_tick: self.tick });
        }

        let fee_rate = self.fee_ppm as f64 / FEE_DENOMINATOR;
        let mut st = SwapState {
            sqrt_price_x96: self.sqrt_price_x96,
            tick: self.tick,
            liquidity: self.liquidity,
            fee_growth_global0: self.fee_growth_global0,
            fee_growth_global1: self.fee_growth_global1,
            crossed: Vec::new(),
        };
        let mut remaining = amount_in as f64;
        let mut amount_out = 0.0_f64;

        while remaining > DUST {
            if st.sqrt_price_x96 == sqrt_price_limit_x96 {
                return Err(PoolError::PriceLimit { unfilled: remaining.ceil() as u128 });
            }
            let next = self.next_initialized_tick(st.tick, zero_for_one);
            let next_x96 = match next {
                Some(t) => Some(sqrt_at(t)?),
                None => None,
            };
            let target = match (next_x96, zero_for_one) {
                (Some(x), true) => x.max(sqrt_price_limit_x96),
                (Some(x), false) => x.min(sqrt_price_limit_x96),
                (None, _) => sqrt_price_limit_x96,
            };

            let s = sqrt_price_x96_to_f64(st.sqrt_price_x96);
            let t = sqrt_price_x96_to_f64(target);
            let l = st.liquidity as f64;
            let (max_in, max_out) = if zero_for_one {
                (amount0_delta(t, s, l), amount1_delta(t, s, l))
            } else {
                (amount1_delta(s, t, l), amount0_delta(s, t, l))
            };
            let gross_max = max_in / (1.0 - fee_rate);

            if remaining >= gross_max {
                // accrue before crossing so the segment's fee stays inside
                st.accrue(zero_for_one, gross_max - max_in, l);
                amount_out += max_out;
                remaining -= gross_max;
                st.sqrt_price_x96 = target;
                match next {
                    Some(tick) if Some(target) == next_x96 => {
                        let net = self.ticks.get(&tick).map_or(0, |i| i.liquidity_net);
                        let signed = if zero_for_one { -net } else { net };
                        st.liquidity = (st.liquidity as i128 + signed).max(0) as u128;
                        st.crossed.push((tick, st.fee_growth_global0, st.fee_growth_global1));
                        st.tick = if zero_for_one { tick - 1 } else { tick };
                    }
                    _ => st.tick = tick_of(target)?,
                }
            } else {
                let net_in = remaining * (1.0 - fee_rate);
                st.accrue(zero_for_one, remaining - net_in, l);
                let new_s = if zero_for_one { 1.0 / (1.0 / s + net_in / l) } else { s + net_in / l };
                amount_out += if zero_for_one {
                    amount1_delta(new_s, s, l)
                } else {
                    amount0_delta(s, new_s, l)
                };
                let one = U256::from(1u8);
                let mut new_x96 = f64_to_sqrt_price_x96(new_s);
                new_x96 = if zero_for_one {
                    new_x96.max(target + one).min(st.sqrt_price_x96)
                } else {
                    new_x96.min(target - one).max(st.sqrt_price_x96)
                };
                st.sqrt_price_x96 = new_x96;
                st.tick = tick_of(new_x96)?;
                remaining = 0.0;
            }
        }

        // commit
        for (tick, g0, g1) in st.crossed {
            if let Some(info) = self.ticks.get_mut(&tick) {
                info.fee_growth_outside0 = g0 - info.fee_growth_outside0;
                info.fee_growth_outside1 = g1 - info.fee_growth_outside1;
            }
        }
        self.sqrt_price_x96 = st.sqrt_price_x96;
        self.tick = st.tick;
        self.liquidity = st.liquidity;
        self.fee_growth_global0 = st.fee_growth_global0;
        self.fee_growth_global1 = st.fee_growth_global1;

        let out = amount_out.floor() as i128;
        trace!(zero_for_one, amount_in, amount_out = out, tick = self.tick, "local pool swap");
        Ok(if zero_for_one {
            SwapDelta { delta0: amount_in as i128, delta1: -out }
        } else {
            SwapDelta { delta0: -out, delta1: amount_in as i128 }
        })
    }

    fn current_state(&self) -> Result<PoolState, PoolError> {
        if !self.initialized {
            return Err(PoolError::NotInitialized);
        }
        Ok(PoolState {
            sqrt_price_x96: self.sqrt_price_x96,
            tick: self.tick,
            liquidity: self.liquidity,
            fee_growth_global0: self.fee_growth_global0,
            fee_growth_global1: self.fee_growth_global1,
        })
    }

    fn tick_spacing(&self) -> i32 {
        self.tick_spacing
    }

    fn fee_ppm(&self) -> u32 {
        self.fee_ppm
    }

    fn position_fees(&self, lower: i32, upper: i32) -> Option<(f64, f64)> {
        if !self.expose_fees {
            return None;
        }
        let Some(pos) = self.positions.get(&(lower, upper)) else {
            return Some((0.0, 0.0));
        };
        let (in0, in1) = self.fee_growth_inside(lower, upper);
        let held = pos.liquidity as f64;
        Some((
            pos.owed0 + (held * (in0 - pos.fee_growth_inside0_last)).max(0.0),
            pos.owed1 + (held * (in1 - pos.fee_growth_inside1_last)).max(0.0),
        ))
    }
}
