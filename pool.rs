//! Contract of the external concentrated-liquidity pool.
//!
//! The episode never owns a pool: it is handed `&mut dyn Pool` (or a generic
//! `P: Pool`) so tests can swap in [`LocalPool`](crate::local_pool::LocalPool)
//! or a scripted fake.

use alloy_primitives::U256;

use crate::error::PoolError;

/// Snapshot returned by [`Pool::current_state`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolState {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    /// Active liquidity at the current tick.
    pub liquidity: u128,
    /// Cumulative fees per unit of liquidity, raw token0.
    pub fee_growth_global0: f64,
    pub fee_growth_global1: f64,
}

/// Pool-side token deltas of a swap. Positive values were paid into the pool,
/// negative values were paid out to the trader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapDelta {
    pub delta0: i128,
    pub delta1: i128,
}

pub trait Pool {
    /// Set the starting price. Fails if already initialised.
    fn initialize(&mut self, sqrt_price_x96: U256) -> Result<(), PoolError>;

    /// Add `liquidity` on `[lower, upper)`; returns raw `(amount0, amount1)` owed.
    fn mint(&mut self, lower: i32, upper: i32, liquidity: u128) -> Result<(u128, u128), PoolError>;

    /// Exact-input swap bounded by `sqrt_price_limit_x96`.
    fn swap(
        &mut self,
        zero_for_one: bool,
        amount_in: u128,
        sqrt_price_limit_x96: U256,
    ) -> Result<SwapDelta, PoolError>;

    fn current_state(&self) -> Result<PoolState, PoolError>;

    fn tick_spacing(&self) -> i32;

    fn fee_ppm(&self) -> u32;

    /// Uncollected fees owed to the position on `[lower, upper)`, raw units.
    ///
    /// `None` when the pool exposes no such introspection; callers then fall
    /// back to an estimate.
    fn position_fees(&self, _lower: i32, _upper: i32) -> Option<(f64, f64)> {
        None
    }
}

impl<P: Pool + ?Sized> Pool for &mut P {
    fn initialize(&mut self, sqrt_price_x96: U256) -> Result<(), PoolError> {
        (**self).initialize(sqrt_price_x96)
    }

    fn mint(&mut self, lower: i32, upper: i32, liquidity: u128) -> Result<(u128, u128), PoolError> {
        (**self).mint(lower, upper, liquidity)
    }

    fn swap(
        &mut self,
        zero_for_one: bool,
        amount_in: u128,
        sqrt_price_limit_x96: U256,
    ) -> Result<SwapDelta, PoolError> {
        (**self).swap(zero_for_one, amount_in, sqrt_price_limit_x96)
    }

    fn current_state(&self) -> Result<PoolState, PoolError> {
        (**self).current_state()
    }

    fn tick_spacing(&self) -> i32 {
        (**self).tick_spacing()
    }

    fn fee_ppm(&self) -> u32 {
        (**self).fee_ppm()
    }

    fn position_fees(&self, lower: i32, upper: i32) -> Option<(f64, f64)> {
        (**self).position_fees(lower, upper)
    }
}
