//! Token amounts held by a liquidity position, piecewise in the current price.
//!
//! All square-root prices here are unscaled (`√(raw price)`), amounts are raw
//! token units as `f64`.
//!
//! ```text
//! s <= sa       amount0 = L·(sb - sa)/(sa·sb)        amount1 = 0
//! sa < s < sb   amount0 = L·(sb - s)/(s·sb)          amount1 = L·(s - sa)
//! s >= sb       amount0 = 0                          amount1 = L·(sb - sa)
//! ```

use crate::error::SimResult;
use crate::tick_math::{sqrt_price_x96_to_f64, tick_to_sqrt_price_x96};

/// Unscaled sqrt prices of a tick range's edges, from the exact codec.
pub fn range_sqrt_bounds(lower_tick: i32, upper_tick: i32) -> SimResult<(f64, f64)> {
    let sa = sqrt_price_x96_to_f64(tick_to_sqrt_price_x96(lower_tick)?);
    let sb = sqrt_price_x96_to_f64(tick_to_sqrt_price_x96(upper_tick)?);
    Ok((sa, sb))
}

#[inline]
pub fn amount0_delta(sa: f64, sb: f64, liquidity: f64) -> f64 {
    let (lo, hi) = if sa <= sb { (sa, sb) } else { (sb, sa) };
    liquidity * (hi - lo) / (lo * hi)
}

#[inline]
pub fn amount1_delta(sa: f64, sb: f64, liquidity: f64) -> f64 {
    liquidity * (sb - sa).abs()
}

/// Amounts (token0, token1) backing `liquidity` on `[sa, sb)` at price `s`.
pub fn amounts_for_liquidity(s: f64, sa: f64, sb: f64, liquidity: f64) -> (f64, f64) {
    if s <= sa {
        (amount0_delta(sa, sb, liquidity), 0.0)
    } else if s < sb {
        (amount0_delta(s, sb, liquidity), amount1_delta(sa, s, liquidity))
    } else {
        (0.0, amount1_delta(sa, sb, liquidity))
    }
}

/// Largest liquidity the given amounts can back on `[sa, sb)` at price `s`.
pub fn liquidity_for_amounts(s: f64, sa: f64, sb: f64, amount0: f64, amount1: f64) -> f64 {
    let per0 = |from: f64| {
        let unit = amount0_delta(from, sb, 1.0);
        if unit > 0.0 { amount0 / unit } else { f64::INFINITY }
    };
    let per1 = |to: f64| {
        let unit = amount1_delta(sa, to, 1.0);
        if unit > 0.0 { amount1 / unit } else { f64::INFINITY }
    };
    if s <= sa {
        per0(sa)
    } else if s < sb {
        per0(s).min(per1(s))
    } else {
        per1(sb)
    }
}

/// Integer amounts a pool charges to mint, rounded up like the protocol does.
pub fn mint_amounts(s: f64, sa: f64, sb: f64, liquidity: u128) -> (u128, u128) {
    let (a0, a1) = amounts_for_liquidity(s, sa, sb, liquidity as f64);
    (a0.ceil() as u128, a1.ceil() as u128)
}
