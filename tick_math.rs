//! Tick / price codec.
//!
//! Three representations of the same price axis:
//!
//! ```text
//! raw price   p      = 1.0001^tick              (token1 raw units per token0 raw unit)
//! sqrt price  √p·2⁹⁶ = sqrtPriceX96 (Q64.96)    (what the pool stores)
//! human price P      = p · 10^(decimals0 - decimals1)
//! ```
//!
//! `tick -> sqrtPriceX96` is the exact bit-decomposition used on-chain, so the
//! codec and the pool agree on every tick boundary. The reverse directions use
//! a float estimate followed by an exact correction against the forward map,
//! which makes every round trip exact:
//!
//! - `sqrt_price_x96_to_tick(tick_to_sqrt_price_x96(t)) == t`
//! - `price_to_tick(tick_to_price(t)) == t`
//!
//! Converting a sqrt price to `f64` loses everything below the 53-bit
//! mantissa (relative error ≤ 2⁻⁵²); going back from `f64` is exact to within
//! one unit of that mantissa, shifted into Q96.

use alloy_primitives::U256;

use crate::error::{SimError, SimResult};
use crate::types::PricePoint;

/// Lowest tick the protocol accepts.
pub const MIN_TICK: i32 = -887_272;
/// Highest tick the protocol accepts.
pub const MAX_TICK: i32 = 887_272;

/// sqrtPriceX96 at `MIN_TICK`.
pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4_295_128_739, 0, 0, 0]);
/// sqrtPriceX96 at `MAX_TICK`.
pub const MAX_SQRT_RATIO: U256 =
    U256::from_limbs([6_743_328_256_752_651_558, 17_280_870_778_742_802_505, 4_294_805_859, 0]);

/// 2^96
pub const Q96: U256 = U256::from_limbs([0, 1 << 32, 0, 0]);
pub const Q96_F: f64 = 79_228_162_514_264_337_593_543_950_336.0;

/// Base of the tick exponential.
pub const TICK_BASE: f64 = 1.0001;

// Q128 multipliers: 2^128 / 1.0001^(2^k / 2) for k = 0..19.
const RATIO_MULTIPLIERS: [u128; 20] = [
    0xfffcb933bd6fad37aa2d162d1a594001,
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

// ─── Tick <-> sqrtPriceX96 ────────────────────────────────────────────────────

/// sqrtPriceX96 at `tick`, rounded up.
pub fn tick_to_sqrt_price_x96(tick: i32) -> SimResult<U256> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(SimError::Domain(format!(
            "tick {tick} outside [{MIN_TICK}, {MAX_TICK}]"
        )));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 1 != 0 {
        U256::from(RATIO_MULTIPLIERS[0])
    } else {
        U256::from(1u8) << 128
    };
    for (bit, &mult) in RATIO_MULTIPLIERS.iter().enumerate().skip(1) {
        if abs_tick & (1 << bit) != 0 {
            ratio = (ratio * U256::from(mult)) >> 128;
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up
    let remainder = ratio & U256::from(u32::MAX);
    let rounded = (ratio >> 32) + if remainder.is_zero() { U256::ZERO } else { U256::from(1u8) };
    Ok(rounded)
}

/// Greatest tick whose sqrt ratio is `<= sqrt_price_x96`.
///
/// Accepts `[MIN_SQRT_RATIO, MAX_SQRT_RATIO)`, matching the on-chain domain.
pub fn sqrt_price_x96_to_tick(sqrt_price_x96: U256) -> SimResult<i32> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 >= MAX_SQRT_RATIO {
        return Err(SimError::Domain(format!(
            "sqrtPriceX96 {sqrt_price_x96} outside [MIN_SQRT_RATIO, MAX_SQRT_RATIO)"
        )));
    }
    let sqrt_f = sqrt_price_x96_to_f64(sqrt_price_x96);
    let estimate = (2.0 * sqrt_f.ln() / TICK_BASE.ln()).floor();
    let mut tick = clamp_tick(estimate as i32);

    while tick < MAX_TICK && tick_to_sqrt_price_x96(tick + 1)? <= sqrt_price_x96 {
        tick += 1;
    }
    while tick > MIN_TICK && tick_to_sqrt_price_x96(tick)? > sqrt_price_x96 {
        tick -= 1;
    }
    Ok(tick)
}

/// Unscaled square-root price as `f64`.
pub fn sqrt_price_x96_to_f64(sqrt_price_x96: U256) -> f64 {
    let limbs = sqrt_price_x96.as_limbs();
    let two64 = 18_446_744_073_709_551_616.0_f64;
    let value = limbs[0] as f64
        + limbs[1] as f64 * two64
        + limbs[2] as f64 * two64 * two64
        + limbs[3] as f64 * two64 * two64 * two64;
    value / Q96_F
}

/// Q96 representation of an unscaled square-root price. Non-positive or
/// non-finite inputs map to zero.
pub fn f64_to_sqrt_price_x96(sqrt_price: f64) -> U256 {
    if !sqrt_price.is_finite() || sqrt_price <= 0.0 {
        return U256::ZERO;
    }
    let scaled = sqrt_price * Q96_F;
    if scaled < 1.7e38 {
        U256::from(scaled as u128)
    } else {
        // keep the mantissa, shift the scale back in
        U256::from((sqrt_price * (Q96_F / 18_446_744_073_709_551_616.0)) as u128) << 64
    }
}

/// Clamp a sqrt price into the open interval the pool accepts as a limit.
pub fn clamp_sqrt_price_limit(sqrt_price_x96: U256) -> U256 {
    let lo = MIN_SQRT_RATIO + U256::from(1u8);
    let hi = MAX_SQRT_RATIO - U256::from(1u8);
    sqrt_price_x96.max(lo).min(hi)
}

// ─── Tick <-> raw price ───────────────────────────────────────────────────────

/// Raw price `1.0001^tick`.
#[inline]
pub fn tick_to_raw_price(tick: i32) -> f64 {
    TICK_BASE.powi(tick)
}

/// Greatest tick whose raw price is `<= price`, clamped to the protocol bounds.
pub fn raw_price_to_tick(price: f64) -> SimResult<i32> {
    tick_at_price(price, 1.0, tick_to_raw_price)
}

fn tick_at_price(price: f64, scale: f64, at_tick: impl Fn(i32) -> f64) -> SimResult<i32> {
    if !price.is_finite() || price <= 0.0 {
        return Err(SimError::Domain(format!("price must be positive and finite, got {price}")));
    }
    let estimate = ((price / scale).ln() / TICK_BASE.ln()).floor();
    let mut tick = if estimate.is_finite() {
        clamp_tick(estimate.clamp(MIN_TICK as f64, MAX_TICK as f64) as i32)
    } else {
        MIN_TICK
    };
    while tick < MAX_TICK && at_tick(tick + 1) <= price {
        tick += 1;
    }
    while tick > MIN_TICK && at_tick(tick) > price {
        tick -= 1;
    }
    Ok(tick)
}

// ─── Tick spacing ─────────────────────────────────────────────────────────────

#[inline]
pub fn clamp_tick(tick: i32) -> i32 {
    tick.clamp(MIN_TICK, MAX_TICK)
}

/// Round toward negative infinity to a multiple of `spacing`.
#[inline]
pub fn floor_to_spacing(tick: i32, spacing: i32) -> i32 {
    tick.div_euclid(spacing) * spacing
}

/// Round toward positive infinity to a multiple of `spacing`.
#[inline]
pub fn ceil_to_spacing(tick: i32, spacing: i32) -> i32 {
    let floored = floor_to_spacing(tick, spacing);
    if floored == tick { tick } else { floored + spacing }
}

pub fn min_usable_tick(spacing: i32) -> i32 {
    ceil_to_spacing(MIN_TICK, spacing)
}

pub fn max_usable_tick(spacing: i32) -> i32 {
    floor_to_spacing(MAX_TICK, spacing)
}

/// Snap a range to the spacing grid, rounding each edge outward, then clamp
/// into the usable bounds. Returns `None` when nothing of the range survives.
pub fn snap_range_outward(lower: i32, upper: i32, spacing: i32) -> Option<(i32, i32)> {
    let lo_bound = min_usable_tick(spacing);
    let hi_bound = max_usable_tick(spacing);
    if upper <= lo_bound || lower >= hi_bound {
        return None;
    }
    let lo = floor_to_spacing(lower, spacing).max(lo_bound);
    let hi = ceil_to_spacing(upper, spacing).min(hi_bound);
    (lo < hi).then_some((lo, hi))
}

// ─── Human-unit codec ─────────────────────────────────────────────────────────

/// Converts between human prices/amounts and the pool's raw units for a
/// token pair with the given decimals.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceCodec {
    pub decimals0: u8,
    pub decimals1: u8,
}

impl Default for PriceCodec {
    /// WETH (18) / USDC (6).
    fn default() -> Self {
        Self { decimals0: 18, decimals1: 6 }
    }
}

impl PriceCodec {
    pub fn new(decimals0: u8, decimals1: u8) -> Self {
        Self { decimals0, decimals1 }
    }

    /// Raw price per human price: `10^(decimals1 - decimals0)`.
    #[inline]
    pub fn raw_scale(&self) -> f64 {
        10f64.powi(self.decimals1 as i32 - self.decimals0 as i32)
    }

    #[inline]
    pub fn to_raw_price(&self, price: f64) -> f64 {
        price * self.raw_scale()
    }

    #[inline]
    pub fn to_human_price(&self, raw_price: f64) -> f64 {
        raw_price / self.raw_scale()
    }

    /// Human price at `tick` (token1 per token0).
    #[inline]
    pub fn tick_to_price(&self, tick: i32) -> f64 {
        self.to_human_price(tick_to_raw_price(tick))
    }

    /// `floor(log_1.0001(raw price))`, clamped to `[MIN_TICK, MAX_TICK]`.
    pub fn price_to_tick(&self, price: f64) -> SimResult<i32> {
        let scale = 1.0 / self.raw_scale();
        tick_at_price(price, scale, |t| self.tick_to_price(t))
    }

    /// Human price encoded by a sqrt price.
    pub fn sqrt_price_x96_to_price(&self, sqrt_price_x96: U256) -> f64 {
        let s = sqrt_price_x96_to_f64(sqrt_price_x96);
        self.to_human_price(s * s)
    }

    /// sqrtPriceX96 for a human price, clamped into the pool's valid domain.
    pub fn price_to_sqrt_price_x96(&self, price: f64) -> SimResult<U256> {
        if !price.is_finite() || price <= 0.0 {
            return Err(SimError::Domain(format!("price must be positive and finite, got {price}")));
        }
        let sqrt = f64_to_sqrt_price_x96(self.to_raw_price(price).sqrt());
        Ok(sqrt.max(MIN_SQRT_RATIO).min(MAX_SQRT_RATIO - U256::from(1u8)))
    }

    /// Build a consistent price point for a human price.
    pub fn point(&self, price: f64) -> SimResult<PricePoint> {
        let tick = self.price_to_tick(price)?;
        let sqrt_price_x96 = self.price_to_sqrt_price_x96(price)?;
        Ok(PricePoint { price, sqrt_price_x96, tick })
    }

    /// Price point sitting exactly on a tick boundary.
    pub fn point_at_tick(&self, tick: i32) -> SimResult<PricePoint> {
        let sqrt_price_x96 = tick_to_sqrt_price_x96(tick)?;
        Ok(PricePoint { price: self.tick_to_price(tick), sqrt_price_x96, tick })
    }

    /// Raw token0 units for a human amount, rounded down.
    pub fn amount0_to_raw(&self, amount: f64) -> u128 {
        to_raw_amount(amount, self.decimals0)
    }

    pub fn amount1_to_raw(&self, amount: f64) -> u128 {
        to_raw_amount(amount, self.decimals1)
    }

    pub fn amount0_to_human(&self, raw: f64) -> f64 {
        raw / 10f64.powi(self.decimals0 as i32)
    }

    pub fn amount1_to_human(&self, raw: f64) -> f64 {
        raw / 10f64.powi(self.decimals1 as i32)
    }
}

fn to_raw_amount(amount: f64, decimals: u8) -> u128 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount * 10f64.powi(decimals as i32)).floor() as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_ratio_bounds_match_protocol_constants() {
        assert_eq!(tick_to_sqrt_price_x96(MIN_TICK).unwrap(), MIN_SQRT_RATIO);
        assert_eq!(tick_to_sqrt_price_x96(MAX_TICK).unwrap(), MAX_SQRT_RATIO);
        assert_eq!(tick_to_sqrt_price_x96(0).unwrap(), Q96);
    }

    #[test]
    fn sqrt_ratio_rejects_out_of_range_ticks() {
        assert!(matches!(tick_to_sqrt_price_x96(MAX_TICK + 1), Err(SimError::Domain(_))));
        assert!(matches!(tick_to_sqrt_price_x96(MIN_TICK - 1), Err(SimError::Domain(_))));
    }

    #[test]
    fn sqrt_ratio_tracks_float_power() {
        for tick in [-500_000, -195_611, -60, -1, 1, 60, 12_345, 400_000] {
            let exact = sqrt_price_x96_to_f64(tick_to_sqrt_price_x96(tick).unwrap());
            let approx = TICK_BASE.powf(tick as f64 / 2.0);
            assert!(((exact - approx) / approx).abs() < 1e-9, "tick {tick}: {exact} vs {approx}");
        }
    }

    #[test]
    fn tick_sqrt_round_trip() {
        let mut tick = MIN_TICK;
        while tick < MAX_TICK {
            let sqrt = tick_to_sqrt_price_x96(tick).unwrap();
            assert_eq!(sqrt_price_x96_to_tick(sqrt).unwrap(), tick);
            // one unit below the boundary belongs to the tick underneath
            if tick > MIN_TICK {
                assert_eq!(sqrt_price_x96_to_tick(sqrt - U256::from(1u8)).unwrap(), tick - 1);
            }
            tick += 7_919;
        }
        assert!(sqrt_price_x96_to_tick(MAX_SQRT_RATIO).is_err());
        assert_eq!(
            sqrt_price_x96_to_tick(MAX_SQRT_RATIO - U256::from(1u8)).unwrap(),
            MAX_TICK - 1
        );
    }

    #[test]
    fn price_tick_round_trip_is_exact() {
        let codec = PriceCodec::default();
        let mut tick = MIN_TICK;
        while tick <= MAX_TICK {
            assert_eq!(codec.price_to_tick(codec.tick_to_price(tick)).unwrap(), tick);
            assert_eq!(raw_price_to_tick(tick_to_raw_price(tick)).unwrap(), tick);
            tick += 4_999;
        }
        for tick in [-195_700, -195_611, -195_610, 0, 1, -1] {
            assert_eq!(codec.price_to_tick(codec.tick_to_price(tick)).unwrap(), tick);
        }
    }

    #[test]
    fn price_to_tick_floors_within_one_tick() {
        let codec = PriceCodec::default();
        for price in [0.5, 1.0, 1850.25, 3200.0, 4000.123, 1.0e5] {
            let tick = codec.price_to_tick(price).unwrap();
            let at = codec.tick_to_price(tick);
            assert!(at <= price, "floor violated for {price}");
            assert!(price / at < TICK_BASE, "more than one tick away for {price}");
        }
        assert_eq!(codec.price_to_tick(3200.0).unwrap(), -195_611);
    }

    #[test]
    fn price_to_tick_is_monotonic() {
        let codec = PriceCodec::default();
        let mut last = i32::MIN;
        let mut price = 100.0;
        while price < 10_000.0 {
            let tick = codec.price_to_tick(price).unwrap();
            assert!(tick >= last);
            last = tick;
            price *= 1.00007;
        }
    }

    #[test]
    fn price_to_tick_rejects_non_positive() {
        let codec = PriceCodec::default();
        assert!(matches!(codec.price_to_tick(0.0), Err(SimError::Domain(_))));
        assert!(matches!(codec.price_to_tick(-3.0), Err(SimError::Domain(_))));
        assert!(matches!(codec.price_to_tick(f64::NAN), Err(SimError::Domain(_))));
    }

    #[test]
    fn extreme_prices_clamp_to_tick_bounds() {
        assert_eq!(raw_price_to_tick(1e300).unwrap(), MAX_TICK);
        assert_eq!(raw_price_to_tick(1e-300).unwrap(), MIN_TICK);
    }

    #[test]
    fn point_components_agree() {
        let codec = PriceCodec::default();
        for price in [2500.0, 3200.0, 3999.5] {
            let point = codec.point(price).unwrap();
            let from_sqrt = sqrt_price_x96_to_tick(point.sqrt_price_x96).unwrap();
            assert!((from_sqrt - point.tick).abs() <= 1, "{price}: {from_sqrt} vs {}", point.tick);
            let back = codec.sqrt_price_x96_to_price(point.sqrt_price_x96);
            assert!(((back - price) / price).abs() < 1e-9);
        }
    }

    #[test]
    fn spacing_rounds_outward() {
        assert_eq!(floor_to_spacing(-195_611, 60), -195_660);
        assert_eq!(ceil_to_spacing(-195_611, 60), -195_600);
        assert_eq!(floor_to_spacing(120, 60), 120);
        assert_eq!(ceil_to_spacing(121, 60), 180);
        assert_eq!(min_usable_tick(60), -887_220);
        assert_eq!(max_usable_tick(60), 887_220);
        assert_eq!(snap_range_outward(-130, 70, 60), Some((-180, 120)));
        assert_eq!(snap_range_outward(887_230, 887_400, 60), None);
        assert_eq!(snap_range_outward(887_100, 887_400, 60), Some((887_100, 887_220)));
    }

    #[test]
    fn raw_amounts_use_token_decimals() {
        let codec = PriceCodec::default();
        assert_eq!(codec.amount0_to_raw(1.5), 1_500_000_000_000_000_000);
        assert_eq!(codec.amount1_to_raw(50_000.0), 50_000_000_000);
        assert_eq!(codec.amount1_to_raw(-1.0), 0);
        assert!((codec.amount1_to_human(2_500_000.0) - 2.5).abs() < 1e-12);
    }
}
