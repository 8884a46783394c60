//! Beta-policy range allocator.
//!
//! Lays `num_ranges` tick ranges out symmetrically around the centre tick,
//! weights each one by the Beta density at its centre's position inside the
//! support `[centre - band, centre + band]`, and scales the weights into
//! integer liquidity that fits the capital budget.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{SimError, SimResult};
use crate::liquidity_math::{amounts_for_liquidity, mint_amounts, range_sqrt_bounds};
use crate::tick_math::{
    max_usable_tick, min_usable_tick, snap_range_outward, sqrt_price_x96_to_f64, PriceCodec,
    TICK_BASE,
};
use crate::types::{AllocationPolicy, PricePoint, Range, WEIGHT_EPSILON};

/// Rounds of proportional scale-down tried before giving up on the budget.
const MAX_BUDGET_PASSES: usize = 16;

/// Capital available for minting, in raw token units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Budget {
    pub amount0: u128,
    pub amount1: u128,
}

impl Budget {
    pub fn is_zero(&self) -> bool {
        self.amount0 == 0 && self.amount1 == 0
    }
}

/// Output of one allocator run.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    /// Ordered by lower tick.
    pub ranges: Vec<Range>,
    /// Raw token0 the mints will require.
    pub total0: u128,
    pub total1: u128,
    pub center_tick: i32,
    /// `(centre - band, centre + band)`.
    pub support: (i32, i32),
    /// Ranges lying entirely outside `[MIN_TICK, MAX_TICK]`.
    pub dropped_out_of_bounds: usize,
    /// Ranges whose weight or liquidity rounded to nothing.
    pub dropped_low_weight: usize,
    /// Liquidity was scaled down after the first pass overshot the budget.
    pub budget_scaled: bool,
}

impl Allocation {
    fn empty(center_tick: i32, support: (i32, i32)) -> Self {
        Self {
            ranges: Vec::new(),
            total0: 0,
            total1: 0,
            center_tick,
            support,
            dropped_out_of_bounds: 0,
            dropped_low_weight: 0,
            budget_scaled: false,
        }
    }

    pub fn weight_sum(&self) -> f64 {
        self.ranges.iter().map(|r| r.liquidity_weight).sum()
    }
}

/// A laid-out range before weighting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub lower_tick: i32,
    pub upper_tick: i32,
    /// Position of the unsnapped centre inside the support, mapped to [0, 1].
    pub position: f64,
}

// ─── Policy checks ────────────────────────────────────────────────────────────

pub fn validate_policy(policy: &AllocationPolicy) -> SimResult<()> {
    let bad = |msg: String| Err(SimError::InvalidPolicy(msg));
    if policy.num_ranges <= 0 {
        return bad(format!("num_ranges must be positive, got {}", policy.num_ranges));
    }
    if policy.range_width_ticks <= 0 {
        return bad(format!("range_width_ticks must be positive, got {}", policy.range_width_ticks));
    }
    if !(policy.alpha.is_finite() && policy.alpha > 0.0 && policy.beta.is_finite() && policy.beta > 0.0) {
        return bad(format!(
            "alpha and beta must be positive, got ({}, {})",
            policy.alpha, policy.beta
        ));
    }
    let step = policy.range_width_ticks as i64 + policy.inter_range_separation_ticks as i64;
    if step <= 0 {
        return bad(format!("range width plus separation must be positive, got {step}"));
    }
    band_ticks(policy.price_band_pct)?;
    Ok(())
}

/// Half-width of the support in ticks: `floor(log_1.0001(1 + pct))`.
pub fn band_ticks(price_band_pct: f64) -> SimResult<i32> {
    if !price_band_pct.is_finite() || price_band_pct <= 0.0 {
        return Err(SimError::InvalidPolicy(format!(
            "price_band_pct must be positive, got {price_band_pct}"
        )));
    }
    let band = ((1.0 + price_band_pct).ln() / TICK_BASE.ln()).floor();
    if band < 1.0 {
        return Err(SimError::InvalidPolicy(format!(
            "price_band_pct {price_band_pct} gives a support of zero width"
        )));
    }
    Ok(band.min(i32::MAX as f64) as i32)
}

// ─── Beta density ─────────────────────────────────────────────────────────────

/// Lanczos approximation (g = 7, n = 9) of `ln Γ(x)`.
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin().abs()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = COEF[0];
    for (i, c) in COEF.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Beta(alpha, beta) density. Zero outside `[0, 1]`.
pub fn beta_pdf(x: f64, alpha: f64, beta: f64) -> f64 {
    if !(0.0..=1.0).contains(&x) {
        return 0.0;
    }
    // keep the edges finite for shapes below 1
    let x = x.clamp(1e-12, 1.0 - 1e-12);
    let ln_b = ln_gamma(alpha) + ln_gamma(beta) - ln_gamma(alpha + beta);
    ((alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln() - ln_b).exp()
}

// ─── Layout ───────────────────────────────────────────────────────────────────

/// Candidate ranges laid out around `center_tick`, snapped to `spacing`.
///
/// Every range rounds its lower edge down and its upper edge up, so a range
/// narrower than the spacing widens instead of vanishing. Returns the
/// survivors and how many fell entirely outside the tick bounds.
pub fn layout_ranges(
    policy: &AllocationPolicy,
    center_tick: i32,
    spacing: i32,
) -> SimResult<(Vec<Candidate>, usize)> {
    validate_policy(policy)?;
    let band = band_ticks(policy.price_band_pct)? as f64;
    let n = policy.num_ranges as i64;
    let width = policy.range_width_ticks as f64;
    let step = policy.range_width_ticks as f64 + policy.inter_range_separation_ticks as f64;
    let lo_bound = min_usable_tick(spacing) as f64;
    let hi_bound = max_usable_tick(spacing) as f64;
    let center = center_tick as f64;

    let mut out = Vec::with_capacity(n as usize);
    let mut dropped = 0usize;
    for i in 0..n {
        let offset = (i as f64 - (n - 1) as f64 / 2.0) * step;
        let mid = center + offset;
        let lower = (mid - width / 2.0).floor();
        let upper = lower + width;

        if upper <= lo_bound || lower >= hi_bound {
            dropped += 1;
            continue;
        }
        // inside i32 from here on
        let lower = lower.max(lo_bound - spacing as f64) as i32;
        let upper = upper.min(hi_bound + spacing as f64) as i32;

        let Some((lo, hi)) = snap_range_outward(lower, upper, spacing) else {
            dropped += 1;
            continue;
        };

        out.push(Candidate {
            lower_tick: lo,
            upper_tick: hi,
            position: 0.5 + offset / (2.0 * band),
        });
    }
    Ok((out, dropped))
}

/// Normalised Beta weights per distinct range, ordered by lower tick.
///
/// Candidates that snapped onto the same ticks are merged. Weights below
/// `WEIGHT_EPSILON` are dropped and the rest renormalised; the second value
/// is the number dropped.
pub fn beta_weights(
    policy: &AllocationPolicy,
    candidates: &[Candidate],
) -> SimResult<(Vec<((i32, i32), f64)>, usize)> {
    let mut merged: BTreeMap<(i32, i32), f64> = BTreeMap::new();
    for c in candidates {
        *merged.entry((c.lower_tick, c.upper_tick)).or_insert(0.0) +=
            beta_pdf(c.position, policy.alpha, policy.beta);
    }

    let total: f64 = merged.values().sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(SimError::InvalidPolicy(
            "no range centre falls inside the Beta support".to_string(),
        ));
    }

    let before = merged.len();
    let kept: Vec<((i32, i32), f64)> = merged
        .into_iter()
        .map(|(k, d)| (k, d / total))
        .filter(|&(_, w)| w >= WEIGHT_EPSILON)
        .collect();
    let dropped = before - kept.len();
    Ok((renormalise(kept), dropped))
}

fn renormalise(mut weights: Vec<((i32, i32), f64)>) -> Vec<((i32, i32), f64)> {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|(_, w)| *w /= total);
    }
    weights
}

// ─── Allocation ───────────────────────────────────────────────────────────────

/// Run the allocator at `center` with the given budget.
///
/// A zero budget gives an empty allocation. The returned totals never exceed
/// the budget: when integer rounding overshoots, liquidity is scaled down
/// proportionally and `budget_scaled` is set.
pub fn allocate(
    policy: &AllocationPolicy,
    center: &PricePoint,
    spacing: i32,
    budget: Budget,
) -> SimResult<Allocation> {
    if spacing <= 0 {
        return Err(SimError::InvalidPolicy(format!("tick spacing must be positive, got {spacing}")));
    }
    let band = band_ticks(policy.price_band_pct)?;
    let support = (center.tick.saturating_sub(band), center.tick.saturating_add(band));

    let (candidates, dropped_out_of_bounds) = layout_ranges(policy, center.tick, spacing)?;
    if dropped_out_of_bounds > 0 {
        warn!(dropped = dropped_out_of_bounds, "ranges fell outside the tick bounds");
    }
    let (weights, mut dropped_low_weight) = beta_weights(policy, &candidates)?;

    let mut alloc = Allocation::empty(center.tick, support);
    alloc.dropped_out_of_bounds = dropped_out_of_bounds;
    if budget.is_zero() {
        alloc.dropped_low_weight = dropped_low_weight;
        return Ok(alloc);
    }

    let s = sqrt_price_x96_to_f64(center.sqrt_price_x96);
    let mut bounds = Vec::with_capacity(weights.len());
    let (mut need0, mut need1) = (0.0_f64, 0.0_f64);
    for &((lo, hi), w) in &weights {
        let (sa, sb) = range_sqrt_bounds(lo, hi)?;
        let (u0, u1) = amounts_for_liquidity(s, sa, sb, 1.0);
        need0 += w * u0;
        need1 += w * u1;
        bounds.push((sa, sb));
    }

    let cap = |have: u128, need: f64| if need > 0.0 { have as f64 / need } else { f64::INFINITY };
    let mut scale = cap(budget.amount0, need0).min(cap(budget.amount1, need1));
    if !scale.is_finite() || scale <= 0.0 {
        alloc.dropped_low_weight = dropped_low_weight;
        return Ok(alloc);
    }

    let mut scaled = false;
    let mut liquidities = Vec::new();
    let (mut total0, mut total1) = (0u128, 0u128);
    for pass in 0..=MAX_BUDGET_PASSES {
        liquidities = weights.iter().map(|&(_, w)| (w * scale).floor() as u128).collect();
        (total0, total1) = (0, 0);
        for (&liq, &(sa, sb)) in liquidities.iter().zip(&bounds) {
            if liq == 0 {
                continue;
            }
            let (a0, a1) = mint_amounts(s, sa, sb, liq);
            total0 += a0;
            total1 += a1;
        }
        if total0 <= budget.amount0 && total1 <= budget.amount1 {
            break;
        }
        let err = SimError::BudgetExceeded {
            required0: total0,
            required1: total1,
            budget0: budget.amount0,
            budget1: budget.amount1,
        };
        if pass == MAX_BUDGET_PASSES {
            return Err(err);
        }
        warn!(%err, pass, "scaling liquidity down to fit the budget");
        let ratio = |have: u128, used: u128| if used > have { have as f64 / used as f64 } else { 1.0 };
        scale *= ratio(budget.amount0, total0).min(ratio(budget.amount1, total1)) * (1.0 - 1e-9);
        scaled = true;
    }

    let mut kept = Vec::with_capacity(weights.len());
    for (&((lo, hi), w), &liq) in weights.iter().zip(&liquidities) {
        if liq == 0 {
            dropped_low_weight += 1;
            continue;
        }
        kept.push(((lo, hi), w, liq));
    }
    let weight_total: f64 = kept.iter().map(|&(_, w, _)| w).sum();
    alloc.ranges = kept
        .into_iter()
        .map(|((lower_tick, upper_tick), w, liquidity)| Range {
            lower_tick,
            upper_tick,
            liquidity_weight: w / weight_total,
            liquidity,
        })
        .collect();
    alloc.total0 = total0;
    alloc.total1 = total1;
    alloc.dropped_low_weight = dropped_low_weight;
    alloc.budget_scaled = scaled;

    info!(
        ranges = alloc.ranges.len(),
        total0 = alloc.total0,
        total1 = alloc.total1,
        center_tick = center.tick,
        "allocation built"
    );
    Ok(alloc)
}

// ─── Reporting ────────────────────────────────────────────────────────────────

/// One allocation row with human price bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeView {
    pub lower_tick: i32,
    pub upper_tick: i32,
    pub price_low: f64,
    pub price_high: f64,
    pub weight: f64,
    pub liquidity: u128,
}

pub fn range_views(alloc: &Allocation, codec: &PriceCodec) -> Vec<RangeView> {
    alloc
        .ranges
        .iter()
        .map(|r| RangeView {
            lower_tick: r.lower_tick,
            upper_tick: r.upper_tick,
            price_low: codec.tick_to_price(r.lower_tick),
            price_high: codec.tick_to_price(r.upper_tick),
            weight: r.liquidity_weight,
            liquidity: r.liquidity,
        })
        .collect()
}

/// Fixed-width table of the allocation with human price bounds.
pub fn describe_ranges(alloc: &Allocation, codec: &PriceCodec) -> String {
    let mut out = format!(
        "{:>4}  {:>9}  {:>9}  {:>12}  {:>12}  {:>8}  {:>24}\n",
        "#", "lower", "upper", "price_low", "price_high", "weight", "liquidity"
    );
    for (i, v) in range_views(alloc, codec).iter().enumerate() {
        out.push_str(&format!(
            "{:>4}  {:>9}  {:>9}  {:>12.4}  {:>12.4}  {:>8.4}  {:>24}\n",
            i, v.lower_tick, v.upper_tick, v.price_low, v.price_high, v.weight, v.liquidity
        ));
    }
    out.push_str(&format!(
        "center tick {}  support [{}, {}]  total0 {}  total1 {}\n",
        alloc.center_tick, alloc.support.0, alloc.support.1, alloc.total0, alloc.total1
    ));
    out
}
