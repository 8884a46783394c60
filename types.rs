use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

// ─── Protocol constants ───────────────────────────────────────────────────────

/// Fee tier in parts-per-million (0.3%).
pub const DEFAULT_FEE_PPM: u32 = 3_000;
/// Denominator for `fee_ppm`.
pub const FEE_DENOMINATOR: f64 = 1_000_000.0;
/// Tick spacing paired with the 0.3% tier.
pub const DEFAULT_TICK_SPACING: i32 = 60;

/// Normalised weights below this are dropped instead of minted.
pub const WEIGHT_EPSILON: f64 = 1e-6;
/// Floor applied to every simulated external price (quote units).
pub const MIN_PRICE: f64 = 1e-9;

// ─── Prices ───────────────────────────────────────────────────────────────────

/// One point on the price axis in all three representations.
///
/// `tick == floor(log_1.0001(raw price))`; the tick recovered from
/// `sqrt_price_x96` agrees with it to within one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricePoint {
    /// Human price, token1 per token0 (e.g. USDC per WETH).
    pub price: f64,
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

// ─── Allocation ───────────────────────────────────────────────────────────────

/// Shape and layout of the Beta liquidity policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationPolicy {
    pub alpha: f64,
    pub beta: f64,
    pub num_ranges: i32,
    pub range_width_ticks: i32,
    /// Gap between adjacent ranges; zero or negative makes them touch or overlap.
    pub inter_range_separation_ticks: i32,
    /// Half-width of the Beta support, as a fraction of the centre price.
    pub price_band_pct: f64,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            alpha: 2.0,
            beta: 5.0,
            num_ranges: 10,
            range_width_ticks: 60,
            inter_range_separation_ticks: 120,
            price_band_pct: 0.2,
        }
    }
}

/// A tick interval `[lower_tick, upper_tick)` with its share of the budget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub lower_tick: i32,
    pub upper_tick: i32,
    /// Normalised Beta weight; weights across an allocation sum to 1.
    pub liquidity_weight: f64,
    pub liquidity: u128,
}

impl Range {
    /// Half-open containment, matching how the pool activates liquidity.
    #[inline]
    pub fn contains_tick(&self, tick: i32) -> bool {
        self.lower_tick <= tick && tick < self.upper_tick
    }

    #[inline]
    pub fn key(&self) -> (i32, i32) {
        (self.lower_tick, self.upper_tick)
    }
}

// ─── Market / order flow ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarketState {
    pub external_price: f64,
    pub pool_price: f64,
    pub step: usize,
}

impl MarketState {
    /// Relative gap `(external - pool) / pool`.
    #[inline]
    pub fn gap(&self) -> f64 {
        (self.external_price - self.pool_price) / self.pool_price
    }
}

/// Direction of a trade, from the taker's point of view on the base asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Pay token1, receive token0; pushes the pool price up.
    BuyBase,
    /// Pay token0, receive token1; pushes the pool price down.
    SellBase,
}

impl Side {
    /// Pool swap direction flag.
    #[inline]
    pub fn zero_for_one(self) -> bool {
        matches!(self, Side::SellBase)
    }

    #[inline]
    pub fn sign(self) -> i8 {
        match self {
            Side::BuyBase => 1,
            Side::SellBase => -1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Organic,
    Arbitrage,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradeIntent {
    pub side: Side,
    /// Notional in quote units (token1, human).
    pub size_quote: f64,
    pub kind: FlowKind,
}

// ─── Records ──────────────────────────────────────────────────────────────────

/// One row of the episode: LP vs HODL at the end of a step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValuationRecord {
    pub step: usize,
    pub lp_value_quote: f64,
    pub hodl_value_quote: f64,
    pub pool_price: f64,
    pub external_price: f64,
    /// Sign of the organic order this step: 1 buy, -1 sell, 0 none.
    pub net_order_flow_sign: i8,
    pub tick: i32,
    /// Accrued, uncollected fees valued in quote units.
    pub fees_value_quote: f64,
    /// `lp - hodl - fees`; negative values are impermanent loss.
    pub il_value_quote: f64,
    pub n_arb_trades: u32,
    pub n_rejected: u32,
    pub fees_estimated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Filled,
    Rejected,
}

/// One swap attempt, organic or arbitrage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub step: usize,
    pub kind: FlowKind,
    pub side: Side,
    pub size_quote: f64,
    pub status: TradeStatus,
    /// Pool-side token deltas in human units (positive = paid into the pool).
    pub delta0: f64,
    pub delta1: f64,
    pub tick_before: i32,
    pub tick_after: i32,
}
