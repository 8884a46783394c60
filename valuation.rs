//! LP portfolio vs. HODL baseline, both marked at one price source.

use crate::allocation::Allocation;
use crate::config::PriceSource;
use crate::error::SimResult;
use crate::fees::FeeLedger;
use crate::liquidity_math::{amounts_for_liquidity, range_sqrt_bounds};
use crate::pool::PoolState;
use crate::tick_math::{sqrt_price_x96_to_f64, PriceCodec};
use crate::types::MarketState;

/// Human token amounts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Holdings {
    pub amount0: f64,
    pub amount1: f64,
}

impl Holdings {
    #[inline]
    pub fn value_at(&self, price: f64) -> f64 {
        self.amount0 * price + self.amount1
    }
}

/// Breakdown of one valuation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Valuation {
    pub mark_price: f64,
    pub positions_quote: f64,
    pub fees_quote: f64,
    pub idle_quote: f64,
    pub lp_value_quote: f64,
    pub hodl_value_quote: f64,
}

impl Valuation {
    /// `lp - hodl - fees`; negative is impermanent loss.
    pub fn il_quote(&self) -> f64 {
        self.lp_value_quote - self.hodl_value_quote - self.fees_quote
    }
}

#[derive(Clone, Debug)]
struct Position {
    sa: f64,
    sb: f64,
    liquidity: f64,
}

/// Values the episode's portfolio. Every minted position is included,
/// in range or not, since out-of-range positions still hold inventory.
#[derive(Clone, Debug)]
pub struct Valuer {
    codec: PriceCodec,
    source: PriceSource,
    budget: Holdings,
    idle: Holdings,
    positions: Vec<Position>,
}

impl Valuer {
    /// `budget` is the LP's starting capital; `paid0`/`paid1` are the raw
    /// amounts the pool actually charged for the mints.
    pub fn new(
        codec: PriceCodec,
        source: PriceSource,
        budget: Holdings,
        alloc: &Allocation,
        paid0: u128,
        paid1: u128,
    ) -> SimResult<Self> {
        let mut positions = Vec::with_capacity(alloc.ranges.len());
        for r in &alloc.ranges {
            let (sa, sb) = range_sqrt_bounds(r.lower_tick, r.upper_tick)?;
            positions.push(Position { sa, sb, liquidity: r.liquidity as f64 });
        }
        let idle = Holdings {
            amount0: (budget.amount0 - codec.amount0_to_human(paid0 as f64)).max(0.0),
            amount1: (budget.amount1 - codec.amount1_to_human(paid1 as f64)).max(0.0),
        };
        Ok(Self { codec, source, budget, idle, positions })
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn idle(&self) -> Holdings {
        self.idle
    }

    pub fn budget(&self) -> Holdings {
        self.budget
    }

    /// The price both portfolios are marked at this step.
    pub fn mark_price(&self, market: &MarketState) -> f64 {
        match self.source {
            PriceSource::External => market.external_price,
            PriceSource::Pool => market.pool_price,
        }
    }

    /// Tokens held by all positions at the pool's current price.
    pub fn position_holdings(&self, pool: &PoolState) -> Holdings {
        let s = sqrt_price_x96_to_f64(pool.sqrt_price_x96);
        let (raw0, raw1) = self.positions.iter().fold((0.0, 0.0), |(a0, a1), p| {
            let (x, y) = amounts_for_liquidity(s, p.sa, p.sb, p.liquidity);
            (a0 + x, a1 + y)
        });
        Holdings {
            amount0: self.codec.amount0_to_human(raw0),
            amount1: self.codec.amount1_to_human(raw1),
        }
    }

    pub fn value(&self, pool: &PoolState, market: &MarketState, fees: &FeeLedger) -> Valuation {
        let mark = self.mark_price(market);
        let positions_quote = self.position_holdings(pool).value_at(mark);
        let fees_quote = fees.value_quote(&self.codec, mark);
        let idle_quote = self.idle.value_at(mark);
        Valuation {
            mark_price: mark,
            positions_quote,
            fees_quote,
            idle_quote,
            lp_value_quote: positions_quote + fees_quote + idle_quote,
            hodl_value_quote: self.budget.value_at(mark),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{allocate, Budget};
    use crate::local_pool::LocalPool;
    use crate::pool::Pool;
    use crate::types::AllocationPolicy;

    fn provisioned(source: PriceSource) -> (LocalPool, Valuer, FeeLedger) {
        let codec = PriceCodec::default();
        let start = codec.point(3_200.0).unwrap();
        let budget = Holdings { amount0: 10.0, amount1: 50_000.0 };
        let raw = Budget {
            amount0: codec.amount0_to_raw(budget.amount0),
            amount1: codec.amount1_to_raw(budget.amount1),
        };
        let alloc = allocate(&AllocationPolicy::default(), &start, 60, raw).unwrap();

        let mut pool = LocalPool::new(3_000, 60);
        pool.initialize(start.sqrt_price_x96).unwrap();
        let (mut p0, mut p1) = (0u128, 0u128);
        for r in &alloc.ranges {
            let (a0, a1) = pool.mint(r.lower_tick, r.upper_tick, r.liquidity).unwrap();
            p0 += a0;
            p1 += a1;
        }
        let valuer = Valuer::new(codec, source, budget, &alloc, p0, p1).unwrap();
        (pool, valuer, FeeLedger::new(&alloc.ranges))
    }

    #[test]
    fn lp_equals_hodl_before_any_trade() {
        let (pool, valuer, fees) = provisioned(PriceSource::External);
        let st = pool.current_state().unwrap();
        let m = MarketState { external_price: 3_200.0, pool_price: 3_200.0, step: 0 };
        let v = valuer.value(&st, &m, &fees);
        assert!((v.hodl_value_quote - 82_000.0).abs() < 1e-6);
        assert!(
            (v.lp_value_quote - v.hodl_value_quote).abs() < 1e-3,
            "lp {} vs hodl {}",
            v.lp_value_quote,
            v.hodl_value_quote
        );
        assert_eq!(v.fees_quote, 0.0);
    }

    #[test]
    fn both_sides_use_the_same_mark() {
        let (pool, valuer, fees) = provisioned(PriceSource::Pool);
        let st = pool.current_state().unwrap();
        let m = MarketState { external_price: 9_999.0, pool_price: 3_200.0, step: 3 };
        let v = valuer.value(&st, &m, &fees);
        assert_eq!(v.mark_price, 3_200.0);
        assert!((v.hodl_value_quote - (10.0 * 3_200.0 + 50_000.0)).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_positions_are_still_valued() {
        let (pool, valuer, _) = provisioned(PriceSource::External);
        let st = pool.current_state().unwrap();
        let h = valuer.position_holdings(&st);
        // ranges sit on both sides of the centre, so both tokens are held
        assert!(h.amount0 > 0.0 && h.amount1 > 0.0);
        assert!(h.value_at(3_200.0) > 0.0);
    }
}
