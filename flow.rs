//! Order flow: organic noise traders plus gap-closing arbitrage.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::FlowConfig;
use crate::pool::PoolState;
use crate::tick_math::{sqrt_price_x96_to_f64, PriceCodec};
use crate::types::{FlowKind, MarketState, Side, TradeIntent, FEE_DENOMINATOR};

/// RNG stream reserved for order flow.
pub const FLOW_STREAM: u64 = 1;

/// Signed organic order size in quote units.
///
/// `base_notional · (gap_gain · gap + epsilon · z)`: the drift term leans
/// toward closing the gap, the noise term sets intensity.
#[inline]
pub fn organic_notional(cfg: &FlowConfig, gap: f64, z: f64) -> f64 {
    cfg.base_notional * (cfg.gap_gain * gap + cfg.epsilon * z)
}

#[derive(Clone, Debug)]
pub struct OrderFlow {
    cfg: FlowConfig,
    fee_ppm: u32,
    rng: ChaCha8Rng,
}

impl OrderFlow {
    pub fn new(cfg: FlowConfig, fee_ppm: u32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(FLOW_STREAM);
        Self { cfg, fee_ppm, rng }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.cfg
    }

    /// One organic order, or `None` when its size is below `min_notional`.
    ///
    /// Exactly one normal draw is consumed per call.
    pub fn organic(&mut self, market: &MarketState) -> Option<TradeIntent> {
        let z: f64 = self.rng.sample(StandardNormal);
        let signed = organic_notional(&self.cfg, market.gap(), z);
        let size = signed.abs();
        if !size.is_finite() || size <= 0.0 || size < self.cfg.min_notional {
            return None;
        }
        let side = if signed > 0.0 { Side::BuyBase } else { Side::SellBase };
        Some(TradeIntent {
            side,
            size_quote: size.min(self.cfg.max_notional),
            kind: FlowKind::Organic,
        })
    }

    /// Corrective trade moving the pool `arb_fraction` of the way toward the
    /// external price, sized from the liquidity active at the current tick.
    ///
    /// `None` inside the no-arb band, with no active liquidity, or when
    /// arbitrage is disabled.
    pub fn arbitrage(
        &self,
        market: &MarketState,
        pool: &PoolState,
        codec: &PriceCodec,
    ) -> Option<TradeIntent> {
        if self.cfg.num_arbs == 0 || pool.liquidity == 0 {
            return None;
        }
        let gap = market.gap();
        if !gap.is_finite() || gap.abs() <= self.cfg.arb_band {
            return None;
        }

        let target = market.pool_price + self.cfg.arb_fraction * (market.external_price - market.pool_price);
        let s = sqrt_price_x96_to_f64(pool.sqrt_price_x96);
        let st = codec.to_raw_price(target).sqrt();
        if !(st.is_finite() && st > 0.0 && s > 0.0) {
            return None;
        }
        let l = pool.liquidity as f64;
        let gross = 1.0 - self.fee_ppm as f64 / FEE_DENOMINATOR;

        let (side, size_quote) = if st > s {
            let amount1 = l * (st - s) / gross;
            (Side::BuyBase, codec.amount1_to_human(amount1))
        } else {
            let amount0 = l * (1.0 / st - 1.0 / s) / gross;
            (Side::SellBase, codec.amount0_to_human(amount0) * market.pool_price)
        };
        (size_quote > 0.0).then_some(TradeIntent { side, size_quote, kind: FlowKind::Arbitrage })
    }
}
