//! Turns trade intents into bounded swap calls and reads the pool back.

use alloy_primitives::U256;
use tracing::{debug, warn};

use crate::error::{SimError, SimResult};
use crate::pool::{Pool, PoolState, SwapDelta};
use crate::tick_math::{clamp_sqrt_price_limit, clamp_tick, tick_to_sqrt_price_x96, PriceCodec};
use crate::types::{Side, TradeIntent, TradeRecord, TradeStatus};

/// Swap call derived from one intent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwapRequest {
    pub zero_for_one: bool,
    /// Raw units of the input token.
    pub amount_in: u128,
    pub limit_tick: i32,
    pub sqrt_price_limit_x96: U256,
}

/// Result of sending one intent to the pool.
#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    pub record: TradeRecord,
    pub request: SwapRequest,
    pub before: PoolState,
    pub after: PoolState,
}

impl Execution {
    pub fn filled(&self) -> bool {
        self.record.status == TradeStatus::Filled
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PoolAdapter {
    codec: PriceCodec,
    max_tick_move: i32,
}

impl PoolAdapter {
    pub fn new(codec: PriceCodec, max_tick_move: i32) -> Self {
        Self { codec, max_tick_move }
    }

    pub fn codec(&self) -> &PriceCodec {
        &self.codec
    }

    /// Pool state, with failures attributed to `step`.
    pub fn state<P: Pool + ?Sized>(&self, pool: &P, step: usize) -> SimResult<PoolState> {
        pool.current_state().map_err(|source| SimError::PoolCallFailure { step, source })
    }

    /// Human pool price of a state.
    pub fn price_of(&self, state: &PoolState) -> f64 {
        self.codec.sqrt_price_x96_to_price(state.sqrt_price_x96)
    }

    /// Price limit `max_tick_move` ticks away from `tick` in the swap
    /// direction, clamped into the range the pool accepts.
    pub fn price_limit(&self, tick: i32, zero_for_one: bool) -> SimResult<(i32, U256)> {
        let target = if zero_for_one {
            tick.saturating_sub(self.max_tick_move)
        } else {
            tick.saturating_add(self.max_tick_move)
        };
        let limit_tick = clamp_tick(target);
        let sqrt = clamp_sqrt_price_limit(tick_to_sqrt_price_x96(limit_tick)?);
        Ok((limit_tick, sqrt))
    }

    /// Build the swap request for `intent` against `state`. `None` when the
    /// intent rounds to zero raw units.
    pub fn request(&self, intent: &TradeIntent, state: &PoolState) -> SimResult<Option<SwapRequest>> {
        let zero_for_one = intent.side.zero_for_one();
        let amount_in = match intent.side {
            Side::BuyBase => self.codec.amount1_to_raw(intent.size_quote),
            Side::SellBase => {
                let price = self.price_of(state);
                if !(price.is_finite() && price > 0.0) {
                    return Err(SimError::Domain(format!("pool price {price} is not positive")));
                }
                self.codec.amount0_to_raw(intent.size_quote / price)
            }
        };
        if amount_in == 0 {
            return Ok(None);
        }
        let (limit_tick, sqrt_price_limit_x96) = self.price_limit(state.tick, zero_for_one)?;
        Ok(Some(SwapRequest { zero_for_one, amount_in, limit_tick, sqrt_price_limit_x96 }))
    }

    /// Send `intent` to the pool.
    ///
    /// A revert caused by the price limit is recorded as a rejected trade
    /// with no effect. Any other failure aborts with `PoolCallFailure`.
    pub fn execute<P: Pool + ?Sized>(
        &self,
        pool: &mut P,
        intent: &TradeIntent,
        step: usize,
    ) -> SimResult<Option<Execution>> {
        let before = self.state(pool, step)?;
        let Some(request) = self.request(intent, &before)? else {
            debug!(step, size = intent.size_quote, "intent below one raw unit, skipped");
            return Ok(None);
        };

        let (status, delta) =
            match pool.swap(request.zero_for_one, request.amount_in, request.sqrt_price_limit_x96) {
                Ok(delta) => (TradeStatus::Filled, delta),
                Err(e) if e.is_price_limit() => {
                    let rejected = SimError::BoundRejected {
                        current_tick: before.tick,
                        limit_tick: request.limit_tick,
                    };
                    warn!(step, kind = ?intent.kind, side = ?intent.side, size = intent.size_quote, %rejected, "swap rejected");
                    (TradeStatus::Rejected, SwapDelta::default())
                }
                Err(source) => return Err(SimError::PoolCallFailure { step, source }),
            };
        let after = self.state(pool, step)?;

        let record = TradeRecord {
            step,
            kind: intent.kind,
            side: intent.side,
            size_quote: intent.size_quote,
            status,
            delta0: self.codec.amount0_to_human(delta.delta0 as f64),
            delta1: self.codec.amount1_to_human(delta.delta1 as f64),
            tick_before: before.tick,
            tick_after: after.tick,
        };
        debug!(step, ?status, tick_before = before.tick, tick_after = after.tick, "swap");
        Ok(Some(Execution { record, request, before, after }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use crate::local_pool::LocalPool;
    use crate::tick_math::{MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO, MIN_TICK};
    use crate::types::FlowKind;

    /// Pool whose swaps always fail with a fixed error.
    struct FailingPool {
        inner: LocalPool,
        err: PoolError,
    }

    impl Pool for FailingPool {
        fn initialize(&mut self, s: U256) -> Result<(), PoolError> {
            self.inner.initialize(s)
        }
        fn mint(&mut self, lo: i32, hi: i32, l: u128) -> Result<(u128, u128), PoolError> {
            self.inner.mint(lo, hi, l)
        }
        fn swap(&mut self, _: bool, _: u128, _: U256) -> Result<SwapDelta, PoolError> {
            Err(self.err.clone())
        }
        fn current_state(&self) -> Result<PoolState, PoolError> {
            self.inner.current_state()
        }
        fn tick_spacing(&self) -> i32 {
            self.inner.tick_spacing()
        }
        fn fee_ppm(&self) -> u32 {
            self.inner.fee_ppm()
        }
    }

    fn adapter() -> PoolAdapter {
        PoolAdapter::new(PriceCodec::default(), 600)
    }

    fn seeded_pool() -> LocalPool {
        let codec = PriceCodec::default();
        let mut pool = LocalPool::new(3_000, 60);
        pool.initialize(codec.point(3_200.0).unwrap().sqrt_price_x96).unwrap();
        pool.mint(-196_800, -194_400, 5_000_000_000_000_000).unwrap();
        pool
    }

    fn buy(size: f64) -> TradeIntent {
        TradeIntent { side: Side::BuyBase, size_quote: size, kind: FlowKind::Organic }
    }

    #[test]
    fn limit_is_clamped_at_the_tick_bounds() {
        let a = adapter();
        let (t, s) = a.price_limit(MIN_TICK + 10, true).unwrap();
        assert_eq!(t, MIN_TICK);
        assert_eq!(s, MIN_SQRT_RATIO + U256::from(1u8));

        let (t, s) = a.price_limit(MAX_TICK - 10, false).unwrap();
        assert_eq!(t, MAX_TICK);
        assert_eq!(s, MAX_SQRT_RATIO - U256::from(1u8));
    }

    #[test]
    fn small_buy_fills_and_moves_price_up() {
        let a = adapter();
        let mut pool = seeded_pool();
        let exec = a.execute(&mut pool, &buy(1_000.0), 1).unwrap().unwrap();
        assert!(exec.filled());
        assert!(exec.after.sqrt_price_x96 > exec.before.sqrt_price_x96);
        assert!((exec.record.delta1 - 1_000.0).abs() < 1e-6);
        assert!(exec.record.delta0 < 0.0);
    }

    #[test]
    fn sell_is_sized_in_base_units() {
        let a = adapter();
        let mut pool = seeded_pool();
        let intent = TradeIntent { side: Side::SellBase, size_quote: 3_200.0, kind: FlowKind::Organic };
        let exec = a.execute(&mut pool, &intent, 1).unwrap().unwrap();
        assert!(exec.filled());
        assert!((exec.record.delta0 - 1.0).abs() < 1e-3, "delta0 {}", exec.record.delta0);
    }

    #[test]
    fn oversized_swap_is_rejected_not_fatal() {
        let a = PoolAdapter::new(PriceCodec::default(), 60);
        let mut pool = seeded_pool();
        let exec = a.execute(&mut pool, &buy(50_000_000.0), 3).unwrap().unwrap();
        assert_eq!(exec.record.status, TradeStatus::Rejected);
        assert_eq!(exec.before, exec.after);
        assert_eq!((exec.record.delta0, exec.record.delta1), (0.0, 0.0));
    }

    #[test]
    fn other_pool_failures_carry_the_step() {
        let a = adapter();
        let mut pool = FailingPool { inner: seeded_pool(), err: PoolError::Call("boom".into()) };
        let err = a.execute(&mut pool, &buy(100.0), 17).unwrap_err();
        match err {
            SimError::PoolCallFailure { step, source } => {
                assert_eq!(step, 17);
                assert_eq!(source, PoolError::Call("boom".into()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn dust_intent_is_skipped() {
        let a = adapter();
        let mut pool = seeded_pool();
        assert!(a.execute(&mut pool, &buy(1e-9), 1).unwrap().is_none());
    }
}
