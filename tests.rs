//! End-to-end tests over the public API: allocator, codec, pool adapter and
//! full episodes on the in-memory pool.

#[cfg(test)]
mod integration {
    use beta_lp_sim::adapter::PoolAdapter;
    use beta_lp_sim::allocation::{allocate, Budget};
    use beta_lp_sim::config::{PriceSource, SimConfig};
    use beta_lp_sim::local_pool::LocalPool;
    use beta_lp_sim::sim::{run_episode, Episode, Phase};
    use beta_lp_sim::tick_math::{
        raw_price_to_tick, sqrt_price_x96_to_tick, tick_to_raw_price, tick_to_sqrt_price_x96,
        PriceCodec, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO, MIN_TICK,
    };
    use beta_lp_sim::types::AllocationPolicy;
    use alloy_primitives::U256;

    fn default_budget(codec: &PriceCodec) -> Budget {
        Budget { amount0: codec.amount0_to_raw(10.0), amount1: codec.amount1_to_raw(50_000.0) }
    }

    // ── Unit: tick codec round trip ───────────────────────────────────────────

    #[test]
    fn tick_price_round_trip() {
        let codec = PriceCodec::default();
        for t in (MIN_TICK..MAX_TICK).step_by(7_919).chain([-195_611, -1, 0, 1, MAX_TICK - 1]) {
            assert_eq!(raw_price_to_tick(tick_to_raw_price(t)).unwrap(), t, "raw tick {t}");
            assert_eq!(codec.price_to_tick(codec.tick_to_price(t)).unwrap(), t, "human tick {t}");
            assert_eq!(sqrt_price_x96_to_tick(tick_to_sqrt_price_x96(t).unwrap()).unwrap(), t, "sqrt tick {t}");
        }
    }

    // ── Scenario A: uniform profile, three touching ranges ────────────────────

    #[test]
    fn uniform_policy_splits_evenly_across_three_ranges() {
        let codec = PriceCodec::default();
        let policy = AllocationPolicy {
            alpha: 1.0,
            beta: 1.0,
            num_ranges: 3,
            range_width_ticks: 60,
            inter_range_separation_ticks: 0,
            price_band_pct: 0.5,
        };
        let center = codec.point(3_200.0).unwrap();
        assert_eq!(center.tick, -195_611);

        let alloc = allocate(&policy, &center, 60, default_budget(&codec)).unwrap();
        assert_eq!(alloc.ranges.len(), 3);
        let bounds: Vec<(i32, i32)> = alloc.ranges.iter().map(|r| r.key()).collect();
        assert_eq!(bounds, vec![(-195_720, -195_600), (-195_660, -195_540), (-195_600, -195_480)]);
        for r in &alloc.ranges {
            assert!(r.lower_tick < r.upper_tick);
            assert!(r.liquidity > 0, "degenerate range {:?}", r.key());
            assert!((r.liquidity_weight - 1.0 / 3.0).abs() < 1e-9, "weight {}", r.liquidity_weight);
        }
    }

    // ── Scenario B: no noise, no drift ────────────────────────────────────────

    #[test]
    fn quiet_market_keeps_price_and_trades_nothing() {
        let mut config = SimConfig { num_steps: 5, ..SimConfig::default() };
        config.market.sigma = 0.0;
        config.market.kappa = 0.0;
        config.flow.epsilon = 0.0;

        let report = run_episode(&config, 11).unwrap();
        let records = report.recorder.records();
        assert_eq!(records.len(), 6);
        for r in records {
            assert_eq!(r.external_price, 3_200.0, "step {}", r.step);
            assert_eq!(r.net_order_flow_sign, 0, "step {}", r.step);
        }
        assert!(report.recorder.trades().is_empty());
        assert_eq!(report.summary.n_filled, 0);
        assert!(report.summary.pnl_vs_hodl.abs() < 1e-3);
    }

    // ── Scenario C: price limits at the tick bounds ───────────────────────────

    #[test]
    fn price_limits_clamp_at_tick_bounds() {
        let adapter = PoolAdapter::new(PriceCodec::default(), 600);

        let (tick, sqrt) = adapter.price_limit(MIN_TICK + 10, true).unwrap();
        assert_eq!(tick, MIN_TICK);
        assert_eq!(sqrt, MIN_SQRT_RATIO + U256::from(1u8));

        let (tick, sqrt) = adapter.price_limit(MAX_TICK - 10, false).unwrap();
        assert_eq!(tick, MAX_TICK);
        assert_eq!(sqrt, MAX_SQRT_RATIO - U256::from(1u8));

        let (tick, _) = adapter.price_limit(MIN_TICK, true).unwrap();
        assert_eq!(tick, MIN_TICK);
        let (tick, _) = adapter.price_limit(MAX_TICK, false).unwrap();
        assert_eq!(tick, MAX_TICK);
    }

    // ── Invariant: allocations never exceed the budget ────────────────────────

    #[test]
    fn allocations_stay_within_budget() {
        let codec = PriceCodec::default();
        let budget = default_budget(&codec);
        for (alpha, beta) in [(1.0, 1.0), (2.0, 5.0), (5.0, 2.0), (0.7, 0.7), (8.0, 8.0)] {
            for num_ranges in [1, 4, 10, 25] {
                for price in [900.0, 3_200.0, 12_000.0] {
                    let policy = AllocationPolicy { alpha, beta, num_ranges, ..AllocationPolicy::default() };
                    let center = codec.point(price).unwrap();
                    let alloc = allocate(&policy, &center, 60, budget).unwrap();
                    assert!(alloc.total0 <= budget.amount0, "token0 over budget for {policy:?} @ {price}");
                    assert!(alloc.total1 <= budget.amount1, "token1 over budget for {policy:?} @ {price}");
                    assert!((alloc.weight_sum() - 1.0).abs() < 1e-9);
                }
            }
        }
    }

    // ── Valuation at step 0 ───────────────────────────────────────────────────

    #[test]
    fn lp_and_hodl_start_equal() {
        let config = SimConfig { num_steps: 3, ..SimConfig::default() };
        let mut pool = LocalPool::new(config.pool.fee_ppm, config.pool.tick_spacing);
        let mut ep = Episode::new(config, &mut pool).unwrap();
        ep.allocate().unwrap();
        ep.provision().unwrap();
        assert_eq!(ep.phase(), Phase::Stepping(1));

        let first = &ep.recorder().records()[0];
        assert_eq!(first.step, 0);
        assert!((first.hodl_value_quote - 82_000.0).abs() < 1e-6);
        assert!(
            (first.lp_value_quote - first.hodl_value_quote).abs() < 1e-3,
            "lp {} vs hodl {}",
            first.lp_value_quote,
            first.hodl_value_quote
        );
    }

    // ── Reproducibility ───────────────────────────────────────────────────────

    #[test]
    fn same_seed_same_episode() {
        let config = SimConfig { num_steps: 60, ..SimConfig::default() };
        let a = run_episode(&config, 5).unwrap();
        let b = run_episode(&config, 5).unwrap();
        assert_eq!(a.recorder.records(), b.recorder.records());
        assert_eq!(a.recorder.trades(), b.recorder.trades());
        assert_eq!(a.summary, b.summary);

        let c = run_episode(&config, 6).unwrap();
        assert_ne!(a.summary.final_external_price, c.summary.final_external_price);
    }

    // ── Full episodes ─────────────────────────────────────────────────────────

    #[test]
    fn episode_records_every_step_with_positive_values() {
        let config = SimConfig { num_steps: 100, ..SimConfig::default() };
        let report = run_episode(&config, 1).unwrap();
        let records = report.recorder.records();
        assert_eq!(records.len(), 101);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.step, i);
            assert!(r.lp_value_quote > 0.0 && r.hodl_value_quote > 0.0, "step {i}");
            assert!(r.fees_value_quote >= 0.0);
        }
    }

    #[test]
    fn pool_price_source_marks_both_sides_at_pool_price() {
        let mut config = SimConfig { num_steps: 30, ..SimConfig::default() };
        config.price_source = PriceSource::Pool;
        let report = run_episode(&config, 3).unwrap();
        let last = report.recorder.last().unwrap();
        let hodl_at_pool = 10.0 * last.pool_price + 50_000.0;
        assert!((last.hodl_value_quote - hodl_at_pool).abs() < 1e-6);
    }

    #[test]
    fn fees_are_estimated_without_pool_introspection() {
        let config = SimConfig { num_steps: 50, ..SimConfig::default() };
        let mut pool = LocalPool::new(config.pool.fee_ppm, config.pool.tick_spacing)
            .without_fee_introspection();
        let mut ep = Episode::new(config, &mut pool).unwrap();
        let summary = ep.run().unwrap();
        if summary.n_filled > 0 {
            assert!(ep.fees().is_estimated());
            assert!(ep.recorder().last().unwrap().fees_estimated);
        }
    }
}
