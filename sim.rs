//! Episode engine.
//!
//! One episode is a small state machine driven against a borrowed pool:
//!
//! ```text
//! Idle ──allocate──▶ Provisioning ──provision──▶ Stepping(1) ──step──▶ … ──▶ Stepping(n)
//!                                                                              │ step
//!                                                   Done ◀──finalize── Finalizing
//! ```
//!
//! `Stepping(i)` means records `0..i` are written and step `i` runs next, so
//! an episode interrupted between steps can be resumed with
//! [`Episode::run_with`] without touching the rows already recorded.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::{Execution, PoolAdapter};
use crate::allocation::{allocate, validate_policy, Allocation, Budget};
use crate::config::SimConfig;
use crate::error::{PoolError, SimError, SimResult};
use crate::fees::FeeLedger;
use crate::flow::OrderFlow;
use crate::local_pool::LocalPool;
use crate::market::PriceProcess;
use crate::pool::{Pool, PoolState};
use crate::recorder::{EpisodeRecorder, EpisodeSummary};
use crate::tick_math::PriceCodec;
use crate::types::{MarketState, PricePoint, TradeIntent, TradeStatus, ValuationRecord};
use crate::valuation::{Holdings, Valuer};

// ─── Phases ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has run yet.
    Idle,
    /// Allocator in progress.
    Allocating,
    /// Ranges computed; waiting to be minted.
    Provisioning,
    /// Records `0..i` written; step `i` is next.
    Stepping(usize),
    /// All steps done; summary pending.
    Finalizing,
    Done,
}

// ─── Episode ──────────────────────────────────────────────────────────────────

pub struct Episode<P: Pool> {
    config: SimConfig,
    codec: PriceCodec,
    pool: P,
    phase: Phase,
    prices: PriceProcess,
    flow: OrderFlow,
    adapter: PoolAdapter,
    allocation: Option<Allocation>,
    valuer: Option<Valuer>,
    fees: FeeLedger,
    recorder: EpisodeRecorder,
}

impl<P: Pool> Episode<P> {
    /// Build an episode over `pool`. Configuration is validated here, before
    /// any pool interaction.
    pub fn new(config: SimConfig, pool: P) -> SimResult<Self> {
        config.validate()?;
        let codec = PriceCodec::new(config.pool.decimals0, config.pool.decimals1);
        let prices = PriceProcess::new(&config.market, config.seed)?;
        let flow = OrderFlow::new(config.flow.clone(), config.pool.fee_ppm, config.seed);
        let adapter = PoolAdapter::new(codec, config.pool.max_tick_move);
        Ok(Self {
            config,
            codec,
            pool,
            phase: Phase::Idle,
            prices,
            flow,
            adapter,
            allocation: None,
            valuer: None,
            fees: FeeLedger::default(),
            recorder: EpisodeRecorder::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn codec(&self) -> &PriceCodec {
        &self.codec
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    pub fn recorder(&self) -> &EpisodeRecorder {
        &self.recorder
    }

    pub fn fees(&self) -> &FeeLedger {
        &self.fees
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    fn expect_phase(&self, expected: &'static str, ok: bool) -> SimResult<()> {
        if ok {
            Ok(())
        } else {
            Err(SimError::InvalidPhase { expected, actual: self.phase })
        }
    }

    fn budget_raw(&self) -> Budget {
        Budget {
            amount0: self.codec.amount0_to_raw(self.config.budget.amount0),
            amount1: self.codec.amount1_to_raw(self.config.budget.amount1),
        }
    }

    /// Run the allocator at the pool's price, initialising the pool at the
    /// configured starting price first if needed.
    ///
    /// The policy is checked before the pool is touched. On any failure the
    /// episode returns to `Idle` and can be retried.
    pub fn allocate(&mut self) -> SimResult<&Allocation> {
        self.expect_phase("Idle", self.phase == Phase::Idle)?;
        validate_policy(&self.config.policy)?;
        self.phase = Phase::Allocating;

        let alloc = match self.allocate_at_pool_price() {
            Ok(a) => a,
            Err(e) => {
                self.phase = Phase::Idle;
                return Err(e);
            }
        };
        self.phase = Phase::Provisioning;
        Ok(self.allocation.insert(alloc))
    }

    fn allocate_at_pool_price(&mut self) -> SimResult<Allocation> {
        let state = match self.pool.current_state() {
            Ok(state) => state,
            Err(PoolError::NotInitialized) => {
                let start = self.codec.point(self.config.market.initial_price)?;
                self.pool
                    .initialize(start.sqrt_price_x96)
                    .map_err(|source| SimError::PoolCallFailure { step: 0, source })?;
                self.adapter.state(&self.pool, 0)?
            }
            Err(source) => return Err(SimError::PoolCallFailure { step: 0, source }),
        };
        let center = PricePoint {
            price: self.adapter.price_of(&state),
            sqrt_price_x96: state.sqrt_price_x96,
            tick: state.tick,
        };
        allocate(&self.config.policy, &center, self.pool.tick_spacing(), self.budget_raw())
    }

    /// Mint every range, then write the step-0 record.
    pub fn provision(&mut self) -> SimResult<()> {
        self.expect_phase("Provisioning", self.phase == Phase::Provisioning)?;
        let Some(alloc) = self.allocation.as_ref() else {
            return Err(SimError::InvalidPhase { expected: "Provisioning", actual: self.phase });
        };

        // all or nothing
        let budget = self.budget_raw();
        if alloc.total0 > budget.amount0 || alloc.total1 > budget.amount1 {
            return Err(SimError::BudgetExceeded {
                required0: alloc.total0,
                required1: alloc.total1,
                budget0: budget.amount0,
                budget1: budget.amount1,
            });
        }

        let (mut paid0, mut paid1) = (0u128, 0u128);
        for r in &alloc.ranges {
            let (a0, a1) = self
                .pool
                .mint(r.lower_tick, r.upper_tick, r.liquidity)
                .map_err(|source| SimError::PoolCallFailure { step: 0, source })?;
            paid0 += a0;
            paid1 += a1;
        }

        let holdings = Holdings { amount0: self.config.budget.amount0, amount1: self.config.budget.amount1 };
        self.valuer = Some(Valuer::new(self.codec, self.config.price_source, holdings, alloc, paid0, paid1)?);
        self.fees = FeeLedger::new(&alloc.ranges);
        info!(ranges = alloc.ranges.len(), paid0, paid1, "positions minted");

        let state = self.adapter.state(&self.pool, 0)?;
        let market = MarketState {
            external_price: self.prices.current_price(),
            pool_price: self.adapter.price_of(&state),
            step: 0,
        };
        self.record(&state, &market, 0, 0, 0)?;
        self.phase = if self.config.num_steps == 0 { Phase::Finalizing } else { Phase::Stepping(1) };
        Ok(())
    }

    /// Run one step: price update, organic flow, arbitrage, valuation, record.
    pub fn step(&mut self) -> SimResult<ValuationRecord> {
        let Phase::Stepping(step) = self.phase else {
            return Err(SimError::InvalidPhase { expected: "Stepping", actual: self.phase });
        };

        let external = self.prices.step();
        let state = self.adapter.state(&self.pool, step)?;
        let mut market = MarketState { external_price: external, pool_price: self.adapter.price_of(&state), step };

        let mut flow_sign = 0i8;
        let mut n_rejected = 0u32;
        let mut n_arbs = 0u32;

        if let Some(intent) = self.flow.organic(&market) {
            if let Some(exec) = self.send(&intent, step)? {
                if exec.filled() {
                    flow_sign = intent.side.sign();
                } else {
                    n_rejected += 1;
                }
            }
        }

        for _ in 0..self.flow.config().num_arbs {
            let state = self.adapter.state(&self.pool, step)?;
            market.pool_price = self.adapter.price_of(&state);
            let Some(intent) = self.flow.arbitrage(&market, &state, &self.codec) else {
                break;
            };
            match self.send(&intent, step)? {
                Some(exec) if exec.filled() => n_arbs += 1,
                Some(_) => {
                    n_rejected += 1;
                    break;
                }
                None => break,
            }
        }

        let state = self.adapter.state(&self.pool, step)?;
        market.pool_price = self.adapter.price_of(&state);
        let record = self.record(&state, &market, flow_sign, n_arbs, n_rejected)?;
        debug!(
            step,
            external = market.external_price,
            pool = market.pool_price,
            lp = record.lp_value_quote,
            hodl = record.hodl_value_quote,
            "step"
        );

        self.phase = if step >= self.config.num_steps { Phase::Finalizing } else { Phase::Stepping(step + 1) };
        Ok(record)
    }

    fn send(&mut self, intent: &TradeIntent, step: usize) -> SimResult<Option<Execution>> {
        let exec = self.adapter.execute(&mut self.pool, intent, step)?;
        if let Some(exec) = &exec {
            if exec.record.status == TradeStatus::Filled {
                self.fees.on_swap(&self.pool, &exec.before, &exec.after);
            }
            self.recorder.push_trade(exec.record.clone());
        }
        Ok(exec)
    }

    fn record(
        &mut self,
        state: &PoolState,
        market: &MarketState,
        flow_sign: i8,
        n_arb_trades: u32,
        n_rejected: u32,
    ) -> SimResult<ValuationRecord> {
        let Some(valuer) = self.valuer.as_ref() else {
            return Err(SimError::InvalidPhase { expected: "Stepping", actual: self.phase });
        };
        let v = valuer.value(state, market, &self.fees);
        let record = ValuationRecord {
            step: market.step,
            lp_value_quote: v.lp_value_quote,
            hodl_value_quote: v.hodl_value_quote,
            pool_price: market.pool_price,
            external_price: market.external_price,
            net_order_flow_sign: flow_sign,
            tick: state.tick,
            fees_value_quote: v.fees_quote,
            il_value_quote: v.il_quote(),
            n_arb_trades,
            n_rejected,
            fees_estimated: self.fees.is_estimated(),
        };
        self.recorder.append(record.clone())?;
        Ok(record)
    }

    /// Close the episode and summarise it.
    pub fn finalize(&mut self) -> SimResult<EpisodeSummary> {
        self.expect_phase("Finalizing", self.phase == Phase::Finalizing)?;
        let summary = self
            .recorder
            .summarize()
            .ok_or(SimError::InvalidPhase { expected: "Finalizing", actual: self.phase })?;
        info!(
            steps = summary.steps,
            lp = summary.final_lp_value,
            hodl = summary.final_hodl_value,
            fees = summary.total_fees,
            pnl_vs_hodl = summary.pnl_vs_hodl,
            "episode finished"
        );
        self.phase = Phase::Done;
        Ok(summary)
    }

    /// Run (or resume) to completion.
    pub fn run(&mut self) -> SimResult<EpisodeSummary> {
        match self.run_with(|_| true)? {
            Some(summary) => Ok(summary),
            None => Err(SimError::InvalidPhase { expected: "Done", actual: self.phase }),
        }
    }

    /// Run (or resume) from the current phase. `keep_going(i)` is asked
    /// before each step; returning false stops between steps and yields
    /// `Ok(None)`, leaving the episode resumable.
    pub fn run_with<F>(&mut self, mut keep_going: F) -> SimResult<Option<EpisodeSummary>>
    where
        F: FnMut(usize) -> bool,
    {
        if self.phase == Phase::Idle {
            info!(seed = self.config.seed, steps = self.config.num_steps, "episode start");
            self.allocate()?;
        }
        if self.phase == Phase::Provisioning {
            self.provision()?;
        }
        while let Phase::Stepping(i) = self.phase {
            if !keep_going(i) {
                info!(step = i, "episode interrupted");
                return Ok(None);
            }
            self.step()?;
        }
        self.finalize().map(Some)
    }

    pub fn into_recorder(self) -> EpisodeRecorder {
        self.recorder
    }
}

// ─── Single episode on the in-memory pool ─────────────────────────────────────

#[derive(Clone, Debug)]
pub struct EpisodeReport {
    pub seed: u64,
    pub allocation: Allocation,
    pub summary: EpisodeSummary,
    pub recorder: EpisodeRecorder,
}

/// Run one complete episode with `seed` against a fresh [`LocalPool`].
pub fn run_episode(config: &SimConfig, seed: u64) -> SimResult<EpisodeReport> {
    let mut config = config.clone();
    config.seed = seed;
    let mut pool = LocalPool::new(config.pool.fee_ppm, config.pool.tick_spacing);
    let mut episode = Episode::new(config, &mut pool)?;
    let summary = episode.run()?;
    let allocation = episode
        .allocation()
        .cloned()
        .ok_or(SimError::InvalidPhase { expected: "Done", actual: episode.phase() })?;
    Ok(EpisodeReport { seed, allocation, summary, recorder: episode.into_recorder() })
}

// ─── Parallel Multi-episode Runner ────────────────────────────────────────────

/// Run `n_episodes` independent episodes (seeds `seed_start..`) in parallel.
pub fn run_parallel(config: &SimConfig, n_episodes: usize, seed_start: u64) -> SimResult<AggregatedResult> {
    let summaries: Vec<EpisodeSummary> = (0..n_episodes)
        .into_par_iter()
        .map(|i| run_episode(config, seed_start + i as u64).map(|r| r.summary))
        .collect::<SimResult<_>>()?;
    Ok(aggregate_results(&summaries))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub n_episodes: usize,
    pub mean_pnl_vs_hodl: f64,
    pub std_pnl_vs_hodl: f64,
    pub mean_fees: f64,
    pub mean_net_return: f64,
    pub mean_il_pct: f64,
    /// Share of episodes where LP finished above HODL.
    pub win_rate: f64,
    pub mean_rejected: f64,
    /// mean / std of LP-vs-HODL P&L
    pub sharpe: f64,
}

pub fn aggregate_results(sims: &[EpisodeSummary]) -> AggregatedResult {
    if sims.is_empty() {
        return AggregatedResult::default();
    }
    let n = sims.len() as f64;
    let mean_of = |f: fn(&EpisodeSummary) -> f64| sims.iter().map(f).sum::<f64>() / n;

    let mean = mean_of(|s| s.pnl_vs_hodl);
    let var = sims.iter().map(|s| (s.pnl_vs_hodl - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();

    AggregatedResult {
        n_episodes: sims.len(),
        mean_pnl_vs_hodl: mean,
        std_pnl_vs_hodl: std,
        mean_fees: mean_of(|s| s.total_fees),
        mean_net_return: mean_of(|s| s.net_return),
        mean_il_pct: mean_of(|s| s.il_pct),
        win_rate: sims.iter().filter(|s| s.pnl_vs_hodl > 0.0).count() as f64 / n,
        mean_rejected: mean_of(|s| s.n_rejected as f64),
        sharpe: if std > 0.0 { mean / std } else { 0.0 },
    }
}
