//! Episode configuration.
//!
//! Every knob needed to reproduce a run bit-for-bit lives in [`SimConfig`].
//! The CLI starts from `SimConfig::default()` (or a JSON file) and overrides
//! individual fields.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::types::{AllocationPolicy, DEFAULT_FEE_PPM, DEFAULT_TICK_SPACING};

/// Which price both LP and HODL portfolios are marked at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    External,
    Pool,
}

/// External price model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceModel {
    /// Ornstein–Uhlenbeck, additive noise.
    Ou,
    /// Geometric Brownian motion with `sigma` as per-step log volatility.
    Gbm,
    /// Mean-reverting latent volatility driving log returns.
    LatentVol,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub model: PriceModel,
    /// Starting external price; the pool is initialised here too.
    pub initial_price: f64,
    /// Long-run mean. `None` means the initial price.
    pub mean: Option<f64>,
    /// Reversion speed per unit time.
    pub kappa: f64,
    /// Volatility. Price units per √time for OU, log-vol otherwise.
    pub sigma: f64,
    /// Time increment per step.
    pub dt: f64,
    /// Initial latent scale (LatentVol only); also its long-run mean.
    pub latent_scale: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            model: PriceModel::Ou,
            initial_price: 3_200.0,
            mean: None,
            kappa: 0.05,
            sigma: 20.0,
            dt: 1.0,
            latent_scale: 0.005,
        }
    }
}

impl MarketConfig {
    pub fn long_run_mean(&self) -> f64 {
        self.mean.unwrap_or(self.initial_price)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Noise scale of organic flow, as a multiple of `base_notional`.
    pub epsilon: f64,
    /// Typical organic order size in quote units.
    pub base_notional: f64,
    /// How strongly organic flow leans toward closing the price gap.
    pub gap_gain: f64,
    /// Orders smaller than this are not sent.
    pub min_notional: f64,
    pub max_notional: f64,
    /// Maximum arbitrage trades per step; zero disables arbitrage.
    pub num_arbs: u32,
    /// Fraction of the remaining gap each arb trade targets.
    pub arb_fraction: f64,
    /// Relative gap below which arbitrage is skipped.
    pub arb_band: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            base_notional: 1_000.0,
            gap_gain: 50.0,
            min_notional: 1.0,
            max_notional: 10_000.0,
            num_arbs: 3,
            arb_fraction: 0.8,
            arb_band: 0.001,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub fee_ppm: u32,
    pub tick_spacing: i32,
    pub decimals0: u8,
    pub decimals1: u8,
    /// Slippage bound: maximum ticks a single swap may move the price.
    pub max_tick_move: i32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fee_ppm: DEFAULT_FEE_PPM,
            tick_spacing: DEFAULT_TICK_SPACING,
            decimals0: 18,
            decimals1: 6,
            max_tick_move: 600,
        }
    }
}

/// Capital available to the LP, in human units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub amount0: f64,
    pub amount1: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { amount0: 10.0, amount1: 50_000.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub policy: AllocationPolicy,
    pub market: MarketConfig,
    pub flow: FlowConfig,
    pub pool: PoolConfig,
    pub budget: BudgetConfig,
    pub num_steps: usize,
    pub seed: u64,
    pub price_source: PriceSource,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            policy: AllocationPolicy::default(),
            market: MarketConfig::default(),
            flow: FlowConfig::default(),
            pool: PoolConfig::default(),
            budget: BudgetConfig::default(),
            num_steps: 250,
            seed: 42,
            price_source: PriceSource::External,
        }
    }
}

impl SimConfig {
    /// Load a (possibly partial) JSON config; missing fields take defaults.
    pub fn from_json_file(path: &Path) -> SimResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SimError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| SimError::InvalidConfig(format!("parsing {}: {e}", path.display())))
    }

    /// Market, flow, pool and budget checks. Policy checks belong to the
    /// allocator so that they surface as `InvalidPolicy`.
    pub fn validate(&self) -> SimResult<()> {
        let m = &self.market;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        if !positive(m.initial_price) {
            return Err(invalid(format!("initial_price must be positive, got {}", m.initial_price)));
        }
        if !positive(m.long_run_mean()) {
            return Err(invalid(format!("mean must be positive, got {}", m.long_run_mean())));
        }
        if !non_negative(m.kappa) {
            return Err(invalid(format!("kappa must be >= 0, got {}", m.kappa)));
        }
        if m.model == PriceModel::LatentVol && m.kappa > 1.0 {
            return Err(invalid(format!("latent-vol kappa must be <= 1, got {}", m.kappa)));
        }
        if !non_negative(m.sigma) {
            return Err(invalid(format!("sigma must be >= 0, got {}", m.sigma)));
        }
        if !positive(m.dt) {
            return Err(invalid(format!("dt must be positive, got {}", m.dt)));
        }
        if !non_negative(m.latent_scale) {
            return Err(invalid(format!("latent_scale must be >= 0, got {}", m.latent_scale)));
        }

        let f = &self.flow;
        if !non_negative(f.epsilon) || !non_negative(f.gap_gain) || !non_negative(f.base_notional) {
            return Err(invalid("epsilon, gap_gain and base_notional must be >= 0".to_string()));
        }
        if !non_negative(f.min_notional) || !positive(f.max_notional) || f.min_notional > f.max_notional {
            return Err(invalid(format!(
                "notional bounds must satisfy 0 <= min <= max, got [{}, {}]",
                f.min_notional, f.max_notional
            )));
        }
        if !(f.arb_fraction > 0.0 && f.arb_fraction <= 1.0) {
            return Err(invalid(format!("arb_fraction must be in (0, 1], got {}", f.arb_fraction)));
        }
        if !non_negative(f.arb_band) {
            return Err(invalid(format!("arb_band must be >= 0, got {}", f.arb_band)));
        }

        let p = &self.pool;
        if p.tick_spacing <= 0 {
            return Err(invalid(format!("tick_spacing must be positive, got {}", p.tick_spacing)));
        }
        if p.max_tick_move <= 0 {
            return Err(invalid(format!("max_tick_move must be positive, got {}", p.max_tick_move)));
        }
        if p.fee_ppm >= 1_000_000 {
            return Err(invalid(format!("fee_ppm must be < 1e6, got {}", p.fee_ppm)));
        }
        if p.decimals0 > 30 || p.decimals1 > 30 {
            return Err(invalid("token decimals must be <= 30".to_string()));
        }

        if !non_negative(self.budget.amount0) || !non_negative(self.budget.amount1) {
            return Err(invalid("budget amounts must be >= 0".to_string()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> SimError {
    SimError::InvalidConfig(msg)
}
