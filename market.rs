use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::{MarketConfig, PriceModel};
use crate::error::{SimError, SimResult};
use crate::types::MIN_PRICE;

/// RNG stream reserved for the external price path.
pub const PRICE_STREAM: u64 = 0;

// ─── Single-step transitions ──────────────────────────────────────────────────

/// Euler–Maruyama step of an Ornstein–Uhlenbeck process.
///
/// next = S + κ(μ - S)·dt + σ·√dt·Z, floored at `MIN_PRICE`.
#[inline]
pub fn ou_step(price: f64, mean: f64, kappa: f64, sigma: f64, dt: f64, z: f64) -> f64 {
    let next = price + kappa * (mean - price) * dt + sigma * dt.sqrt() * z;
    next.max(MIN_PRICE)
}

/// Advance by one GBM step.
///
/// S(t+1) = S(t) * exp(-σ²dt/2 + σ√dt·Z),  Z ~ N(0,1)
#[inline]
pub fn gbm_step(price: f64, sigma: f64, dt: f64, rng: &mut ChaCha8Rng) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    let vol = sigma * dt.sqrt();
    (price * (-0.5 * vol * vol + vol * z).exp()).max(MIN_PRICE)
}

/// Latent-volatility step. Returns `(scale, price)`.
///
/// r_t = max(0, κ r̄ + (1-κ) r_{t-1} + u_t),  u_t ~ N(0, σ²)
/// S_t = S_{t-1} · exp(ε_t),                   ε_t ~ N(0, r_t²)
#[inline]
pub fn latent_vol_step(
    scale: f64,
    price: f64,
    kappa: f64,
    scale_mean: f64,
    sigma: f64,
    rng: &mut ChaCha8Rng,
) -> (f64, f64) {
    let u: f64 = rng.sample::<f64, _>(StandardNormal) * sigma;
    let r = (kappa * scale_mean + (1.0 - kappa) * scale + u).max(0.0);
    let eps: f64 = rng.sample::<f64, _>(StandardNormal) * r;
    (r, (price * eps.exp()).max(MIN_PRICE))
}

// ─── Stateful process ─────────────────────────────────────────────────────────

/// External reference price. Owns its own seeded generator so a path is a
/// pure function of `(config, seed)`.
#[derive(Clone, Debug)]
pub struct PriceProcess {
    model: PriceModel,
    price: f64,
    mean: f64,
    kappa: f64,
    sigma: f64,
    dt: f64,
    latent: f64,
    latent_mean: f64,
    steps: usize,
    rng: ChaCha8Rng,
}

impl PriceProcess {
    pub fn new(cfg: &MarketConfig, seed: u64) -> SimResult<Self> {
        if !(cfg.initial_price.is_finite() && cfg.initial_price > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "initial price must be positive, got {}",
                cfg.initial_price
            )));
        }
        if !(cfg.kappa >= 0.0 && cfg.sigma >= 0.0 && cfg.dt > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "need kappa >= 0, sigma >= 0, dt > 0; got ({}, {}, {})",
                cfg.kappa, cfg.sigma, cfg.dt
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(PRICE_STREAM);
        Ok(Self {
            model: cfg.model,
            price: cfg.initial_price.max(MIN_PRICE),
            mean: cfg.long_run_mean(),
            kappa: cfg.kappa,
            sigma: cfg.sigma,
            dt: cfg.dt,
            latent: cfg.latent_scale,
            latent_mean: cfg.latent_scale,
            steps: 0,
            rng,
        })
    }

    /// Pure OU process with an explicit seed.
    pub fn ou(price: f64, mean: f64, kappa: f64, sigma: f64, dt: f64, seed: u64) -> SimResult<Self> {
        let cfg = MarketConfig {
            model: PriceModel::Ou,
            initial_price: price,
            mean: Some(mean),
            kappa,
            sigma,
            dt,
            ..MarketConfig::default()
        };
        Self::new(&cfg, seed)
    }

    /// Advance one step and return the new price.
    pub fn step(&mut self) -> f64 {
        self.price = match self.model {
            PriceModel::Ou => {
                let z: f64 = self.rng.sample(StandardNormal);
                ou_step(self.price, self.mean, self.kappa, self.sigma, self.dt, z)
            }
            PriceModel::Gbm => gbm_step(self.price, self.sigma, self.dt, &mut self.rng),
            PriceModel::LatentVol => {
                let (r, s) = latent_vol_step(
                    self.latent,
                    self.price,
                    self.kappa,
                    self.latent_mean,
                    self.sigma,
                    &mut self.rng,
                );
                self.latent = r;
                s
            }
        };
        self.steps += 1;
        self.price
    }

    #[inline]
    pub fn current_price(&self) -> f64 {
        self.price
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Current latent scale (LatentVol only).
    pub fn latent_scale(&self) -> f64 {
        self.latent
    }

    /// `n` steps collected into a vector, starting after the current price.
    pub fn path(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.step()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ou_reverts_to_mean() {
        let mut p = PriceProcess::ou(3_200.0, 3_000.0, 0.1, 20.0, 1.0, 7).unwrap();
        let path = p.path(40_000);
        let tail = &path[20_000..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!((mean - 3_000.0).abs() < 15.0, "sample mean {mean} far from 3000");
    }

    #[test]
    fn zero_noise_zero_kappa_is_constant() {
        let mut p = PriceProcess::ou(3_200.0, 2_000.0, 0.0, 0.0, 1.0, 1).unwrap();
        for _ in 0..100 {
            assert_eq!(p.step(), 3_200.0);
        }
    }

    #[test]
    fn zero_kappa_is_driftless_noise() {
        let mut p = PriceProcess::ou(3_200.0, 1.0, 0.0, 5.0, 1.0, 3).unwrap();
        let path = p.path(10_000);
        assert!(path.iter().all(|x| x.is_finite() && *x >= MIN_PRICE));
        assert_ne!(path[0], path[1]);
    }

    #[test]
    fn price_is_floored() {
        let mut p = PriceProcess::ou(1.0, 1.0, 0.0, 1_000.0, 1.0, 11).unwrap();
        for _ in 0..1_000 {
            assert!(p.step() >= MIN_PRICE);
        }
    }

    #[test]
    fn same_seed_same_path() {
        let cfg = MarketConfig::default();
        let a = PriceProcess::new(&cfg, 99).unwrap().path(50);
        let b = PriceProcess::new(&cfg, 99).unwrap().path(50);
        let c = PriceProcess::new(&cfg, 100).unwrap().path(50);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn gbm_and_latent_vol_stay_positive() {
        for model in [PriceModel::Gbm, PriceModel::LatentVol] {
            let cfg = MarketConfig { model, sigma: 0.02, kappa: 0.1, ..MarketConfig::default() };
            let mut p = PriceProcess::new(&cfg, 5).unwrap();
            for _ in 0..2_000 {
                let s = p.step();
                assert!(s.is_finite() && s >= MIN_PRICE, "{model:?} produced {s}");
            }
            assert!(p.latent_scale() >= 0.0);
        }
    }

    #[test]
    fn negative_parameters_are_rejected() {
        assert!(PriceProcess::ou(3_200.0, 3_200.0, -0.1, 1.0, 1.0, 0).is_err());
        assert!(PriceProcess::ou(0.0, 3_200.0, 0.1, 1.0, 1.0, 0).is_err());
    }
}
