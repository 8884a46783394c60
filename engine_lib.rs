extern crate self as beta_lp_sim;

pub mod adapter;
pub mod allocation;
pub mod config;
pub mod error;
pub mod fees;
pub mod flow;
pub mod liquidity_math;
pub mod local_pool;
pub mod market;
pub mod pool;
pub mod recorder;
pub mod sim;
pub mod tick_math;
pub mod types;
pub mod valuation;

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
