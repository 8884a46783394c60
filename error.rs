//! Error taxonomy for the simulation core and the Pool collaborator.

use crate::sim::Phase;

/// Failures raised by a [`Pool`](crate::pool::Pool) implementation.
///
/// These model contract reverts. The adapter decides which of them are
/// expected bound rejections and which abort the episode.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("pool is not initialized")]
    NotInitialized,

    #[error("pool is already initialized")]
    AlreadyInitialized,

    #[error("invalid tick range [{lower}, {upper})")]
    InvalidTickRange { lower: i32, upper: i32 },

    #[error("liquidity amount must be positive")]
    ZeroLiquidity,

    #[error("swap amount must be positive")]
    ZeroAmount,

    /// The limit is already on the wrong side of the current price.
    #[error("price limit is not beyond the current price (tick {current_tick})")]
    InvalidPriceLimit { current_tick: i32 },

    /// The swap would reach the limit before its input is consumed.
    #[error("swap would cross the price limit with {unfilled} input left")]
    PriceLimit { unfilled: u128 },

    #[error("pool call failed: {0}")]
    Call(String),
}

impl PoolError {
    /// True when the revert is caused by the requested price limit.
    pub fn is_price_limit(&self) -> bool {
        matches!(self, PoolError::InvalidPriceLimit { .. } | PoolError::PriceLimit { .. })
    }
}

/// Errors raised by the simulation core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("invalid allocation policy: {0}")]
    InvalidPolicy(String),

    #[error("domain error: {0}")]
    Domain(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Expected outcome of the slippage bound; recorded, never fatal.
    #[error("swap rejected by price bound at tick {current_tick} (limit tick {limit_tick})")]
    BoundRejected { current_tick: i32, limit_tick: i32 },

    #[error("pool call failed at step {step}: {source}")]
    PoolCallFailure {
        step: usize,
        #[source]
        source: PoolError,
    },

    #[error("allocation requires ({required0}, {required1}) but budget is ({budget0}, {budget1})")]
    BudgetExceeded {
        required0: u128,
        required1: u128,
        budget0: u128,
        budget1: u128,
    },

    #[error("episode is in phase {actual:?}, expected {expected}")]
    InvalidPhase { expected: &'static str, actual: Phase },

    #[error("record for step {step} appended after step {last}")]
    OutOfOrderRecord { step: usize, last: usize },

    /// Writing episode output failed.
    #[error("output error: {0}")]
    Output(String),
}

impl From<csv::Error> for SimError {
    fn from(e: csv::Error) -> Self {
        SimError::Output(e.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::Output(e.to_string())
    }
}

pub type SimResult<T> = Result<T, SimError>;
