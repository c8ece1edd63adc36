//! Risk engine for the Wraith lending protocol.
//!
//! The decision layer market modules consult before touching their
//! ledgers: market registry, isolated risk pools, account liquidity,
//! liquidation policy, reward accrual, pause/cap guarding, and the
//! flash-loan coordinator.

pub mod access;
pub mod codes;
pub mod engine;
pub mod errors;
pub mod events;
pub mod flash_loan;
pub mod liquidation;
pub mod market;
pub mod mocks;
pub mod oracle;
pub mod pools;
pub mod rewards;

#[cfg(test)]
mod tests;

pub use access::AccessControlManager;
pub use codes::RiskCode;
pub use engine::{Action, MarketConfig, RiskEngine};
pub use errors::RiskError;
pub use events::*;
pub use flash_loan::FlashLoanCoordinator;
pub use liquidation::LiquidationEngine;
pub use oracle::PriceOracle;
pub use pools::{MarketRiskParams, Pool, PoolManager, CORE_POOL_ID};
pub use rewards::RewardDistributor;
