//! Events for the risk engine.

use odra::casper_types::U256;
use odra::prelude::*;

use super::pools::MarketRiskParams;

// ============================================================================
// Market Registry Events
// ============================================================================

/// Event emitted when a market is listed
#[odra::event]
pub struct MarketListed {
    /// Market address
    pub market: Address,
}

/// Event emitted when a market is unlisted
#[odra::event]
pub struct MarketUnlisted {
    /// Market address
    pub market: Address,
    /// Number of accounts purged from the market
    pub purged_accounts: u32,
}

/// Event emitted when an account enters a market
#[odra::event]
pub struct MarketEntered {
    /// Market address
    pub market: Address,
    /// Account that entered
    pub account: Address,
}

/// Event emitted when an account exits a market
#[odra::event]
pub struct MarketExited {
    /// Market address
    pub market: Address,
    /// Account that exited
    pub account: Address,
}

// ============================================================================
// Pool Events
// ============================================================================

/// Event emitted when a risk pool is created
#[odra::event]
pub struct PoolCreated {
    /// New pool id
    pub pool_id: u32,
    /// Human-readable label
    pub label: String,
    /// Created by
    pub created_by: Address,
}

/// Event emitted when a market is added to a pool
#[odra::event]
pub struct PoolMarketAdded {
    /// Pool id
    pub pool_id: u32,
    /// Market address
    pub market: Address,
}

/// Event emitted when a market is removed from a pool
#[odra::event]
pub struct PoolMarketRemoved {
    /// Pool id
    pub pool_id: u32,
    /// Market address
    pub market: Address,
}

/// Event emitted when a pool is activated or deactivated
#[odra::event]
pub struct PoolStatusUpdated {
    /// Pool id
    pub pool_id: u32,
    /// New status
    pub is_active: bool,
}

/// Event emitted when a pool's core-fallback flag changes
#[odra::event]
pub struct CorePoolFallbackUpdated {
    /// Pool id
    pub pool_id: u32,
    /// Whether absent markets resolve through the core pool
    pub allow: bool,
}

/// Event emitted when a pool membership's risk parameters change
#[odra::event]
pub struct PoolMarketParamsUpdated {
    /// Pool id
    pub pool_id: u32,
    /// Market address
    pub market: Address,
    /// New parameter set
    pub params: MarketRiskParams,
}

/// Event emitted when an account switches its active pool
#[odra::event]
pub struct PoolEntered {
    /// Account
    pub account: Address,
    /// Previous pool id
    pub old_pool_id: u32,
    /// Selected pool id
    pub new_pool_id: u32,
}

// ============================================================================
// Pause & Cap Events
// ============================================================================

/// Event emitted when a (market, action) pause flag changes
#[odra::event]
pub struct ActionPauseUpdated {
    /// Market address
    pub market: Address,
    /// Action discriminant
    pub action: u8,
    /// New pause state
    pub paused: bool,
}

/// Event emitted when a market's supply cap changes
#[odra::event]
pub struct SupplyCapUpdated {
    /// Market address
    pub market: Address,
    /// New cap in underlying units
    pub new_cap: U256,
}

/// Event emitted when a market's borrow cap changes
#[odra::event]
pub struct BorrowCapUpdated {
    /// Market address
    pub market: Address,
    /// New cap in underlying units
    pub new_cap: U256,
}

// ============================================================================
// Liquidation Events
// ============================================================================

/// Event emitted when the close factor changes
#[odra::event]
pub struct CloseFactorUpdated {
    /// Old close factor (1e18 scale)
    pub old_close_factor: U256,
    /// New close factor (1e18 scale)
    pub new_close_factor: U256,
}

/// Event emitted when forced liquidation is toggled for a market
#[odra::event]
pub struct ForcedLiquidationUpdated {
    /// Market address
    pub market: Address,
    /// New state
    pub enabled: bool,
}

/// Event emitted when forced liquidation is toggled for one liquidator
#[odra::event]
pub struct ForcedLiquidationAccountUpdated {
    /// Liquidator address
    pub liquidator: Address,
    /// Market address
    pub market: Address,
    /// New state
    pub enabled: bool,
}

// ============================================================================
// Reward Events
// ============================================================================

/// Event emitted when a market's reward speeds change
#[odra::event]
pub struct RewardSpeedUpdated {
    /// Market address
    pub market: Address,
    /// Supply-side speed (reward units per second)
    pub supply_speed: U256,
    /// Borrow-side speed (reward units per second)
    pub borrow_speed: U256,
}

/// Event emitted when rewards are settled into an account's owed balance
#[odra::event]
pub struct RewardDistributed {
    /// Account credited
    pub account: Address,
    /// Market the accrual came from
    pub market: Address,
    /// Amount credited this settlement
    pub amount: U256,
    /// Account's new owed total
    pub total_owed: U256,
}

/// Event emitted when an account claims its accrued rewards
#[odra::event]
pub struct RewardClaimed {
    /// Account paid
    pub account: Address,
    /// Amount transferred
    pub amount: U256,
}

// ============================================================================
// Flash-Loan Events
// ============================================================================

/// Event emitted after a completed flash loan
#[odra::event]
pub struct FlashLoanExecuted {
    /// Initiating caller
    pub initiator: Address,
    /// Receiver contract that got the funds
    pub receiver: Address,
    /// Account liable for any fee conversion
    pub on_behalf_of: Address,
    /// Borrowed markets
    pub markets: Vec<Address>,
    /// Borrowed amounts
    pub amounts: Vec<U256>,
    /// Charged fees
    pub fees: Vec<U256>,
}

/// Event emitted when a market's flash-loan flag changes
#[odra::event]
pub struct FlashLoanMarketUpdated {
    /// Market address
    pub market: Address,
    /// Whether flash loans are enabled
    pub enabled: bool,
}

/// Event emitted when a flash-loan initiator is allowed or removed
#[odra::event]
pub struct FlashLoanAuthorizationUpdated {
    /// Account
    pub account: Address,
    /// Whether the account may initiate flash loans
    pub authorized: bool,
}

/// Event emitted when a flash-loan delegate approval changes
#[odra::event]
pub struct FlashLoanDelegateUpdated {
    /// Approving account
    pub account: Address,
    /// Delegate
    pub delegate: Address,
    /// Whether the delegate may initiate on the account's behalf
    pub approved: bool,
}

/// Event emitted when the flash-loan fee rate changes
#[odra::event]
pub struct FlashLoanFeeUpdated {
    /// Fee rate (1e18 scale)
    pub fee_rate: U256,
    /// Protocol share of the fee (1e18 scale)
    pub protocol_fee_share: U256,
}

// ============================================================================
// Admin Events
// ============================================================================

/// Event emitted when the price oracle address changes
#[odra::event]
pub struct OracleUpdated {
    /// New oracle address
    pub oracle: Address,
}

/// Event emitted when the stablecoin controller is registered
#[odra::event]
pub struct StablecoinControllerUpdated {
    /// Controller address
    pub controller: Address,
}

/// Event emitted when a permission is granted or revoked
#[odra::event]
pub struct PermissionUpdated {
    /// Account
    pub account: Address,
    /// Action signature
    pub action: String,
    /// Whether the account may call it
    pub allowed: bool,
}
