//! Price oracle consumed by the risk engine.
//!
//! Prices are keyed by market and quoted for one underlying unit, 1e18
//! scale. `get_underlying_price` returns zero for a missing, disabled, or
//! stale feed; downstream code treats zero as an error, never as a real
//! price.

use odra::casper_types::U256;
use odra::prelude::*;

use super::access::AccessControlManagerContractRef;
use super::errors::RiskError;

/// Price feed data for a market's underlying
#[odra::odra_type]
pub struct PriceFeed {
    /// Price of one underlying unit (1e18 scale)
    pub price: U256,
    /// Timestamp of last update
    pub last_update: u64,
    /// Whether the feed is active
    pub is_active: bool,
}

/// Price Oracle contract
#[odra::module]
pub struct PriceOracle {
    /// Price feeds keyed by market
    price_feeds: Mapping<Address, PriceFeed>,
    /// Access control manager
    access_control: Var<Address>,
    /// Maximum feed age in milliseconds of block time
    max_staleness: Var<u64>,
}

#[odra::module]
impl PriceOracle {
    /// Initialize the oracle
    pub fn init(&mut self, access_control: Address, max_staleness: u64) {
        self.access_control.set(access_control);
        self.max_staleness.set(max_staleness);
    }

    /// Post a price for a market's underlying. Zero prices are rejected;
    /// "no price" is expressed by never posting or by disabling the feed.
    pub fn set_price(&mut self, market: Address, price: U256) {
        self.ensure_allowed("set_price");
        if price.is_zero() {
            self.env().revert(RiskError::InvalidPrice);
        }
        let feed = PriceFeed {
            price,
            last_update: self.env().get_block_time(),
            is_active: true,
        };
        self.price_feeds.set(&market, feed);
    }

    /// Enable or disable a feed
    pub fn set_feed_active(&mut self, market: Address, active: bool) {
        self.ensure_allowed("set_feed_active");
        let mut feed = self
            .price_feeds
            .get(&market)
            .unwrap_or_revert_with(&self.env(), RiskError::InvalidPrice);
        if feed.is_active == active {
            self.env().revert(RiskError::UnchangedValue);
        }
        feed.is_active = active;
        self.price_feeds.set(&market, feed);
    }

    /// Update the staleness window
    pub fn set_max_staleness(&mut self, max_staleness: u64) {
        self.ensure_allowed("set_max_staleness");
        if self.max_staleness.get_or_default() == max_staleness {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.max_staleness.set(max_staleness);
    }

    /// Price of one underlying unit of `market`, or zero when unavailable
    pub fn get_underlying_price(&self, market: Address) -> U256 {
        let Some(feed) = self.price_feeds.get(&market) else {
            return U256::zero();
        };
        if !feed.is_active {
            return U256::zero();
        }
        let now = self.env().get_block_time();
        if now.saturating_sub(feed.last_update) > self.max_staleness.get_or_default() {
            return U256::zero();
        }
        feed.price
    }

    fn ensure_allowed(&self, action: &str) {
        let acm = self
            .access_control
            .get_or_revert_with(RiskError::AccessDenied);
        let allowed = AccessControlManagerContractRef::new(self.env(), acm)
            .is_allowed_to_call(self.env().caller(), String::from(action));
        if !allowed {
            self.env().revert(RiskError::AccessDenied);
        }
    }
}
