pub mod aggregator;
pub mod consensus;
pub mod json;

use async_trait::async_trait;

use crate::{
    errors::FeedResult,
    types::{CurrencyPair, PriceQuote},
};

pub use aggregator::{PriceFeedAggregator, DEFAULT_RETRY_BASE, MAX_ATTEMPTS};
pub use consensus::{close_enough, majority_agrees, select, Consensus};
pub use json::JsonFeed;

/// A single external price source.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Latest price of one unit of `pair.order` expressed in `pair.payment`.
    async fn last_price(&self, pair: &CurrencyPair) -> FeedResult<PriceQuote>;
}
