#![allow(clippy::too_many_arguments)]

extern crate reqwest;
extern crate serde;
extern crate serde_json;
extern crate url;

pub mod errors;
pub mod feeds;
pub mod gateway;
pub mod peg;
pub(crate) mod timings;
pub mod types;

pub use errors::{FeedError, PegError, Rejection, Result};
pub use feeds::{Consensus, JsonFeed, PriceFeed, PriceFeedAggregator};
pub use gateway::{
    Credentials, ExchangeGateway, ExchangeGatewayBuilder, GatewayError, GatewaySession,
    HashFunction, HttpTransport, Transport,
};
pub use peg::{
    PegBot, PegConfig, PegHandle, PegMonitor, PegState, PegStatus, PegStrategyEngine,
    StatusBoard,
};
pub use types::{Currency, CurrencyPair, Order, OrderId, PairBalance, PriceQuote, Side};
