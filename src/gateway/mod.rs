pub mod auth;
pub mod client;
pub mod errors;
pub mod params;
pub mod session;
pub mod transport;
pub(crate) mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{canonical_string, sign, Credentials, HashFunction};
pub use client::{ExchangeGateway, ExchangeGatewayBuilder, GatewayOptions};
pub use errors::{GatewayError, Result, CODE_ALREADY_SETTLED};
pub use params::{RequestParams, Verb};
pub use session::{BusyGuard, BusyRetryPolicy, GatewaySession};
pub use transport::{HttpTransport, SignedRequest, Transport};
