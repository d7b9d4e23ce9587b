use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an order as assigned by the exchange.
#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A currency code plus whether it is a fiat currency.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    #[serde(default)]
    pub fiat: bool,
}

impl Currency {
    pub fn new(code: impl Into<String>, fiat: bool) -> Self {
        Self {
            code: code.into().to_lowercase(),
            fiat,
        }
    }

    pub fn crypto(code: impl Into<String>) -> Self {
        Self::new(code, false)
    }

    pub fn fiat(code: impl Into<String>) -> Self {
        Self::new(code, true)
    }

    pub fn is_fiat(&self) -> bool {
        self.fiat
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// Trading pair; `order` is the pegged asset, `payment` the currency it is quoted in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub order: Currency,
    pub payment: Currency,
}

impl CurrencyPair {
    pub fn new(order: Currency, payment: Currency) -> Self {
        Self { order, payment }
    }

    /// Market symbol as used on the wire (`nbtbtc`).
    pub fn market(&self) -> String {
        format!("{}{}", self.order.code, self.payment.code)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.order.code, self.payment.code)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Maps the exchange `state` field (`wait`, `done`, `cancel`).
    pub fn from_wire(state: &str) -> Option<Self> {
        match state {
            "wait" => Some(OrderStatus::Open),
            "done" => Some(OrderStatus::Completed),
            "cancel" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Open)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    /// Remaining (unfilled) quantity in order currency.
    pub quantity: f64,
    pub status: OrderStatus,
    pub market: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub market: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Ticker {
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
}

/// Available and locked amounts for both sides of a pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PairBalance {
    pub order_available: f64,
    pub order_locked: f64,
    pub payment_available: f64,
    pub payment_locked: f64,
}

/// A single observation from a price feed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceQuote {
    pub source: String,
    pub pair: CurrencyPair,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(source: impl Into<String>, pair: CurrencyPair, price: f64) -> Self {
        Self {
            source: source.into(),
            pair,
            price,
            observed_at: Utc::now(),
        }
    }
}
