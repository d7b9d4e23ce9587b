//! Exchange payload shapes and their conversion into domain types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::errors::{ErrorEnvelope, GatewayError, Result};
use crate::types::{Order, OrderId, OrderStatus, PairBalance, Side, Ticker, Trade};

/// Decodes a body into a JSON object or array, mapping the error envelope.
pub(crate) fn parse_body(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| GatewayError::parse(format!("{}: {}", err, truncate(raw))))?;
    match &value {
        Value::Object(map) if map.contains_key("error") => {
            let envelope: ErrorEnvelope =
                serde_json::from_value(value).map_err(GatewayError::parse)?;
            Err(envelope.error.into())
        }
        Value::Object(_) | Value::Array(_) => Ok(value),
        _ => Err(GatewayError::parse(format!(
            "expected object or array: {}",
            truncate(raw)
        ))),
    }
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(GatewayError::parse)
}

fn truncate(raw: &str) -> &str {
    match raw.char_indices().nth(200) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

fn de_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("number out of range")),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!("not a number: {}", other))),
    }
}

fn de_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s),
        other => Err(serde::de::Error::custom(format!("not an id: {}", other))),
    }
}

/// Accepts `2014-08-19T10:23:49Z` and offsets like `2014-12-04T17:32:55+08:00`.
pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn parse_side(raw: &str) -> Result<Side> {
    match raw {
        "sell" | "ask" => Ok(Side::Sell),
        "buy" | "bid" => Ok(Side::Buy),
        other => Err(GatewayError::parse(format!("unknown side {}", other))),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedOrder {
    #[serde(deserialize_with = "de_id")]
    pub(crate) id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderWire {
    #[serde(deserialize_with = "de_id")]
    id: String,
    side: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    state: String,
    market: String,
    #[serde(deserialize_with = "de_f64")]
    remaining_volume: f64,
    #[serde(default)]
    created_at: Option<String>,
}

impl OrderWire {
    pub(crate) fn into_order(self) -> Result<Order> {
        let status = OrderStatus::from_wire(&self.state)
            .ok_or_else(|| GatewayError::parse(format!("unknown order state {}", self.state)))?;
        Ok(Order {
            id: OrderId::new(self.id),
            side: parse_side(&self.side)?,
            price: self.price,
            quantity: self.remaining_volume,
            status,
            market: self.market,
            created_at: self.created_at.as_deref().and_then(parse_time),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TradeWire {
    #[serde(deserialize_with = "de_id")]
    id: String,
    market: String,
    side: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    #[serde(deserialize_with = "de_f64")]
    volume: f64,
    created_at: String,
}

impl TradeWire {
    pub(crate) fn into_trade(self) -> Result<Trade> {
        let created_at = parse_time(&self.created_at)
            .ok_or_else(|| GatewayError::parse(format!("bad trade time {}", self.created_at)))?;
        Ok(Trade {
            id: self.id,
            market: self.market,
            side: parse_side(&self.side)?,
            price: self.price,
            quantity: self.volume,
            created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemberWire {
    pub(crate) accounts: Vec<AccountWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccountWire {
    pub(crate) currency: String,
    #[serde(deserialize_with = "de_f64")]
    pub(crate) balance: f64,
    #[serde(deserialize_with = "de_f64", default)]
    pub(crate) locked: f64,
}

impl MemberWire {
    fn account(&self, code: &str) -> Option<&AccountWire> {
        self.accounts
            .iter()
            .find(|account| account.currency.eq_ignore_ascii_case(code))
    }

    pub(crate) fn pair_balance(&self, order: &str, payment: &str) -> Result<PairBalance> {
        let (Some(order), Some(payment)) = (self.account(order), self.account(payment)) else {
            return Err(GatewayError::parse(format!(
                "balances for {}/{} missing from account info",
                order, payment
            )));
        };
        Ok(PairBalance {
            order_available: order.balance,
            order_locked: order.locked,
            payment_available: payment.balance,
            payment_locked: payment.locked,
        })
    }

    pub(crate) fn available(&self, code: &str) -> Result<f64> {
        self.account(code)
            .map(|account| account.balance)
            .ok_or_else(|| GatewayError::parse(format!("no balance for currency {}", code)))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TickerEnvelope {
    ticker: TickerWire,
}

#[derive(Debug, Deserialize)]
struct TickerWire {
    #[serde(deserialize_with = "de_f64")]
    last: f64,
    #[serde(deserialize_with = "de_f64")]
    buy: f64,
    #[serde(deserialize_with = "de_f64")]
    sell: f64,
}

impl TickerEnvelope {
    pub(crate) fn into_ticker(self) -> Ticker {
        Ticker {
            last: self.ticker.last,
            bid: self.ticker.buy,
            ask: self.ticker.sell,
        }
    }
}
