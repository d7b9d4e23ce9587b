use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::PriceFeed;
use crate::{
    errors::{FeedError, FeedResult},
    types::{CurrencyPair, PriceQuote},
};

const FEED_TIMEOUT: Duration = Duration::from_secs(10);

/// How to reach one JSON price endpoint.
///
/// `url` may contain `{order}` and `{payment}` placeholders (lowercase codes,
/// `{ORDER}`/`{PAYMENT}` for uppercase). `pointer` is an RFC 6901 JSON pointer
/// to the price; `invert` turns a quote of the reverse pair into `1/x`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct JsonFeedConfig {
    pub name: String,
    pub url: String,
    pub pointer: String,
    #[serde(default)]
    pub invert: bool,
}

/// Price feed backed by any HTTP endpoint returning JSON.
pub struct JsonFeed {
    config: JsonFeedConfig,
    client: Client,
}

impl JsonFeed {
    pub fn new(config: JsonFeedConfig) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|err| FeedError::source_failure(&config.name, err))?;
        Ok(Self { config, client })
    }

    fn url_for(&self, pair: &CurrencyPair) -> String {
        self.config
            .url
            .replace("{order}", &pair.order.code)
            .replace("{payment}", &pair.payment.code)
            .replace("{ORDER}", &pair.order.code.to_uppercase())
            .replace("{PAYMENT}", &pair.payment.code.to_uppercase())
    }
}

/// Pulls a positive price out of `doc`; numbers and numeric strings are accepted.
pub(crate) fn extract_price(doc: &Value, pointer: &str, invert: bool) -> Result<f64, String> {
    let raw = doc
        .pointer(pointer)
        .ok_or_else(|| format!("nothing at {}", pointer))?;
    let price = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("{} is not a number: {}", pointer, raw))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(format!("non-positive price {}", price));
    }
    Ok(if invert { 1.0 / price } else { price })
}

#[async_trait]
impl PriceFeed for JsonFeed {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn last_price(&self, pair: &CurrencyPair) -> FeedResult<PriceQuote> {
        let url = self.url_for(pair);
        let fail = |err: &dyn std::fmt::Display| FeedError::source_failure(&self.config.name, err);
        let doc: Value = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| fail(&err))?
            .json()
            .await
            .map_err(|err| fail(&err))?;
        let price = extract_price(&doc, &self.config.pointer, self.config.invert)
            .map_err(|err| fail(&err))?;
        debug!(feed = %self.config.name, %pair, price, "feed quote");
        Ok(PriceQuote::new(self.config.name.clone(), pair.clone(), price))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Currency;

    #[test]
    fn price_extraction_accepts_numbers_and_strings() {
        let doc = json!({"data": {"amount": "250.5"}, "last": 0.004});
        assert_eq!(extract_price(&doc, "/data/amount", false).unwrap(), 250.5);
        assert_eq!(extract_price(&doc, "/last", true).unwrap(), 250.0);
        assert!(extract_price(&doc, "/missing", false).is_err());
        assert!(extract_price(&json!({"p": 0}), "/p", false).is_err());
        assert!(extract_price(&json!({"p": [1]}), "/p", false).is_err());
    }

    #[test]
    fn url_placeholders_are_filled() {
        let feed = JsonFeed::new(JsonFeedConfig {
            name: "coinbase".into(),
            url: "https://api.example.com/prices/{ORDER}-{PAYMENT}/spot?c={order}".into(),
            pointer: "/data/amount".into(),
            invert: false,
        })
        .unwrap();
        let pair = CurrencyPair::new(Currency::crypto("btc"), Currency::fiat("usd"));
        assert_eq!(
            feed.url_for(&pair),
            "https://api.example.com/prices/BTC-USD/spot?c=btc"
        );
        assert_eq!(feed.name(), "coinbase");
    }
}
