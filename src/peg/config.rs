use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    feeds::json::JsonFeedConfig,
    gateway::{BusyRetryPolicy, GatewayOptions, HashFunction},
    types::{Currency, CurrencyPair},
};

#[derive(Debug, Clone, Deserialize)]
pub struct PegConfig {
    pub base_url: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub hash: HashFunction,
    pub order_currency: String,
    pub payment_currency: String,
    #[serde(default = "default_false")]
    pub payment_is_fiat: bool,
    #[serde(default = "default_tx_fee")]
    pub tx_fee_percent: f64,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "default_wall_change_threshold")]
    pub wall_change_threshold: f64,
    #[serde(default)]
    pub price_offset_percent: f64,
    #[serde(default = "default_true")]
    pub dual_side: bool,
    #[serde(default = "default_sell_increment")]
    pub sell_price_increment: f64,
    #[serde(default = "default_min_order")]
    pub min_order_amount: f64,
    #[serde(default)]
    pub keep_proceeds: f64,
    #[serde(default = "default_false")]
    pub multiple_custodians: bool,
    #[serde(default = "default_reset_every")]
    pub reset_every_minutes: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_strategy_interval")]
    pub strategy_interval_secs: u64,
    #[serde(default = "default_feed_retry_base")]
    pub feed_retry_base_secs: u64,
    #[serde(default = "default_busy_increment")]
    pub busy_retry_increment_ms: u64,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_clear_attempts")]
    pub clear_poll_attempts: u32,
    #[serde(default = "default_clear_delay")]
    pub clear_poll_delay_ms: u64,
    #[serde(default = "default_true")]
    pub clear_orders_on_shutdown: bool,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    #[serde(default = "default_history_len")]
    pub notification_history: usize,
    #[serde(default)]
    pub feeds: Vec<JsonFeedConfig>,
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_tx_fee() -> f64 {
    0.2
}

fn default_distance_threshold() -> f64 {
    10.0
}

fn default_wall_change_threshold() -> f64 {
    0.5
}

fn default_sell_increment() -> f64 {
    0.0003
}

fn default_min_order() -> f64 {
    0.01
}

fn default_reset_every() -> u64 {
    3
}

fn default_monitor_interval() -> u64 {
    61
}

fn default_strategy_interval() -> u64 {
    60
}

fn default_feed_retry_base() -> u64 {
    60
}

fn default_busy_increment() -> u64 {
    crate::gateway::session::DEFAULT_RETRY_INCREMENT_MS
}

fn default_busy_timeout() -> u64 {
    crate::gateway::session::DEFAULT_BUSY_TIMEOUT_MS
}

fn default_clear_attempts() -> u32 {
    10
}

fn default_clear_delay() -> u64 {
    1_000
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_history_len() -> usize {
    50
}

impl PegConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        let mut raw: toml::Value = toml::from_str(data).with_context(|| "Failed to parse TOML config")?;
        // Support a nested [peg] table or top-level entries.
        let table = if let Some(table) = raw
            .get_mut("peg")
            .and_then(|v| v.as_table_mut())
            .cloned()
        {
            table
        } else {
            raw.try_into()
                .map_err(|_| anyhow::anyhow!("Invalid peg config structure"))?
        };
        let mut cfg: PegConfig = toml::from_str(&toml::to_string(&table)?)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        // Each field can be overridden by `PEGWALL_*` env vars.
        override_string("PEGWALL_BASE_URL", &mut self.base_url);
        override_string("PEGWALL_ACCESS_KEY", &mut self.access_key);
        override_string("PEGWALL_SECRET", &mut self.secret);
        override_f64("PEGWALL_TX_FEE_PERCENT", &mut self.tx_fee_percent);
        override_f64("PEGWALL_DISTANCE_THRESHOLD", &mut self.distance_threshold);
        override_f64(
            "PEGWALL_WALL_CHANGE_THRESHOLD",
            &mut self.wall_change_threshold,
        );
        override_f64("PEGWALL_PRICE_OFFSET_PERCENT", &mut self.price_offset_percent);
        override_bool("PEGWALL_DUAL_SIDE", &mut self.dual_side);
        override_f64("PEGWALL_SELL_PRICE_INCREMENT", &mut self.sell_price_increment);
        override_f64("PEGWALL_MIN_ORDER_AMOUNT", &mut self.min_order_amount);
        override_f64("PEGWALL_KEEP_PROCEEDS", &mut self.keep_proceeds);
        override_bool("PEGWALL_MULTIPLE_CUSTODIANS", &mut self.multiple_custodians);
        override_u64("PEGWALL_RESET_EVERY_MINUTES", &mut self.reset_every_minutes);
        override_u64("PEGWALL_MONITOR_INTERVAL_SECS", &mut self.monitor_interval_secs);
        override_u64(
            "PEGWALL_STRATEGY_INTERVAL_SECS",
            &mut self.strategy_interval_secs,
        );
        override_u64("PEGWALL_BUSY_TIMEOUT_MS", &mut self.busy_timeout_ms);
        if let Ok(value) = env::var("PEGWALL_REPORT_DIR") {
            self.report_dir = PathBuf::from(value);
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.base_url.is_empty(), "base_url must be set");
        anyhow::ensure!(
            !self.access_key.is_empty() && !self.secret.is_empty(),
            "access_key and secret must be set (or PEGWALL_ACCESS_KEY / PEGWALL_SECRET)"
        );
        anyhow::ensure!(
            !self.order_currency.is_empty() && !self.payment_currency.is_empty(),
            "order_currency and payment_currency must be set"
        );
        anyhow::ensure!(
            !self.order_currency.eq_ignore_ascii_case(&self.payment_currency),
            "order_currency and payment_currency must differ"
        );
        anyhow::ensure!(
            self.feeds.len() >= 2,
            "at least two price feeds (main + backup) are required"
        );
        anyhow::ensure!(
            self.distance_threshold > 0.0,
            "distance_threshold must be greater than zero"
        );
        anyhow::ensure!(
            self.wall_change_threshold > 0.0,
            "wall_change_threshold must be greater than zero"
        );
        anyhow::ensure!(
            (0.0..100.0).contains(&self.tx_fee_percent),
            "tx_fee_percent must be within [0, 100)"
        );
        anyhow::ensure!(
            (0.0..100.0).contains(&self.price_offset_percent),
            "price_offset_percent must be within [0, 100)"
        );
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.keep_proceeds),
            "keep_proceeds must be within [0, 100]"
        );
        anyhow::ensure!(
            self.sell_price_increment >= 0.0,
            "sell_price_increment must be non-negative"
        );
        anyhow::ensure!(
            self.min_order_amount > 0.0,
            "min_order_amount must be greater than zero"
        );
        anyhow::ensure!(
            self.reset_every_minutes >= 1,
            "reset_every_minutes must be at least 1"
        );
        anyhow::ensure!(
            self.monitor_interval_secs > 0 && self.strategy_interval_secs > 0,
            "task intervals must be greater than zero"
        );
        anyhow::ensure!(
            self.busy_timeout_ms >= self.busy_retry_increment_ms,
            "busy_timeout_ms must be >= busy_retry_increment_ms"
        );
        Ok(())
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(
            Currency::crypto(&self.order_currency),
            Currency::new(&self.payment_currency, self.payment_is_fiat),
        )
    }

    /// Pair the feeds quote: the payment currency priced in USD.
    pub fn tracked_pair(&self) -> CurrencyPair {
        CurrencyPair::new(
            Currency::new(&self.payment_currency, self.payment_is_fiat),
            Currency::fiat("usd"),
        )
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            retry: BusyRetryPolicy::new(
                Duration::from_millis(self.busy_retry_increment_ms),
                Duration::from_millis(self.busy_timeout_ms),
            ),
            hash: self.hash,
            tx_fee_percent: self.tx_fee_percent,
        }
    }

    /// With several custodians on the pair the monitor runs once per reset window.
    pub fn monitor_interval(&self) -> Duration {
        if self.multiple_custodians {
            Duration::from_secs(60 * self.reset_every_minutes)
        } else {
            Duration::from_secs(self.monitor_interval_secs)
        }
    }

    pub fn strategy_interval(&self) -> Duration {
        Duration::from_secs(self.strategy_interval_secs)
    }

    pub fn feed_retry_base(&self) -> Duration {
        Duration::from_secs(self.feed_retry_base_secs)
    }

    pub fn clear_poll_delay(&self) -> Duration {
        Duration::from_millis(self.clear_poll_delay_ms)
    }
}

fn override_string(key: &str, field: &mut String) {
    if let Ok(value) = env::var(key) {
        if !value.is_empty() {
            *field = value;
        }
    }
}

fn override_f64(key: &str, field: &mut f64) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<f64>() {
            *field = parsed;
        }
    }
}

fn override_u64(key: &str, field: &mut u64) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<u64>() {
            *field = parsed;
        }
    }
}

fn override_bool(key: &str, field: &mut bool) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<bool>() {
            *field = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEEDS: &str = r#"
[[feeds]]
name = "main"
url = "https://feeds.example.com/{order}/{payment}"
pointer = "/price"

[[feeds]]
name = "backup"
url = "https://other.example.com/ticker/{ORDER}{PAYMENT}"
pointer = "/last"
invert = true
"#;

    #[test]
    fn defaults_fill_missing_fields() {
        let data = format!(
            r#"
base_url = "https://peatio.example.com"
access_key = "ak"
secret = "sk"
order_currency = "nbt"
payment_currency = "btc"
{}"#,
            FEEDS
        );
        let cfg = PegConfig::from_toml_str(&data).unwrap();
        assert_eq!(cfg.wall_change_threshold, 0.5);
        assert_eq!(cfg.reset_every_minutes, 3);
        assert!(cfg.dual_side);
        assert_eq!(cfg.hash, HashFunction::Sha256);
        assert_eq!(cfg.feeds.len(), 2);
        assert!(cfg.feeds[1].invert);
        assert_eq!(cfg.pair().market(), "nbtbtc");
        assert_eq!(cfg.monitor_interval(), Duration::from_secs(61));
    }

    #[test]
    fn nested_table_and_custodian_interval() {
        let data = format!(
            r#"
[peg]
base_url = "https://peatio.example.com"
access_key = "ak"
secret = "sk"
hash = "sha512"
order_currency = "nbt"
payment_currency = "eur"
payment_is_fiat = true
multiple_custodians = true
reset_every_minutes = 5
{}"#,
            FEEDS.replace("[[feeds]]", "[[peg.feeds]]")
        );
        let cfg = PegConfig::from_toml_str(&data).unwrap();
        assert_eq!(cfg.hash, HashFunction::Sha512);
        assert!(cfg.pair().payment.is_fiat());
        assert_eq!(cfg.tracked_pair().to_string(), "eur_usd");
        assert_eq!(cfg.monitor_interval(), Duration::from_secs(300));
    }

    #[test]
    fn validation_rejects_single_feed() {
        let data = r#"
base_url = "https://peatio.example.com"
access_key = "ak"
secret = "sk"
order_currency = "nbt"
payment_currency = "btc"

[[feeds]]
name = "main"
url = "https://feeds.example.com"
pointer = "/price"
"#;
        let err = PegConfig::from_toml_str(data).unwrap_err();
        assert!(err.to_string().contains("two price feeds"));
    }

    #[test]
    fn env_override_parses_values() {
        let mut value = 1.0;
        env::set_var("PEGWALL_TEST_OVERRIDE_ONLY", "2.5");
        override_f64("PEGWALL_TEST_OVERRIDE_ONLY", &mut value);
        assert_eq!(value, 2.5);
        env::set_var("PEGWALL_TEST_OVERRIDE_ONLY", "not-a-number");
        override_f64("PEGWALL_TEST_OVERRIDE_ONLY", &mut value);
        assert_eq!(value, 2.5);
        env::remove_var("PEGWALL_TEST_OVERRIDE_ONLY");
    }
}
