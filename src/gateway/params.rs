use std::{collections::BTreeMap, fmt};

use super::errors::{GatewayError, Result};

pub(crate) const PARAM_ACCESS_KEY: &str = "access_key";
pub(crate) const PARAM_TONCE: &str = "tonce";
pub(crate) const PARAM_SIGNATURE: &str = "signature";

/// HTTP verb of an exchange endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific request parameters, kept sorted by key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestParams(BTreeMap<String, String>);

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `k1=v1&k2=v2` in key order, skipping `signature`.
    pub fn canonical_query(&self) -> String {
        self.0
            .iter()
            .filter(|(key, _)| key.as_str() != PARAM_SIGNATURE)
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0.into_iter().collect()
    }
}

/// Formats an amount or price without scientific notation.
pub(crate) fn decimal(value: f64) -> Result<String> {
    if !value.is_finite() || value <= 0.0 {
        return Err(GatewayError::InvalidConfig {
            field: "amount",
            why: "must be a positive finite number",
        });
    }
    let formatted = format!("{:.8}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "0" {
        return Err(GatewayError::InvalidConfig {
            field: "amount",
            why: "rounds to zero at 8 decimals",
        });
    }
    Ok(trimmed.to_string())
}
