use serde::Deserialize;

/// Result type used by [`ExchangeGateway`](super::ExchangeGateway).
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Exchange code for an order that is already filled or cancelled.
pub const CODE_ALREADY_SETTLED: i64 = 2004;

/// Errors returned by the exchange gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Another call held the session for longer than the retry timeout.
    #[error("{operation}: exchange busy, gave up after {attempts} attempts ({waited_ms} ms)")]
    BusyTimeout {
        operation: &'static str,
        attempts: u32,
        waited_ms: u64,
    },
    /// Normalized `{"error": {...}}` envelope returned by the exchange.
    #[error("exchange error {code}: {message}")]
    Api { code: i64, message: String },
    /// The body was not the JSON shape the endpoint returns.
    #[error("unparseable response: {0}")]
    Parse(String),
    /// No response at all (DNS, TLS, timeout, reset).
    #[error("no response from exchange: {0}")]
    Connection(String),
    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// Configuration validation failure raised by a builder.
    #[error("invalid config: {field}: {why}")]
    InvalidConfig {
        field: &'static str,
        why: &'static str,
    },
}

impl GatewayError {
    pub fn code(&self) -> Option<i64> {
        match self {
            GatewayError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for errors callers may treat as "nothing left to do".
    pub fn is_already_settled(&self) -> bool {
        self.code() == Some(CODE_ALREADY_SETTLED)
    }

    /// Short label for logs and timings.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BusyTimeout { .. } => "busy_timeout",
            GatewayError::Api { .. } => "api",
            GatewayError::Parse(_) => "parse",
            GatewayError::Connection(_) => "connection",
            GatewayError::Signing(_) => "signing",
            GatewayError::InvalidConfig { .. } => "invalid_config",
        }
    }

    pub fn is_busy_timeout(&self) -> bool {
        matches!(self, GatewayError::BusyTimeout { .. })
    }

    pub(crate) fn parse(what: impl std::fmt::Display) -> Self {
        GatewayError::Parse(what.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: ServerErr,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerErr {
    pub(crate) code: serde_json::Value,
    #[serde(default)]
    pub(crate) message: String,
}

impl ServerErr {
    /// Codes arrive as numbers or numeric strings depending on the endpoint.
    pub(crate) fn code(&self) -> i64 {
        match &self.code {
            serde_json::Value::Number(n) => n.as_i64().unwrap_or_default(),
            serde_json::Value::String(s) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        }
    }
}

impl From<ServerErr> for GatewayError {
    fn from(err: ServerErr) -> Self {
        GatewayError::Api {
            code: err.code(),
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_label_every_variant() {
        let busy = GatewayError::BusyTimeout {
            operation: "balances",
            attempts: 3,
            waited_ms: 900,
        };
        assert_eq!(busy.kind(), "busy_timeout");
        assert!(busy.is_busy_timeout());
        let api = GatewayError::Api {
            code: CODE_ALREADY_SETTLED,
            message: "Order not found".into(),
        };
        assert_eq!(api.kind(), "api");
        assert!(api.is_already_settled());
        assert_eq!(GatewayError::parse("<html>").kind(), "parse");
        assert_eq!(GatewayError::Connection("reset".into()).kind(), "connection");
    }
}
