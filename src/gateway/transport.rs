use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::{
    errors::{GatewayError, Result},
    params::Verb,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A fully prepared request: signed params for private endpoints, plain ones otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedRequest {
    pub verb: Verb,
    pub uri: String,
    pub params: Vec<(String, String)>,
}

impl SignedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Moves one request to the exchange and returns the raw body.
///
/// Implementations must not retry; the gateway owns retry and serialization.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &SignedRequest) -> Result<String>;
}

/// `reqwest` backed transport. HTTP error statuses still yield the body,
/// since the exchange reports failures in a JSON envelope.
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|_| GatewayError::InvalidConfig {
            field: "base_url",
            why: "must be an absolute URL",
        })?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| GatewayError::Connection(err.to_string()))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, uri: &str) -> Result<Url> {
        self.base
            .join(uri)
            .map_err(|err| GatewayError::Connection(format!("bad endpoint {}: {}", uri, err)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &SignedRequest) -> Result<String> {
        let url = self.endpoint(&request.uri)?;
        debug!(verb = %request.verb, %url, "calling exchange");
        let builder = match request.verb {
            Verb::Get => self.client.get(url).query(&request.params),
            Verb::Post => self.client.post(url).form(&request.params),
        };
        let response = builder
            .send()
            .await
            .map_err(|err| GatewayError::Connection(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GatewayError::Connection(err.to_string()))?;
        debug!(status = status.as_u16(), bytes = body.len(), "exchange answered");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_onto_base() {
        let transport = HttpTransport::new("https://peatio.example.com/").unwrap();
        let url = transport.endpoint("/api/v2/orders").unwrap();
        assert_eq!(url.as_str(), "https://peatio.example.com/api/v2/orders");
    }

    #[test]
    fn relative_base_is_rejected() {
        assert!(matches!(
            HttpTransport::new("peatio.example.com"),
            Err(GatewayError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn param_lookup() {
        let request = SignedRequest {
            verb: Verb::Get,
            uri: "/api/v2/order".into(),
            params: vec![("id".into(), "7".into())],
        };
        assert_eq!(request.param("id"), Some("7"));
        assert_eq!(request.param("market"), None);
    }
}
