use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Sha256, Sha512};
use tokio::sync::Mutex;

use super::{
    errors::{GatewayError, Result},
    params::{RequestParams, Verb},
};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

const REMOTE_TIME_MARKER: &str = "timestamp is ";

/// Hash function used for the HMAC signature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    #[default]
    Sha256,
    Sha512,
}

/// API key pair of the exchange account.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    secret: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// `VERB|URI|sorted_params` string that gets signed.
pub fn canonical_string(verb: Verb, uri: &str, params: &RequestParams) -> String {
    format!("{}|{}|{}", verb.as_str(), uri, params.canonical_query())
}

/// Lowercase hex HMAC of the canonical string, keyed by the account secret.
pub fn sign(
    verb: Verb,
    uri: &str,
    params: &RequestParams,
    secret: &str,
    hash: HashFunction,
) -> Result<String> {
    let message = canonical_string(verb, uri, params);
    let digest = match hash {
        HashFunction::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|err| GatewayError::Signing(err.to_string()))?;
            mac.update(message.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        HashFunction::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
                .map_err(|err| GatewayError::Signing(err.to_string()))?;
            mac.update(message.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(hex::encode(digest))
}

pub(crate) fn sign_with(
    credentials: &Credentials,
    hash: HashFunction,
    verb: Verb,
    uri: &str,
    params: &RequestParams,
) -> Result<String> {
    sign(verb, uri, params, &credentials.secret, hash)
}

pub(crate) fn local_time_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses `"The tonce 1424274776909 is invalid, current timestamp is 1424274905000."`
/// into `remote - local`.
pub(crate) fn offset_from_error(message: &str, local_ms: i64) -> Option<i64> {
    let start = message.find(REMOTE_TIME_MARKER)? + REMOTE_TIME_MARKER.len();
    let rest = &message[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let remote: i64 = digits.parse().ok()?;
    Some(remote - local_ms)
}

/// Lazily discovered difference between the exchange clock and ours.
#[derive(Debug, Default)]
pub(crate) struct ClockSync {
    offset_ms: Mutex<Option<i64>>,
}

impl ClockSync {
    pub(crate) async fn offset(&self) -> Option<i64> {
        *self.offset_ms.lock().await
    }

    pub(crate) async fn set(&self, offset_ms: i64) {
        *self.offset_ms.lock().await = Some(offset_ms);
    }

    pub(crate) async fn invalidate(&self) {
        *self.offset_ms.lock().await = None;
    }

    pub(crate) async fn tonce(&self) -> i64 {
        local_time_ms() + self.offset().await.unwrap_or(0)
    }
}
