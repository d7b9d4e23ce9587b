use std::fmt;

use thiserror::Error;

use crate::{gateway::GatewayError, types::Side};

pub type Result<T> = std::result::Result<T, PegError>;

/// Why a set of quotes did not yield a consensus price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    TooFewQuotes { received: usize },
    PairDisagrees,
    NoMajority { received: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooFewQuotes { received } => {
                write!(f, "only {} feed(s) answered", received)
            }
            Rejection::PairDisagrees => f.write_str("the two remaining feeds disagree"),
            Rejection::NoMajority { received } => {
                write!(f, "no feed agrees with a majority of {} quotes", received)
            }
        }
    }
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed disagreement: {0}")]
    Disagreement(Rejection),
    #[error("no reliable price after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("feed {feed} failed: {message}")]
    Source { feed: String, message: String },
    #[error("price polling cancelled")]
    Cancelled,
}

impl FeedError {
    pub fn source_failure(feed: impl Into<String>, message: impl fmt::Display) -> Self {
        FeedError::Source {
            feed: feed.into(),
            message: message.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Disagreement(_))
    }
}

#[derive(Debug, Error)]
pub enum PegError {
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
    #[error("feeds: {0}")]
    Feed(#[from] FeedError),
    #[error("order layout mismatch: {sells} sell / {buys} buy orders after reconciliation")]
    Reconciliation { sells: usize, buys: usize },
    #[error("not enough balance for the {side} wall: {available} available, {needed} needed")]
    InsufficientBalance {
        side: Side,
        available: f64,
        needed: f64,
    },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("wall prices are not initialized yet")]
    NotInitialized,
}
