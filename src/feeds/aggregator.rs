use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    consensus::{select, Consensus},
    PriceFeed,
};
use crate::{
    errors::{FeedError, FeedResult, Rejection},
    timings::RoundTimer,
    types::{CurrencyPair, PriceQuote},
};

/// Attempts per cycle before giving up on the feeds.
pub const MAX_ATTEMPTS: u32 = 5;
/// Sleep after attempt `n` is `n * DEFAULT_RETRY_BASE`.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(60);

/// Polls the main feed and its backups and agrees on one price.
pub struct PriceFeedAggregator {
    pair: CurrencyPair,
    feeds: Vec<Arc<dyn PriceFeed>>,
    distance_threshold: f64,
    retry_base: Duration,
    max_attempts: u32,
}

impl PriceFeedAggregator {
    /// `feeds[0]` is the main feed, the rest are backups in priority order.
    pub fn new(pair: CurrencyPair, feeds: Vec<Arc<dyn PriceFeed>>, distance_threshold: f64) -> Self {
        Self {
            pair,
            feeds,
            distance_threshold,
            retry_base: DEFAULT_RETRY_BASE,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Sleep after each failed attempt: `base, 2*base, ...`.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .map(|attempt| self.retry_base * attempt)
            .collect()
    }

    /// Queries every feed concurrently; successful quotes keep feed order.
    pub async fn poll(&self) -> Vec<PriceQuote> {
        let results = join_all(self.feeds.iter().map(|feed| feed.last_price(&self.pair))).await;
        let mut quotes = Vec::with_capacity(results.len());
        for (feed, result) in self.feeds.iter().zip(results) {
            match result {
                Ok(quote) => {
                    debug!(feed = feed.name(), price = quote.price, "quote received");
                    quotes.push(quote);
                }
                Err(err) => warn!(feed = feed.name(), error = %err, "feed failed"),
            }
        }
        debug!(
            received = quotes.len(),
            configured = self.feeds.len(),
            "feeds polled"
        );
        quotes
    }

    /// One poll plus one consensus round, no retry.
    pub async fn consensus_once(&self) -> FeedResult<Consensus> {
        let timer = RoundTimer::start();
        let quotes = self.poll().await;
        let received = quotes.len();
        let result = select(quotes, self.feeds.len(), self.distance_threshold);
        timer.finish(received, &result);
        result.map_err(FeedError::Disagreement)
    }

    /// Retries rejected rounds with a growing sleep until the attempt limit
    /// runs out. The sleep ends early with [`FeedError::Cancelled`] once
    /// `shutdown` flips to `true`.
    pub async fn consensus_with_retry(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FeedResult<Consensus> {
        let schedule = self.backoff_schedule();
        let mut last: Option<Rejection> = None;
        for (attempt, delay) in (1..=self.max_attempts).zip(schedule) {
            if *shutdown.borrow() {
                return Err(FeedError::Cancelled);
            }
            match self.consensus_once().await {
                Ok(consensus) => {
                    if attempt > 1 {
                        info!(attempt, source = %consensus.accepted.source, "feeds agree again");
                    }
                    return Ok(consensus);
                }
                Err(FeedError::Disagreement(reason)) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        %reason,
                        retry_in_s = delay.as_secs(),
                        "no reliable price"
                    );
                    last = Some(reason);
                }
                Err(err) => return Err(err),
            }
            if !pause(delay, shutdown).await {
                return Err(FeedError::Cancelled);
            }
        }
        error!(
            attempts = self.max_attempts,
            last_reason = ?last,
            "price has failed updating too many times in a row"
        );
        Err(FeedError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// Sleeps for `delay`; returns `false` if shutdown was signalled first.
pub(crate) async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // nobody left to signal shutdown
                    sleep.as_mut().await;
                    return true;
                }
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::types::Currency;

    struct FixedFeed {
        name: String,
        prices: Mutex<Vec<Option<f64>>>,
        calls: AtomicUsize,
    }

    impl FixedFeed {
        /// Each call pops the next entry; the last entry repeats. `None` fails.
        fn new(name: &str, prices: &[Option<f64>]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                prices: Mutex::new(prices.to_vec()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceFeed for FixedFeed {
        fn name(&self) -> &str {
            &self.name
        }

        async fn last_price(&self, pair: &CurrencyPair) -> FeedResult<PriceQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut prices = self.prices.lock().unwrap();
                if prices.len() > 1 {
                    prices.remove(0)
                } else {
                    prices[0]
                }
            };
            match next {
                Some(price) => Ok(PriceQuote::new(self.name.clone(), pair.clone(), price)),
                None => Err(FeedError::source_failure(&self.name, "http 503")),
            }
        }
    }

    fn pair() -> CurrencyPair {
        CurrencyPair::new(Currency::crypto("btc"), Currency::fiat("usd"))
    }

    fn aggregator(feeds: Vec<Arc<FixedFeed>>) -> PriceFeedAggregator {
        let feeds = feeds
            .into_iter()
            .map(|f| f as Arc<dyn PriceFeed>)
            .collect();
        PriceFeedAggregator::new(pair(), feeds, 1.0).with_retry_base(Duration::from_millis(1))
    }

    #[test]
    fn default_schedule_is_linear_minutes() {
        let agg = PriceFeedAggregator::new(pair(), Vec::new(), 1.0);
        let secs: Vec<u64> = agg.backoff_schedule().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![60, 120, 180, 240, 300]);
    }

    #[tokio::test]
    async fn failed_feeds_are_skipped_in_order() {
        let agg = aggregator(vec![
            FixedFeed::new("main", &[None]),
            FixedFeed::new("b1", &[Some(250.0)]),
            FixedFeed::new("b2", &[Some(250.5)]),
        ]);
        let quotes = agg.poll().await;
        let names: Vec<&str> = quotes.iter().map(|q| q.source.as_str()).collect();
        assert_eq!(names, vec!["b1", "b2"]);

        let consensus = agg.consensus_once().await.unwrap();
        assert_eq!(consensus.accepted.source, "b1");
    }

    #[tokio::test]
    async fn retries_until_feeds_agree() {
        let main = FixedFeed::new("main", &[Some(100.0), Some(100.0)]);
        let backup = FixedFeed::new("backup", &[Some(150.0), Some(100.2)]);
        let agg = aggregator(vec![main.clone(), backup]);
        let (_tx, mut rx) = watch::channel(false);

        let consensus = agg.consensus_with_retry(&mut rx).await.unwrap();
        assert_eq!(consensus.accepted.source, "main");
        assert_eq!(main.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let main = FixedFeed::new("main", &[Some(100.0)]);
        let agg = aggregator(vec![main.clone(), FixedFeed::new("backup", &[Some(120.0)])]);
        let (_tx, mut rx) = watch::channel(false);

        let err = agg.consensus_with_retry(&mut rx).await.unwrap_err();
        assert!(matches!(err, FeedError::Exhausted { attempts: 5 }));
        assert_eq!(main.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn shutdown_cancels_backoff() {
        let agg = PriceFeedAggregator::new(
            pair(),
            vec![
                FixedFeed::new("main", &[Some(100.0)]) as Arc<dyn PriceFeed>,
                FixedFeed::new("backup", &[Some(120.0)]) as Arc<dyn PriceFeed>,
            ],
            1.0,
        );
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let err = agg.consensus_with_retry(&mut rx).await.unwrap_err();
        assert!(matches!(err, FeedError::Cancelled));
    }
}
