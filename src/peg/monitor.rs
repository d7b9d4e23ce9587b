use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    config::PegConfig,
    pricing::{percentage_distance, to_peg_units, usd_wall_prices, UsdWall},
    sinks::{Notifier, ReportSink, WallShiftRecord},
    state::PegState,
    types::{PriceDirection, ShiftRequest, WallPrices},
};
use crate::{
    errors::{FeedError, PegError, Result},
    feeds::{Consensus, PriceFeedAggregator},
    gateway::ExchangeGateway,
    types::PriceQuote,
};

/// What one monitor cycle decided.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MonitorOutcome {
    Initialized { reference_price: f64, wall: WallPrices },
    NoChange { distance: f64 },
    ShiftRequested(ShiftRequest),
    ShiftDeferred { distance: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorSettings {
    pub wall_change_threshold: f64,
    pub price_offset_percent: f64,
    pub dual_side: bool,
    pub sell_price_increment: f64,
    /// Rows of recent shifts carried in each notification.
    pub history_len: usize,
}

impl MonitorSettings {
    pub fn from_config(cfg: &PegConfig) -> Self {
        Self {
            wall_change_threshold: cfg.wall_change_threshold,
            price_offset_percent: cfg.price_offset_percent,
            dual_side: cfg.dual_side,
            sell_price_increment: cfg.sell_price_increment,
            history_len: cfg.notification_history,
        }
    }
}

/// Turns accepted feed prices into wall prices and decides when the wall
/// has to move.
pub struct PegMonitor {
    aggregator: PriceFeedAggregator,
    gateway: Arc<ExchangeGateway>,
    state: Arc<PegState>,
    notifier: Arc<dyn Notifier>,
    reports: Arc<dyn ReportSink>,
    settings: MonitorSettings,
    usd: Option<UsdWall>,
    last_sell: Option<f64>,
    last_consensus: Option<PriceQuote>,
    history: VecDeque<String>,
}

impl PegMonitor {
    pub fn new(
        aggregator: PriceFeedAggregator,
        gateway: Arc<ExchangeGateway>,
        state: Arc<PegState>,
        notifier: Arc<dyn Notifier>,
        reports: Arc<dyn ReportSink>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            aggregator,
            gateway,
            state,
            notifier,
            reports,
            settings,
            usd: None,
            last_sell: None,
            last_consensus: None,
            history: VecDeque::new(),
        }
    }

    pub fn last_consensus(&self) -> Option<&PriceQuote> {
        self.last_consensus.as_ref()
    }

    /// USD wall prices fixed on the first accepted price.
    pub fn usd_wall(&self) -> Option<UsdWall> {
        self.usd
    }

    /// Asks the feeds for a price and acts on it.
    pub async fn cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<MonitorOutcome> {
        match self.aggregator.consensus_with_retry(shutdown).await {
            Ok(consensus) => self.on_consensus(consensus).await,
            Err(FeedError::Cancelled) => Err(FeedError::Cancelled.into()),
            Err(err) => {
                self.on_feed_failure(&err).await;
                Err(err.into())
            }
        }
    }

    pub async fn on_feed_failure(&self, err: &FeedError) {
        let code = &self.aggregator.pair().order.code;
        error!(tracked = %self.aggregator.pair(), error = %err, "price update failed");
        self.notifier
            .notify(
                &format!(
                    "Problems while updating {} price. Cannot find a reliable feed.",
                    code.to_uppercase()
                ),
                &format!("Last error: {err}. The wall stays at its last price."),
            )
            .await;
    }

    pub async fn on_consensus(&mut self, consensus: Consensus) -> Result<MonitorOutcome> {
        let price = consensus.price();
        if !(price.is_finite() && price > 0.0) {
            return Err(PegError::Invariant(format!(
                "accepted price {price} from {} is not positive",
                consensus.accepted.source
            )));
        }
        self.last_consensus = Some(consensus.accepted.clone());

        let (usd, reference) = match (self.usd, self.state.reference_price().await) {
            (Some(usd), Some(reference)) => (usd, reference),
            _ => return self.initialize(&consensus).await,
        };

        let distance = percentage_distance(reference, price);
        if distance < self.settings.wall_change_threshold {
            debug!(reference, price, distance, "price within threshold");
            return Ok(MonitorOutcome::NoChange { distance });
        }
        if self.state.is_shift_in_flight().await {
            warn!(price, distance, "shift still in flight, postponing wall change");
            return Ok(MonitorOutcome::ShiftDeferred { distance });
        }

        let wall = to_peg_units(usd, price);
        let direction = PriceDirection::between(self.last_sell.unwrap_or(wall.sell), wall.sell);
        let request = ShiftRequest {
            wall,
            direction,
            reference_price: price,
        };
        if !self.state.request_shift(request).await? {
            return Ok(MonitorOutcome::ShiftDeferred { distance });
        }
        self.last_sell = Some(wall.sell);
        info!(
            reference,
            price,
            distance,
            %direction,
            sell = wall.sell,
            buy = wall.buy,
            "wall shift requested"
        );

        self.record_shift(&consensus, wall);
        let threshold = self.settings.wall_change_threshold;
        let tracked = self.aggregator.pair();
        let title = format!("[{tracked}] price changed more than {threshold}%");
        let message = format!(
            "{tracked} price changed more than {threshold}% since last notification: \
             now is {price} {} per {} according to {}. Sell at {:.8} and buy at {:.8}.\n\n{}",
            tracked.payment.code,
            tracked.order.code,
            consensus.accepted.source,
            wall.sell,
            wall.buy,
            self.history_text()
        );
        self.notifier.notify(&title, &message).await;
        Ok(MonitorOutcome::ShiftRequested(request))
    }

    async fn initialize(&mut self, consensus: &Consensus) -> Result<MonitorOutcome> {
        let price = consensus.price();
        let usd = usd_wall_prices(
            self.gateway.tx_fee(),
            self.settings.price_offset_percent,
            self.settings.dual_side,
            self.settings.sell_price_increment,
        );
        let wall = to_peg_units(usd, price);
        self.state.initialize(price, wall).await?;
        self.usd = Some(usd);
        self.last_sell = Some(wall.sell);
        info!(
            price,
            source = %consensus.accepted.source,
            usd_sell = usd.sell,
            usd_buy = usd.buy,
            sell = wall.sell,
            buy = wall.buy,
            "initial wall prices computed"
        );

        self.record_shift(consensus, wall);
        let tracked = self.aggregator.pair();
        self.notifier
            .notify(
                &format!("[{tracked}] price tracking started"),
                &format!(
                    "Initial {} price is {price} {} according to {}. Sell at {:.8} and buy at {:.8}.",
                    tracked.order.code, tracked.payment.code, consensus.accepted.source, wall.sell, wall.buy
                ),
            )
            .await;
        Ok(MonitorOutcome::Initialized {
            reference_price: price,
            wall,
        })
    }

    fn record_shift(&mut self, consensus: &Consensus, wall: WallPrices) {
        let tracked = self.aggregator.pair();
        let record = WallShiftRecord {
            timestamp: Utc::now(),
            source: consensus.accepted.source.clone(),
            crypto: tracked.order.code.clone(),
            price: consensus.price(),
            currency: tracked.payment.code.clone(),
            wall,
            quotes: consensus.quotes.clone(),
        };
        if let Err(err) = self.reports.wall_shift(&record) {
            warn!(error = %err, "wall shift row not written");
        }
        if self.settings.history_len > 0 {
            self.history.push_front(record.csv_row().trim_end().to_string());
            self.history.truncate(self.settings.history_len);
        }
    }

    fn history_text(&self) -> String {
        let mut text = String::from("Recent wall prices (newest first):\n");
        for row in &self.history {
            text.push_str(row);
            text.push('\n');
        }
        text
    }
}
