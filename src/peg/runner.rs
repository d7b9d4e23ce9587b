use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{
    config::PegConfig,
    monitor::{MonitorSettings, PegMonitor},
    pricing::seconds_to_next_window,
    sinks::{CsvReportSink, LogNotifier, Notifier, ReportSink},
    state::PegState,
    strategy::{PegStrategyEngine, StrategySettings},
    types::{OrderBookSnapshot, PegStatus, StrategyFlags, StrategyState},
};
use crate::{
    errors::{FeedError, PegError},
    feeds::{aggregator::pause, JsonFeed, PriceFeed, PriceFeedAggregator},
    gateway::ExchangeGateway,
    types::PriceQuote,
};

/// When the two periodic tasks run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub monitor_every: Duration,
    pub strategy_every: Duration,
    /// Shared wall-clock window, in minutes, the first monitor cycle waits for.
    pub align_to_window: Option<u64>,
}

impl Schedule {
    /// Custodians sharing a pair line their monitors up on the same
    /// wall-clock windows.
    pub fn from_config(cfg: &PegConfig) -> Self {
        Self {
            monitor_every: cfg.monitor_interval(),
            strategy_every: cfg.strategy_interval(),
            align_to_window: cfg.multiple_custodians.then_some(cfg.reset_every_minutes),
        }
    }

    /// Wait before the first monitor cycle when starting at `now`.
    pub fn monitor_start_delay(&self, now: DateTime<Utc>) -> Duration {
        match self.align_to_window {
            Some(minutes) => Duration::from_secs(seconds_to_next_window(now, minutes)),
            None => Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Board {
    book: OrderBookSnapshot,
    last_consensus: Option<PriceQuote>,
    strategy_state: Option<StrategyState>,
    flags: Option<StrategyFlags>,
}

/// Latest view of a running bot, readable from anywhere.
pub struct StatusBoard {
    state: Arc<PegState>,
    board: Mutex<Board>,
}

impl StatusBoard {
    pub fn new(state: Arc<PegState>) -> Self {
        Self {
            state,
            board: Mutex::new(Board::default()),
        }
    }

    pub async fn status(&self) -> PegStatus {
        let peg = self.state.snapshot().await;
        let board = self.board.lock().await;
        PegStatus {
            peg,
            book: board.book.clone(),
            last_consensus: board.last_consensus.clone(),
            strategy_state: board.strategy_state,
            flags: board.flags,
        }
    }

    async fn record_consensus(&self, quote: Option<PriceQuote>) {
        if quote.is_some() {
            self.board.lock().await.last_consensus = quote;
        }
    }

    async fn record_strategy(&self, engine: &PegStrategyEngine) {
        let mut board = self.board.lock().await;
        board.book = engine.book().clone();
        board.strategy_state = Some(engine.state());
        board.flags = Some(engine.flags());
    }
}

/// Everything one bot instance needs, wired once.
pub struct PegBot {
    schedule: Schedule,
    clear_on_shutdown: bool,
    gateway: Arc<ExchangeGateway>,
    monitor: PegMonitor,
    engine: PegStrategyEngine,
    status: Arc<StatusBoard>,
}

impl PegBot {
    /// HTTP gateway, JSON feeds, CSV reports under `report_dir`, log notifications.
    pub fn from_config(config: PegConfig) -> Result<Self> {
        let options = config.gateway_options();
        let gateway = ExchangeGateway::builder()
            .base_url(&config.base_url)
            .credentials(&config.access_key, &config.secret)
            .retry_policy(options.retry)
            .hash_function(options.hash)
            .tx_fee_percent(options.tx_fee_percent)
            .build()
            .context("Failed to build exchange gateway")?;
        let mut feeds: Vec<Arc<dyn PriceFeed>> = Vec::with_capacity(config.feeds.len());
        for feed in &config.feeds {
            let feed = JsonFeed::new(feed.clone())
                .with_context(|| format!("Invalid feed {}", feed.name))?;
            feeds.push(Arc::new(feed));
        }
        let reports = Arc::new(CsvReportSink::new(&config.report_dir));
        Ok(Self::with_parts(
            config,
            gateway,
            feeds,
            Arc::new(LogNotifier),
            reports,
        ))
    }

    pub fn with_parts(
        config: PegConfig,
        gateway: ExchangeGateway,
        feeds: Vec<Arc<dyn PriceFeed>>,
        notifier: Arc<dyn Notifier>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let state = Arc::new(PegState::new());
        let aggregator =
            PriceFeedAggregator::new(config.tracked_pair(), feeds, config.distance_threshold)
                .with_retry_base(config.feed_retry_base());
        let monitor = PegMonitor::new(
            aggregator,
            gateway.clone(),
            state.clone(),
            notifier.clone(),
            reports.clone(),
            MonitorSettings::from_config(&config),
        );
        let engine = PegStrategyEngine::new(
            gateway.clone(),
            state.clone(),
            config.pair(),
            StrategySettings::from_config(&config),
            reports,
            notifier,
        );
        Self {
            schedule: Schedule::from_config(&config),
            clear_on_shutdown: config.clear_orders_on_shutdown,
            gateway,
            monitor,
            engine,
            status: Arc::new(StatusBoard::new(state)),
        }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn gateway(&self) -> Arc<ExchangeGateway> {
        self.gateway.clone()
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.status.clone()
    }

    /// Runs both tasks until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let PegBot {
            schedule,
            clear_on_shutdown,
            monitor,
            engine,
            status,
            ..
        } = self;
        info!(
            monitor_every_s = schedule.monitor_every.as_secs_f64(),
            strategy_every_s = schedule.strategy_every.as_secs_f64(),
            align_to_window_min = schedule.align_to_window,
            "peg bot starting"
        );
        let monitor_task = tokio::spawn(monitor_loop(
            monitor,
            status.clone(),
            schedule,
            shutdown.clone(),
        ));
        let strategy_task = tokio::spawn(strategy_loop(
            engine,
            status,
            schedule.strategy_every,
            clear_on_shutdown,
            shutdown,
        ));
        let (monitor_done, strategy_done) = tokio::join!(monitor_task, strategy_task);
        monitor_done.context("monitor task panicked")?;
        strategy_done.context("strategy task panicked")?;
        info!("peg bot stopped");
        Ok(())
    }

    /// Runs the bot on its own task.
    pub fn spawn(self) -> PegHandle {
        let (shutdown, rx) = watch::channel(false);
        let status = self.status_board();
        let task = tokio::spawn(self.run(rx));
        PegHandle {
            shutdown,
            status,
            task,
        }
    }
}

pub struct PegHandle {
    shutdown: watch::Sender<bool>,
    status: Arc<StatusBoard>,
    task: JoinHandle<Result<()>>,
}

impl PegHandle {
    pub async fn status(&self) -> PegStatus {
        self.status.status().await
    }

    /// Signals shutdown and waits for both tasks to finish.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("peg bot task panicked")?
    }
}

async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn monitor_loop(
    mut monitor: PegMonitor,
    status: Arc<StatusBoard>,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
) {
    let start_delay = schedule.monitor_start_delay(Utc::now());
    if !start_delay.is_zero() {
        info!(delay_s = start_delay.as_secs(), "waiting for the next reset window");
        if !pause(start_delay, &mut shutdown).await {
            return;
        }
    }
    let mut ticker = interval(schedule.monitor_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }
        match monitor.cycle(&mut shutdown).await {
            Ok(outcome) => debug!(?outcome, "monitor cycle done"),
            Err(PegError::Feed(FeedError::Cancelled)) => break,
            Err(err) => warn!(error = %err, "monitor cycle failed"),
        }
        status.record_consensus(monitor.last_consensus().cloned()).await;
    }
    debug!("monitor task stopped");
}

async fn strategy_loop(
    mut engine: PegStrategyEngine,
    status: Arc<StatusBoard>,
    every: Duration,
    clear_on_shutdown: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }
        match engine.cycle().await {
            Ok(state) => debug!(%state, "strategy cycle done"),
            Err(err) => warn!(error = %err, "strategy cycle failed"),
        }
        status.record_strategy(&engine).await;
    }
    if clear_on_shutdown && engine.state() != StrategyState::Uninitialized {
        if let Err(err) = engine.shutdown().await {
            warn!(error = %err, "clearing orders on shutdown failed");
        }
    }
    debug!("strategy task stopped");
}
