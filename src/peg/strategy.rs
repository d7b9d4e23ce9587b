use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use super::{
    config::PegConfig,
    pricing::{floor_to, PRICE_DECIMALS},
    sinks::{Notifier, OrdersRecord, ReportSink},
    state::PegState,
    types::{OrderBookSnapshot, ShiftRequest, StrategyFlags, StrategyState, WallPrices},
};
use crate::{
    errors::{PegError, Result},
    gateway::ExchangeGateway,
    types::{CurrencyPair, OrderId, PairBalance, Side},
};

#[derive(Clone, Debug, PartialEq)]
pub struct StrategySettings {
    pub dual_side: bool,
    /// Smallest amount of order currency worth an order.
    pub min_order_amount: f64,
    /// Percent of new proceeds set aside instead of going back into the buy wall.
    pub keep_proceeds: f64,
    pub clear_poll_attempts: u32,
    pub clear_poll_delay: Duration,
}

impl StrategySettings {
    pub fn from_config(cfg: &PegConfig) -> Self {
        Self {
            dual_side: cfg.dual_side,
            min_order_amount: cfg.min_order_amount,
            keep_proceeds: cfg.keep_proceeds,
            clear_poll_attempts: cfg.clear_poll_attempts,
            clear_poll_delay: cfg.clear_poll_delay(),
        }
    }
}

/// Keeps one sell wall (and one buy wall when dual-side) on the book at the
/// prices held in [`PegState`].
pub struct PegStrategyEngine {
    gateway: Arc<ExchangeGateway>,
    state: Arc<PegState>,
    pair: CurrencyPair,
    settings: StrategySettings,
    reports: Arc<dyn ReportSink>,
    notifier: Arc<dyn Notifier>,
    strategy_state: StrategyState,
    flags: StrategyFlags,
    book: OrderBookSnapshot,
    balance: PairBalance,
    kept_proceeds: f64,
}

impl PegStrategyEngine {
    pub fn new(
        gateway: Arc<ExchangeGateway>,
        state: Arc<PegState>,
        pair: CurrencyPair,
        settings: StrategySettings,
        reports: Arc<dyn ReportSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gateway,
            state,
            pair,
            settings,
            reports,
            notifier,
            strategy_state: StrategyState::Uninitialized,
            flags: StrategyFlags::default(),
            book: OrderBookSnapshot::default(),
            balance: PairBalance::default(),
            kept_proceeds: 0.0,
        }
    }

    pub fn state(&self) -> StrategyState {
        self.strategy_state
    }

    pub fn flags(&self) -> StrategyFlags {
        self.flags
    }

    pub fn book(&self) -> &OrderBookSnapshot {
        &self.book
    }

    pub fn balance(&self) -> PairBalance {
        self.balance
    }

    /// Payment currency set aside so far.
    pub fn kept_proceeds(&self) -> f64 {
        self.kept_proceeds
    }

    /// One strategy cycle. Returns the state the engine settled in.
    pub async fn cycle(&mut self) -> Result<StrategyState> {
        let result = if self.strategy_state == StrategyState::Uninitialized {
            self.initial_cycle().await
        } else {
            self.steady_cycle().await
        };
        self.report();
        result
    }

    /// Cancels everything on the pair.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.gateway.clear_orders(&self.pair).await?;
        info!(pair = %self.pair, "orders cleared on shutdown");
        Ok(())
    }

    async fn initial_cycle(&mut self) -> Result<StrategyState> {
        let Some(wall) = self.state.wall().await else {
            debug!(pair = %self.pair, "no wall prices yet");
            return Ok(StrategyState::Uninitialized);
        };
        if let Err(err) = self.full_reset(wall).await {
            error!(pair = %self.pair, error = %err, "initial wall placement failed");
            return Err(err);
        }
        self.flags.is_first_cycle = false;
        self.flags.might_need_init = false;
        self.strategy_state = StrategyState::Steady;
        info!(pair = %self.pair, sell = wall.sell, buy = wall.buy, "walls in place");
        self.recount().await?;
        Ok(self.strategy_state)
    }

    async fn steady_cycle(&mut self) -> Result<StrategyState> {
        let result = self.steady_steps().await;
        self.strategy_state = StrategyState::Steady;
        result.map(|()| self.strategy_state)
    }

    async fn steady_steps(&mut self) -> Result<()> {
        self.recount().await?;

        let mut shift_error = None;
        if let Some(request) = self.state.begin_shift().await {
            self.strategy_state = StrategyState::Shifting;
            match self.shift_walls(request).await {
                Ok(()) => {
                    self.state.complete_shift(true).await;
                    self.flags.might_need_init = false;
                    info!(
                        pair = %self.pair,
                        direction = %request.direction,
                        sell = request.wall.sell,
                        buy = request.wall.buy,
                        "walls shifted"
                    );
                }
                Err(err) => {
                    self.state.complete_shift(false).await;
                    error!(pair = %self.pair, error = %err, "wall shift failed");
                    self.notifier
                        .notify(
                            &format!("[{}] wall shift failed", self.pair),
                            &format!("Moving the walls {} failed: {err}. Retrying next cycle.", request.direction),
                        )
                        .await;
                    shift_error = Some(err);
                }
            }
            self.recount().await?;
        }

        if self.flags.might_need_init && !self.flags.orders_and_balances_ok {
            self.strategy_state = StrategyState::Reconciling;
            let wall = self.state.wall().await.ok_or(PegError::NotInitialized)?;
            match self.reconcile(wall).await {
                Ok(()) => {
                    self.flags.might_need_init = false;
                    info!(pair = %self.pair, "order layout reconciled");
                }
                Err(err) => error!(pair = %self.pair, error = %err, "reconciliation failed"),
            }
            self.recount().await?;
        }

        if !self.flags.orders_and_balances_ok {
            warn!(
                pair = %self.pair,
                sells = self.book.active_sell,
                buys = self.book.active_buy,
                order_available = self.balance.order_available,
                payment_available = self.balance.payment_available,
                "orders and balances are not in line"
            );
        } else if self.keeps_proceeds()
            && self.flags.proceeds_in_balance
            && !self.state.is_shift_in_flight().await
        {
            let wall = self.state.wall().await.ok_or(PegError::NotInitialized)?;
            match self.keep_proceeds(wall).await {
                Ok(()) => self.recount().await?,
                Err(err) => error!(pair = %self.pair, error = %err, "keeping proceeds failed"),
            }
        }

        match shift_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn keeps_proceeds(&self) -> bool {
        self.settings.keep_proceeds > 0.0 && self.pair.payment.is_fiat() && self.settings.dual_side
    }

    fn expected_buys(&self) -> usize {
        usize::from(self.settings.dual_side)
    }

    fn spendable_payment(&self) -> f64 {
        (self.balance.payment_available - self.kept_proceeds).max(0.0)
    }

    /// Refreshes orders and balances and re-evaluates the layout flags. A bad
    /// layout marks the engine for reconciliation.
    async fn recount(&mut self) -> Result<()> {
        let orders = self.gateway.active_orders(&self.pair).await?;
        self.balance = self.gateway.balances(&self.pair).await?;
        self.book = OrderBookSnapshot::from_orders(orders);

        let min = self.settings.min_order_amount;
        let outside_buy = match self.state.wall().await {
            Some(wall) if wall.buy > 0.0 => self.spendable_payment() / wall.buy,
            _ => 0.0,
        };
        let keeping = self.keeps_proceeds();
        self.flags.orders_and_balances_ok = self.book.active_sell == 1
            && self.book.active_buy == self.expected_buys()
            && self.balance.order_available < min
            && (!self.settings.dual_side || keeping || outside_buy < min);
        self.flags.proceeds_in_balance = keeping && outside_buy >= min;
        if !self.flags.orders_and_balances_ok {
            self.flags.might_need_init = true;
        }
        debug!(
            sells = self.book.active_sell,
            buys = self.book.active_buy,
            ok = self.flags.orders_and_balances_ok,
            proceeds = self.flags.proceeds_in_balance,
            "recount"
        );
        Ok(())
    }

    /// Clears the book and places both walls from scratch.
    async fn full_reset(&mut self, wall: WallPrices) -> Result<()> {
        self.gateway.clear_orders(&self.pair).await?;
        self.wait_for_empty_book().await?;
        self.place_wall(Side::Sell, wall).await?;
        if self.settings.dual_side {
            self.place_wall(Side::Buy, wall).await?;
        }
        Ok(())
    }

    async fn wait_for_empty_book(&self) -> Result<()> {
        let attempts = self.settings.clear_poll_attempts.max(1);
        let mut left = Vec::new();
        for attempt in 1..=attempts {
            left = self.gateway.active_orders(&self.pair).await?;
            if left.is_empty() {
                debug!(attempt, "order book empty");
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.clear_poll_delay).await;
            }
        }
        let book = OrderBookSnapshot::from_orders(left);
        Err(PegError::Reconciliation {
            sells: book.active_sell,
            buys: book.active_buy,
        })
    }

    /// Places one wall with everything free on that side.
    ///
    /// A sell wall that cannot be funded is an error. A buy wall without
    /// funds is skipped: it fills up from proceeds later.
    async fn place_wall(&mut self, side: Side, wall: WallPrices) -> Result<Option<OrderId>> {
        self.balance = self.gateway.balances(&self.pair).await?;
        let price = wall.price(side);
        let available = match side {
            Side::Sell => self.balance.order_available,
            Side::Buy => self.spendable_payment() / price,
        };
        let quantity = floor_to(available, PRICE_DECIMALS);
        let needed = self.settings.min_order_amount;
        if quantity < needed {
            if side == Side::Buy {
                warn!(pair = %self.pair, available = quantity, needed, "no funds for the buy wall");
                return Ok(None);
            }
            return Err(PegError::InsufficientBalance {
                side,
                available: quantity,
                needed,
            });
        }
        let id = self
            .gateway
            .place_order(&self.pair, side, quantity, price)
            .await?;
        Ok(Some(id))
    }

    /// Cancels every order on `side` and places the wall again at `wall`.
    async fn move_side(&mut self, side: Side, wall: WallPrices) -> Result<()> {
        let ids: Vec<OrderId> = self.book.side(side).map(|o| o.id.clone()).collect();
        for id in &ids {
            match self.gateway.cancel_order(id).await {
                Ok(()) => {}
                Err(err) if err.is_already_settled() => {
                    debug!(order_id = %id, "order already settled")
                }
                Err(err) => return Err(err.into()),
            }
        }
        let placed = self.place_wall(side, wall).await?;
        info!(
            %side,
            price = wall.price(side),
            cancelled = ids.len(),
            placed = placed.is_some(),
            "wall side moved"
        );
        Ok(())
    }

    /// Moves the side that would otherwise cross the other wall first.
    async fn shift_walls(&mut self, request: ShiftRequest) -> Result<()> {
        let lead = request.direction.leading_side();
        let sides = if !self.settings.dual_side {
            vec![Side::Sell]
        } else if lead == Side::Sell {
            vec![Side::Sell, Side::Buy]
        } else {
            vec![Side::Buy, Side::Sell]
        };
        for side in sides {
            self.move_side(side, request.wall).await?;
        }
        Ok(())
    }

    /// Puts back what is missing. Too many orders on a side means a reset.
    async fn reconcile(&mut self, wall: WallPrices) -> Result<()> {
        let (sells, buys) = (self.book.active_sell, self.book.active_buy);
        if sells > 1 || buys > self.expected_buys() {
            warn!(sells, buys, "unexpected extra wall orders, resetting");
            return self.full_reset(wall).await;
        }

        let min = self.settings.min_order_amount;
        if sells == 0 {
            self.place_wall(Side::Sell, wall).await?;
        } else if self.balance.order_available >= min {
            self.move_side(Side::Sell, wall).await?;
        }

        if self.settings.dual_side {
            let outside = self.spendable_payment() / wall.buy;
            if buys == 0 {
                self.place_wall(Side::Buy, wall).await?;
            } else if !self.keeps_proceeds() && outside >= min {
                self.move_side(Side::Buy, wall).await?;
            }
        }
        Ok(())
    }

    /// Sets `keep_proceeds` percent of the free payment balance aside and
    /// rebuilds the buy wall with the rest.
    async fn keep_proceeds(&mut self, wall: WallPrices) -> Result<()> {
        let proceeds = self.spendable_payment();
        let kept = proceeds * self.settings.keep_proceeds / 100.0;
        self.kept_proceeds += kept;
        info!(
            pair = %self.pair,
            proceeds,
            kept,
            total_kept = self.kept_proceeds,
            "keeping part of the proceeds"
        );
        self.move_side(Side::Buy, wall).await
    }

    fn report(&self) {
        if self.book.taken_at.is_none() {
            return;
        }
        let record = OrdersRecord::from_snapshot(self.strategy_state, &self.book);
        if let Err(err) = self.reports.orders_snapshot(&record) {
            warn!(error = %err, "orders row not written");
        }
    }
}
