use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Order, PriceQuote, Side};

/// Which way the wall prices moved on the last shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
}

impl PriceDirection {
    /// `Up` iff the new sell price is strictly above the old one.
    pub fn between(old_sell: f64, new_sell: f64) -> Self {
        if new_sell - old_sell > 0.0 {
            PriceDirection::Up
        } else {
            PriceDirection::Down
        }
    }

    /// Side to move first so the two walls never cross mid-shift.
    pub fn leading_side(self) -> Side {
        match self {
            PriceDirection::Up => Side::Sell,
            PriceDirection::Down => Side::Buy,
        }
    }
}

impl fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriceDirection::Up => "up",
            PriceDirection::Down => "down",
        })
    }
}

/// Sell and buy wall prices in peg units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct WallPrices {
    pub sell: f64,
    pub buy: f64,
}

impl WallPrices {
    pub fn price(&self, side: Side) -> f64 {
        match side {
            Side::Sell => self.sell,
            Side::Buy => self.buy,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.sell > self.buy
    }
}

/// Pending wall move handed from the monitor to the strategy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ShiftRequest {
    pub wall: WallPrices,
    pub direction: PriceDirection,
    pub reference_price: f64,
}

/// Flags the strategy engine keeps between cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StrategyFlags {
    pub might_need_init: bool,
    pub orders_and_balances_ok: bool,
    pub proceeds_in_balance: bool,
    pub is_first_cycle: bool,
}

impl Default for StrategyFlags {
    fn default() -> Self {
        Self {
            might_need_init: true,
            orders_and_balances_ok: false,
            proceeds_in_balance: false,
            is_first_cycle: true,
        }
    }
}

/// Live orders of one cycle. Replaced wholesale on every recount.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OrderBookSnapshot {
    pub active_sell: usize,
    pub active_buy: usize,
    pub total_active: usize,
    pub orders: Vec<Order>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl OrderBookSnapshot {
    pub fn from_orders(orders: Vec<Order>) -> Self {
        let active_sell = orders.iter().filter(|o| o.side == Side::Sell).count();
        let active_buy = orders.iter().filter(|o| o.side == Side::Buy).count();
        Self {
            active_sell,
            active_buy,
            total_active: orders.len(),
            orders,
            taken_at: Some(Utc::now()),
        }
    }

    pub fn count(&self, side: Side) -> usize {
        match side {
            Side::Sell => self.active_sell,
            Side::Buy => self.active_buy,
        }
    }

    pub fn side(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(move |o| o.side == side)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyState {
    Uninitialized,
    Steady,
    Shifting,
    Reconciling,
}

impl StrategyState {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyState::Uninitialized => "uninitialized",
            StrategyState::Steady => "steady",
            StrategyState::Shifting => "shifting",
            StrategyState::Reconciling => "reconciling",
        }
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of the peg, as stored in `PegState`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PegView {
    pub reference_price: Option<f64>,
    pub wall: Option<WallPrices>,
    pub direction: Option<PriceDirection>,
    pub shift_in_flight: bool,
}

/// Everything a dashboard would show about a running bot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PegStatus {
    pub peg: PegView,
    pub book: OrderBookSnapshot,
    pub last_consensus: Option<PriceQuote>,
    pub strategy_state: Option<StrategyState>,
    pub flags: Option<StrategyFlags>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderId, OrderStatus};

    fn order(id: &str, side: Side) -> Order {
        Order {
            id: OrderId::from(id),
            side,
            price: 0.004,
            quantity: 1.0,
            status: OrderStatus::Open,
            market: "nbtbtc".into(),
            created_at: None,
        }
    }

    #[test]
    fn direction_is_up_only_on_strict_increase() {
        assert_eq!(PriceDirection::between(0.004, 0.0041), PriceDirection::Up);
        assert_eq!(PriceDirection::between(0.004, 0.004), PriceDirection::Down);
        assert_eq!(PriceDirection::between(0.004, 0.0039), PriceDirection::Down);
        assert_eq!(PriceDirection::Up.leading_side(), Side::Sell);
        assert_eq!(PriceDirection::Down.leading_side(), Side::Buy);
    }

    #[test]
    fn snapshot_counts_sides() {
        let snap = OrderBookSnapshot::from_orders(vec![
            order("1", Side::Sell),
            order("2", Side::Buy),
            order("3", Side::Sell),
        ]);
        assert_eq!(snap.count(Side::Sell), 2);
        assert_eq!(snap.count(Side::Buy), 1);
        assert_eq!(snap.total_active, 3);
        assert_eq!(snap.side(Side::Buy).next().unwrap().id.as_str(), "2");
    }
}
