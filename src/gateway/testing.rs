//! In-memory transports for tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    errors::{GatewayError, Result},
    params::Verb,
    transport::{SignedRequest, Transport},
};
use crate::types::Side;

/// Replays canned bodies in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<SignedRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_ok(&self, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(body.to_string()));
    }

    pub(crate) fn push_err(&self, err: GatewayError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub(crate) fn requests(&self) -> Vec<SignedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &SignedRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Connection("script exhausted".into())))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SimOrder {
    pub(crate) id: u64,
    pub(crate) side: Side,
    pub(crate) price: f64,
    pub(crate) volume: f64,
}

struct SimBook {
    orders: Vec<SimOrder>,
    next_id: u64,
    order_balance: f64,
    payment_balance: f64,
    failing_places: usize,
    failing_listing: Option<usize>,
}

/// A tiny exchange: one market, balances that lock on placement and
/// refund on cancel. Tracks how many requests overlap in time.
pub(crate) struct SimExchange {
    order_code: String,
    payment_code: String,
    latency: Duration,
    book: Mutex<SimBook>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: AtomicUsize,
}

impl SimExchange {
    pub(crate) fn new(order: &str, payment: &str, order_balance: f64, payment_balance: f64) -> Self {
        Self {
            order_code: order.to_string(),
            payment_code: payment.to_string(),
            latency: Duration::ZERO,
            book: Mutex::new(SimBook {
                orders: Vec::new(),
                next_id: 1,
                order_balance,
                payment_balance,
                failing_places: 0,
                failing_listing: None,
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The next `count` placements are rejected by the exchange.
    pub(crate) fn fail_next_places(&self, count: usize) {
        self.book.lock().unwrap().failing_places = count;
    }

    /// The order listing after the next `skip` ones is rejected.
    pub(crate) fn fail_listing_after(&self, skip: usize) {
        self.book.lock().unwrap().failing_listing = Some(skip);
    }

    pub(crate) fn orders(&self) -> Vec<SimOrder> {
        self.book.lock().unwrap().orders.clone()
    }

    pub(crate) fn count(&self, side: Side) -> usize {
        self.orders().iter().filter(|o| o.side == side).count()
    }

    /// Free balances `(order, payment)`.
    pub(crate) fn free_balances(&self) -> (f64, f64) {
        let book = self.book.lock().unwrap();
        (book.order_balance, book.payment_balance)
    }

    pub(crate) fn deposit(&self, order: f64, payment: f64) {
        let mut book = self.book.lock().unwrap();
        book.order_balance += order;
        book.payment_balance += payment;
    }

    /// Injects an order that did not come from the bot.
    pub(crate) fn insert_order(&self, side: Side, price: f64, volume: f64) -> u64 {
        let mut book = self.book.lock().unwrap();
        let id = book.next_id;
        book.next_id += 1;
        book.orders.push(SimOrder { id, side, price, volume });
        id
    }

    /// Cancels every order on `side` behind the bot's back.
    pub(crate) fn drop_orders(&self, side: Side) {
        let mut book = self.book.lock().unwrap();
        let (dropped, kept): (Vec<_>, Vec<_>) =
            book.orders.drain(..).partition(|o| o.side == side);
        book.orders = kept;
        for order in &dropped {
            refund(&mut book, order);
        }
    }

    /// Completely fills every order on `side`.
    pub(crate) fn fill(&self, side: Side) {
        let mut book = self.book.lock().unwrap();
        let (filled, kept): (Vec<_>, Vec<_>) =
            book.orders.drain(..).partition(|o| o.side == side);
        book.orders = kept;
        for order in filled {
            match side {
                Side::Sell => book.payment_balance += order.volume * order.price,
                Side::Buy => book.order_balance += order.volume,
            }
        }
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn handle(&self, request: &SignedRequest) -> Value {
        let mut book = self.book.lock().unwrap();
        match (request.verb, request.uri.as_str()) {
            (Verb::Get, "/api/v2/members/me") => {
                let locked_order: f64 = book
                    .orders
                    .iter()
                    .filter(|o| o.side == Side::Sell)
                    .map(|o| o.volume)
                    .sum();
                let locked_payment: f64 = book
                    .orders
                    .iter()
                    .filter(|o| o.side == Side::Buy)
                    .map(|o| o.volume * o.price)
                    .sum();
                json!({"accounts": [
                    {"currency": self.order_code, "balance": book.order_balance.to_string(),
                     "locked": locked_order.to_string()},
                    {"currency": self.payment_code, "balance": book.payment_balance.to_string(),
                     "locked": locked_payment.to_string()},
                ]})
            }
            (Verb::Post, "/api/v2/orders") => {
                if book.failing_places > 0 {
                    book.failing_places -= 1;
                    return api_error(2002, "Failed to create order.");
                }
                let side = match request.param("side") {
                    Some("sell") => Side::Sell,
                    _ => Side::Buy,
                };
                let volume: f64 = request.param("volume").and_then(|v| v.parse().ok()).unwrap_or(0.0);
                let price: f64 = request.param("price").and_then(|v| v.parse().ok()).unwrap_or(0.0);
                let funded = match side {
                    Side::Sell => volume <= book.order_balance + 1e-9,
                    Side::Buy => volume * price <= book.payment_balance + 1e-9,
                };
                if !funded || volume <= 0.0 {
                    return api_error(2002, "Failed to create order. Reason: insufficient balance");
                }
                match side {
                    Side::Sell => book.order_balance = (book.order_balance - volume).max(0.0),
                    Side::Buy => {
                        book.payment_balance = (book.payment_balance - volume * price).max(0.0)
                    }
                }
                let id = book.next_id;
                book.next_id += 1;
                let order = SimOrder { id, side, price, volume };
                let body = order_json(&order, "wait");
                book.orders.push(order);
                body
            }
            (Verb::Get, "/api/v2/orders") => {
                match book.failing_listing {
                    Some(0) => {
                        book.failing_listing = None;
                        return api_error(1000, "Internal error");
                    }
                    Some(left) => book.failing_listing = Some(left - 1),
                    None => {}
                }
                Value::Array(book.orders.iter().map(|o| order_json(o, "wait")).collect())
            }
            (Verb::Get, "/api/v2/order") => {
                let id = parse_id(request);
                match book.orders.iter().find(|o| Some(o.id) == id) {
                    Some(order) => order_json(order, "wait"),
                    None => api_error(2004, "Order not found"),
                }
            }
            (Verb::Post, "/api/v2/order/delete") => {
                let id = parse_id(request);
                match book.orders.iter().position(|o| Some(o.id) == id) {
                    Some(idx) => {
                        let order = book.orders.remove(idx);
                        refund(&mut book, &order);
                        order_json(&order, "cancel")
                    }
                    None => api_error(2004, "Order not found"),
                }
            }
            (Verb::Post, "/api/v2/orders/clear") => {
                let cleared: Vec<SimOrder> = book.orders.drain(..).collect();
                for order in &cleared {
                    refund(&mut book, order);
                }
                Value::Array(cleared.iter().map(|o| order_json(o, "cancel")).collect())
            }
            (Verb::Get, "/api/v2/trades/my.json") => Value::Array(Vec::new()),
            _ => api_error(1001, "unknown endpoint"),
        }
    }
}

fn parse_id(request: &SignedRequest) -> Option<u64> {
    request.param("id").and_then(|id| id.parse().ok())
}

fn refund(book: &mut SimBook, order: &SimOrder) {
    match order.side {
        Side::Sell => book.order_balance += order.volume,
        Side::Buy => book.payment_balance += order.volume * order.price,
    }
}

fn order_json(order: &SimOrder, state: &str) -> Value {
    json!({
        "id": order.id,
        "side": order.side.as_str(),
        "price": order.price.to_string(),
        "state": state,
        "market": "sim",
        "remaining_volume": order.volume.to_string(),
        "created_at": "2015-02-18T12:00:00Z",
    })
}

fn api_error(code: i64, message: &str) -> Value {
    json!({"error": {"code": code, "message": message}})
}

#[async_trait]
impl Transport for SimExchange {
    async fn send(&self, request: &SignedRequest) -> Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let body = self.handle(request).to_string();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(body)
    }
}
