use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    auth::{local_time_ms, offset_from_error, sign_with, Credentials, HashFunction},
    errors::{GatewayError, Result},
    params::{decimal, RequestParams, Verb, PARAM_ACCESS_KEY, PARAM_SIGNATURE, PARAM_TONCE},
    session::{BusyRetryPolicy, GatewaySession},
    transport::{HttpTransport, SignedRequest, Transport},
    wire::{
        decode, parse_body, CreatedOrder, MemberWire, OrderWire, TickerEnvelope, TradeWire,
    },
};
use crate::{
    timings::CallTimer,
    types::{Currency, CurrencyPair, Order, OrderId, PairBalance, Side, Ticker, Trade},
};

const URI_MEMBER: &str = "/api/v2/members/me";
const URI_ORDERS: &str = "/api/v2/orders";
const URI_ORDER: &str = "/api/v2/order";
const URI_CANCEL: &str = "/api/v2/order/delete";
const URI_CLEAR: &str = "/api/v2/orders/clear";
const URI_TRADES: &str = "/api/v2/trades/my.json";
const URI_TICKERS: &str = "/api/v2/tickers";

const ACTIVE_ORDERS_LIMIT: u32 = 999;
const TRADES_LIMIT: u32 = 1000;

/// Tunables for [`ExchangeGateway`].
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub retry: BusyRetryPolicy,
    pub hash: HashFunction,
    /// Exchange fee in percent, reported by [`ExchangeGateway::tx_fee`].
    pub tx_fee_percent: f64,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            retry: BusyRetryPolicy::default(),
            hash: HashFunction::default(),
            tx_fee_percent: 0.0,
        }
    }
}

/// Signed, single-flight access to one exchange account.
///
/// Every call holds the shared [`GatewaySession`] for its whole network
/// round-trip, so at most one request per account is on the wire.
pub struct ExchangeGateway {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    session: Arc<GatewaySession>,
    opts: GatewayOptions,
}

impl ExchangeGateway {
    pub fn builder() -> ExchangeGatewayBuilder {
        ExchangeGatewayBuilder {
            base_url: None,
            credentials: None,
            transport: None,
            session: None,
            options: GatewayOptions::default(),
        }
    }

    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        session: Arc<GatewaySession>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            transport,
            credentials,
            session,
            opts: options,
        }
    }

    /// Session shared by every gateway bound to the same account.
    pub fn session(&self) -> &Arc<GatewaySession> {
        &self.session
    }

    /// Offset of the exchange clock, shared with every gateway on the session.
    pub async fn clock_offset(&self) -> Option<i64> {
        self.session.clock_offset().await
    }

    pub async fn place_order(
        &self,
        pair: &CurrencyPair,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<OrderId> {
        let params = RequestParams::new()
            .with("market", pair.market())
            .with("side", side.as_str())
            .with("volume", decimal(quantity)?)
            .with("price", decimal(price)?);
        let value = self.execute("place_order", Verb::Post, URI_ORDERS, params, true).await?;
        let created: CreatedOrder = decode(value)?;
        info!(%pair, %side, quantity, price, order_id = %created.id, "order placed");
        Ok(OrderId::new(created.id))
    }

    /// Cancels one order. Code 2004 surfaces as an error; callers decide
    /// whether "already settled" is benign via [`GatewayError::is_already_settled`].
    pub async fn cancel_order(&self, id: &OrderId) -> Result<()> {
        let params = RequestParams::new().with("id", id);
        self.execute("cancel_order", Verb::Post, URI_CANCEL, params, true)
            .await?;
        debug!(order_id = %id, "order cancelled");
        Ok(())
    }

    /// Cancels every open order of the account.
    pub async fn clear_orders(&self, pair: &CurrencyPair) -> Result<()> {
        self.execute("clear_orders", Verb::Post, URI_CLEAR, RequestParams::new(), true)
            .await?;
        info!(%pair, "clear orders requested");
        Ok(())
    }

    /// Open orders on `pair`; completed and cancelled ones are dropped.
    pub async fn active_orders(&self, pair: &CurrencyPair) -> Result<Vec<Order>> {
        let params = RequestParams::new()
            .with("market", pair.market())
            .with("limit", ACTIVE_ORDERS_LIMIT);
        let value = self.execute("active_orders", Verb::Get, URI_ORDERS, params, true).await?;
        let wires: Vec<OrderWire> = decode(value)?;
        let mut orders = Vec::with_capacity(wires.len());
        for wire in wires {
            let order = wire.into_order()?;
            if order.status.is_active() {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    pub async fn order_detail(&self, id: &OrderId) -> Result<Order> {
        let params = RequestParams::new().with("id", id);
        let value = self.execute("order_detail", Verb::Get, URI_ORDER, params, true).await?;
        decode::<OrderWire>(value)?.into_order()
    }

    /// `false` once the exchange reports the order filled, cancelled or unknown.
    pub async fn is_order_active(&self, id: &OrderId) -> Result<bool> {
        match self.order_detail(id).await {
            Ok(order) => Ok(order.status.is_active()),
            Err(err) if err.is_already_settled() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Configured fee in percent. No network call is made.
    pub fn tx_fee(&self) -> f64 {
        self.opts.tx_fee_percent
    }

    pub async fn balances(&self, pair: &CurrencyPair) -> Result<PairBalance> {
        let member = self.member().await?;
        member.pair_balance(&pair.order.code, &pair.payment.code)
    }

    /// Available (unlocked) amount of one currency.
    pub async fn balance(&self, currency: &Currency) -> Result<f64> {
        let member = self.member().await?;
        member.available(&currency.code)
    }

    /// Own trades on `pair`, newest first as returned, optionally not older than `since`.
    pub async fn last_trades(
        &self,
        pair: &CurrencyPair,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>> {
        let params = RequestParams::new()
            .with("market", pair.market())
            .with("limit", TRADES_LIMIT);
        let value = self.execute("last_trades", Verb::Get, URI_TRADES, params, true).await?;
        let wires: Vec<TradeWire> = decode(value)?;
        let mut trades = Vec::with_capacity(wires.len());
        for wire in wires {
            let trade = wire.into_trade()?;
            if since.map_or(true, |cutoff| trade.created_at >= cutoff) {
                trades.push(trade);
            }
        }
        Ok(trades)
    }

    pub async fn ticker(&self, pair: &CurrencyPair) -> Result<Ticker> {
        let uri = format!("{}/{}", URI_TICKERS, pair.market());
        let value = self
            .execute("ticker", Verb::Get, &uri, RequestParams::new(), false)
            .await?;
        Ok(decode::<TickerEnvelope>(value)?.into_ticker())
    }

    async fn member(&self) -> Result<MemberWire> {
        let value = self
            .execute("balances", Verb::Get, URI_MEMBER, RequestParams::new(), true)
            .await?;
        decode(value)
    }

    async fn execute(
        &self,
        operation: &'static str,
        verb: Verb,
        uri: &str,
        params: RequestParams,
        authenticated: bool,
    ) -> Result<Value> {
        let mut timer = CallTimer::start(operation);
        let result = async {
            let _guard = self.session.acquire(operation, &self.opts.retry).await?;
            timer.acquired();

            let request = if authenticated {
                if self.session.clock().offset().await.is_none() {
                    self.discover_offset().await;
                }
                self.signed(verb, uri, params, self.session.clock().tonce().await)?
            } else {
                SignedRequest {
                    verb,
                    uri: uri.to_string(),
                    params: params.into_pairs(),
                }
            };

            let body = self.transport.send(&request).await?;
            let result = parse_body(&body);
            if let Err(GatewayError::Api { message, .. }) = &result {
                if let Some(offset) = offset_from_error(message, local_time_ms()) {
                    warn!(operation, offset_ms = offset, "tonce rejected, clock offset updated");
                    self.session.clock().set(offset).await;
                }
            }
            result
        }
        .await;
        timer.finish(&result);
        result
    }

    /// Probes the account endpoint with an unadjusted tonce. Caller holds the busy guard.
    async fn discover_offset(&self) {
        let local = local_time_ms();
        let probe = match self.signed(Verb::Get, URI_MEMBER, RequestParams::new(), local) {
            Ok(probe) => probe,
            Err(err) => {
                warn!(error = %err, "could not sign clock probe");
                return;
            }
        };
        match self.transport.send(&probe).await.and_then(|body| parse_body(&body)) {
            Ok(_) => {
                debug!("exchange clock in sync");
                self.session.clock().set(0).await;
            }
            Err(GatewayError::Api { message, .. }) => {
                let offset = offset_from_error(&message, local).unwrap_or(0);
                info!(offset_ms = offset, "clock offset discovered");
                self.session.clock().set(offset).await;
            }
            Err(err) => {
                warn!(error = %err, "clock probe failed, using local time");
            }
        }
    }

    fn signed(
        &self,
        verb: Verb,
        uri: &str,
        mut params: RequestParams,
        tonce: i64,
    ) -> Result<SignedRequest> {
        params.insert(PARAM_ACCESS_KEY, &self.credentials.access_key);
        params.insert(PARAM_TONCE, tonce);
        let signature = sign_with(&self.credentials, self.opts.hash, verb, uri, &params)?;
        params.insert(PARAM_SIGNATURE, signature);
        Ok(SignedRequest {
            verb,
            uri: uri.to_string(),
            params: params.into_pairs(),
        })
    }
}

/// Builder for [`ExchangeGateway`]. Either `base_url` or `transport` is required.
pub struct ExchangeGatewayBuilder {
    base_url: Option<String>,
    credentials: Option<Credentials>,
    transport: Option<Arc<dyn Transport>>,
    session: Option<Arc<GatewaySession>>,
    options: GatewayOptions,
}

impl ExchangeGatewayBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn credentials(mut self, access_key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(access_key, secret));
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share a session with other gateways on the same account.
    pub fn session(mut self, session: Arc<GatewaySession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn retry_policy(mut self, retry: BusyRetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn hash_function(mut self, hash: HashFunction) -> Self {
        self.options.hash = hash;
        self
    }

    pub fn tx_fee_percent(mut self, fee: f64) -> Self {
        self.options.tx_fee_percent = fee;
        self
    }

    pub fn build(self) -> Result<ExchangeGateway> {
        let credentials = self.credentials.ok_or(GatewayError::InvalidConfig {
            field: "credentials",
            why: "must be provided",
        })?;
        if credentials.access_key.is_empty() {
            return Err(GatewayError::InvalidConfig {
                field: "access_key",
                why: "must not be empty",
            });
        }
        if !self.options.tx_fee_percent.is_finite() || self.options.tx_fee_percent < 0.0 {
            return Err(GatewayError::InvalidConfig {
                field: "tx_fee_percent",
                why: "must be a non-negative number",
            });
        }
        let transport: Arc<dyn Transport> = match (self.transport, self.base_url) {
            (Some(transport), _) => transport,
            (None, Some(url)) => Arc::new(HttpTransport::new(&url)?),
            (None, None) => {
                return Err(GatewayError::InvalidConfig {
                    field: "base_url",
                    why: "must be provided",
                })
            }
        };
        Ok(ExchangeGateway::new(
            transport,
            credentials,
            self.session.unwrap_or_default(),
            self.options,
        ))
    }
}
