// =============================================================================
// Binance USDⓈ-M Futures REST Client — HMAC-SHA256 signed requests
// =============================================================================
//
// Sole path to the venue. Every call acquires request weight from the shared
// token bucket before sending, carries a deadline, and maps exchange error
// bodies onto the `GatewayError` taxonomy. Transient failures are retried
// with backoff inside the client; precision failures refresh the symbol
// filter cache and retry once.
//
// SECURITY: the secret key is never logged or serialized. The API key is sent
// as the X-MBX-APIKEY header; every signed request includes a recvWindow to
// tolerate minor clock drift.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::binance::error::{self, GatewayError, GatewayResult};
use crate::binance::filters::{FilterCache, SymbolFilters};
use crate::binance::rate_limit::WeightBudget;
use crate::types::{Candle, MarginMode};

type HmacSha256 = Hmac<Sha256>;

/// recv-window for signed requests (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Per-request HTTP deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for blocking on the weight bucket.
const BUDGET_DEADLINE: Duration = Duration::from_secs(15);

/// Transient-error retry attempts inside the gateway.
const TRANSIENT_RETRIES: u32 = 2;

// =============================================================================
// Response records
// =============================================================================

/// One row of the 24h ticker endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume: f64,
    pub price_change_pct: f64,
}

/// Best bid/ask snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookTicker {
    pub bid: f64,
    pub ask: f64,
}

impl BookTicker {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Aggregated order book levels.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    /// (price, quantity), best first.
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBook {
    /// Quoted USD depth within ±`pct`% of the mid price, both sides summed.
    pub fn depth_usd_within_pct(&self, pct: f64) -> f64 {
        let (Some(best_bid), Some(best_ask)) = (self.bids.first(), self.asks.first()) else {
            return 0.0;
        };
        let mid = (best_bid.0 + best_ask.0) / 2.0;
        if mid <= 0.0 {
            return 0.0;
        }
        let lo = mid * (1.0 - pct / 100.0);
        let hi = mid * (1.0 + pct / 100.0);

        let bid_depth: f64 = self
            .bids
            .iter()
            .filter(|(p, _)| *p >= lo)
            .map(|(p, q)| p * q)
            .sum();
        let ask_depth: f64 = self
            .asks
            .iter()
            .filter(|(p, _)| *p <= hi)
            .map(|(p, q)| p * q)
            .sum();
        bid_depth + ask_depth
    }
}

/// Futures account summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountInfo {
    pub total_wallet_balance: f64,
    pub available_balance: f64,
    pub total_unrealized_pnl: f64,
    pub total_position_margin: f64,
}

/// One open position as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed: positive long, negative short.
    pub position_amt: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub liquidation_price: f64,
}

/// Acknowledgement of a placed / queried order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: u64,
    pub status: String,
    pub executed_qty: f64,
    pub avg_price: f64,
}

impl OrderAck {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }
}

/// Premium-index snapshot: funding rate plus mark price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingInfo {
    /// Current funding rate as a decimal (0.0001 = 0.01%).
    pub rate: f64,
    /// Epoch ms of the next funding event.
    pub next_funding_time: i64,
    pub mark_price: f64,
}

// =============================================================================
// Order requests
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    fn as_api_str(self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Builder for POST /fapi/v1/order parameters.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: &'static str,
    pub order_type: OrderType,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: Option<&'static str>,
    pub reduce_only: bool,
    pub close_position: bool,
}

impl OrderRequest {
    pub fn limit(symbol: &str, side: &'static str, quantity: f64, price: f64, post_only: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity: Some(quantity),
            price: Some(price),
            stop_price: None,
            time_in_force: Some(if post_only { "GTX" } else { "GTC" }),
            reduce_only: false,
            close_position: false,
        }
    }

    pub fn market(symbol: &str, side: &'static str, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            close_position: false,
        }
    }

    pub fn reduce_only_market(symbol: &str, side: &'static str, quantity: f64) -> Self {
        let mut req = Self::market(symbol, side, quantity);
        req.reduce_only = true;
        req
    }

    /// Stop-market that closes against the position (protective stop).
    pub fn stop_market(symbol: &str, side: &'static str, stop_price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::StopMarket,
            quantity: Some(quantity),
            price: None,
            stop_price: Some(stop_price),
            time_in_force: None,
            reduce_only: true,
            close_position: false,
        }
    }

    /// Take-profit-market leg of the ladder.
    pub fn take_profit_market(symbol: &str, side: &'static str, stop_price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::TakeProfitMarket,
            quantity: Some(quantity),
            price: None,
            stop_price: Some(stop_price),
            time_in_force: None,
            reduce_only: true,
            close_position: false,
        }
    }

    fn to_params(&self) -> String {
        let mut params = format!(
            "symbol={}&side={}&type={}",
            self.symbol,
            self.side,
            self.order_type.as_api_str()
        );
        if let Some(q) = self.quantity {
            params.push_str(&format!("&quantity={q}"));
        }
        if let Some(p) = self.price {
            params.push_str(&format!("&price={p}"));
        }
        if let Some(sp) = self.stop_price {
            params.push_str(&format!("&stopPrice={sp}"));
        }
        if let Some(tif) = self.time_in_force {
            params.push_str(&format!("&timeInForce={tif}"));
        }
        if self.reduce_only {
            params.push_str("&reduceOnly=true");
        }
        if self.close_position {
            params.push_str("&closePosition=true");
        }
        params
    }
}

// =============================================================================
// Client
// =============================================================================

pub struct FuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: reqwest::Client,
    budget: Arc<WeightBudget>,
    filters: Arc<FilterCache>,
}

impl FuturesClient {
    /// Create a client against production or the futures testnet.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        let base_url = if testnet {
            "https://testnet.binancefuture.com".to_string()
        } else {
            "https://fapi.binance.com".to_string()
        };

        debug!(base_url = %base_url, "futures client initialised");

        Self {
            api_key,
            secret,
            base_url,
            http,
            budget: Arc::new(WeightBudget::default()),
            filters: Arc::new(FilterCache::new()),
        }
    }

    pub fn filter_cache(&self) -> Arc<FilterCache> {
        self.filters.clone()
    }

    pub fn weight_budget(&self) -> Arc<WeightBudget> {
        self.budget.clone()
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Request core
    // -------------------------------------------------------------------------

    /// Send one request with weight budgeting, deadline, header feedback, and
    /// transient-error retries.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &str,
        signed: bool,
        weight: u32,
    ) -> GatewayResult<serde_json::Value> {
        let mut attempt = 0;
        loop {
            match self.request_once(method.clone(), path, params, signed, weight).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < TRANSIENT_RETRIES => {
                    attempt += 1;
                    let backoff = Duration::from_millis(400 * 2u64.pow(attempt));
                    warn!(
                        path,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient gateway error — retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &self,
        method: Method,
        path: &str,
        params: &str,
        signed: bool,
        weight: u32,
    ) -> GatewayResult<serde_json::Value> {
        self.budget.acquire(weight, BUDGET_DEADLINE).await?;

        let query = if signed {
            self.signed_query(params)
        } else {
            params.to_string()
        };
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let resp = self
            .http
            .request(method, &url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::NetworkTimeout(format!("{path}: {e}"))
                } else {
                    GatewayError::NetworkTimeout(format!("{path}: transport error: {e}"))
                }
            })?;

        if let Some(used) = resp
            .headers()
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.budget.sync_used_weight(used).await;
        }

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::NetworkTimeout(format!("{path}: bad body: {e}")))?;

        if !status.is_success() {
            if let Some(err) = error::from_body(&body) {
                return Err(err);
            }
            return Err(GatewayError::Unknown {
                code: status.as_u16() as i64,
                msg: body.to_string(),
            });
        }

        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines — OHLCV bars, oldest first.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> GatewayResult<Vec<Candle>> {
        let params = format!("symbol={symbol}&interval={interval}&limit={limit}");
        let body = self
            .request(Method::GET, "/fapi/v1/klines", &params, false, 5)
            .await?;
        parse_klines(&body)
    }

    /// GET /fapi/v1/ticker/24hr for the whole universe.
    pub async fn get_ticker_24h_all(&self) -> GatewayResult<Vec<Ticker24h>> {
        let body = self
            .request(Method::GET, "/fapi/v1/ticker/24hr", "", false, 40)
            .await?;
        parse_tickers(&body)
    }

    /// GET /fapi/v1/ticker/bookTicker — best bid/ask.
    pub async fn get_book_ticker(&self, symbol: &str) -> GatewayResult<BookTicker> {
        let params = format!("symbol={symbol}");
        let body = self
            .request(Method::GET, "/fapi/v1/ticker/bookTicker", &params, false, 2)
            .await?;
        let bid = str_f64(&body, "bidPrice")?;
        let ask = str_f64(&body, "askPrice")?;
        Ok(BookTicker { bid, ask })
    }

    /// GET /fapi/v1/depth — order book (100 levels).
    pub async fn get_order_book(&self, symbol: &str) -> GatewayResult<OrderBook> {
        let params = format!("symbol={symbol}&limit=100");
        let body = self
            .request(Method::GET, "/fapi/v1/depth", &params, false, 5)
            .await?;
        parse_order_book(&body)
    }

    /// GET /fapi/v1/premiumIndex — mark price + funding.
    pub async fn get_funding(&self, symbol: &str) -> GatewayResult<FundingInfo> {
        let params = format!("symbol={symbol}");
        let body = self
            .request(Method::GET, "/fapi/v1/premiumIndex", &params, false, 1)
            .await?;
        Ok(FundingInfo {
            rate: str_f64(&body, "lastFundingRate").unwrap_or(0.0),
            next_funding_time: body["nextFundingTime"].as_i64().unwrap_or(0),
            mark_price: str_f64(&body, "markPrice")?,
        })
    }

    /// GET /futures/data/topLongShortAccountRatio — top-trader long/short
    /// accounts ratio, latest value.
    pub async fn get_long_short_ratio(&self, symbol: &str) -> GatewayResult<f64> {
        let params = format!("symbol={symbol}&period=15m&limit=1");
        let body = self
            .request(
                Method::GET,
                "/futures/data/topLongShortAccountRatio",
                &params,
                false,
                1,
            )
            .await?;
        let entry = body
            .as_array()
            .and_then(|a| a.last())
            .ok_or_else(|| GatewayError::Unknown {
                code: 0,
                msg: "empty long/short ratio response".into(),
            })?;
        str_f64(entry, "longShortRatio")
    }

    // -------------------------------------------------------------------------
    // Account / positions
    // -------------------------------------------------------------------------

    /// GET /fapi/v2/account (signed).
    pub async fn get_account(&self) -> GatewayResult<AccountInfo> {
        let body = self
            .request(Method::GET, "/fapi/v2/account", "", true, 5)
            .await?;
        Ok(AccountInfo {
            total_wallet_balance: str_f64(&body, "totalWalletBalance")?,
            available_balance: str_f64(&body, "availableBalance")?,
            total_unrealized_pnl: str_f64(&body, "totalUnrealizedProfit").unwrap_or(0.0),
            total_position_margin: str_f64(&body, "totalPositionInitialMargin").unwrap_or(0.0),
        })
    }

    /// GET /fapi/v2/positionRisk (signed) — only non-flat entries.
    pub async fn get_positions(&self) -> GatewayResult<Vec<ExchangePosition>> {
        let body = self
            .request(Method::GET, "/fapi/v2/positionRisk", "", true, 5)
            .await?;
        parse_positions(&body)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /fapi/v1/order (signed). A precision rejection refreshes the
    /// filter cache and retries once.
    pub async fn place_order(&self, req: &OrderRequest) -> GatewayResult<OrderAck> {
        let params = req.to_params();
        match self.place_order_raw(&params).await {
            Err(e) if e.is_filter_related() => {
                warn!(symbol = %req.symbol, error = %e, "precision rejection — refreshing filters and retrying once");
                self.refresh_filters().await?;
                self.place_order_raw(&params).await
            }
            other => other,
        }
    }

    async fn place_order_raw(&self, params: &str) -> GatewayResult<OrderAck> {
        let body = self
            .request(Method::POST, "/fapi/v1/order", params, true, 1)
            .await?;
        parse_order_ack(&body)
    }

    /// GET /fapi/v1/order (signed) — query a single order's status.
    pub async fn query_order(&self, symbol: &str, order_id: u64) -> GatewayResult<OrderAck> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let body = self
            .request(Method::GET, "/fapi/v1/order", &params, true, 1)
            .await?;
        parse_order_ack(&body)
    }

    /// DELETE /fapi/v1/order (signed).
    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> GatewayResult<()> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        self.request(Method::DELETE, "/fapi/v1/order", &params, true, 1)
            .await?;
        debug!(symbol, order_id, "order cancelled");
        Ok(())
    }

    /// DELETE /fapi/v1/allOpenOrders (signed).
    pub async fn cancel_all_orders(&self, symbol: &str) -> GatewayResult<()> {
        let params = format!("symbol={symbol}");
        self.request(Method::DELETE, "/fapi/v1/allOpenOrders", &params, true, 1)
            .await?;
        debug!(symbol, "all open orders cancelled");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Leverage / margin mode
    // -------------------------------------------------------------------------

    /// POST /fapi/v1/leverage (signed). Calling twice with the same value is a
    /// no-op on the exchange side.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        let params = format!("symbol={symbol}&leverage={leverage}");
        self.request(Method::POST, "/fapi/v1/leverage", &params, true, 1)
            .await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    /// POST /fapi/v1/marginType (signed). The exchange answers -4046 when the
    /// mode is already set; that is success for our purposes.
    pub async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> GatewayResult<()> {
        let params = format!("symbol={symbol}&marginType={}", mode.as_api_str());
        match self
            .request(Method::POST, "/fapi/v1/marginType", &params, true, 1)
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::Unknown { code: -4046, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Exchange info / filters
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/exchangeInfo and swap the filter cache.
    pub async fn refresh_filters(&self) -> GatewayResult<()> {
        let body = self
            .request(Method::GET, "/fapi/v1/exchangeInfo", "", false, 1)
            .await?;

        let mut map = HashMap::new();
        if let Some(symbols) = body.get("symbols").and_then(|s| s.as_array()) {
            for entry in symbols {
                let Some(symbol) = entry.get("symbol").and_then(|s| s.as_str()) else {
                    continue;
                };
                if let Some(filters) = SymbolFilters::parse(entry) {
                    map.insert(symbol.to_string(), filters);
                }
            }
        }

        info!(symbols = map.len(), "exchange filters refreshed");
        self.filters.replace_all(map);
        Ok(())
    }

    /// Filters for one symbol; fetches the cache when cold.
    pub async fn symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters> {
        if let Some(f) = self.filters.get(symbol) {
            return Ok(f);
        }
        self.refresh_filters().await?;
        self.filters.get(symbol).ok_or_else(|| {
            GatewayError::Unknown {
                code: 0,
                msg: format!("symbol {symbol} missing from exchangeInfo"),
            }
        })
    }

    /// GET /fapi/v1/positionSide/dual (signed). `true` means hedge mode;
    /// the engine requires one-way mode.
    pub async fn is_hedge_mode(&self) -> GatewayResult<bool> {
        let body = self
            .request(Method::GET, "/fapi/v1/positionSide/dual", "", true, 1)
            .await?;
        Ok(body
            .get("dualSidePosition")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    // -------------------------------------------------------------------------
    // User-data stream keys
    // -------------------------------------------------------------------------

    /// POST /fapi/v1/listenKey (signed with API key header only).
    pub async fn start_user_stream(&self) -> GatewayResult<String> {
        let body = self
            .request(Method::POST, "/fapi/v1/listenKey", "", false, 1)
            .await?;
        body.get("listenKey")
            .and_then(|k| k.as_str())
            .map(|k| k.to_string())
            .ok_or_else(|| GatewayError::Unknown {
                code: 0,
                msg: "listenKey missing from response".into(),
            })
    }

    /// PUT /fapi/v1/listenKey — keepalive (call every ~30 min).
    pub async fn keepalive_user_stream(&self) -> GatewayResult<()> {
        self.request(Method::PUT, "/fapi/v1/listenKey", "", false, 1)
            .await?;
        Ok(())
    }

    /// WebSocket base for the user-data stream.
    pub fn ws_base_url(&self) -> String {
        if self.base_url.contains("testnet") {
            "wss://stream.binancefuture.com".to_string()
        } else {
            "wss://fstream.binance.com".to_string()
        }
    }
}

impl std::fmt::Debug for FuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Payload parsing (pure, unit-testable)
// =============================================================================

fn str_f64(value: &serde_json::Value, key: &str) -> GatewayResult<f64> {
    let field = &value[key];
    if let Some(s) = field.as_str() {
        s.parse::<f64>().map_err(|_| GatewayError::Unknown {
            code: 0,
            msg: format!("field {key}='{s}' is not a number"),
        })
    } else if let Some(n) = field.as_f64() {
        Ok(n)
    } else {
        Err(GatewayError::Unknown {
            code: 0,
            msg: format!("field {key} missing or non-numeric"),
        })
    }
}

fn parse_klines(body: &serde_json::Value) -> GatewayResult<Vec<Candle>> {
    let raw = body.as_array().ok_or_else(|| GatewayError::Unknown {
        code: 0,
        msg: "klines response is not an array".into(),
    })?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(arr) = entry.as_array() else { continue };
        if arr.len() < 7 {
            warn!(elements = arr.len(), "skipping malformed kline entry");
            continue;
        }
        let parse = |v: &serde_json::Value| -> f64 {
            v.as_str().and_then(|s| s.parse().ok()).or(v.as_f64()).unwrap_or(f64::NAN)
        };
        let candle = Candle::new(
            arr[0].as_i64().unwrap_or(0),
            parse(&arr[1]),
            parse(&arr[2]),
            parse(&arr[3]),
            parse(&arr[4]),
            parse(&arr[5]),
            arr[6].as_i64().unwrap_or(0),
        );
        if candle.open.is_nan() || candle.close.is_nan() {
            warn!("skipping kline entry with non-numeric prices");
            continue;
        }
        candles.push(candle);
    }

    if !Candle::is_monotonic(&candles) {
        return Err(GatewayError::Unknown {
            code: 0,
            msg: "kline series violates open-time monotonicity".into(),
        });
    }

    Ok(candles)
}

fn parse_tickers(body: &serde_json::Value) -> GatewayResult<Vec<Ticker24h>> {
    let raw = body.as_array().ok_or_else(|| GatewayError::Unknown {
        code: 0,
        msg: "ticker response is not an array".into(),
    })?;

    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(symbol) = entry.get("symbol").and_then(|s| s.as_str()) else {
            continue;
        };
        let last_price = str_f64(entry, "lastPrice").unwrap_or(0.0);
        let quote_volume = str_f64(entry, "quoteVolume").unwrap_or(0.0);
        let price_change_pct = str_f64(entry, "priceChangePercent").unwrap_or(0.0);
        out.push(Ticker24h {
            symbol: symbol.to_string(),
            last_price,
            quote_volume,
            price_change_pct,
        });
    }
    Ok(out)
}

fn parse_order_book(body: &serde_json::Value) -> GatewayResult<OrderBook> {
    let parse_side = |key: &str| -> Vec<(f64, f64)> {
        body.get(key)
            .and_then(|v| v.as_array())
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|lvl| {
                        let arr = lvl.as_array()?;
                        let price: f64 = arr.first()?.as_str()?.parse().ok()?;
                        let qty: f64 = arr.get(1)?.as_str()?.parse().ok()?;
                        Some((price, qty))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(OrderBook {
        bids: parse_side("bids"),
        asks: parse_side("asks"),
    })
}

fn parse_positions(body: &serde_json::Value) -> GatewayResult<Vec<ExchangePosition>> {
    let raw = body.as_array().ok_or_else(|| GatewayError::Unknown {
        code: 0,
        msg: "positionRisk response is not an array".into(),
    })?;

    let mut out = Vec::new();
    for entry in raw {
        let amt = str_f64(entry, "positionAmt").unwrap_or(0.0);
        if amt == 0.0 {
            continue;
        }
        let Some(symbol) = entry.get("symbol").and_then(|s| s.as_str()) else {
            continue;
        };
        out.push(ExchangePosition {
            symbol: symbol.to_string(),
            position_amt: amt,
            entry_price: str_f64(entry, "entryPrice").unwrap_or(0.0),
            leverage: str_f64(entry, "leverage").unwrap_or(1.0) as u32,
            unrealized_pnl: str_f64(entry, "unRealizedProfit").unwrap_or(0.0),
            liquidation_price: str_f64(entry, "liquidationPrice").unwrap_or(0.0),
        });
    }
    Ok(out)
}

fn parse_order_ack(body: &serde_json::Value) -> GatewayResult<OrderAck> {
    let order_id = body
        .get("orderId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GatewayError::Unknown {
            code: 0,
            msg: "order response missing orderId".into(),
        })?;
    Ok(OrderAck {
        order_id,
        status: body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("NEW")
            .to_string(),
        executed_qty: str_f64(body, "executedQty").unwrap_or(0.0),
        avg_price: str_f64(body, "avgPrice").unwrap_or(0.0),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = FuturesClient::new("key", "secret", true);
        let a = client.sign("symbol=BTCUSDT&side=BUY");
        let b = client.sign("symbol=BTCUSDT&side=BUY");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let client = FuturesClient::new("key", "secret", true);
        let qs = client.signed_query("symbol=BTCUSDT");
        assert!(qs.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(qs.contains("&recvWindow=5000"));
        assert!(qs.contains("&signature="));
    }

    #[test]
    fn testnet_selects_testnet_hosts() {
        let client = FuturesClient::new("k", "s", true);
        assert!(client.base_url.contains("testnet"));
        assert!(client.ws_base_url().contains("binancefuture"));

        let prod = FuturesClient::new("k", "s", false);
        assert_eq!(prod.base_url, "https://fapi.binance.com");
        assert_eq!(prod.ws_base_url(), "wss://fstream.binance.com");
    }

    #[test]
    fn debug_redacts_credentials() {
        let client = FuturesClient::new("super-secret-key", "super-secret", true);
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn order_request_param_encoding() {
        let req = OrderRequest::limit("BTCUSDT", "BUY", 0.5, 50_000.0, true);
        let params = req.to_params();
        assert!(params.contains("symbol=BTCUSDT"));
        assert!(params.contains("side=BUY"));
        assert!(params.contains("type=LIMIT"));
        assert!(params.contains("quantity=0.5"));
        assert!(params.contains("price=50000"));
        assert!(params.contains("timeInForce=GTX"));
        assert!(!params.contains("reduceOnly"));

        let stop = OrderRequest::stop_market("BTCUSDT", "SELL", 48_000.0, 0.5);
        let params = stop.to_params();
        assert!(params.contains("type=STOP_MARKET"));
        assert!(params.contains("stopPrice=48000"));
        assert!(params.contains("reduceOnly=true"));
    }

    #[test]
    fn kline_parsing_and_monotonicity() {
        let body = serde_json::json!([
            [1000, "100.0", "101.0", "99.0", "100.5", "12.0", 1999],
            [2000, "100.5", "102.0", "100.0", "101.5", "15.0", 2999]
        ]);
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert!((candles[1].close - 101.5).abs() < 1e-9);

        let bad = serde_json::json!([
            [2000, "100.0", "101.0", "99.0", "100.5", "12.0", 2999],
            [1000, "100.5", "102.0", "100.0", "101.5", "15.0", 1999]
        ]);
        assert!(parse_klines(&bad).is_err());
    }

    #[test]
    fn ticker_parsing() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "lastPrice": "50000", "quoteVolume": "9000000000", "priceChangePercent": "2.5"},
            {"symbol": "DOGEUSDT", "lastPrice": "0.1", "quoteVolume": "50000000", "priceChangePercent": "-1.0"}
        ]);
        let tickers = parse_tickers(&body).unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].symbol, "BTCUSDT");
        assert!((tickers[1].price_change_pct + 1.0).abs() < 1e-9);
    }

    #[test]
    fn order_book_depth_within_band() {
        let book = OrderBook {
            bids: vec![(100.0, 10.0), (96.0, 10.0), (90.0, 100.0)],
            asks: vec![(101.0, 10.0), (105.0, 10.0), (120.0, 100.0)],
        };
        // mid = 100.5; ±5% band = [95.475, 105.525]
        let depth = book.depth_usd_within_pct(5.0);
        let expected = 100.0 * 10.0 + 96.0 * 10.0 + 101.0 * 10.0 + 105.0 * 10.0;
        assert!((depth - expected).abs() < 1e-6);
    }

    #[test]
    fn empty_order_book_has_zero_depth() {
        let book = OrderBook { bids: vec![], asks: vec![] };
        assert_eq!(book.depth_usd_within_pct(5.0), 0.0);
    }

    #[test]
    fn position_parsing_skips_flat_entries() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "positionAmt": "0", "entryPrice": "0", "leverage": "5", "unRealizedProfit": "0", "liquidationPrice": "0"},
            {"symbol": "ETHUSDT", "positionAmt": "-2.0", "entryPrice": "3000", "leverage": "10", "unRealizedProfit": "55.5", "liquidationPrice": "3300"}
        ]);
        let positions = parse_positions(&body).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "ETHUSDT");
        assert!(positions[0].position_amt < 0.0);
        assert_eq!(positions[0].leverage, 10);
    }

    #[test]
    fn order_ack_parsing() {
        let body = serde_json::json!({
            "orderId": 12345, "status": "FILLED", "executedQty": "0.5", "avgPrice": "50123.4"
        });
        let ack = parse_order_ack(&body).unwrap();
        assert_eq!(ack.order_id, 12345);
        assert!(ack.is_filled());
        assert!((ack.avg_price - 50123.4).abs() < 1e-9);
    }
}
