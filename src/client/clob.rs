//! Order-book client.
//!
//! Price and book queries plus order placement against the CLOB endpoint.
//! Prices arrive as strings; a null or non-numeric price string yields
//! `None`, never NaN. Order placement requires a configured signer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::core::{ApiRequest, ClientConfig, ClientCore, RateLimitConfig};
use crate::client::log_sink::LogSink;
use crate::errors::{EngineError, EngineResult};
use crate::models::de_string_i64_opt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Gtc,
    Gtd,
    Fok,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Gtc => "GTC",
            OrderType::Gtd => "GTD",
            OrderType::Fok => "FOK",
        }
    }
}

/// Venue-supported tick sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSize {
    Tenth,
    Hundredth,
    Thousandth,
    TenThousandth,
}

impl TickSize {
    pub fn as_f64(&self) -> f64 {
        match self {
            TickSize::Tenth => 0.1,
            TickSize::Hundredth => 0.01,
            TickSize::Thousandth => 0.001,
            TickSize::TenThousandth => 0.0001,
        }
    }

    /// Snap a price onto this tick grid.
    pub fn round_price(&self, price: f64) -> f64 {
        let tick = self.as_f64();
        (price / tick).round() * tick
    }
}

/// One price level; the venue sends both fields as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

impl BookLevel {
    pub fn price_f64(&self) -> Option<f64> {
        parse_price_str(&self.price)
    }

    pub fn size_f64(&self) -> Option<f64> {
        parse_price_str(&self.size)
    }
}

/// Parse a venue price string; anything non-numeric or non-finite is None.
pub fn parse_price_str(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default, deserialize_with = "de_string_i64_opt")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
}

/// Best bid/ask from a snapshot. An empty bid side reads as 0, an empty ask
/// side as 1, so callers always get a well-ordered pair.
pub fn best_prices(book: &OrderBookSnapshot) -> (f64, f64) {
    let best_bid = book
        .bids
        .iter()
        .filter_map(BookLevel::price_f64)
        .fold(None::<f64>, |acc, p| Some(acc.map_or(p, |a| a.max(p))))
        .unwrap_or(0.0);
    let best_ask = book
        .asks
        .iter()
        .filter_map(BookLevel::price_f64)
        .fold(None::<f64>, |acc, p| Some(acc.map_or(p, |a| a.min(p))))
        .unwrap_or(1.0);
    (best_bid, best_ask)
}

#[derive(Debug, Clone)]
pub struct CreateOrderArgs {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub order_type: OrderType,
    /// Unix seconds; required by the venue for GTD.
    pub expiration: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateOrderOptions {
    pub tick_size: TickSize,
    pub neg_risk: bool,
}

impl Default for CreateOrderOptions {
    fn default() -> Self {
        Self {
            tick_size: TickSize::Hundredth,
            neg_risk: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPlacement {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "orderId", default, alias = "orderID")]
    pub order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    pub error_msg: Option<String>,
    #[serde(rename = "transactionsHashes", default)]
    pub transactions_hashes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(rename = "original_size", default)]
    pub original_size: Option<String>,
    #[serde(rename = "size_matched", default)]
    pub size_matched: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceAllowance {
    #[serde(default, deserialize_with = "crate::models::de_string_f64_opt")]
    pub balance: Option<f64>,
    #[serde(default, deserialize_with = "crate::models::de_string_f64_opt")]
    pub allowance: Option<f64>,
}

/// Price lookup seam shared by the price stage and the strategies'
/// slippage guards; mocked in tests.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price(&self, token_id: &str, side: OrderSide) -> EngineResult<Option<f64>>;
}

/// Order placement/cancellation seam used by the order queue.
#[async_trait]
pub trait VenueOrderApi: Send + Sync {
    async fn place(
        &self,
        args: CreateOrderArgs,
        options: CreateOrderOptions,
    ) -> EngineResult<OrderPlacement>;

    async fn cancel(&self, order_id: &str) -> EngineResult<()>;
}

pub struct ClobClient {
    core: ClientCore,
    signing_enabled: bool,
}

impl ClobClient {
    pub fn new(
        base_url: impl Into<String>,
        sink: Arc<dyn LogSink>,
        signing_enabled: bool,
    ) -> EngineResult<Self> {
        let mut config = ClientConfig::new(base_url);
        config.timeout = Duration::from_secs(15);
        config.rate_limit = RateLimitConfig {
            max_requests: 100,
            window_ms: 10_000,
        };
        Ok(Self {
            core: ClientCore::new("clob", config, sink)?,
            signing_enabled,
        })
    }

    pub fn signing_enabled(&self) -> bool {
        self.signing_enabled
    }

    pub async fn get_order_book(&self, token_id: &str) -> EngineResult<OrderBookSnapshot> {
        let params = vec![("token_id".to_string(), token_id.to_string())];
        self.core
            .request(ApiRequest::get("/book").with_params(params))
            .await
            .into_result()
    }

    pub async fn get_best_prices(&self, token_id: &str) -> EngineResult<(f64, f64)> {
        let book = self.get_order_book(token_id).await?;
        Ok(best_prices(&book))
    }

    /// `GET /price` — the venue answers `{"price": "0.52"}`. Absent or
    /// unparseable prices come back as `None` and must be treated as
    /// unknown by the caller.
    pub async fn get_price(&self, token_id: &str, side: OrderSide) -> EngineResult<Option<f64>> {
        let params = vec![
            ("token_id".to_string(), token_id.to_string()),
            ("side".to_string(), side.as_str().to_string()),
        ];
        let value: serde_json::Value = self
            .core
            .request(ApiRequest::get("/price").with_params(params))
            .await
            .into_result()?;
        Ok(extract_price(&value))
    }

    pub async fn create_order(
        &self,
        args: CreateOrderArgs,
        options: CreateOrderOptions,
    ) -> EngineResult<OrderPlacement> {
        if !self.signing_enabled {
            return Err(EngineError::SigningUnavailable);
        }
        if !(args.price > 0.0 && args.price < 1.0) {
            return Err(EngineError::DomainReject(format!(
                "order price {} outside (0, 1)",
                args.price
            )));
        }
        if args.size <= 0.0 {
            return Err(EngineError::DomainReject("order size must be positive".into()));
        }

        let price = options.tick_size.round_price(args.price);
        let mut body = serde_json::json!({
            "tokenID": args.token_id,
            "side": args.side.as_str(),
            "price": price,
            "size": args.size,
            "orderType": args.order_type.as_str(),
            "tickSize": options.tick_size.as_f64(),
            "negRisk": options.neg_risk,
        });
        if let Some(expiration) = args.expiration {
            body["expiration"] = serde_json::json!(expiration);
        }

        debug!(token_id = %args.token_id, side = args.side.as_str(), price, size = args.size, "placing order");
        let placement: OrderPlacement = self
            .core
            .request(ApiRequest::post("/order", body))
            .await
            .into_result()?;
        if !placement.success {
            warn!(
                token_id = %args.token_id,
                error = placement.error_msg.as_deref().unwrap_or("unknown"),
                "venue rejected order"
            );
        }
        Ok(placement)
    }

    pub async fn cancel_order(&self, order_id: &str) -> EngineResult<()> {
        let _: serde_json::Value = self
            .core
            .request(ApiRequest::delete(format!("/order/{}", order_id)))
            .await
            .into_result()?;
        Ok(())
    }

    pub async fn cancel_all_orders(&self) -> EngineResult<()> {
        let _: serde_json::Value = self
            .core
            .request(ApiRequest::delete("/orders/cancel-all"))
            .await
            .into_result()?;
        Ok(())
    }

    pub async fn get_open_orders(&self) -> EngineResult<Vec<OpenOrder>> {
        self.core
            .request(ApiRequest::get("/orders"))
            .await
            .into_result()
    }

    pub async fn get_balance_allowance(&self) -> EngineResult<BalanceAllowance> {
        self.core
            .request(ApiRequest::get("/balance-allowance"))
            .await
            .into_result()
    }
}

fn extract_price(value: &serde_json::Value) -> Option<f64> {
    match value.get("price") {
        Some(serde_json::Value::String(s)) => parse_price_str(s),
        Some(serde_json::Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

#[async_trait]
impl PriceSource for ClobClient {
    async fn price(&self, token_id: &str, side: OrderSide) -> EngineResult<Option<f64>> {
        self.get_price(token_id, side).await
    }
}

#[async_trait]
impl VenueOrderApi for ClobClient {
    async fn place(
        &self,
        args: CreateOrderArgs,
        options: CreateOrderOptions,
    ) -> EngineResult<OrderPlacement> {
        self.create_order(args, options).await
    }

    async fn cancel(&self, order_id: &str) -> EngineResult<()> {
        self.cancel_order(order_id).await
    }
}
