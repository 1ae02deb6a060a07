//! Market data model.
//!
//! `RawMarket` mirrors the feed payload, where numeric fields may arrive as
//! strings and list fields may arrive as JSON-encoded strings (e.g.
//! `"[\"Yes\",\"No\"]"`). `MarketData` is the converted in-process record
//! carrying both the static attributes and the dynamic snapshot fields of a
//! single scan observation.

use chrono::{DateTime, Utc};
use serde::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

/// Deserialize a JSON array that may be double-encoded as a string.
pub fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Value::String(s) => {
            serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom)
        }
        _ => Ok(Vec::new()),
    }
}

/// Deserialize an optional float that may arrive as a string. Null, empty
/// strings, and non-numeric strings all become `None`, never NaN.
pub fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(coerce_f64(&v))
}

/// Deserialize a float list that may be double-encoded; each element may be
/// a number or a numeric string.
pub fn de_string_f64_vec<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    let items: Vec<Value> = match v {
        Value::Array(arr) => arr,
        Value::String(s) => serde_json::from_str(&s).unwrap_or_default(),
        _ => Vec::new(),
    };
    Ok(items.iter().filter_map(coerce_f64).collect())
}

fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Deserialize an optional integer that may arrive as a string or float.
pub fn de_string_i64_opt<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) if !s.is_empty() => s.parse::<i64>().ok(),
        _ => None,
    })
}

/// One market record as returned by the feed listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMarket {
    #[serde(rename = "conditionId", default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "de_string_vec")]
    pub outcomes: Vec<String>,
    #[serde(rename = "outcomePrices", default, deserialize_with = "de_string_f64_vec")]
    pub outcome_prices: Vec<f64>,
    #[serde(rename = "clobTokenIds", default, deserialize_with = "de_string_vec")]
    pub clob_token_ids: Vec<String>,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<String>,
    #[serde(rename = "startDate", default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub restricted: Option<bool>,
    #[serde(rename = "enableOrderBook", default)]
    pub enable_order_book: Option<bool>,
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub ready: Option<bool>,
    #[serde(default)]
    pub funded: Option<bool>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(rename = "new", default, alias = "isNew")]
    pub is_new: Option<bool>,
    #[serde(rename = "negRisk", default)]
    pub neg_risk: Option<bool>,

    #[serde(rename = "orderMinSize", default, deserialize_with = "de_string_f64_opt")]
    pub order_min_size: Option<f64>,
    #[serde(
        rename = "orderPriceMinTickSize",
        default,
        deserialize_with = "de_string_f64_opt"
    )]
    pub order_price_min_tick_size: Option<f64>,
    #[serde(rename = "acceptingOrders", default)]
    pub accepting_orders: Option<bool>,
    #[serde(rename = "acceptingOrdersTimestamp", default)]
    pub accepting_orders_timestamp: Option<String>,

    #[serde(rename = "umaBond", default, deserialize_with = "de_string_f64_opt")]
    pub uma_bond: Option<f64>,
    #[serde(rename = "umaReward", default, deserialize_with = "de_string_f64_opt")]
    pub uma_reward: Option<f64>,
    #[serde(rename = "resolvedBy", default)]
    pub resolved_by: Option<String>,
    #[serde(rename = "resolutionSource", default)]
    pub resolution_source: Option<String>,
    #[serde(rename = "submittedBy", default)]
    pub submitted_by: Option<String>,

    #[serde(rename = "groupItemTitle", default)]
    pub group_item_title: Option<String>,
    #[serde(
        rename = "groupItemThreshold",
        default,
        deserialize_with = "de_string_f64_opt"
    )]
    pub group_item_threshold: Option<f64>,
    #[serde(rename = "customLiveness", default, deserialize_with = "de_string_i64_opt")]
    pub custom_liveness: Option<i64>,
    #[serde(default)]
    pub image: Option<String>,

    #[serde(rename = "bestBid", default, deserialize_with = "de_string_f64_opt")]
    pub best_bid: Option<f64>,
    #[serde(rename = "bestAsk", default, deserialize_with = "de_string_f64_opt")]
    pub best_ask: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    pub spread: Option<f64>,
    #[serde(rename = "lastTradePrice", default, deserialize_with = "de_string_f64_opt")]
    pub last_trade_price: Option<f64>,

    #[serde(rename = "oneHourPriceChange", default, deserialize_with = "de_string_f64_opt")]
    pub one_hour_price_change: Option<f64>,
    #[serde(rename = "oneDayPriceChange", default, deserialize_with = "de_string_f64_opt")]
    pub one_day_price_change: Option<f64>,
    #[serde(rename = "oneWeekPriceChange", default, deserialize_with = "de_string_f64_opt")]
    pub one_week_price_change: Option<f64>,
    #[serde(rename = "oneMonthPriceChange", default, deserialize_with = "de_string_f64_opt")]
    pub one_month_price_change: Option<f64>,
    #[serde(rename = "oneYearPriceChange", default, deserialize_with = "de_string_f64_opt")]
    pub one_year_price_change: Option<f64>,

    #[serde(rename = "volumeNum", default, alias = "volume", deserialize_with = "de_string_f64_opt")]
    pub volume: Option<f64>,
    #[serde(rename = "volume24hr", default, deserialize_with = "de_string_f64_opt")]
    pub volume_24h: Option<f64>,
    #[serde(rename = "volume1wk", default, deserialize_with = "de_string_f64_opt")]
    pub volume_1wk: Option<f64>,
    #[serde(rename = "volume1mo", default, deserialize_with = "de_string_f64_opt")]
    pub volume_1mo: Option<f64>,
    #[serde(rename = "volume1yr", default, deserialize_with = "de_string_f64_opt")]
    pub volume_1yr: Option<f64>,
    #[serde(rename = "volume24hrAmm", default, deserialize_with = "de_string_f64_opt")]
    pub volume_24h_amm: Option<f64>,
    #[serde(rename = "volume24hrClob", default, deserialize_with = "de_string_f64_opt")]
    pub volume_24h_clob: Option<f64>,

    #[serde(rename = "liquidityNum", default, alias = "liquidity", deserialize_with = "de_string_f64_opt")]
    pub liquidity: Option<f64>,
    #[serde(rename = "liquidityAmm", default, deserialize_with = "de_string_f64_opt")]
    pub liquidity_amm: Option<f64>,
    #[serde(rename = "liquidityClob", default, deserialize_with = "de_string_f64_opt")]
    pub liquidity_clob: Option<f64>,

    #[serde(default, deserialize_with = "de_string_f64_opt")]
    pub competitive: Option<f64>,
    #[serde(rename = "commentCount", default, deserialize_with = "de_string_i64_opt")]
    pub comment_count: Option<i64>,
}

/// Converted market record: static attributes plus the dynamic snapshot
/// captured at scan time. The storage stage splits this into a market row
/// and an append-only price snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub category: Option<String>,
    pub outcomes: Vec<String>,
    pub clob_token_ids: Vec<String>,
    pub end_date: Option<String>,
    pub start_date: Option<String>,

    pub active: bool,
    pub closed: bool,
    pub restricted: bool,
    pub enable_order_book: bool,
    pub approved: bool,
    pub ready: bool,
    pub funded: bool,
    pub featured: bool,
    pub is_new: bool,
    pub neg_risk: bool,

    pub order_min_size: Option<f64>,
    pub order_price_min_tick_size: Option<f64>,
    pub accepting_orders: bool,
    pub accepting_orders_timestamp: Option<String>,

    pub uma_bond: Option<f64>,
    pub uma_reward: Option<f64>,
    pub resolved_by: Option<String>,
    pub resolution_source: Option<String>,
    pub submitted_by: Option<String>,

    pub group_item_title: Option<String>,
    pub group_item_threshold: Option<f64>,
    pub custom_liveness: Option<i64>,
    pub image: Option<String>,

    pub outcome_prices: Vec<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub last_trade_price: Option<f64>,
    pub one_hour_price_change: Option<f64>,
    pub one_day_price_change: Option<f64>,
    pub one_week_price_change: Option<f64>,
    pub one_month_price_change: Option<f64>,
    pub one_year_price_change: Option<f64>,
    pub volume: Option<f64>,
    pub volume_24h: Option<f64>,
    pub volume_1wk: Option<f64>,
    pub volume_1mo: Option<f64>,
    pub volume_1yr: Option<f64>,
    pub volume_24h_amm: Option<f64>,
    pub volume_24h_clob: Option<f64>,
    pub liquidity: Option<f64>,
    pub liquidity_amm: Option<f64>,
    pub liquidity_clob: Option<f64>,
    pub competitive: Option<f64>,
    pub comment_count: Option<i64>,
}

impl TryFrom<RawMarket> for MarketData {
    type Error = EngineError;

    fn try_from(raw: RawMarket) -> Result<Self, Self::Error> {
        let condition_id = raw
            .condition_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::DomainReject("missing conditionId".into()))?;

        let enable_order_book = raw.enable_order_book.unwrap_or(false);
        if enable_order_book
            && !raw.clob_token_ids.is_empty()
            && raw.outcomes.len() != raw.clob_token_ids.len()
        {
            return Err(EngineError::DomainReject(format!(
                "outcome/token length mismatch for {}: {} outcomes vs {} tokens",
                condition_id,
                raw.outcomes.len(),
                raw.clob_token_ids.len()
            )));
        }

        Ok(MarketData {
            condition_id,
            question: raw.question.unwrap_or_default(),
            slug: raw.slug.unwrap_or_default(),
            category: raw.category,
            outcomes: raw.outcomes,
            clob_token_ids: raw.clob_token_ids,
            end_date: raw.end_date,
            start_date: raw.start_date,
            active: raw.active.unwrap_or(false),
            closed: raw.closed.unwrap_or(false),
            restricted: raw.restricted.unwrap_or(false),
            enable_order_book,
            approved: raw.approved.unwrap_or(false),
            ready: raw.ready.unwrap_or(false),
            funded: raw.funded.unwrap_or(false),
            featured: raw.featured.unwrap_or(false),
            is_new: raw.is_new.unwrap_or(false),
            neg_risk: raw.neg_risk.unwrap_or(false),
            order_min_size: raw.order_min_size,
            order_price_min_tick_size: raw.order_price_min_tick_size,
            accepting_orders: raw.accepting_orders.unwrap_or(false),
            accepting_orders_timestamp: raw.accepting_orders_timestamp,
            uma_bond: raw.uma_bond,
            uma_reward: raw.uma_reward,
            resolved_by: raw.resolved_by,
            resolution_source: raw.resolution_source,
            submitted_by: raw.submitted_by,
            group_item_title: raw.group_item_title,
            group_item_threshold: raw.group_item_threshold,
            custom_liveness: raw.custom_liveness,
            image: raw.image,
            outcome_prices: raw.outcome_prices,
            best_bid: raw.best_bid,
            best_ask: raw.best_ask,
            spread: raw.spread,
            last_trade_price: raw.last_trade_price,
            one_hour_price_change: raw.one_hour_price_change,
            one_day_price_change: raw.one_day_price_change,
            one_week_price_change: raw.one_week_price_change,
            one_month_price_change: raw.one_month_price_change,
            one_year_price_change: raw.one_year_price_change,
            volume: raw.volume,
            volume_24h: raw.volume_24h,
            volume_1wk: raw.volume_1wk,
            volume_1mo: raw.volume_1mo,
            volume_1yr: raw.volume_1yr,
            volume_24h_amm: raw.volume_24h_amm,
            volume_24h_clob: raw.volume_24h_clob,
            liquidity: raw.liquidity,
            liquidity_amm: raw.liquidity_amm,
            liquidity_clob: raw.liquidity_clob,
            competitive: raw.competitive,
            comment_count: raw.comment_count,
        })
    }
}

impl MarketData {
    /// True when the market has an order book with aligned outcome/token
    /// lists. Markets without this are skipped by every strategy.
    pub fn has_order_book(&self) -> bool {
        self.enable_order_book
            && !self.outcomes.is_empty()
            && self.outcomes.len() == self.clob_token_ids.len()
    }

    /// Outcome prices aligned with `outcomes`, or None when the feed did not
    /// deliver a full aligned vector.
    pub fn aligned_prices(&self) -> Option<&[f64]> {
        if !self.outcomes.is_empty() && self.outcome_prices.len() == self.outcomes.len() {
            Some(&self.outcome_prices)
        } else {
            None
        }
    }

    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity.unwrap_or(0.0)
    }

    pub fn volume_24h_usd(&self) -> f64 {
        self.volume_24h.unwrap_or(0.0)
    }

    /// Mid price from the feed's best bid/ask, when both sides are known.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) if b > 0.0 || a > 0.0 => Some((b + a) / 2.0),
            _ => None,
        }
    }
}

/// Precise per-token price record produced by the price stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPrice {
    pub condition_id: String,
    pub token_id: String,
    pub outcome: String,
    pub outcome_index: usize,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
    pub mid_price: Option<f64>,
    pub spread: Option<f64>,
    pub spread_pct: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketPrice {
    /// Build a record, deriving mid/spread only when both sides are known.
    pub fn new(
        condition_id: impl Into<String>,
        token_id: impl Into<String>,
        outcome: impl Into<String>,
        outcome_index: usize,
        buy_price: Option<f64>,
        sell_price: Option<f64>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let (mid_price, spread, spread_pct) = match (buy_price, sell_price) {
            (Some(buy), Some(sell)) => {
                let mid = (buy + sell) / 2.0;
                let spread = sell - buy;
                let pct = if mid != 0.0 {
                    Some(100.0 * spread / mid)
                } else {
                    None
                };
                (Some(mid), Some(spread), pct)
            }
            _ => (None, None, None),
        };
        Self {
            condition_id: condition_id.into(),
            token_id: token_id.into(),
            outcome: outcome.into(),
            outcome_index,
            buy_price,
            sell_price,
            mid_price,
            spread,
            spread_pct,
            fetched_at,
        }
    }

    /// A row with both prices absent or any non-finite numeric is dropped
    /// before persistence.
    pub fn is_persistable(&self) -> bool {
        if self.buy_price.is_none() && self.sell_price.is_none() {
            return false;
        }
        [
            self.buy_price,
            self.sell_price,
            self.mid_price,
            self.spread,
            self.spread_pct,
        ]
        .iter()
        .flatten()
        .all(|v| v.is_finite())
    }
}
