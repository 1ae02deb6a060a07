//! Market feed client.
//!
//! Thin typed wrapper over [`ClientCore`] for the static feed endpoints:
//! paginated market listings, single-market lookups, events, and a
//! page-local case-insensitive search.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::client::core::{ApiRequest, ApiResponse, ClientConfig, ClientCore, RateLimitConfig};
use crate::client::log_sink::LogSink;
use crate::errors::EngineResult;
use crate::models::RawMarket;

/// Inter-page delay during full crawls.
const PAGE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Recognized listing parameters, serialized snake_case on the wire.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order: Option<String>,
    pub ascending: Option<bool>,
    pub tag_id: Option<u64>,
    pub related_tags: Option<bool>,
    pub liquidity_num_min: Option<f64>,
    pub liquidity_num_max: Option<f64>,
    pub volume_num_min: Option<f64>,
    pub volume_num_max: Option<f64>,
    pub end_date_min: Option<String>,
    pub end_date_max: Option<String>,
    pub start_date_min: Option<String>,
    pub start_date_max: Option<String>,
}

impl ListParams {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut q: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                q.push((k.to_string(), v));
            }
        };
        push("active", self.active.map(|v| v.to_string()));
        push("closed", self.closed.map(|v| v.to_string()));
        push("limit", self.limit.map(|v| v.to_string()));
        push("offset", self.offset.map(|v| v.to_string()));
        push("order", self.order.clone());
        push("ascending", self.ascending.map(|v| v.to_string()));
        push("tag_id", self.tag_id.map(|v| v.to_string()));
        push("related_tags", self.related_tags.map(|v| v.to_string()));
        push(
            "liquidity_num_min",
            self.liquidity_num_min.map(|v| v.to_string()),
        );
        push(
            "liquidity_num_max",
            self.liquidity_num_max.map(|v| v.to_string()),
        );
        push("volume_num_min", self.volume_num_min.map(|v| v.to_string()));
        push("volume_num_max", self.volume_num_max.map(|v| v.to_string()));
        push("end_date_min", self.end_date_min.clone());
        push("end_date_max", self.end_date_max.clone());
        push("start_date_min", self.start_date_min.clone());
        push("start_date_max", self.start_date_max.clone());
        q
    }
}

/// Event grouping returned by the feed; markets ride along inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub markets: Vec<RawMarket>,
}

pub struct GammaClient {
    core: ClientCore,
}

impl GammaClient {
    pub fn new(base_url: impl Into<String>, sink: Arc<dyn LogSink>) -> EngineResult<Self> {
        let mut config = ClientConfig::new(base_url);
        config.timeout = Duration::from_secs(15);
        // Venue allows 750 requests per 10s on this surface; stay well under.
        config.rate_limit = RateLimitConfig {
            max_requests: 75,
            window_ms: 10_000,
        };
        Ok(Self {
            core: ClientCore::new("gamma", config, sink)?,
        })
    }

    /// One listing page.
    pub async fn get_markets(&self, params: &ListParams) -> ApiResponse<Vec<RawMarket>> {
        self.core
            .request(ApiRequest::get("/markets").with_params(params.to_query()))
            .await
    }

    /// Crawl listing pages until a short page or `max_pages`, invoking
    /// `on_page` per page. A ~100 ms pause separates pages.
    pub async fn get_all_markets<F>(
        &self,
        params: &ListParams,
        max_pages: u32,
        mut on_page: F,
    ) -> EngineResult<Vec<RawMarket>>
    where
        F: FnMut(&[RawMarket]),
    {
        let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let mut all = Vec::new();
        for page in 1..=max_pages.max(1) {
            let mut page_params = params.clone();
            page_params.limit = Some(limit);
            page_params.offset = Some((page - 1) * limit);

            let response = self.get_markets(&page_params).await;
            let markets = response.into_result()?;
            let count = markets.len();
            debug!(page, count, "fetched markets page");
            on_page(&markets);
            all.extend(markets);

            if count < limit as usize {
                break;
            }
            sleep(PAGE_DELAY).await;
        }
        info!(total = all.len(), "market crawl complete");
        Ok(all)
    }

    pub async fn get_market(&self, condition_id: &str) -> EngineResult<RawMarket> {
        self.core
            .request(ApiRequest::get(format!("/markets/{}", condition_id)))
            .await
            .into_result()
    }

    pub async fn get_market_by_slug(&self, slug: &str) -> EngineResult<Option<RawMarket>> {
        let params = vec![
            ("slug".to_string(), slug.to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        let markets: Vec<RawMarket> = self
            .core
            .request(ApiRequest::get("/markets").with_params(params))
            .await
            .into_result()?;
        Ok(markets.into_iter().next())
    }

    pub async fn get_events(&self, params: &ListParams) -> ApiResponse<Vec<RawEvent>> {
        self.core
            .request(ApiRequest::get("/events").with_params(params.to_query()))
            .await
    }

    pub async fn get_event(&self, event_id: &str) -> EngineResult<RawEvent> {
        self.core
            .request(ApiRequest::get(format!("/events/{}", event_id)))
            .await
            .into_result()
    }

    pub async fn get_event_markets(&self, event_id: &str) -> EngineResult<Vec<RawMarket>> {
        Ok(self.get_event(event_id).await?.markets)
    }

    /// Fetch a single page and filter it locally, case-insensitively, on
    /// question / slug / category.
    pub async fn search_markets(
        &self,
        query: &str,
        limit: Option<u32>,
        active: Option<bool>,
    ) -> EngineResult<Vec<RawMarket>> {
        let params = ListParams {
            active,
            limit: Some(limit.unwrap_or(DEFAULT_PAGE_LIMIT)),
            ..Default::default()
        };
        let page = self.get_markets(&params).await.into_result()?;
        Ok(filter_markets_by_query(page, query))
    }
}

pub(crate) fn filter_markets_by_query(markets: Vec<RawMarket>, query: &str) -> Vec<RawMarket> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return markets;
    }
    markets
        .into_iter()
        .filter(|m| {
            [&m.question, &m.slug, &m.category]
                .iter()
                .any(|field| {
                    field
                        .as_deref()
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
        })
        .collect()
}
