//! Filter/config plumbing.
//!
//! One canonical `FilterConfig` projects into the three query surfaces:
//! the dashboard query string, the feed-client listing parameters, and the
//! store query. A parser maps URL query parameters back into the canonical
//! form.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::client::gamma::ListParams;
use crate::store::MarketQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Closed,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Supported sort fields with per-surface names and default directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    Volume,
    Volume24hr,
    Volume1wk,
    Liquidity,
    EndDate,
    OneDayPriceChange,
    UpdatedAt,
    CreatedAt,
}

impl SortOption {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "volume" => Some(Self::Volume),
            "volume_24hr" => Some(Self::Volume24hr),
            "volume_1wk" => Some(Self::Volume1wk),
            "liquidity" => Some(Self::Liquidity),
            "end_date" => Some(Self::EndDate),
            "one_day_price_change" => Some(Self::OneDayPriceChange),
            "updated_at" => Some(Self::UpdatedAt),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }

    pub fn api_field(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Volume24hr => "volume_24hr",
            Self::Volume1wk => "volume_1wk",
            Self::Liquidity => "liquidity",
            Self::EndDate => "end_date",
            Self::OneDayPriceChange => "one_day_price_change",
            Self::UpdatedAt => "updated_at",
            Self::CreatedAt => "created_at",
        }
    }

    /// Field name on the feed's `order` parameter.
    pub fn feed_field(&self) -> &'static str {
        match self {
            Self::Volume => "volumeNum",
            Self::Volume24hr => "volume24hr",
            Self::Volume1wk => "volume1wk",
            Self::Liquidity => "liquidityNum",
            Self::EndDate => "endDate",
            Self::OneDayPriceChange => "oneDayPriceChange",
            Self::UpdatedAt => "updatedAt",
            Self::CreatedAt => "createdAt",
        }
    }

    /// Normalized store column.
    pub fn store_field(&self) -> &'static str {
        match self {
            Self::Volume => "last_volume",
            Self::Volume24hr => "last_volume_24h",
            Self::Volume1wk => "last_volume_1wk",
            Self::Liquidity => "last_liquidity",
            Self::EndDate => "end_date",
            Self::OneDayPriceChange => "last_one_day_price_change",
            Self::UpdatedAt => "updated_at",
            Self::CreatedAt => "created_at",
        }
    }

    /// End date sorts soonest-first by default; everything else largest-first.
    pub fn default_direction(&self) -> SortDirection {
        match self {
            Self::EndDate => SortDirection::Asc,
            _ => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub search: Option<String>,
    pub status: MarketStatus,
    pub category: Option<String>,
    pub sort_by: SortOption,
    /// Explicit direction; None means the sort option's default.
    pub sort_dir: Option<SortDirection>,
    pub liquidity_min: Option<f64>,
    pub liquidity_max: Option<f64>,
    pub volume_min: Option<f64>,
    pub volume_max: Option<f64>,
    pub start_date_min: Option<String>,
    pub start_date_max: Option<String>,
    pub end_date_min: Option<String>,
    pub end_date_max: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            search: None,
            status: MarketStatus::Active,
            category: None,
            sort_by: SortOption::Volume,
            sort_dir: None,
            liquidity_min: None,
            liquidity_max: None,
            volume_min: None,
            volume_max: None,
            start_date_min: None,
            start_date_max: None,
            end_date_min: None,
            end_date_max: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl FilterConfig {
    pub fn sort_direction(&self) -> SortDirection {
        self.sort_dir.unwrap_or_else(|| self.sort_by.default_direction())
    }

    /// Dashboard API query string map.
    pub fn to_query_map(&self) -> Vec<(String, String)> {
        let mut q: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                q.push((k.to_string(), v));
            }
        };
        push("search", self.search.clone());
        push(
            "status",
            Some(
                match self.status {
                    MarketStatus::Active => "active",
                    MarketStatus::Closed => "closed",
                    MarketStatus::All => "all",
                }
                .to_string(),
            ),
        );
        push("category", self.category.clone());
        push("sort_by", Some(self.sort_by.api_field().to_string()));
        push(
            "sort_dir",
            Some(
                match self.sort_direction() {
                    SortDirection::Asc => "asc",
                    SortDirection::Desc => "desc",
                }
                .to_string(),
            ),
        );
        push("liquidity_min", self.liquidity_min.map(|v| v.to_string()));
        push("liquidity_max", self.liquidity_max.map(|v| v.to_string()));
        push("volume_min", self.volume_min.map(|v| v.to_string()));
        push("volume_max", self.volume_max.map(|v| v.to_string()));
        push("start_date_min", self.start_date_min.clone());
        push("start_date_max", self.start_date_max.clone());
        push("end_date_min", self.end_date_min.clone());
        push("end_date_max", self.end_date_max.clone());
        push("limit", Some(self.limit.to_string()));
        push("offset", Some(self.offset.to_string()));
        q
    }

    /// Feed-client listing parameters. `closed` is the inversion of the
    /// active status; `all` passes neither flag.
    pub fn to_feed_params(&self) -> ListParams {
        let (active, closed) = match self.status {
            MarketStatus::Active => (Some(true), Some(false)),
            MarketStatus::Closed => (Some(false), Some(true)),
            MarketStatus::All => (None, None),
        };
        ListParams {
            active,
            closed,
            limit: Some(self.limit),
            offset: Some(self.offset),
            order: Some(self.sort_by.feed_field().to_string()),
            ascending: Some(self.sort_direction() == SortDirection::Asc),
            tag_id: None,
            related_tags: None,
            liquidity_num_min: self.liquidity_min,
            liquidity_num_max: self.liquidity_max,
            volume_num_min: self.volume_min,
            volume_num_max: self.volume_max,
            end_date_min: self.end_date_min.clone(),
            end_date_max: self.end_date_max.clone(),
            start_date_min: self.start_date_min.clone(),
            start_date_max: self.start_date_max.clone(),
        }
    }

    /// Store query with normalized column names.
    pub fn to_store_query(&self) -> MarketQuery {
        MarketQuery {
            limit: self.limit,
            offset: self.offset,
            order_by: self.sort_by.store_field().to_string(),
            order_desc: self.sort_direction() == SortDirection::Desc,
            active: match self.status {
                MarketStatus::Active => Some(true),
                MarketStatus::Closed => Some(false),
                MarketStatus::All => None,
            },
            category: self.category.clone(),
            search: self.search.clone(),
            liquidity_min: self.liquidity_min,
            liquidity_max: self.liquidity_max,
            volume_min: self.volume_min,
            volume_max: self.volume_max,
            end_date_min: self.end_date_min.clone(),
            end_date_max: self.end_date_max.clone(),
            start_date_min: self.start_date_min.clone(),
            start_date_max: self.start_date_max.clone(),
        }
    }

    /// Parse URL query parameters back into the canonical form. Unknown
    /// keys and unparseable values fall back to defaults.
    pub fn from_query_map(map: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        if let Some(s) = map.get("search") {
            if !s.is_empty() {
                config.search = Some(s.clone());
            }
        }
        if let Some(status) = map.get("status") {
            config.status = match status.as_str() {
                "closed" => MarketStatus::Closed,
                "all" => MarketStatus::All,
                _ => MarketStatus::Active,
            };
        }
        if let Some(c) = map.get("category") {
            if !c.is_empty() {
                config.category = Some(c.clone());
            }
        }
        if let Some(sort) = map.get("sort_by").and_then(|s| SortOption::parse(s)) {
            config.sort_by = sort;
        }
        if let Some(dir) = map.get("sort_dir") {
            config.sort_dir = match dir.as_str() {
                "asc" => Some(SortDirection::Asc),
                "desc" => Some(SortDirection::Desc),
                _ => None,
            };
        }
        let f64_of = |key: &str| map.get(key).and_then(|v| v.parse::<f64>().ok());
        config.liquidity_min = f64_of("liquidity_min");
        config.liquidity_max = f64_of("liquidity_max");
        config.volume_min = f64_of("volume_min");
        config.volume_max = f64_of("volume_max");
        config.start_date_min = map.get("start_date_min").cloned();
        config.start_date_max = map.get("start_date_max").cloned();
        config.end_date_min = map.get("end_date_min").cloned();
        config.end_date_max = map.get("end_date_max").cloned();
        if let Some(limit) = map.get("limit").and_then(|v| v.parse::<u32>().ok()) {
            config.limit = limit.clamp(1, 500);
        }
        if let Some(offset) = map.get("offset").and_then(|v| v.parse::<u32>().ok()) {
            config.offset = offset;
        }
        config
    }
}
