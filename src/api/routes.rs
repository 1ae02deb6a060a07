//! Control-surface handlers.
//!
//! Every response carries the `{success, data|error}` envelope so the
//! dashboard can render failures uniformly.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::AppState;
use crate::filters::FilterConfig;
use crate::strategy::config::StrategyKind;

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn err(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "error": message.into() }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    ok(json!({
        "status": "ok",
        "signing_enabled": state.engine.clob.signing_enabled(),
    }))
}

pub async fn queues_status(State(state): State<AppState>) -> Json<Value> {
    ok(state.engine.queues_status())
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
}

/// `start | stop | pause | resume` on the scan queue.
pub async fn queues_control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Json<Value> {
    let scan = &state.engine.scan;
    match request.action.as_str() {
        "start" => scan.start(),
        "stop" => scan.stop(),
        "pause" => scan.pause(),
        "resume" => scan.resume(),
        other => return err(format!("unknown action: {}", other)),
    }
    info!(action = %request.action, "scan queue control");
    ok(json!({ "state": scan.state() }))
}

/// `start | stop` on the price stage.
pub async fn price_control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Json<Value> {
    let price = &state.engine.price;
    match request.action.as_str() {
        "start" => price.start(),
        "stop" => price.stop(),
        other => return err(format!("unknown action: {}", other)),
    }
    info!(action = %request.action, "price stage control");
    ok(json!({ "state": price.state() }))
}

pub async fn get_strategies_config(State(state): State<AppState>) -> Json<Value> {
    let config = state.engine.config.get();
    match serde_json::to_value(&config) {
        Ok(mut value) => {
            value["emergency_stop"] = json!(state.engine.config.is_emergency_stopped());
            ok(value)
        }
        Err(e) => err(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct StrategyConfigUpdate {
    pub strategy: String,
    pub config: Value,
}

pub async fn update_strategy_config(
    State(state): State<AppState>,
    Json(request): Json<StrategyConfigUpdate>,
) -> Json<Value> {
    let manager = &state.engine.config;
    match request.strategy.as_str() {
        "global" => match manager.update(&json!({ "global": request.config })) {
            Ok(updated) => ok(serde_json::to_value(updated).unwrap_or(Value::Null)),
            Err(e) => err(e.to_string()),
        },
        "emergency_stop" => {
            let engage = request.config.as_bool().unwrap_or(true);
            if engage {
                manager.emergency_stop();
            } else {
                manager.clear_emergency_stop();
            }
            ok(json!({ "emergency_stop": engage }))
        }
        name => match StrategyKind::parse(name) {
            Some(kind) => match manager.update_strategy(kind, &request.config) {
                Ok(updated) => ok(serde_json::to_value(updated).unwrap_or(Value::Null)),
                Err(e) => err(e.to_string()),
            },
            None => err(format!("unknown strategy: {}", name)),
        },
    }
}

pub async fn strategies_status(State(state): State<AppState>) -> Json<Value> {
    let engine = &state.engine;
    ok(json!({
        "mint_split": engine.mint_split.day_stats(),
        "arbitrage_long": engine.arb_long.day_stats(),
        "market_making": {
            "today": engine.market_making.day_stats(),
            "active_markets": engine.market_making.active_market_count(),
        },
        "dispatcher": engine.dispatcher.stats(),
        "daily": engine.config.get_daily_stats(),
    }))
}

/// Stored-market listing for the dashboard, driven by the canonical
/// filter config parsed from the query string.
pub async fn list_markets(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let filter = FilterConfig::from_query_map(&params);
    let query = filter.to_store_query();
    let store = state.engine.store.clone();
    let page = tokio::task::spawn_blocking(move || store.get_markets(&query)).await;
    match page {
        Ok(Ok(page)) => ok(json!({ "markets": page.markets, "total": page.total })),
        Ok(Err(e)) => err(e.to_string()),
        Err(e) => err(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

pub async fn recent_request_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Json<Value> {
    let records = state
        .engine
        .request_log
        .recent(query.limit.unwrap_or(100).min(1_000));
    ok(json!({ "records": records }))
}
