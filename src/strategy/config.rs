//! Strategy configuration manager.
//!
//! In-memory authoritative store for the three strategy configs, the global
//! limits, the emergency stop, and the per-day volume ledger. All reads and
//! writes go through one lock; change listeners are notified outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    MintSplit,
    ArbitrageLong,
    MarketMaking,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::MintSplit => "mint_split",
            StrategyKind::ArbitrageLong => "arbitrage_long",
            StrategyKind::MarketMaking => "market_making",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mint_split" => Some(StrategyKind::MintSplit),
            "arbitrage_long" => Some(StrategyKind::ArbitrageLong),
            "market_making" => Some(StrategyKind::MarketMaking),
            _ => None,
        }
    }

    pub fn all() -> [StrategyKind; 3] {
        [
            StrategyKind::MintSplit,
            StrategyKind::ArbitrageLong,
            StrategyKind::MarketMaking,
        ]
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub enabled: bool,
    pub max_daily_volume: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_volume: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintSplitConfig {
    pub enabled: bool,
    pub auto_execute: bool,
    pub min_price_sum: f64,
    pub min_outcomes: usize,
    pub min_liquidity: f64,
    pub mint_amount: f64,
    pub min_profit: f64,
    pub max_slippage: f64,
    pub cooldown_ms: u64,
    pub max_mint_per_trade: f64,
    pub max_mint_per_day: f64,
}

impl Default for MintSplitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute: false,
            min_price_sum: 1.01,
            min_outcomes: 2,
            min_liquidity: 100.0,
            mint_amount: 100.0,
            min_profit: 0.01,
            max_slippage: 1.0,
            cooldown_ms: 60_000,
            max_mint_per_trade: 500.0,
            max_mint_per_day: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbLongLegConfig {
    pub enabled: bool,
    pub max_price_sum: f64,
    /// Minimum spread in percentage points: `(1 - price_sum) * 100`.
    pub min_spread: f64,
}

impl Default for ArbLongLegConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_price_sum: 0.99,
            min_spread: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageLongConfig {
    pub enabled: bool,
    pub auto_execute: bool,
    pub long: ArbLongLegConfig,
    pub trade_amount: f64,
    pub max_slippage: f64,
    pub cooldown_ms: u64,
    pub min_liquidity: f64,
    pub max_trade_per_order: f64,
    pub max_trade_per_day: f64,
}

impl Default for ArbitrageLongConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute: false,
            long: ArbLongLegConfig::default(),
            trade_amount: 100.0,
            max_slippage: 1.0,
            cooldown_ms: 60_000,
            min_liquidity: 100.0,
            max_trade_per_order: 500.0,
            max_trade_per_day: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMakingConfig {
    pub enabled: bool,
    pub auto_execute: bool,
    /// Full quoted spread in percentage points of price.
    pub spread_percent: f64,
    pub order_size: f64,
    pub max_position_per_side: f64,
    pub refresh_interval_ms: u64,
    pub min_volume_24h: f64,
    pub min_trades_per_minute: f64,
    /// Seconds since last trade beyond which a market is considered stale.
    pub max_last_trade_age: u64,
    pub min_market_spread: f64,
    pub max_market_spread: f64,
    pub max_volatility: f64,
    pub price_range_min: f64,
    pub price_range_max: f64,
    pub min_days_until_end: f64,
    pub min_liquidity: f64,
    pub min_order_book_depth: usize,
    pub min_depth_amount: f64,
    pub min_order_size: f64,
    pub estimated_fee_rate: f64,
    pub enable_competition_detection: bool,
    pub max_order_refresh_rate: u32,
    pub max_front_run_count: u32,
    pub skew_threshold: f64,
    pub max_open_position: f64,
    pub auto_merge: bool,
    pub merge_threshold: f64,
    pub max_daily_loss: f64,
    pub cooldown_ms: u64,
}

impl Default for MarketMakingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_execute: false,
            spread_percent: 2.0,
            order_size: 50.0,
            max_position_per_side: 100.0,
            refresh_interval_ms: 30_000,
            min_volume_24h: 1_000.0,
            min_trades_per_minute: 0.5,
            max_last_trade_age: 3_600,
            min_market_spread: 0.5,
            max_market_spread: 10.0,
            max_volatility: 5.0,
            price_range_min: 0.10,
            price_range_max: 0.90,
            min_days_until_end: 1.0,
            min_liquidity: 500.0,
            min_order_book_depth: 3,
            min_depth_amount: 100.0,
            min_order_size: 5.0,
            estimated_fee_rate: 0.015,
            enable_competition_detection: false,
            max_order_refresh_rate: 10,
            max_front_run_count: 3,
            skew_threshold: 0.3,
            max_open_position: 200.0,
            auto_merge: true,
            merge_threshold: 10.0,
            max_daily_loss: 100.0,
            cooldown_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub global: GlobalConfig,
    pub mint_split: MintSplitConfig,
    pub arbitrage_long: ArbitrageLongConfig,
    pub market_making: MarketMakingConfig,
}

impl StrategyConfig {
    fn per_order_cap(&self, kind: StrategyKind) -> f64 {
        match kind {
            StrategyKind::MintSplit => self.mint_split.max_mint_per_trade,
            StrategyKind::ArbitrageLong => self.arbitrage_long.max_trade_per_order,
            StrategyKind::MarketMaking => self.market_making.order_size,
        }
    }

    fn per_day_cap(&self, kind: StrategyKind) -> f64 {
        match kind {
            StrategyKind::MintSplit => self.mint_split.max_mint_per_day,
            StrategyKind::ArbitrageLong => self.arbitrage_long.max_trade_per_day,
            StrategyKind::MarketMaking => self.market_making.max_open_position,
        }
    }

    fn strategy_enabled(&self, kind: StrategyKind) -> bool {
        match kind {
            StrategyKind::MintSplit => self.mint_split.enabled,
            StrategyKind::ArbitrageLong => self.arbitrage_long.enabled,
            StrategyKind::MarketMaking => self.market_making.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyLedger {
    date: String,
    volumes: HashMap<StrategyKind, f64>,
}

impl DailyLedger {
    fn new(date: String) -> Self {
        Self {
            date,
            volumes: HashMap::new(),
        }
    }

    fn total(&self) -> f64 {
        self.volumes.values().sum()
    }

    fn volume(&self, kind: StrategyKind) -> f64 {
        self.volumes.get(&kind).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub total_volume: f64,
    pub remaining_global: f64,
    pub per_strategy: HashMap<StrategyKind, f64>,
    pub emergency_stop: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeGate {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl TradeGate {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

pub type ConfigListener = Arc<dyn Fn(&StrategyConfig) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Inner {
    config: StrategyConfig,
    emergency_stop: bool,
    ledger: DailyLedger,
}

pub struct StrategyConfigManager {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(u64, ConfigListener)>>,
    next_listener_id: AtomicU64,
}

impl Default for StrategyConfigManager {
    fn default() -> Self {
        Self::new(StrategyConfig::default())
    }
}

impl StrategyConfigManager {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                emergency_stop: false,
                ledger: DailyLedger::new(today_string()),
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn get(&self) -> StrategyConfig {
        self.inner.lock().config.clone()
    }

    pub fn get_strategy(&self, kind: StrategyKind) -> Value {
        let config = self.get();
        match kind {
            StrategyKind::MintSplit => serde_json::to_value(&config.mint_split),
            StrategyKind::ArbitrageLong => serde_json::to_value(&config.arbitrage_long),
            StrategyKind::MarketMaking => serde_json::to_value(&config.market_making),
        }
        .unwrap_or(Value::Null)
    }

    /// Deep-merge a partial JSON document into the current config. A merge
    /// that produces an invalid config is rejected and leaves the current
    /// config in place.
    pub fn update(&self, partial: &Value) -> Result<StrategyConfig> {
        let updated = {
            let mut inner = self.inner.lock();
            let mut doc = serde_json::to_value(&inner.config).context("serialize config")?;
            deep_merge(&mut doc, partial);
            let merged: StrategyConfig =
                serde_json::from_value(doc).context("merged config invalid")?;
            inner.config = merged.clone();
            merged
        };
        info!("strategy config updated");
        self.notify(&updated);
        Ok(updated)
    }

    /// Update one strategy's section.
    pub fn update_strategy(&self, kind: StrategyKind, partial: &Value) -> Result<StrategyConfig> {
        let wrapped = serde_json::json!({ kind.as_str(): partial });
        self.update(&wrapped)
    }

    pub fn reset_to_default(&self) {
        let config = StrategyConfig::default();
        {
            let mut inner = self.inner.lock();
            inner.config = config.clone();
        }
        info!("strategy config reset to defaults");
        self.notify(&config);
    }

    pub fn set_strategy_enabled(&self, kind: StrategyKind, enabled: bool) {
        let updated = {
            let mut inner = self.inner.lock();
            match kind {
                StrategyKind::MintSplit => inner.config.mint_split.enabled = enabled,
                StrategyKind::ArbitrageLong => inner.config.arbitrage_long.enabled = enabled,
                StrategyKind::MarketMaking => inner.config.market_making.enabled = enabled,
            }
            inner.config.clone()
        };
        info!(strategy = %kind, enabled, "strategy toggled");
        self.notify(&updated);
    }

    pub fn emergency_stop(&self) {
        let config = {
            let mut inner = self.inner.lock();
            inner.emergency_stop = true;
            inner.config.clone()
        };
        warn!("EMERGENCY STOP engaged: all trading halted");
        self.notify(&config);
    }

    pub fn clear_emergency_stop(&self) {
        let config = {
            let mut inner = self.inner.lock();
            inner.emergency_stop = false;
            inner.config.clone()
        };
        info!("emergency stop cleared");
        self.notify(&config);
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.inner.lock().emergency_stop
    }

    pub fn can_execute_trade(&self, kind: StrategyKind, amount: f64) -> TradeGate {
        self.can_execute_trade_at(kind, amount, &today_string())
    }

    pub(crate) fn can_execute_trade_at(
        &self,
        kind: StrategyKind,
        amount: f64,
        today: &str,
    ) -> TradeGate {
        let mut inner = self.inner.lock();
        rollover_if_new_day(&mut inner.ledger, today);

        if inner.emergency_stop {
            return TradeGate::deny("emergency stop engaged");
        }
        if !inner.config.global.enabled {
            return TradeGate::deny("trading globally disabled");
        }
        let global_cap = inner.config.global.max_daily_volume;
        if inner.ledger.total() + amount > global_cap {
            return TradeGate::deny(format!(
                "global daily volume limit reached (${:.0})",
                global_cap
            ));
        }
        if !inner.config.strategy_enabled(kind) {
            return TradeGate::deny(format!("{} disabled", kind));
        }
        let order_cap = inner.config.per_order_cap(kind);
        if amount > order_cap {
            return TradeGate::deny(format!(
                "order of ${:.2} exceeds {} per-order limit (${:.0})",
                amount, kind, order_cap
            ));
        }
        let day_cap = inner.config.per_day_cap(kind);
        if inner.ledger.volume(kind) + amount > day_cap {
            return TradeGate::deny(format!("{} daily limit reached (${:.0})", kind, day_cap));
        }
        TradeGate::allow()
    }

    pub fn record_trade_volume(&self, kind: StrategyKind, amount: f64) {
        self.record_trade_volume_at(kind, amount, &today_string());
    }

    pub(crate) fn record_trade_volume_at(&self, kind: StrategyKind, amount: f64, today: &str) {
        let config = {
            let mut inner = self.inner.lock();
            rollover_if_new_day(&mut inner.ledger, today);
            *inner.ledger.volumes.entry(kind).or_insert(0.0) += amount;
            inner.config.clone()
        };
        self.notify(&config);
    }

    pub fn get_daily_stats(&self) -> DailyStats {
        self.daily_stats_at(&today_string())
    }

    pub(crate) fn daily_stats_at(&self, today: &str) -> DailyStats {
        let mut inner = self.inner.lock();
        rollover_if_new_day(&mut inner.ledger, today);
        let total = inner.ledger.total();
        DailyStats {
            date: inner.ledger.date.clone(),
            total_volume: total,
            remaining_global: (inner.config.global.max_daily_volume - total).max(0.0),
            per_strategy: inner.ledger.volumes.clone(),
            emergency_stop: inner.emergency_stop,
        }
    }

    pub fn on_config_change(&self, listener: ConfigListener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        ListenerId(id)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id.0);
    }

    pub fn export_config(&self) -> String {
        serde_json::to_string_pretty(&self.get()).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn import_config(&self, json: &str) -> Result<StrategyConfig> {
        let config: StrategyConfig = serde_json::from_str(json).context("parse config json")?;
        if config.global.max_daily_volume <= 0.0 {
            bail!("max_daily_volume must be positive");
        }
        {
            let mut inner = self.inner.lock();
            inner.config = config.clone();
        }
        info!("strategy config imported");
        self.notify(&config);
        Ok(config)
    }

    fn notify(&self, config: &StrategyConfig) {
        let listeners: Vec<ConfigListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(config);
        }
    }

}

fn rollover_if_new_day(ledger: &mut DailyLedger, today: &str) {
    if ledger.date != today {
        *ledger = DailyLedger::new(today.to_string());
    }
}

fn today_string() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Recursive JSON merge: objects merge key-wise, everything else replaces.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn deep_merge_preserves_siblings() {
        let manager = StrategyConfigManager::default();
        let before = manager.get();
        let updated = manager
            .update(&serde_json::json!({
                "mint_split": { "min_price_sum": 1.005, "mint_amount": 250.0 }
            }))
            .unwrap();
        assert_eq!(updated.mint_split.min_price_sum, 1.005);
        assert_eq!(updated.mint_split.mint_amount, 250.0);
        // Untouched siblings survive the merge.
        assert_eq!(updated.mint_split.cooldown_ms, before.mint_split.cooldown_ms);
        assert_eq!(
            updated.arbitrage_long.trade_amount,
            before.arbitrage_long.trade_amount
        );
    }

    #[test]
    fn invalid_merge_is_rejected() {
        let manager = StrategyConfigManager::default();
        let result = manager.update(&serde_json::json!({
            "mint_split": { "min_outcomes": "three" }
        }));
        assert!(result.is_err());
        // Config untouched.
        assert_eq!(manager.get().mint_split.min_outcomes, 2);
    }

    #[test]
    fn trade_gates_in_order() {
        let manager = StrategyConfigManager::default();
        manager
            .update(&serde_json::json!({
                "global": { "max_daily_volume": 10000.0 },
                "mint_split": { "max_mint_per_trade": 100.0, "max_mint_per_day": 200.0 }
            }))
            .unwrap();

        let today = "2026-08-01";
        assert!(manager
            .can_execute_trade_at(StrategyKind::MintSplit, 100.0, today)
            .allowed);

        // Per-order cap.
        let gate = manager.can_execute_trade_at(StrategyKind::MintSplit, 150.0, today);
        assert!(!gate.allowed);
        assert!(gate.reason.unwrap().contains("per-order limit"));

        // Daily cap after two recorded executions.
        manager.record_trade_volume_at(StrategyKind::MintSplit, 100.0, today);
        manager.record_trade_volume_at(StrategyKind::MintSplit, 100.0, today);
        let gate = manager.can_execute_trade_at(StrategyKind::MintSplit, 100.0, today);
        assert!(!gate.allowed);
        assert!(gate
            .reason
            .unwrap()
            .contains("mint_split daily limit reached ($200)"));

        // Date rollover zeroes the counters.
        let gate = manager.can_execute_trade_at(StrategyKind::MintSplit, 100.0, "2026-08-02");
        assert!(gate.allowed);
        let stats = manager.daily_stats_at("2026-08-02");
        assert_eq!(stats.total_volume, 0.0);
    }

    #[test]
    fn emergency_stop_blocks_everything() {
        let manager = StrategyConfigManager::default();
        manager.emergency_stop();
        let gate = manager.can_execute_trade(StrategyKind::ArbitrageLong, 1.0);
        assert!(!gate.allowed);
        assert!(gate.reason.unwrap().contains("emergency stop"));
        manager.clear_emergency_stop();
        assert!(manager
            .can_execute_trade(StrategyKind::ArbitrageLong, 1.0)
            .allowed);
    }

    #[test]
    fn global_daily_volume_spans_strategies() {
        let manager = StrategyConfigManager::default();
        manager
            .update(&serde_json::json!({
                "global": { "max_daily_volume": 500.0 },
                "mint_split": { "max_mint_per_trade": 400.0, "max_mint_per_day": 1000.0 },
                "arbitrage_long": { "max_trade_per_order": 400.0, "max_trade_per_day": 1000.0 }
            }))
            .unwrap();
        let today = "2026-08-01";
        manager.record_trade_volume_at(StrategyKind::MintSplit, 300.0, today);
        manager.record_trade_volume_at(StrategyKind::ArbitrageLong, 150.0, today);
        let gate = manager.can_execute_trade_at(StrategyKind::ArbitrageLong, 100.0, today);
        assert!(!gate.allowed);
        assert!(gate.reason.unwrap().contains("global daily volume"));
    }

    #[test]
    fn listeners_fire_and_unsubscribe() {
        let manager = StrategyConfigManager::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let id = manager.on_config_change(Arc::new(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));

        manager.set_strategy_enabled(StrategyKind::MintSplit, false);
        manager.record_trade_volume(StrategyKind::MintSplit, 10.0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        manager.unsubscribe(id);
        manager.set_strategy_enabled(StrategyKind::MintSplit, true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn export_import_round_trip() {
        let manager = StrategyConfigManager::default();
        manager
            .update(&serde_json::json!({ "mint_split": { "mint_amount": 321.0 } }))
            .unwrap();
        let exported = manager.export_config();

        let other = StrategyConfigManager::default();
        other.import_config(&exported).unwrap();
        assert_eq!(other.get().mint_split.mint_amount, 321.0);

        assert!(other.import_config("{not json").is_err());
    }
}
