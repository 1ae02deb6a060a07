//! SQLite market store.
//!
//! Three write contracts: market upserts are insert-if-absent (static rows
//! are never rewritten), price snapshots are append-only, and precise price
//! rows are insert-or-ignore on `(condition_id, token_id, fetched_at)`.
//! A small set of denormalized `last_*` columns on `markets` is refreshed
//! when snapshots land, so listing queries can filter and sort on liquidity
//! and volume without joining the snapshot history.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{MarketData, MarketPrice};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA cache_size = -32000;

CREATE TABLE IF NOT EXISTS markets (
    condition_id TEXT PRIMARY KEY,
    question TEXT NOT NULL,
    slug TEXT NOT NULL,
    category TEXT,
    outcomes TEXT NOT NULL,
    clob_token_ids TEXT NOT NULL,
    end_date TEXT,
    start_date TEXT,
    active INTEGER NOT NULL,
    closed INTEGER NOT NULL,
    restricted INTEGER NOT NULL,
    enable_order_book INTEGER NOT NULL,
    approved INTEGER NOT NULL,
    ready INTEGER NOT NULL,
    funded INTEGER NOT NULL,
    featured INTEGER NOT NULL,
    is_new INTEGER NOT NULL,
    neg_risk INTEGER NOT NULL,
    order_min_size REAL,
    order_price_min_tick_size REAL,
    accepting_orders INTEGER NOT NULL,
    accepting_orders_timestamp TEXT,
    uma_bond REAL,
    uma_reward REAL,
    resolved_by TEXT,
    resolution_source TEXT,
    submitted_by TEXT,
    group_item_title TEXT,
    group_item_threshold REAL,
    custom_liveness INTEGER,
    image TEXT,
    last_liquidity REAL,
    last_volume REAL,
    last_volume_24h REAL,
    last_volume_1wk REAL,
    last_one_day_price_change REAL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_markets_active
    ON markets(active, closed, enable_order_book);
CREATE INDEX IF NOT EXISTS idx_markets_liquidity
    ON markets(last_liquidity DESC);
CREATE INDEX IF NOT EXISTS idx_markets_volume
    ON markets(last_volume DESC);

CREATE TABLE IF NOT EXISTS price_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    condition_id TEXT NOT NULL REFERENCES markets(condition_id),
    outcome_prices TEXT,
    best_bid REAL,
    best_ask REAL,
    spread REAL,
    last_trade_price REAL,
    one_hour_price_change REAL,
    one_day_price_change REAL,
    one_week_price_change REAL,
    one_month_price_change REAL,
    one_year_price_change REAL,
    volume REAL,
    volume_24h REAL,
    volume_1wk REAL,
    volume_1mo REAL,
    volume_1yr REAL,
    volume_24h_amm REAL,
    volume_24h_clob REAL,
    liquidity REAL,
    liquidity_amm REAL,
    liquidity_clob REAL,
    competitive REAL,
    comment_count INTEGER,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_condition
    ON price_snapshots(condition_id, recorded_at DESC);

CREATE TABLE IF NOT EXISTS market_prices (
    condition_id TEXT NOT NULL,
    token_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    outcome_index INTEGER NOT NULL,
    buy_price REAL,
    sell_price REAL,
    mid_price REAL,
    spread REAL,
    spread_pct REAL,
    fetched_at INTEGER NOT NULL,
    UNIQUE(condition_id, token_id, fetched_at)
);

CREATE INDEX IF NOT EXISTS idx_market_prices_token
    ON market_prices(token_id, fetched_at DESC);
"#;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UpsertStats {
    pub inserted: usize,
    pub skipped: usize,
}

/// Listing query against the store; field names are normalized store
/// columns, produced by the filter plumbing.
#[derive(Debug, Clone)]
pub struct MarketQuery {
    pub limit: u32,
    pub offset: u32,
    pub order_by: String,
    pub order_desc: bool,
    pub active: Option<bool>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub liquidity_min: Option<f64>,
    pub liquidity_max: Option<f64>,
    pub volume_min: Option<f64>,
    pub volume_max: Option<f64>,
    pub end_date_min: Option<String>,
    pub end_date_max: Option<String>,
    pub start_date_min: Option<String>,
    pub start_date_max: Option<String>,
}

impl Default for MarketQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            order_by: "last_volume".into(),
            order_desc: true,
            active: None,
            category: None,
            search: None,
            liquidity_min: None,
            liquidity_max: None,
            volume_min: None,
            volume_max: None,
            end_date_min: None,
            end_date_max: None,
            start_date_min: None,
            start_date_max: None,
        }
    }
}

/// Market row as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMarket {
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
    pub enable_order_book: bool,
    pub neg_risk: bool,
    pub liquidity: Option<f64>,
    pub volume: Option<f64>,
    pub volume_24h: Option<f64>,
    pub one_day_price_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketPage {
    pub markets: Vec<StoredMarket>,
    pub total: usize,
}

const ORDERABLE_COLUMNS: &[&str] = &[
    "last_volume",
    "last_volume_24h",
    "last_volume_1wk",
    "last_liquidity",
    "last_one_day_price_change",
    "end_date",
    "created_at",
    "updated_at",
];

pub struct MarketStore {
    conn: Arc<Mutex<Connection>>,
}

impl MarketStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).context("open market store")?;
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store")?;
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert-if-absent batch write. Existing rows are left untouched, so
    /// replaying a batch is a no-op for already-known markets.
    pub fn batch_upsert_markets(&self, markets: &[MarketData]) -> Result<UpsertStats> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stats = UpsertStats::default();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO markets (
                    condition_id, question, slug, category, outcomes, clob_token_ids,
                    end_date, start_date, active, closed, restricted, enable_order_book,
                    approved, ready, funded, featured, is_new, neg_risk,
                    order_min_size, order_price_min_tick_size, accepting_orders,
                    accepting_orders_timestamp, uma_bond, uma_reward, resolved_by,
                    resolution_source, submitted_by, group_item_title,
                    group_item_threshold, custom_liveness, image
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                          ?27, ?28, ?29, ?30, ?31)",
            )?;
            for market in markets {
                let changed = stmt.execute(params![
                    market.condition_id,
                    market.question,
                    market.slug,
                    market.category,
                    serde_json::to_string(&market.outcomes)?,
                    serde_json::to_string(&market.clob_token_ids)?,
                    market.end_date,
                    market.start_date,
                    market.active as i64,
                    market.closed as i64,
                    market.restricted as i64,
                    market.enable_order_book as i64,
                    market.approved as i64,
                    market.ready as i64,
                    market.funded as i64,
                    market.featured as i64,
                    market.is_new as i64,
                    market.neg_risk as i64,
                    market.order_min_size,
                    market.order_price_min_tick_size,
                    market.accepting_orders as i64,
                    market.accepting_orders_timestamp,
                    market.uma_bond,
                    market.uma_reward,
                    market.resolved_by,
                    market.resolution_source,
                    market.submitted_by,
                    market.group_item_title,
                    market.group_item_threshold,
                    market.custom_liveness,
                    market.image,
                ])?;
                if changed > 0 {
                    stats.inserted += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }
        tx.commit()?;
        debug!(inserted = stats.inserted, skipped = stats.skipped, "market upsert batch");
        Ok(stats)
    }

    /// Append one snapshot per market and refresh the denormalized `last_*`
    /// columns used by listing queries.
    pub fn batch_record_price_snapshots(
        &self,
        markets: &[MarketData],
        recorded_at: DateTime<Utc>,
    ) -> Result<usize> {
        let ts = recorded_at.timestamp();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut written = 0usize;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO price_snapshots (
                    condition_id, outcome_prices, best_bid, best_ask, spread,
                    last_trade_price, one_hour_price_change, one_day_price_change,
                    one_week_price_change, one_month_price_change, one_year_price_change,
                    volume, volume_24h, volume_1wk, volume_1mo, volume_1yr,
                    volume_24h_amm, volume_24h_clob, liquidity, liquidity_amm,
                    liquidity_clob, competitive, comment_count, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            )?;
            let mut refresh = tx.prepare_cached(
                "UPDATE markets SET
                    active = ?2, closed = ?3, last_liquidity = ?4, last_volume = ?5,
                    last_volume_24h = ?6, last_volume_1wk = ?7,
                    last_one_day_price_change = ?8, updated_at = ?9
                 WHERE condition_id = ?1",
            )?;
            for market in markets {
                insert.execute(params![
                    market.condition_id,
                    serde_json::to_string(&market.outcome_prices)?,
                    market.best_bid,
                    market.best_ask,
                    market.spread,
                    market.last_trade_price,
                    market.one_hour_price_change,
                    market.one_day_price_change,
                    market.one_week_price_change,
                    market.one_month_price_change,
                    market.one_year_price_change,
                    market.volume,
                    market.volume_24h,
                    market.volume_1wk,
                    market.volume_1mo,
                    market.volume_1yr,
                    market.volume_24h_amm,
                    market.volume_24h_clob,
                    market.liquidity,
                    market.liquidity_amm,
                    market.liquidity_clob,
                    market.competitive,
                    market.comment_count,
                    ts,
                ])?;
                refresh.execute(params![
                    market.condition_id,
                    market.active as i64,
                    market.closed as i64,
                    market.liquidity,
                    market.volume,
                    market.volume_24h,
                    market.volume_1wk,
                    market.one_day_price_change,
                    ts,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Insert precise price rows, silently skipping duplicates on
    /// `(condition_id, token_id, fetched_at)`. Returns rows written.
    pub fn insert_market_prices_ignore_duplicates(&self, prices: &[MarketPrice]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO market_prices (
                    condition_id, token_id, outcome, outcome_index,
                    buy_price, sell_price, mid_price, spread, spread_pct, fetched_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for price in prices {
                if !price.is_persistable() {
                    warn!(condition_id = %price.condition_id, token_id = %price.token_id, "dropping unpersistable price row");
                    continue;
                }
                written += stmt.execute(params![
                    price.condition_id,
                    price.token_id,
                    price.outcome,
                    price.outcome_index as i64,
                    price.buy_price,
                    price.sell_price,
                    price.mid_price,
                    price.spread,
                    price.spread_pct,
                    price.fetched_at.timestamp(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn get_markets(&self, query: &MarketQuery) -> Result<MarketPage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(active) = query.active {
            clauses.push("active = ?".into());
            args.push(Box::new(active as i64));
            clauses.push("closed = ?".into());
            args.push(Box::new(!active as i64));
        }
        if let Some(category) = &query.category {
            clauses.push("category = ?".into());
            args.push(Box::new(category.clone()));
        }
        if let Some(search) = &query.search {
            clauses.push("(question LIKE ? OR slug LIKE ?)".into());
            let needle = format!("%{}%", search);
            args.push(Box::new(needle.clone()));
            args.push(Box::new(needle));
        }
        let range = |column: &str, op: &str, value: Option<f64>, args: &mut Vec<Box<dyn rusqlite::ToSql>>, clauses: &mut Vec<String>| {
            if let Some(v) = value {
                clauses.push(format!("{} {} ?", column, op));
                args.push(Box::new(v));
            }
        };
        range("last_liquidity", ">=", query.liquidity_min, &mut args, &mut clauses);
        range("last_liquidity", "<=", query.liquidity_max, &mut args, &mut clauses);
        range("last_volume", ">=", query.volume_min, &mut args, &mut clauses);
        range("last_volume", "<=", query.volume_max, &mut args, &mut clauses);
        for (column, op, value) in [
            ("end_date", ">=", &query.end_date_min),
            ("end_date", "<=", &query.end_date_max),
            ("start_date", ">=", &query.start_date_min),
            ("start_date", "<=", &query.start_date_max),
        ] {
            if let Some(v) = value {
                clauses.push(format!("{} {} ?", column, op));
                args.push(Box::new(v.clone()));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        // Order column must come from the whitelist; anything else falls
        // back to volume.
        let order_col = if ORDERABLE_COLUMNS.contains(&query.order_by.as_str()) {
            query.order_by.as_str()
        } else {
            "last_volume"
        };
        let dir = if query.order_desc { "DESC" } else { "ASC" };

        let conn = self.conn.lock();
        let total: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM markets{}", where_sql),
            rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())),
            |row| row.get::<_, i64>(0),
        )? as usize;

        let sql = format!(
            "SELECT condition_id, question, slug, category, outcomes, clob_token_ids,
                    end_date, start_date, active, closed, enable_order_book, neg_risk,
                    last_liquidity, last_volume, last_volume_24h, last_one_day_price_change
             FROM markets{} ORDER BY {} {} NULLS LAST LIMIT ? OFFSET ?",
            where_sql, order_col, dir
        );
        args.push(Box::new(query.limit as i64));
        args.push(Box::new(query.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let markets = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())),
                row_to_stored_market,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(MarketPage { markets, total })
    }

    /// Markets eligible for the price stage: order book enabled and tokens
    /// present, optionally restricted to open markets.
    pub fn get_markets_for_price_scan(&self, active_only: bool) -> Result<Vec<StoredMarket>> {
        let sql = format!(
            "SELECT condition_id, question, slug, category, outcomes, clob_token_ids,
                    end_date, start_date, active, closed, enable_order_book, neg_risk,
                    last_liquidity, last_volume, last_volume_24h, last_one_day_price_change
             FROM markets
             WHERE enable_order_book = 1 AND clob_token_ids NOT IN ('', '[]'){}",
            if active_only {
                " AND active = 1 AND closed = 0"
            } else {
                ""
            }
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let markets = stmt
            .query_map([], row_to_stored_market)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(markets)
    }

    pub fn count_markets(&self) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM markets", [], |r| r.get::<_, i64>(0))? as usize)
    }

    pub fn count_snapshots(&self) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM price_snapshots", [], |r| {
            r.get::<_, i64>(0)
        })? as usize)
    }

    pub fn count_market_prices(&self) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM market_prices", [], |r| {
            r.get::<_, i64>(0)
        })? as usize)
    }

    /// Raw static row serialized for comparison; used to verify that a
    /// replayed upsert left the record untouched.
    pub fn static_row_json(&self, condition_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT question, slug, category, outcomes, clob_token_ids, end_date,
                    order_min_size, uma_bond, image
             FROM markets WHERE condition_id = ?1",
        )?;
        let row = stmt
            .query_row(params![condition_id], |row| {
                Ok(serde_json::json!({
                    "question": row.get::<_, String>(0)?,
                    "slug": row.get::<_, String>(1)?,
                    "category": row.get::<_, Option<String>>(2)?,
                    "outcomes": row.get::<_, String>(3)?,
                    "clob_token_ids": row.get::<_, String>(4)?,
                    "end_date": row.get::<_, Option<String>>(5)?,
                    "order_min_size": row.get::<_, Option<f64>>(6)?,
                    "uma_bond": row.get::<_, Option<f64>>(7)?,
                    "image": row.get::<_, Option<String>>(8)?,
                })
                .to_string())
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }
}

fn row_to_stored_market(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMarket> {
    let outcomes: String = row.get(4)?;
    let tokens: String = row.get(5)?;
    Ok(StoredMarket {
        condition_id: row.get(0)?,
        question: row.get(1)?,
        slug: row.get(2)?,
        category: row.get(3)?,
        outcomes: serde_json::from_str(&outcomes).unwrap_or_default(),
        clob_token_ids: serde_json::from_str(&tokens).unwrap_or_default(),
        end_date: row.get(6)?,
        start_date: row.get(7)?,
        active: row.get::<_, i64>(8)? != 0,
        closed: row.get::<_, i64>(9)? != 0,
        enable_order_book: row.get::<_, i64>(10)? != 0,
        neg_risk: row.get::<_, i64>(11)? != 0,
        liquidity: row.get(12)?,
        volume: row.get(13)?,
        volume_24h: row.get(14)?,
        one_day_price_change: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawMarket;

    fn market(id: &str, liquidity: f64, volume: f64) -> MarketData {
        let raw = RawMarket {
            condition_id: Some(id.to_string()),
            question: Some(format!("Question {}?", id)),
            slug: Some(format!("slug-{}", id)),
            outcomes: vec!["Yes".into(), "No".into()],
            outcome_prices: vec![0.5, 0.5],
            clob_token_ids: vec![format!("{}-yes", id), format!("{}-no", id)],
            enable_order_book: Some(true),
            active: Some(true),
            closed: Some(false),
            liquidity: Some(liquidity),
            volume: Some(volume),
            volume_24h: Some(volume / 10.0),
            ..Default::default()
        };
        MarketData::try_from(raw).unwrap()
    }

    #[test]
    fn upsert_is_insert_if_absent_and_idempotent() {
        let store = MarketStore::in_memory().unwrap();
        let batch = vec![market("c1", 100.0, 1000.0), market("c2", 200.0, 2000.0)];

        let stats = store.batch_upsert_markets(&batch).unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 0);

        let before = store.static_row_json("c1").unwrap().unwrap();

        // Replay with a mutated question: existing static row must survive
        // byte-identical.
        let mut mutated = batch.clone();
        mutated[0].question = "Rewritten question".into();
        let stats = store.batch_upsert_markets(&mutated).unwrap();
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.skipped, 2);
        let after = store.static_row_json("c1").unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn snapshots_are_append_only() {
        let store = MarketStore::in_memory().unwrap();
        let batch = vec![market("c1", 100.0, 1000.0)];
        store.batch_upsert_markets(&batch).unwrap();

        store
            .batch_record_price_snapshots(&batch, Utc::now())
            .unwrap();
        store
            .batch_record_price_snapshots(&batch, Utc::now())
            .unwrap();
        assert_eq!(store.count_snapshots().unwrap(), 2);
    }

    #[test]
    fn market_prices_skip_duplicates_and_bad_rows() {
        let store = MarketStore::in_memory().unwrap();
        let now = Utc::now();
        let good = MarketPrice::new("c1", "t1", "Yes", 0, Some(0.4), Some(0.45), now);
        let dup = good.clone();
        let both_null = MarketPrice::new("c1", "t2", "No", 1, None, None, now);

        let written = store
            .insert_market_prices_ignore_duplicates(&[good, dup, both_null])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count_market_prices().unwrap(), 1);
    }

    #[test]
    fn listing_filters_and_sorts() {
        let store = MarketStore::in_memory().unwrap();
        let batch = vec![
            market("c1", 100.0, 3000.0),
            market("c2", 500.0, 1000.0),
            market("c3", 50.0, 2000.0),
        ];
        store.batch_upsert_markets(&batch).unwrap();
        store
            .batch_record_price_snapshots(&batch, Utc::now())
            .unwrap();

        let page = store
            .get_markets(&MarketQuery {
                order_by: "last_liquidity".into(),
                order_desc: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.markets[0].condition_id, "c2");

        let page = store
            .get_markets(&MarketQuery {
                liquidity_min: Some(90.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);

        let page = store
            .get_markets(&MarketQuery {
                search: Some("slug-c3".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.markets[0].condition_id, "c3");

        let page = store
            .get_markets(&MarketQuery {
                limit: 2,
                offset: 2,
                order_by: "last_volume".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.markets.len(), 1);
    }

    #[test]
    fn price_scan_targets_require_order_book() {
        let store = MarketStore::in_memory().unwrap();
        let mut no_book = market("c2", 0.0, 0.0);
        no_book.enable_order_book = false;
        let mut closed = market("c3", 0.0, 0.0);
        closed.closed = true;
        closed.active = false;
        let batch = vec![market("c1", 1.0, 1.0), no_book, closed];
        store.batch_upsert_markets(&batch).unwrap();
        store
            .batch_record_price_snapshots(&batch, Utc::now())
            .unwrap();

        let targets = store.get_markets_for_price_scan(true).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].condition_id, "c1");

        let targets = store.get_markets_for_price_scan(false).unwrap();
        assert_eq!(targets.len(), 2);
    }
}
