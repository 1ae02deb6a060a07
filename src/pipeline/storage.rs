//! Storage stage.
//!
//! Buffered write-through with two-table fan-out: each flush upserts the
//! static market rows first, then appends their price snapshots. The
//! buffer deduplicates by condition id, evicts oldest on overflow, and
//! reports backpressure at 80 % occupancy so the scan stage stops feeding.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::models::MarketData;
use crate::store::MarketStore;

const BACKPRESSURE_RATIO: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_buffer_size: usize,
    pub concurrency: usize,
    pub op_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(5),
            max_buffer_size: 500,
            concurrency: 10,
            op_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushResult {
    pub inserted: usize,
    pub skipped: usize,
    pub price_snapshots: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub buffered: usize,
    pub total_added: u64,
    pub deduplicated: u64,
    pub dropped: u64,
    pub flushes: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub snapshots: u64,
    pub errors: u64,
    pub last_flush_ms: Option<i64>,
}

pub struct StorageStage {
    store: Arc<MarketStore>,
    config: StorageConfig,
    buffer: Mutex<VecDeque<MarketData>>,
    /// Serializes flushes; held across the store calls.
    flush_lock: AsyncMutex<()>,
    pool: Arc<Semaphore>,
    stats: Mutex<StorageStats>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl StorageStage {
    pub fn new(store: Arc<MarketStore>, config: StorageConfig) -> Arc<Self> {
        let pool = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Arc::new(Self {
            store,
            config,
            buffer: Mutex::new(VecDeque::new()),
            flush_lock: AsyncMutex::new(()),
            pool,
            stats: Mutex::new(StorageStats::default()),
            stop_tx: Mutex::new(None),
        })
    }

    /// Spawn the periodic flush timer.
    pub fn start(self: &Arc<Self>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let stage = Arc::clone(self);
        tokio::spawn(async move {
            info!("storage stage started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(stage.config.flush_interval) => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }
                if !stage.buffer.lock().is_empty() {
                    stage.flush().await;
                }
            }
            info!("storage stage stopped");
        });
    }

    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
    }

    /// Buffer new arrivals, deduplicated against what is already queued.
    /// Oversized input evicts the oldest buffered entries (soft cap); a
    /// full batch triggers an immediate flush.
    pub async fn add(&self, markets: Vec<MarketData>) {
        let should_flush = {
            let mut buffer = self.buffer.lock();
            let mut stats = self.stats.lock();
            for market in markets {
                stats.total_added += 1;
                if buffer
                    .iter()
                    .any(|m| m.condition_id == market.condition_id)
                {
                    stats.deduplicated += 1;
                    continue;
                }
                if buffer.len() >= self.config.max_buffer_size {
                    buffer.pop_front();
                    stats.dropped += 1;
                    warn!("storage buffer full, dropping oldest entry");
                }
                buffer.push_back(market);
            }
            stats.buffered = buffer.len();
            buffer.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// True when the buffer sits at or above 80 % of capacity.
    pub fn has_backpressure(&self) -> bool {
        let occupancy = self.buffer.lock().len() as f64;
        occupancy >= self.config.max_buffer_size as f64 * BACKPRESSURE_RATIO
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn stats(&self) -> StorageStats {
        let buffered = self.buffer.lock().len();
        let mut stats = self.stats.lock().clone();
        stats.buffered = buffered;
        stats
    }

    /// Drain one batch through the store. Only one flush runs at a time;
    /// the `(market, snapshot)` write pair is ordered.
    pub async fn flush(&self) -> FlushResult {
        let _guard = self.flush_lock.lock().await;
        let started = Instant::now();

        let batch: Vec<MarketData> = {
            let mut buffer = self.buffer.lock();
            let take = buffer.len().min(self.config.batch_size);
            buffer.drain(..take).collect()
        };
        if batch.is_empty() {
            return FlushResult::default();
        }
        let batch = Arc::new(batch);

        let upsert = {
            let _permit = self.pool.acquire().await;
            let store = Arc::clone(&self.store);
            let batch = Arc::clone(&batch);
            tokio::time::timeout(
                self.config.op_timeout,
                tokio::task::spawn_blocking(move || store.batch_upsert_markets(&batch)),
            )
            .await
        };
        let upsert = match upsert {
            Ok(Ok(Ok(stats))) => stats,
            other => {
                let message = flatten_error(other);
                error!(error = %message, "market upsert batch failed");
                self.stats.lock().errors += batch.len() as u64;
                // Not re-enqueued: the next scan cycle will observe the
                // same markets again.
                return FlushResult::default();
            }
        };

        // Snapshots are persisted only after the market upsert returned.
        let recorded_at = Utc::now();
        let snapshots = {
            let _permit = self.pool.acquire().await;
            let store = Arc::clone(&self.store);
            let batch = Arc::clone(&batch);
            tokio::time::timeout(
                self.config.op_timeout,
                tokio::task::spawn_blocking(move || {
                    store.batch_record_price_snapshots(&batch, recorded_at)
                }),
            )
            .await
        };
        let snapshots = match snapshots {
            Ok(Ok(Ok(count))) => count,
            other => {
                let message = flatten_error(other);
                error!(error = %message, "snapshot batch failed");
                self.stats.lock().errors += batch.len() as u64;
                0
            }
        };

        let result = FlushResult {
            inserted: upsert.inserted,
            skipped: upsert.skipped,
            price_snapshots: snapshots,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let buffered = self.buffer.lock().len();
        {
            let mut stats = self.stats.lock();
            stats.flushes += 1;
            stats.inserted += result.inserted as u64;
            stats.skipped += result.skipped as u64;
            stats.snapshots += result.price_snapshots as u64;
            stats.last_flush_ms = Some(Utc::now().timestamp_millis());
            stats.buffered = buffered;
        }
        debug!(
            inserted = result.inserted,
            skipped = result.skipped,
            snapshots = result.price_snapshots,
            duration_ms = result.duration_ms,
            "storage flush complete"
        );
        result
    }

    /// Flush whatever is buffered and return once the work pool is drained.
    pub async fn wait_until_idle(&self) {
        loop {
            self.flush().await;
            if self.buffer.lock().is_empty() {
                break;
            }
        }
        // All pool permits free means no store call is still in flight.
        let _all = self
            .pool
            .acquire_many(self.config.concurrency.max(1) as u32)
            .await;
    }
}

type FlushCall<T> = Result<
    Result<anyhow::Result<T>, tokio::task::JoinError>,
    tokio::time::error::Elapsed,
>;

fn flatten_error<T>(outcome: FlushCall<T>) -> String {
    match outcome {
        Ok(Ok(Ok(_))) => "ok".to_string(),
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(join)) => format!("store task panicked: {}", join),
        Err(_) => "store call timed out".to_string(),
    }
}
