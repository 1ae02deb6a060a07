//! Rate-limited, retrying HTTP request engine.
//!
//! One `ClientCore` per venue surface. Pacing is a token bucket with burst
//! tolerance; retries apply only to status codes in `retry_on`, with
//! exponential backoff and ±25 % jitter. Every attempt is reported to the
//! configured [`LogSink`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::log_sink::{ApiLogRecord, LogSink};
use crate::config::resolve_proxy_from_env;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_on: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            retry_on: vec![429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub enable_logging: bool,
    pub max_response_log_size: usize,
    pub default_headers: Vec<(String, String)>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            proxy: None,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            enable_logging: true,
            max_response_log_size: 2_048,
            default_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// One outbound request. Query parameters are scalar-valued pairs.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: String,
    pub method: HttpMethod,
    pub params: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub context: Option<String>,
    pub timeout: Option<Duration>,
    pub skip_logging: bool,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, HttpMethod::Get)
    }

    pub fn post(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        let mut req = Self::new(endpoint, HttpMethod::Post);
        req.body = Some(body);
        req
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, HttpMethod::Delete)
    }

    fn new(endpoint: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            context: None,
            timeout: None,
            skip_logging: false,
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Outcome of a request after pacing, retries, and decoding.
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<EngineError>,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
}

impl<T> ApiResponse<T> {
    fn ok(data: T, status_code: u16, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status_code: Some(status_code),
            duration_ms,
        }
    }

    fn err(error: EngineError, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            status_code: error.status_code(),
            error: Some(error),
            duration_ms,
        }
    }

    /// Collapse into a plain result, for callers that do not need timing.
    pub fn into_result(self) -> EngineResult<T> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(err)) => Err(err),
            (None, None) => Err(EngineError::Decode("empty response".into())),
        }
    }
}

/// Token bucket: capacity `max_requests`, refilled continuously at
/// `max_requests / window_ms` tokens per millisecond.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_ms: f64,
    last_ms: u64,
}

impl TokenBucket {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.max_requests.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_ms: capacity / config.window_ms.max(1) as f64,
            last_ms: 0,
        }
    }

    /// Consume a token, or return how long to wait until one is available.
    pub(crate) fn try_acquire(&mut self, now_ms: u64) -> Result<(), u64> {
        let elapsed = now_ms.saturating_sub(self.last_ms);
        self.tokens = (self.tokens + elapsed as f64 * self.refill_per_ms).min(self.capacity);
        self.last_ms = now_ms;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let wait = ((1.0 - self.tokens) / self.refill_per_ms).ceil() as u64;
            Err(wait.max(1))
        }
    }
}

/// Backoff for the n-th retry (n starting at 1):
/// `min(initial · 2^(n-1) · (1 ± 0.25·|jitter|), max)` with `unit_jitter`
/// in [-1, 1].
pub fn backoff_delay_with_jitter(retry: &RetryConfig, attempt: u32, unit_jitter: f64) -> Duration {
    let n = attempt.max(1);
    let base = retry.initial_delay_ms as f64 * 2f64.powi(n as i32 - 1);
    let factor = 1.0 + 0.25 * unit_jitter.clamp(-1.0, 1.0);
    let delay = (base * factor).min(retry.max_delay_ms as f64);
    Duration::from_millis(delay.max(0.0) as u64)
}

pub struct ClientCore {
    client_type: String,
    http: reqwest::Client,
    config: ClientConfig,
    bucket: Mutex<TokenBucket>,
    origin: Instant,
    sink: Arc<dyn LogSink>,
}

impl ClientCore {
    pub fn new(
        client_type: impl Into<String>,
        config: ClientConfig,
        sink: Arc<dyn LogSink>,
    ) -> EngineResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("polyarb/0.1");

        let proxy = config.proxy.clone().or_else(resolve_proxy_from_env);
        if let Some(url) = proxy {
            // `socks5://` URLs select the SOCKS transport; anything else goes
            // through an HTTPS-CONNECT proxy.
            let proxy = reqwest::Proxy::all(&url)
                .map_err(|e| EngineError::Transport(format!("invalid proxy {}: {}", url, e)))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| EngineError::Transport(format!("client build failed: {}", e)))?;

        Ok(Self {
            client_type: client_type.into(),
            http,
            bucket: Mutex::new(TokenBucket::new(&config.rate_limit)),
            config,
            origin: Instant::now(),
            sink,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config.retry
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Block until the token bucket yields a slot.
    async fn acquire(&self) {
        loop {
            let outcome = self.bucket.lock().try_acquire(self.now_ms());
            match outcome {
                Ok(()) => return,
                Err(wait_ms) => {
                    debug!(
                        client = %self.client_type,
                        wait_ms,
                        "rate limit pacing"
                    );
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
            }
        }
    }

    /// Issue a request, honoring pacing and the retry policy, and decode the
    /// response body as `T`.
    pub async fn request<T: DeserializeOwned>(&self, req: ApiRequest) -> ApiResponse<T> {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string();
        let mut attempt: u32 = 0;

        loop {
            self.acquire().await;
            let attempt_start = Instant::now();
            let outcome = self.execute_once(&req).await;
            let attempt_ms = attempt_start.elapsed().as_millis() as u64;

            match outcome {
                Ok((status, bytes)) => {
                    self.log_attempt(&req, Some(status), Some(bytes.len()), attempt_ms, true, None, attempt, &trace_id);
                    let total_ms = started.elapsed().as_millis() as u64;
                    // An empty 2xx body reads as JSON null (some DELETE
                    // endpoints answer with no content).
                    let payload: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
                    return match serde_json::from_slice::<T>(payload) {
                        Ok(data) => ApiResponse::ok(data, status, total_ms),
                        Err(e) => ApiResponse::err(
                            EngineError::Decode(format!("{} ({})", e, req.endpoint)),
                            total_ms,
                        ),
                    };
                }
                Err(err) => {
                    self.log_attempt(
                        &req,
                        err.status_code(),
                        None,
                        attempt_ms,
                        false,
                        Some(err.to_string()),
                        attempt,
                        &trace_id,
                    );

                    let retryable = err
                        .status_code()
                        .map(|s| self.config.retry.retry_on.contains(&s))
                        .unwrap_or(false);
                    if retryable && attempt < self.config.retry.max_retries {
                        attempt += 1;
                        let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
                        let delay = backoff_delay_with_jitter(&self.config.retry, attempt, jitter);
                        warn!(
                            client = %self.client_type,
                            endpoint = %req.endpoint,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return ApiResponse::err(err, started.elapsed().as_millis() as u64);
                }
            }
        }
    }

    async fn execute_once(&self, req: &ApiRequest) -> EngineResult<(u16, Vec<u8>)> {
        let url = format!("{}{}", self.config.base_url, req.endpoint);
        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, &url);
        if !req.params.is_empty() {
            builder = builder.query(&req.params);
        }
        for (name, value) in self.config.default_headers.iter().chain(req.headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Transport(format!("timeout: {}", url))
            } else {
                EngineError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .to_vec();

        if (200..300).contains(&status) {
            Ok((status, bytes))
        } else {
            let mut excerpt = String::from_utf8_lossy(&bytes).into_owned();
            excerpt.truncate(self.config.max_response_log_size);
            Err(EngineError::from_status(status, excerpt))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_attempt(
        &self,
        req: &ApiRequest,
        status_code: Option<u16>,
        response_size: Option<usize>,
        duration_ms: u64,
        success: bool,
        error_message: Option<String>,
        retry_count: u32,
        trace_id: &str,
    ) {
        if !self.config.enable_logging || req.skip_logging {
            return;
        }
        let request_params = if req.params.is_empty() {
            None
        } else {
            Some(serde_json::json!(req
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<std::collections::BTreeMap<_, _>>()))
        };
        let record = ApiLogRecord {
            client_type: self.client_type.clone(),
            endpoint: req.endpoint.clone(),
            method: req.method.as_str().to_string(),
            request_params,
            status_code,
            response_size,
            duration_ms,
            success,
            error_message,
            retry_count,
            trace_id: trace_id.to_string(),
            source: req.context.clone(),
            created_at: chrono::Utc::now(),
        };
        // Sink failures must never reach the request path; sinks are
        // infallible by contract and guard internally.
        self.sink.append(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_paces_25_requests_past_1500ms() {
        // 10 requests per 1000 ms, 25 back-to-back acquires on a virtual
        // clock: the initial burst drains the bucket, after which requests
        // trickle at the refill rate, landing the tail past 1.5 s.
        let config = RateLimitConfig {
            max_requests: 10,
            window_ms: 1_000,
        };
        let mut bucket = TokenBucket::new(&config);
        let mut now: u64 = 0;
        let mut starts = Vec::new();
        for _ in 0..25 {
            loop {
                match bucket.try_acquire(now) {
                    Ok(()) => {
                        starts.push(now);
                        break;
                    }
                    Err(wait) => now += wait,
                }
            }
        }
        assert!(
            *starts.last().unwrap() >= 1_500,
            "25 requests at 10/s should span at least 1.5s, got {}ms",
            starts.last().unwrap()
        );
        // Burst tolerance is bounded by the bucket capacity: at most 10
        // starts share a timestamp, and past the burst the steady-state
        // rate never exceeds 10 starts per sliding window.
        let burst = starts.iter().filter(|&&t| t == 0).count();
        assert!(burst <= 10);
        for (i, &t) in starts.iter().enumerate() {
            if t == 0 {
                continue;
            }
            let in_window = starts[i..].iter().take_while(|&&u| u < t + 1_000).count();
            assert!(
                in_window <= 10,
                "steady-state window at {}ms holds {} request starts",
                t,
                in_window
            );
        }
    }

    #[test]
    fn token_bucket_allows_initial_burst() {
        let config = RateLimitConfig {
            max_requests: 5,
            window_ms: 1_000,
        };
        let mut bucket = TokenBucket::new(&config);
        for _ in 0..5 {
            assert!(bucket.try_acquire(0).is_ok());
        }
        assert!(bucket.try_acquire(0).is_err());
    }

    #[test]
    fn backoff_delays_stay_within_jitter_envelope() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            retry_on: vec![429],
        };
        for attempt in 1..=5u32 {
            let base = 100f64 * 2f64.powi(attempt as i32 - 1);
            for jitter in [-1.0, -0.5, 0.0, 0.5, 1.0] {
                let delay = backoff_delay_with_jitter(&retry, attempt, jitter).as_millis() as f64;
                assert!(
                    delay >= base * 0.75 - 1.0,
                    "attempt {} jitter {} delay {} below floor",
                    attempt,
                    jitter,
                    delay
                );
                assert!(
                    delay <= (base * 1.25).min(10_000.0) + 1.0,
                    "attempt {} jitter {} delay {} above ceiling",
                    attempt,
                    jitter,
                    delay
                );
            }
        }
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let retry = RetryConfig {
            max_retries: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 4_000,
            retry_on: vec![429],
        };
        let delay = backoff_delay_with_jitter(&retry, 8, 1.0);
        assert_eq!(delay.as_millis(), 4_000);
    }

    #[tokio::test]
    async fn acquire_paces_in_real_time() {
        use crate::client::log_sink::NullSink;
        let mut config = ClientConfig::new("http://127.0.0.1:9");
        config.rate_limit = RateLimitConfig {
            max_requests: 5,
            window_ms: 200,
        };
        let core = ClientCore::new("test", config, Arc::new(NullSink)).unwrap();
        let start = Instant::now();
        for _ in 0..11 {
            core.acquire().await;
        }
        // 5 burst tokens, then 6 more at 25 tokens/s: at least ~200 ms.
        assert!(
            start.elapsed() >= Duration::from_millis(180),
            "pacing finished too quickly: {:?}",
            start.elapsed()
        );
    }
}
