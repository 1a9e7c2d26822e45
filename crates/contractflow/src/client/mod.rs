//! Resilient API client for model backends.
//!
//! Every call goes through, in order: the optional response cache, the
//! token bucket (one token per attempt), the connection cap, and the
//! per-call timeout. Transport-level failures are retried with exponential
//! backoff; HTTP error statuses are returned to the caller as responses.
//! Every suspension point races the caller's [`CancellationToken`].

pub mod cache;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod transport;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::config::ClientSettings;
use crate::sanitize::redact_endpoint;

pub use cache::ResponseCache;
pub use error::{ClientError, TransportError};
pub use rate_limit::TokenBucket;
pub use retry::BackoffPolicy;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub requests: u32,
    pub period: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub max_connections: usize,
    pub backoff: BackoffPolicy,
    pub rate_limit: Option<RateLimit>,
    pub cache: Option<CacheConfig>,
}

impl ClientConfig {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            max_connections: settings.max_connections,
            backoff: BackoffPolicy::new(
                settings.max_retries,
                Duration::from_millis(settings.initial_retry_delay_ms),
            ),
            // A period that is not a finite positive number disables the limit.
            rate_limit: settings.rate_limit.as_ref().and_then(|limit| {
                Duration::try_from_secs_f64(limit.period_secs)
                    .ok()
                    .filter(|period| !period.is_zero())
                    .map(|period| RateLimit {
                        requests: limit.requests,
                        period,
                    })
            }),
            cache: settings.cache.as_ref().map(|cache| CacheConfig {
                max_entries: cache.max_entries,
                ttl: Duration::from_secs(cache.ttl_secs),
            }),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

/// One client instance is shared by every job; its token bucket and
/// connection cap are therefore process-wide for that backend set.
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    limiter: Option<TokenBucket>,
    connections: Semaphore,
    cache: Option<ResponseCache>,
}

impl ApiClient {
    /// Builds a client over a pooled reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(config.max_connections)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let limiter = config
            .rate_limit
            .map(|limit| TokenBucket::new(limit.requests, limit.period));
        let cache = config
            .cache
            .map(|cache| ResponseCache::new(cache.max_entries, cache.ttl));
        let connections = Semaphore::new(config.max_connections.max(1));
        Self {
            config,
            transport,
            limiter,
            connections,
            cache,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one logical call. With `retry = false` exactly one attempt
    /// is made. HTTP error statuses are returned as `Ok` responses.
    pub async fn call(
        &self,
        request: &ApiRequest,
        retry: bool,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        let span = tracing::debug_span!(
            "api_call",
            method = %request.method,
            endpoint = %redact_endpoint(&request.url),
        );
        self.call_inner(request, retry, cancel).instrument(span).await
    }

    async fn call_inner(
        &self,
        request: &ApiRequest,
        retry: bool,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(request)) {
            debug!("Response served from cache");
            return Ok(cached);
        }

        let policy = if retry {
            self.config.backoff
        } else {
            BackoffPolicy::none()
        };
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt(request, cancel).await? {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(attempt, status = response.status, "Call succeeded after retries");
                    }
                    if let Some(cache) = &self.cache {
                        cache.put(request, &response);
                    }
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempt, error = %e, "Non-retryable transport error");
                    return Err(ClientError::Transport {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %e, "All attempts exhausted");
                    return Err(ClientError::Transport {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transport error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One wire attempt. The outer `Result` carries cancellation, the inner
    /// one the transport outcome.
    async fn attempt(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<Result<ApiResponse, TransportError>, ClientError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(cancel).await?;
        }

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            permit = self.connections.acquire() => permit.map_err(|_| ClientError::Cancelled)?,
        };

        let timeout = self.config.timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.transport.send(request)) => {
                Ok(outcome.unwrap_or(Err(TransportError::Timeout(timeout))))
            }
        }
    }

    /// Issues every request concurrently, bounded only by the connection cap.
    /// A failed request yields `None` at its index; the batch never fails.
    pub async fn batch_call(
        &self,
        requests: &[ApiRequest],
        cancel: &CancellationToken,
    ) -> Vec<Option<ApiResponse>> {
        let calls = requests.iter().enumerate().map(|(index, request)| async move {
            match self.call(request, true, cancel).await {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(index, error = %e, "Batch request failed");
                    None
                }
            }
        });
        join_all(calls).await
    }
}

/// Runs at most `max_concurrent` of `calls` at a time and returns their
/// outputs in input order. `max_concurrent == 0` is treated as 1.
pub async fn parallel_limited<F, Fut, T>(calls: Vec<F>, max_concurrent: usize) -> Vec<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let semaphore = Semaphore::new(max_concurrent.max(1));
    let semaphore = &semaphore;
    let tasks = calls.into_iter().map(|call| async move {
        let _permit = semaphore.acquire().await.ok();
        call().await
    });
    join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Responder = dyn Fn(&ApiRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync;

    /// Answers each call from a closure of (request, call index) after an
    /// optional simulated latency, recording when each call hit the wire.
    struct ScriptedTransport {
        responder: Box<Responder>,
        latency: Duration,
        calls: AtomicUsize,
        sent_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(
            responder: impl Fn(&ApiRequest, usize) -> Result<ApiResponse, TransportError>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                responder: Box::new(responder),
                latency: Duration::ZERO,
                calls: AtomicUsize::new(0),
                sent_at: Mutex::new(Vec::new()),
            })
        }

        fn slow(
            latency: Duration,
            responder: impl Fn(&ApiRequest, usize) -> Result<ApiResponse, TransportError>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                responder: Box::new(responder),
                latency,
                calls: AtomicUsize::new(0),
                sent_at: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent_at.lock().unwrap().push(Instant::now());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            (self.responder)(request, index)
        }
    }

    fn ok(status: u16) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse {
            status,
            body: "{}".to_string(),
        })
    }

    fn config(max_retries: u32, initial_delay: Duration) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(30),
            max_connections: 100,
            backoff: BackoffPolicy::new(max_retries, initial_delay),
            rate_limit: None,
            cache: None,
        }
    }

    fn request() -> ApiRequest {
        ApiRequest::post_json("https://api.test/v1/chat", serde_json::json!({"n": 1}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_succeeds() {
        let transport = ScriptedTransport::new(|_, _| ok(200));
        let client = ApiClient::with_transport(config(3, Duration::from_secs(1)), transport.clone());

        let response = client
            .call(&request(), true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_errors() {
        let transport = ScriptedTransport::new(|_, i| {
            if i < 2 {
                Err(TransportError::Connect("refused".into()))
            } else {
                ok(200)
            }
        });
        let client = ApiClient::with_transport(config(3, Duration::from_secs(1)), transport.clone());

        let start = Instant::now();
        let response = client.call(&request(), true, &CancellationToken::new()).await;
        assert!(response.is_ok());
        assert_eq!(transport.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_sleeps_full_backoff() {
        let transport = ScriptedTransport::new(|_, _| Err(TransportError::Other("reset".into())));
        let client = ApiClient::with_transport(config(3, Duration::from_secs(1)), transport.clone());

        let start = Instant::now();
        let result = client.call(&request(), true, &CancellationToken::new()).await;

        assert!(start.elapsed() >= Duration::from_secs(7));
        assert_eq!(transport.calls(), 4);
        match result {
            Err(ClientError::Transport { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source, TransportError::Other("reset".into()));
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disabled_makes_one_attempt() {
        let transport = ScriptedTransport::new(|_, _| Err(TransportError::Connect("down".into())));
        let client = ApiClient::with_transport(config(3, Duration::from_secs(1)), transport.clone());

        let result = client.call(&request(), false, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ClientError::Transport { attempts: 1, .. })));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_surfaces_immediately() {
        let transport =
            ScriptedTransport::new(|_, _| Err(TransportError::InvalidRequest("bad header".into())));
        let client = ApiClient::with_transport(config(3, Duration::from_secs(1)), transport.clone());

        let start = Instant::now();
        let result = client.call(&request(), true, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ClientError::Transport { attempts: 1, .. })));
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_status_not_retried() {
        let transport = ScriptedTransport::new(|_, _| ok(503));
        let client = ApiClient::with_transport(config(3, Duration::from_secs(1)), transport.clone());

        let response = client
            .call(&request(), true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transport_error() {
        let transport = ScriptedTransport::slow(Duration::from_secs(60), |_, _| ok(200));
        let mut cfg = config(0, Duration::ZERO);
        cfg.timeout = Duration::from_secs(2);
        let client = ApiClient::with_transport(cfg, transport);

        let result = client.call(&request(), true, &CancellationToken::new()).await;
        match result {
            Err(ClientError::Transport { source, .. }) => {
                assert_eq!(source, TransportError::Timeout(Duration::from_secs(2)))
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = ScriptedTransport::new(|_, _| Err(TransportError::Connect("down".into())));
        let client = ApiClient::with_transport(config(3, Duration::from_secs(10)), transport.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = client.call(&request(), true, &cancel).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_delays_second_half() {
        let transport = ScriptedTransport::new(|_, _| ok(200));
        let mut cfg = config(0, Duration::ZERO);
        cfg.rate_limit = Some(RateLimit {
            requests: 3,
            period: Duration::from_secs(10),
        });
        let client = ApiClient::with_transport(cfg, transport.clone());
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..6 {
            client.call(&request(), false, &cancel).await.unwrap();
        }

        let sent_at = transport.sent_at.lock().unwrap().clone();
        assert_eq!(sent_at.len(), 6);
        for at in &sent_at[..3] {
            assert!(at.duration_since(start) < Duration::from_secs(10));
        }
        for at in &sent_at[3..] {
            assert!(at.duration_since(start) >= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_converts_failures_to_none() {
        let transport = ScriptedTransport::new(|req, _| {
            if req.url.ends_with("/bad") {
                Err(TransportError::InvalidRequest("nope".into()))
            } else {
                ok(200)
            }
        });
        let client = ApiClient::with_transport(config(1, Duration::from_secs(1)), transport);

        let requests = vec![
            ApiRequest::get("https://api.test/a"),
            ApiRequest::get("https://api.test/bad"),
            ApiRequest::get("https://api.test/c"),
        ];
        let results = client.batch_call(&requests, &CancellationToken::new()).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_bounded_by_connection_cap() {
        let transport = ScriptedTransport::slow(Duration::from_secs(1), |_, _| ok(200));
        let mut cfg = config(0, Duration::ZERO);
        cfg.max_connections = 1;
        let client = ApiClient::with_transport(cfg, transport);

        let requests: Vec<ApiRequest> = (0..3)
            .map(|i| ApiRequest::get(format!("https://api.test/{}", i)))
            .collect();
        let start = Instant::now();
        let results = client.batch_call(&requests, &CancellationToken::new()).await;
        assert!(results.iter().all(Option::is_some));
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_skips_second_wire_call() {
        let transport = ScriptedTransport::new(|_, _| ok(200));
        let mut cfg = config(0, Duration::ZERO);
        cfg.cache = Some(CacheConfig {
            max_entries: 10,
            ttl: Duration::from_secs(60),
        });
        let client = ApiClient::with_transport(cfg, transport.clone());
        let cancel = CancellationToken::new();

        client.call(&request(), true, &cancel).await.unwrap();
        client.call(&request(), true, &cancel).await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_limited_bounds_and_orders() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..5)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Later inputs finish first.
                    tokio::time::sleep(Duration::from_millis(100 * (5 - i))).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i * 10
                }
            })
            .collect();

        let results = parallel_limited(calls, 2).await;
        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_parallel_limited_zero_means_one() {
        let calls: Vec<_> = (0..3).map(|i| move || async move { i }).collect();
        assert_eq!(parallel_limited(calls, 0).await, vec![0, 1, 2]);
    }

    #[test]
    fn test_config_from_settings() {
        let settings: ClientSettings = serde_json::from_str(
            r#"{"max_retries": 2, "initial_retry_delay_ms": 250,
                "rate_limit": {"requests": 60, "period_secs": 1.5},
                "cache": {"ttl_secs": 30}}"#,
        )
        .unwrap();
        let cfg = ClientConfig::from_settings(&settings);
        assert_eq!(cfg.backoff.max_retries, 2);
        assert_eq!(cfg.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(
            cfg.rate_limit,
            Some(RateLimit {
                requests: 60,
                period: Duration::from_millis(1500)
            })
        );
        assert_eq!(cfg.cache.unwrap().ttl, Duration::from_secs(30));
        assert_eq!(cfg.cache.unwrap().max_entries, 1000);
    }
}
