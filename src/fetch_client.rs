use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::proxy_pool::{proxied_client, ProxyPool};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) YaBrowser/24.1.0.0 Safari/537.36",
];

/// Terminal outcome of a fetch that did not produce a 200.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Every attempt failed with a transient error (timeout, connection
    /// failure, 429, 5xx).
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    /// 403/404: the upstream refused us; retrying through the same chain is
    /// pointless.
    #[error("blocked by upstream with status {status}")]
    Blocked { status: u16 },
    /// The request could not even be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Knobs for one client's retry loop.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_retries: u32,
    pub timeout: Duration,
    /// Minimum spacing between two requests issued by the same client.
    pub request_delay: Duration,
    /// Unit of the `2^attempt + jitter` backoff.
    pub backoff_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            request_delay: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for FetchSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout: config.request_timeout(),
            request_delay: config.request_delay(),
            backoff_base: config.backoff_base(),
        }
    }
}

/// One outbound request, independent of the transport used to send it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            query: Vec::new(),
            json: Some(body),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful (200) response, body already read.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchResponse {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub request_count: u64,
    pub error_count: u64,
}

/// HTTP client wrapping every upstream call with rate limiting, retries,
/// proxy rotation and User-Agent rotation.
pub struct FetchClient {
    name: String,
    settings: FetchSettings,
    proxies: Option<Arc<ProxyPool>>,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
    last_request: tokio::sync::Mutex<Option<Instant>>,
    request_count: AtomicU64,
    error_count: AtomicU64,
}

enum Attempt {
    Done(FetchResponse),
    Retry { reason: String, backoff: bool },
    Abort(FetchError),
}

impl FetchClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs, usually the source name.
    /// * `settings` - Retry, timeout and pacing configuration.
    /// * `proxies` - Shared proxy pool, or `None` for direct connections.
    pub fn new(
        name: impl Into<String>,
        settings: FetchSettings,
        proxies: Option<Arc<ProxyPool>>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            proxies,
            direct: reqwest::Client::new(),
            proxied: Mutex::new(HashMap::new()),
            last_request: tokio::sync::Mutex::new(None),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Sends `request` with the client's own retry budget and timeout.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.fetch_with(request, self.settings.max_retries, self.settings.timeout)
            .await
    }

    /// Sends `request`, retrying transient failures up to `max_retries`
    /// attempts, each bounded by `timeout`.
    ///
    /// 429 backs off and keeps the proxy. 403/404 quarantine the proxy and
    /// abort. Timeouts and connection errors quarantine the proxy, back off
    /// and retry. Any other status is retried after backoff.
    pub async fn fetch_with(
        &self,
        request: &FetchRequest,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let attempts = max_retries.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            self.pace().await;
            self.request_count.fetch_add(1, Ordering::Relaxed);

            match self.attempt(request, timeout).await {
                Attempt::Done(response) => return Ok(response),
                Attempt::Abort(err) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    warn!("❌ [{}] {} aborted: {}", self.name, request.url, err);
                    return Err(err);
                }
                Attempt::Retry { reason, backoff } => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "⚠ [{}] attempt {}/{} for {} failed: {}",
                        self.name,
                        attempt + 1,
                        attempts,
                        request.url,
                        reason
                    );
                    last_error = reason;
                    if backoff && attempt + 1 < attempts {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts,
            last_error,
        })
    }

    async fn attempt(&self, request: &FetchRequest, timeout: Duration) -> Attempt {
        let proxy = match &self.proxies {
            Some(pool) => pool.acquire().await,
            None => None,
        };
        let client = match proxy.as_deref() {
            Some(p) => match self.client_for(p) {
                Ok(client) => client,
                Err(e) => {
                    warn!("⚠ [{}] unusable proxy {}: {}", self.name, p, e);
                    self.report_bad(p);
                    self.direct.clone()
                }
            },
            None => self.direct.clone(),
        };

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(rotated_headers())
            .timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        debug!(
            "[{}] {} {} via {}",
            self.name,
            request.method,
            request.url,
            proxy.as_deref().unwrap_or("direct")
        );

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Attempt::Abort(FetchError::InvalidRequest(e.to_string()));
            }
            Err(e) => {
                if e.is_timeout() || e.is_connect() {
                    if let Some(p) = proxy.as_deref() {
                        self.report_bad(p);
                    }
                }
                let kind = if e.is_timeout() { "timeout" } else { "network error" };
                return Attempt::Retry {
                    reason: format!("{}: {}", kind, e),
                    backoff: true,
                };
            }
        };

        let status = response.status();
        match status {
            StatusCode::OK => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match response.text().await {
                    Ok(body) => Attempt::Done(FetchResponse {
                        status: status.as_u16(),
                        content_type,
                        body,
                    }),
                    Err(e) => Attempt::Retry {
                        reason: format!("body read failed: {}", e),
                        backoff: true,
                    },
                }
            }
            StatusCode::TOO_MANY_REQUESTS => Attempt::Retry {
                reason: "rate limited (429)".to_string(),
                backoff: true,
            },
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                if let Some(p) = proxy.as_deref() {
                    self.report_bad(p);
                }
                Attempt::Abort(FetchError::Blocked {
                    status: status.as_u16(),
                })
            }
            other => Attempt::Retry {
                reason: format!("unexpected status {}", other.as_u16()),
                backoff: true,
            },
        }
    }

    /// Enforces the minimum inter-request delay for this client.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.request_delay {
                tokio::time::sleep(self.settings.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.backoff_base;
        let factor = 2u32.saturating_pow(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        base.saturating_mul(factor) + base.mul_f64(jitter)
    }

    fn client_for(&self, proxy: &str) -> Result<reqwest::Client, reqwest::Error> {
        let mut cache = self
            .proxied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = cache.get(proxy) {
            return Ok(client.clone());
        }
        let client = proxied_client(proxy)?;
        cache.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    fn report_bad(&self, proxy: &str) {
        if let Some(pool) = &self.proxies {
            pool.report_bad(proxy);
        }
    }
}

fn rotated_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let agent = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);
    headers.insert(USER_AGENT, HeaderValue::from_static(agent));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("ru-RU,ru;q=0.9,en;q=0.8"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(backoff_ms: u64) -> FetchClient {
        FetchClient::new(
            "test",
            FetchSettings {
                max_retries: 3,
                timeout: Duration::from_secs(1),
                request_delay: Duration::ZERO,
                backoff_base: Duration::from_millis(backoff_ms),
            },
            None,
        )
    }

    #[test]
    fn test_backoff_grows_exponentially_with_bounded_jitter() {
        let c = client(100);
        for attempt in 0..4 {
            let delay = c.backoff_delay(attempt);
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            assert!(delay >= floor);
            assert!(delay < floor + Duration::from_millis(100));
        }
    }

    #[test]
    fn test_rotated_headers_use_known_agent() {
        let headers = rotated_headers();
        let agent = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(USER_AGENTS.contains(&agent));
    }

    #[tokio::test]
    async fn test_pacing_enforces_minimum_delay() {
        let c = FetchClient::new(
            "pace",
            FetchSettings {
                request_delay: Duration::from_millis(50),
                ..FetchSettings::default()
            },
            None,
        );
        let start = Instant::now();
        c.pace().await;
        c.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_retries() {
        let c = client(1);
        let request = FetchRequest::get("http://127.0.0.1:9/unreachable");
        let err = c.fetch_with(&request, 2, Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 2, .. }));
        assert_eq!(
            c.stats(),
            FetchStats {
                request_count: 2,
                error_count: 2
            }
        );
    }
}
