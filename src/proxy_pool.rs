use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Where the proxy list comes from.
#[derive(Debug, Clone)]
pub enum ProxySource {
    /// A text file, one proxy per line, `#` starts a comment line.
    File(PathBuf),
    /// An explicit list, mostly for tests and embedding.
    Inline(Vec<String>),
    /// Direct connections only.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub healthy: usize,
    pub quarantined: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    proxies: Vec<String>,
    quarantined: HashSet<String>,
}

/// Shared pool of outbound proxies with failure quarantine.
///
/// The list is loaded once, on the first [`ProxyPool::acquire`]. A failed
/// load leaves the pool empty and every request goes out directly.
#[derive(Debug)]
pub struct ProxyPool {
    source: ProxySource,
    state: OnceCell<Mutex<PoolState>>,
}

impl ProxyPool {
    pub fn new(source: ProxySource) -> Self {
        Self {
            source,
            state: OnceCell::new(),
        }
    }

    pub fn from_list<I, S>(proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ProxySource::Inline(
            proxies.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn disabled() -> Self {
        Self::new(ProxySource::Disabled)
    }

    async fn load(&self) -> Vec<String> {
        let lines: Vec<String> = match &self.source {
            ProxySource::Disabled => return Vec::new(),
            ProxySource::Inline(list) => list.clone(),
            ProxySource::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => content.lines().map(str::to_string).collect(),
                Err(e) => {
                    warn!("⚠ Could not load proxy list {}: {}", path.display(), e);
                    return Vec::new();
                }
            },
        };

        let mut seen = HashSet::new();
        let proxies: Vec<String> = lines
            .iter()
            .filter_map(|line| normalize_proxy(line))
            .filter(|p| seen.insert(p.clone()))
            .collect();

        info!("Loaded {} proxies", proxies.len());
        proxies
    }

    async fn state(&self) -> &Mutex<PoolState> {
        self.state
            .get_or_init(|| async {
                Mutex::new(PoolState {
                    proxies: self.load().await,
                    quarantined: HashSet::new(),
                })
            })
            .await
    }

    /// Picks a healthy proxy uniformly at random.
    ///
    /// When every proxy is quarantined the quarantine is cleared and the
    /// pick is retried once. Returns `None` only for an empty pool.
    pub async fn acquire(&self) -> Option<String> {
        let state = self.state().await;
        let mut guard = lock(state);

        if guard.proxies.is_empty() {
            return None;
        }

        if guard.quarantined.len() >= guard.proxies.len() {
            warn!(
                "⚠ All {} proxies quarantined, resetting pool",
                guard.proxies.len()
            );
            guard.quarantined.clear();
        }

        let state = &*guard;
        let healthy: Vec<&String> = state
            .proxies
            .iter()
            .filter(|p| !state.quarantined.contains(*p))
            .collect();

        let mut rng = rand::thread_rng();
        healthy.choose(&mut rng).map(|p| (*p).clone())
    }

    /// Quarantines a proxy. Repeated reports are no-ops, as are reports for
    /// proxies the pool never handed out.
    pub fn report_bad(&self, proxy: &str) {
        let Some(state) = self.state.get() else {
            return;
        };
        let mut guard = lock(state);
        if guard.proxies.iter().any(|p| p == proxy) && guard.quarantined.insert(proxy.to_string())
        {
            debug!("Proxy quarantined: {}", proxy);
        }
    }

    /// Sends one GET to `test_url` through every loaded proxy concurrently
    /// and quarantines each proxy that does not answer 200 within `timeout`.
    /// Returns the number of working proxies.
    pub async fn health_check_all(&self, test_url: &str, timeout: Duration) -> usize {
        let proxies = lock(self.state().await).proxies.clone();
        if proxies.is_empty() {
            return 0;
        }

        info!("Checking {} proxies against {}", proxies.len(), test_url);
        let checks = proxies.iter().map(|proxy| async move {
            let working = match proxied_client(proxy) {
                Ok(client) => match client.get(test_url).timeout(timeout).send().await {
                    Ok(response) => response.status() == reqwest::StatusCode::OK,
                    Err(e) => {
                        debug!("Proxy {} failed check: {}", proxy, e);
                        false
                    }
                },
                Err(e) => {
                    debug!("Proxy {} is unusable: {}", proxy, e);
                    false
                }
            };
            (proxy, working)
        });

        let mut working = 0;
        for (proxy, ok) in join_all(checks).await {
            if ok {
                working += 1;
            } else {
                self.report_bad(proxy);
            }
        }

        info!("✓ Proxy check completed: {}/{} working", working, proxies.len());
        working
    }

    pub fn stats(&self) -> ProxyStats {
        match self.state.get() {
            Some(state) => {
                let guard = lock(state);
                let total = guard.proxies.len();
                let quarantined = guard.quarantined.len();
                ProxyStats {
                    total,
                    healthy: total - quarantined,
                    quarantined,
                }
            }
            None => ProxyStats {
                total: 0,
                healthy: 0,
                quarantined: 0,
            },
        }
    }
}

// A poisoned lock only means another task panicked mid-update; the state is
// a plain set and remains usable.
fn lock(state: &Mutex<PoolState>) -> std::sync::MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Builds a reqwest client that routes every request through `proxy`.
pub(crate) fn proxied_client(proxy: &str) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(proxy)?)
        .build()
}

/// Trims a proxy line, skips blanks and comments, defaults the scheme to http.
/// Lines with a scheme the transport cannot speak are skipped.
fn normalize_proxy(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.split_once("://") {
        Some((scheme, _)) if SUPPORTED_SCHEMES.contains(&scheme.to_lowercase().as_str()) => {
            Some(line.to_string())
        }
        Some((scheme, _)) => {
            warn!("⚠ Skipping proxy with unsupported scheme {}: {}", scheme, line);
            None
        }
        None => Some(format!("http://{}", line)),
    }
}
