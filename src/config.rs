use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub fssp_base_url: String,
    pub fedresurs_base_url: String,
    pub rosreestr_base_url: String,
    pub courts_base_url: String,
    pub tax_base_url: String,
    pub use_proxy: bool,
    pub proxy_list_file: PathBuf,
    /// When set, every proxy is checked against this URL before a run.
    pub proxy_check_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub request_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub concurrent_requests: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_capacity: u64,
    pub low_debt_floor: f64,
    pub target_score_threshold: u8,
    pub ml_model_path: Option<PathBuf>,
    pub breaker_failure_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fssp_base_url: "https://fssp.gov.ru".to_string(),
            fedresurs_base_url: "https://fedresurs.ru".to_string(),
            rosreestr_base_url: "https://rosreestr.gov.ru".to_string(),
            courts_base_url: "https://sudrf.ru".to_string(),
            tax_base_url: "https://service.nalog.ru".to_string(),
            use_proxy: true,
            proxy_list_file: PathBuf::from("data/proxies.txt"),
            proxy_check_url: None,
            request_timeout_secs: 30,
            max_retries: 3,
            request_delay_ms: 1000,
            backoff_base_ms: 1000,
            concurrent_requests: 10,
            cache_ttl_secs: 3600,
            cache_max_capacity: 100_000,
            low_debt_floor: 100_000.0,
            target_score_threshold: 50,
            ml_model_path: None,
            breaker_failure_threshold: 5,
        }
    }
}

fn url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    let parsed = url::Url::parse(url.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn bool_var(name: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} must be true or false, got '{}'", name, raw),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            fssp_base_url: url_var("FSSP_BASE_URL", &defaults.fssp_base_url)?,
            fedresurs_base_url: url_var("FEDRESURS_BASE_URL", &defaults.fedresurs_base_url)?,
            rosreestr_base_url: url_var("ROSREESTR_BASE_URL", &defaults.rosreestr_base_url)?,
            courts_base_url: url_var("COURTS_BASE_URL", &defaults.courts_base_url)?,
            tax_base_url: url_var("TAX_BASE_URL", &defaults.tax_base_url)?,
            use_proxy: bool_var("USE_PROXY", defaults.use_proxy)?,
            proxy_list_file: std::env::var("PROXY_LIST_FILE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.proxy_list_file),
            proxy_check_url: match std::env::var("PROXY_CHECK_URL") {
                Ok(raw) if !raw.trim().is_empty() => Some(url_var("PROXY_CHECK_URL", "")?),
                _ => None,
            },
            request_timeout_secs: parsed_var("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)
                .and_then(|secs| {
                    if secs == 0 {
                        anyhow::bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
            max_retries: parsed_var("MAX_RETRIES", defaults.max_retries).and_then(|n| {
                if n == 0 {
                    anyhow::bail!("MAX_RETRIES must be at least 1");
                }
                Ok(n)
            })?,
            request_delay_ms: parsed_var("REQUEST_DELAY_MS", defaults.request_delay_ms)?,
            backoff_base_ms: parsed_var("BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            concurrent_requests: parsed_var("CONCURRENT_REQUESTS", defaults.concurrent_requests)
                .and_then(|n| {
                    if n == 0 {
                        anyhow::bail!("CONCURRENT_REQUESTS must be at least 1");
                    }
                    Ok(n)
                })?,
            cache_ttl_secs: parsed_var("CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            cache_max_capacity: parsed_var("CACHE_MAX_CAPACITY", defaults.cache_max_capacity)?,
            low_debt_floor: parsed_var("LOW_DEBT_FLOOR", defaults.low_debt_floor)?,
            target_score_threshold: parsed_var(
                "TARGET_SCORE_THRESHOLD",
                defaults.target_score_threshold,
            )
            .and_then(|t| {
                if t > 100 {
                    anyhow::bail!("TARGET_SCORE_THRESHOLD must be between 0-100");
                }
                Ok(t)
            })?,
            ml_model_path: std::env::var("ML_MODEL_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            breaker_failure_threshold: parsed_var(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            )?,
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("FSSP Base URL: {}", config.fssp_base_url);
        tracing::debug!("Fedresurs Base URL: {}", config.fedresurs_base_url);
        tracing::debug!("Rosreestr Base URL: {}", config.rosreestr_base_url);
        tracing::debug!("Courts Base URL: {}", config.courts_base_url);
        tracing::debug!("Tax Base URL: {}", config.tax_base_url);
        if config.use_proxy {
            tracing::info!("Proxy list: {}", config.proxy_list_file.display());
        }
        if let Some(ref path) = config.ml_model_path {
            tracing::info!("ML model configured: {}", path.display());
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
