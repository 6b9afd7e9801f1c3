//! Upstream registry adapters.
//!
//! Every adapter turns one registry's raw response into an
//! [`EnrichmentFragment`]. Adapters never panic on bad upstream data and
//! never throw: failures come back as [`SourceResult::Err`], absent lookup
//! keys as [`SourceResult::MissingKey`].

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::fetch_client::{FetchClient, FetchError, FetchResponse, FetchSettings, FetchStats};
use crate::models::{CanonicalLead, EnrichmentFragment, Source};
use crate::proxy_pool::ProxyPool;

pub mod courts;
pub mod fedresurs;
pub mod fssp;
pub mod rosreestr;
pub mod tax;

pub use courts::CourtsAdapter;
pub use fedresurs::FedresursAdapter;
pub use fssp::FsspAdapter;
pub use rosreestr::RosreestrAdapter;
pub use tax::TaxAdapter;

/// Why a source produced no data for a lead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("unparsable response: {0}")]
    Parse(String),
    #[error("circuit breaker open, call rejected")]
    Rejected,
    #[error("adapter panicked: {0}")]
    Panicked(String),
}

/// Outcome of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult {
    Ok(EnrichmentFragment),
    /// Neither lookup key this adapter understands is present. Expected,
    /// not a failure.
    MissingKey,
    Err(SourceError),
}

impl From<Result<EnrichmentFragment, SourceError>> for SourceResult {
    fn from(result: Result<EnrichmentFragment, SourceError>) -> Self {
        match result {
            Ok(fragment) => SourceResult::Ok(fragment),
            Err(e) => SourceResult::Err(e),
        }
    }
}

/// Common shape of the five registry adapters.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn accepts_tax_id(&self) -> bool {
        true
    }

    fn accepts_name(&self) -> bool {
        true
    }

    async fn search_by_tax_id(&self, tax_id: &str) -> SourceResult;

    async fn search_by_name_and_dob(&self, full_name: &str, dob: Option<NaiveDate>)
        -> SourceResult;

    fn fetch_stats(&self) -> FetchStats;

    /// Looks the lead up by tax-ID when present and supported, otherwise by
    /// name and date of birth.
    async fn lookup(&self, lead: &CanonicalLead) -> SourceResult {
        if self.accepts_tax_id() && !lead.tax_id.is_empty() {
            self.search_by_tax_id(&lead.tax_id).await
        } else if self.accepts_name() && !lead.full_name.is_empty() {
            self.search_by_name_and_dob(&lead.full_name, lead.date_of_birth)
                .await
        } else {
            SourceResult::MissingKey
        }
    }
}

pub type SharedAdapter = Arc<dyn SourceAdapter>;

/// Builds the five adapters sharing one proxy pool.
pub fn build_adapters(
    config: &Config,
    proxies: Option<Arc<ProxyPool>>,
    clock: SharedClock,
) -> Vec<SharedAdapter> {
    let settings = FetchSettings::from(config);
    let client = |source: Source| FetchClient::new(source.as_str(), settings.clone(), proxies.clone());

    vec![
        Arc::new(FsspAdapter::new(&config.fssp_base_url, client(Source::Fssp))),
        Arc::new(FedresursAdapter::new(
            &config.fedresurs_base_url,
            client(Source::Fedresurs),
        )),
        Arc::new(RosreestrAdapter::new(
            &config.rosreestr_base_url,
            client(Source::Rosreestr),
        )),
        Arc::new(CourtsAdapter::new(
            &config.courts_base_url,
            client(Source::Courts),
            clock,
        )),
        Arc::new(TaxAdapter::new(&config.tax_base_url, client(Source::Tax))),
    ]
}

// ============ Shared parsing helpers ============

/// Date layouts seen in uploads and upstream payloads.
pub const DATE_FORMATS: &[&str] = &["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Parses a free-text date, trying each known layout. Timestamps such as
/// `2024-03-01T10:00:00` are cut to their date part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let try_all = |s: &str| {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    };
    try_all(raw).or_else(|| {
        let head = raw.split(|c: char| c == 'T' || c.is_whitespace()).next()?;
        if head.len() < raw.len() {
            try_all(head)
        } else {
            None
        }
    })
}

/// Reads a money amount that may be a JSON number or a string such as
/// `"12 345,67 руб."`.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount_str(s),
        _ => None,
    }
}

pub fn parse_amount_str(raw: &str) -> Option<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let kept = kept.trim_matches('.');
    if kept.is_empty() {
        return None;
    }

    // Keep only the last separator as the decimal point.
    let normalized = match kept.rfind('.') {
        Some(idx) => {
            let (int_part, frac_part) = kept.split_at(idx);
            format!("{}{}", int_part.replace('.', ""), frac_part)
        }
        None => kept.to_string(),
    };
    normalized.parse().ok()
}

/// String field accessor tolerant of numbers and nulls.
pub fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Boolean accessor that accepts `true`, `1`, `"true"` and `"yes"`.
pub fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "да"),
        _ => false,
    }
}

/// Decodes a response body as JSON, falling back to a JSON object assigned
/// to `var <js_var> = ...;` inside an HTML page. `Ok(None)` means an HTML
/// page without embedded data.
pub fn decode_body(response: &FetchResponse, js_var: &str) -> Result<Option<Value>, SourceError> {
    let body = response.body.trim_start();
    if response.is_json() || body.starts_with('{') || body.starts_with('[') {
        return serde_json::from_str(body)
            .map(Some)
            .map_err(|e| SourceError::Parse(e.to_string()));
    }
    Ok(extract_embedded_json(body, js_var))
}

fn embedded_var_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"var\s+(\w+)\s*=\s*").ok())
        .as_ref()
}

/// Finds `var <name> = {...}` in a page and parses the object that follows.
pub fn extract_embedded_json(html: &str, name: &str) -> Option<Value> {
    let re = embedded_var_regex()?;
    let caps = re
        .captures_iter(html)
        .find(|c| c.get(1).map(|m| m.as_str()) == Some(name))?;
    let start = caps.get(0)?.end();
    let mut stream = serde_json::Deserializer::from_str(&html[start..]).into_iter::<Value>();
    stream.next()?.ok()
}

/// Splits `ФАМИЛИЯ ИМЯ ОТЧЕСТВО` into its parts. Needs at least two.
pub fn split_full_name(full_name: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = full_name.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    Some((
        parts[0].to_string(),
        parts[1].to_string(),
        parts.get(2).map(|s| s.to_string()).unwrap_or_default(),
    ))
}

pub fn format_dob(dob: Option<NaiveDate>) -> String {
    dob.map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(parse_date("15.03.2024"), expected);
        assert_eq!(parse_date("2024-03-15"), expected);
        assert_eq!(parse_date("15/03/2024"), expected);
        assert_eq!(parse_date("15-03-2024"), expected);
        assert_eq!(parse_date("2024-03-15T10:22:00"), expected);
        assert_eq!(parse_date("15.03.2024 10:22"), expected);
        assert_eq!(parse_date("вчера"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount(&json!(1500)), Some(1500.0));
        assert_eq!(parse_amount(&json!("12 345,67 руб.")), Some(12345.67));
        assert_eq!(parse_amount(&json!("250000")), Some(250000.0));
        assert_eq!(parse_amount(&json!("1.234.567,89")), Some(1234567.89));
        assert_eq!(parse_amount(&json!("нет")), None);
        assert_eq!(parse_amount(&Value::Null), None);
    }

    #[test]
    fn test_extract_embedded_json() {
        let html = r#"<html><script>var other = 1; var searchResults = {"result":{"items":[{"a":"};"}]}};</script></html>"#;
        let value = extract_embedded_json(html, "searchResults").unwrap();
        assert_eq!(value["result"]["items"][0]["a"], "};");
        assert!(extract_embedded_json("<html></html>", "searchResults").is_none());
    }

    #[test]
    fn test_split_full_name() {
        assert_eq!(
            split_full_name("ИВАНОВ ИВАН ИВАНОВИЧ"),
            Some(("ИВАНОВ".into(), "ИВАН".into(), "ИВАНОВИЧ".into()))
        );
        assert_eq!(
            split_full_name("ИВАНОВ ИВАН"),
            Some(("ИВАНОВ".into(), "ИВАН".into(), String::new()))
        );
        assert_eq!(split_full_name("ИВАНОВ"), None);
    }

    #[test]
    fn test_bool_field() {
        let v = json!({"a": true, "b": 1, "c": "yes", "d": "no", "e": null});
        assert!(bool_field(&v, "a"));
        assert!(bool_field(&v, "b"));
        assert!(bool_field(&v, "c"));
        assert!(!bool_field(&v, "d"));
        assert!(!bool_field(&v, "e"));
        assert!(!bool_field(&v, "missing"));
    }
}
