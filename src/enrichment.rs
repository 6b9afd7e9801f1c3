//! Enrichment orchestration.
//!
//! For every canonical lead the engine:
//! 1. Serves a cached result when one is still fresh
//! 2. Fans out to the five source adapters under one global concurrency bound
//! 3. Merges the fragments in fixed source order
//! 4. Records a per-source status and a structured error for every failure
//!
//! No source failure and no lead failure aborts a batch.
use futures::future::join_all;
use futures::FutureExt;
use moka::future::Cache;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::SourceBreakers;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::fetch_client::FetchStats;
use crate::models::{CanonicalLead, EnrichedLead, EnrichmentError, FragmentStatus, Source};
use crate::proxy_pool::{ProxyPool, ProxySource, ProxyStats};
use crate::sources::{build_adapters, SharedAdapter, SourceError, SourceResult};

/// Tunables of the orchestrator itself.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on in-flight adapter calls across the whole batch.
    pub concurrency: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub breaker_threshold: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 100_000,
            breaker_threshold: 5,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.concurrent_requests,
            cache_ttl: config.cache_ttl(),
            cache_capacity: config.cache_max_capacity,
            breaker_threshold: config.breaker_failure_threshold,
        }
    }
}

/// Enrichment of one lead plus the failures recovered along the way.
#[derive(Debug, Clone)]
pub struct LeadEnrichment {
    pub lead: EnrichedLead,
    pub errors: Vec<EnrichmentError>,
    pub from_cache: bool,
}

/// Enriched batch in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchEnrichment {
    pub leads: Vec<EnrichedLead>,
    pub errors: Vec<EnrichmentError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentStats {
    pub sources: BTreeMap<Source, FetchStats>,
    pub proxies: Option<ProxyStats>,
    pub cached_leads: u64,
}

/// Fans leads out to the source adapters.
///
/// Cheap to clone; clones share the cache, semaphore, breakers and proxy pool.
#[derive(Clone)]
pub struct EnrichmentEngine {
    adapters: Arc<Vec<SharedAdapter>>,
    semaphore: Arc<Semaphore>,
    cache: Cache<String, EnrichedLead>,
    breakers: Arc<SourceBreakers>,
    proxies: Option<Arc<ProxyPool>>,
}

impl EnrichmentEngine {
    pub fn new(
        adapters: Vec<SharedAdapter>,
        settings: EngineSettings,
        proxies: Option<Arc<ProxyPool>>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.cache_capacity)
            .time_to_live(settings.cache_ttl)
            .build();

        Self {
            adapters: Arc::new(adapters),
            semaphore: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            cache,
            breakers: Arc::new(SourceBreakers::new(settings.breaker_threshold)),
            proxies,
        }
    }

    /// Wires the proxy pool, fetch clients and the five adapters from config.
    pub fn from_config(config: &Config, clock: SharedClock) -> Self {
        let proxies = config
            .use_proxy
            .then(|| Arc::new(ProxyPool::new(ProxySource::File(config.proxy_list_file.clone()))));
        let adapters = build_adapters(config, proxies.clone(), clock);
        Self::new(adapters, EngineSettings::from(config), proxies)
    }

    /// Runs a health check over the proxy pool. `None` when proxies are off.
    pub async fn check_proxies(&self, test_url: &str, timeout: Duration) -> Option<usize> {
        match &self.proxies {
            Some(pool) => Some(pool.health_check_all(test_url, timeout).await),
            None => None,
        }
    }

    /// Enriches every lead concurrently, preserving input order.
    ///
    /// A lead whose task dies is replaced by its un-enriched baseline and
    /// an error record, so the output never has holes.
    pub async fn enrich_batch(&self, leads: Vec<CanonicalLead>) -> BatchEnrichment {
        info!("Enriching batch of {} leads", leads.len());

        let handles: Vec<_> = leads
            .iter()
            .cloned()
            .map(|lead| {
                let engine = self.clone();
                tokio::spawn(async move { engine.enrich_one(lead).await })
            })
            .collect();

        let results = join_all(handles).await;

        let mut batch = BatchEnrichment::default();
        let mut cache_hits = 0usize;
        for (lead, result) in leads.into_iter().zip(results) {
            match result {
                Ok(enrichment) => {
                    if enrichment.from_cache {
                        cache_hits += 1;
                    }
                    batch.errors.extend(enrichment.errors);
                    batch.leads.push(enrichment.lead);
                }
                Err(e) => {
                    error!("❌ Enrichment task for lead {} failed: {}", lead.lead_id, e);
                    batch
                        .errors
                        .push(EnrichmentError::new(&lead, "orchestrator", e.to_string()));
                    batch.leads.push(EnrichedLead::from_canonical(lead));
                }
            }
        }

        info!(
            "✓ Batch enriched: {} leads, {} from cache, {} source errors",
            batch.leads.len(),
            cache_hits,
            batch.errors.len()
        );
        batch
    }

    /// Enriches one lead, from cache when possible.
    pub async fn enrich_one(&self, lead: CanonicalLead) -> LeadEnrichment {
        if let Some(mut cached) = self.cache.get(&lead.lead_id).await {
            debug!("Cache hit for lead {}", lead.lead_id);
            cached.lead = lead;
            return LeadEnrichment {
                lead: cached,
                errors: Vec::new(),
                from_cache: true,
            };
        }

        let calls = self
            .adapters
            .iter()
            .map(|adapter| self.call_adapter(adapter, &lead));
        let results = join_all(calls).await;

        let mut enriched = EnrichedLead::from_canonical(lead.clone());
        let mut fragments = Vec::new();
        let mut errors = Vec::new();

        for (source, result) in results {
            let status = match result {
                SourceResult::Ok(fragment) => {
                    fragments.push(fragment);
                    FragmentStatus::Ok
                }
                SourceResult::MissingKey => FragmentStatus::SkippedMissingKey,
                SourceResult::Err(e) => {
                    warn!("⚠ {} failed for lead {}: {}", source, lead.lead_id, e);
                    errors.push(EnrichmentError::new(&lead, source.as_str(), e.to_string()));
                    FragmentStatus::Error
                }
            };
            enriched.enrichment_status.insert(source, status);
        }

        let any_success = !fragments.is_empty();
        enriched.merge_all(fragments);

        if any_success {
            self.cache
                .insert(lead.lead_id.clone(), enriched.clone())
                .await;
        }

        LeadEnrichment {
            lead: enriched,
            errors,
            from_cache: false,
        }
    }

    /// One guarded adapter call: breaker check, global permit, panic fence.
    async fn call_adapter(
        &self,
        adapter: &SharedAdapter,
        lead: &CanonicalLead,
    ) -> (Source, SourceResult) {
        let source = adapter.source();

        if !self.breakers.is_call_permitted(source) {
            return (source, SourceResult::Err(SourceError::Rejected));
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return (source, SourceResult::Err(SourceError::Rejected));
        };

        let result = match AssertUnwindSafe(adapter.lookup(lead)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("❌ {} adapter panicked: {}", source, message);
                SourceResult::Err(SourceError::Panicked(message))
            }
        };

        match &result {
            SourceResult::Ok(_) => self.breakers.record(source, true),
            SourceResult::Err(_) => self.breakers.record(source, false),
            SourceResult::MissingKey => {}
        }

        (source, result)
    }

    pub fn stats(&self) -> EnrichmentStats {
        EnrichmentStats {
            sources: self
                .adapters
                .iter()
                .map(|a| (a.source(), a.fetch_stats()))
                .collect(),
            proxies: self.proxies.as_ref().map(|p| p.stats()),
            cached_leads: self.cache.entry_count(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_client::FetchError;
    use crate::models::{Debt, DebtKind, DebtStatus, EnrichmentFragment};
    use crate::sources::SourceAdapter;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted adapter: returns a bank debt, fails, or panics.
    struct Scripted {
        source: Source,
        mode: Mode,
        calls: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Debt(f64),
        Fail,
        Panic,
    }

    impl Scripted {
        fn new(source: Source, mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                source,
                mode,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for Scripted {
        fn source(&self) -> Source {
            self.source
        }

        async fn search_by_tax_id(&self, _tax_id: &str) -> SourceResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Debt(amount) => {
                    let mut fragment = EnrichmentFragment::empty(self.source);
                    fragment.debts.push(Debt {
                        amount,
                        kind: DebtKind::Bank,
                        creditor: "Банк".to_string(),
                        status: DebtStatus::Active,
                        date: None,
                        source: self.source,
                    });
                    if self.source == Source::Fedresurs {
                        fragment.is_bankrupt = Some(false);
                    }
                    SourceResult::Ok(fragment)
                }
                Mode::Fail => SourceResult::Err(SourceError::Fetch(FetchError::Blocked {
                    status: 403,
                })),
                Mode::Panic => panic!("markup changed"),
            }
        }

        async fn search_by_name_and_dob(
            &self,
            full_name: &str,
            _dob: Option<NaiveDate>,
        ) -> SourceResult {
            self.search_by_tax_id(full_name).await
        }

        fn fetch_stats(&self) -> FetchStats {
            FetchStats::default()
        }
    }

    fn engine(adapters: Vec<SharedAdapter>) -> EnrichmentEngine {
        EnrichmentEngine::new(adapters, EngineSettings::default(), None)
    }

    #[tokio::test]
    async fn test_proxy_check_needs_a_pool() {
        let direct = engine(Vec::new());
        assert_eq!(
            direct.check_proxies("http://127.0.0.1:9/ip", Duration::from_millis(100)).await,
            None
        );

        let empty = EnrichmentEngine::new(
            Vec::new(),
            EngineSettings::default(),
            Some(Arc::new(ProxyPool::disabled())),
        );
        assert_eq!(
            empty.check_proxies("http://127.0.0.1:9/ip", Duration::from_millis(100)).await,
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_isolated() {
        let adapters: Vec<SharedAdapter> = vec![
            Scripted::new(Source::Fssp, Mode::Debt(1000.0)),
            Scripted::new(Source::Fedresurs, Mode::Panic),
            Scripted::new(Source::Tax, Mode::Debt(500.0)),
        ];
        let result = engine(adapters)
            .enrich_one(CanonicalLead::new("ИВАНОВ ИВАН", "", "7701123456"))
            .await;

        assert_eq!(result.lead.status_of(Source::Fedresurs), Some(FragmentStatus::Error));
        assert_eq!(result.lead.status_of(Source::Fssp), Some(FragmentStatus::Ok));
        assert_eq!(result.lead.debts.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].source_name, "fedresurs");
        assert!(result.errors[0].error_text.contains("markup changed"));
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let fssp = Scripted::new(Source::Fssp, Mode::Debt(1000.0));
        let engine = engine(vec![fssp.clone()]);
        let lead = CanonicalLead::new("ИВАНОВ ИВАН", "", "7701123456");

        let first = engine.enrich_one(lead.clone()).await;
        let second = engine
            .enrich_one(lead.clone().with_source_file("second.csv"))
            .await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.lead.lead.source_file, "second.csv");
        assert_eq!(fssp.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_total_failure_is_not_cached() {
        let fssp = Scripted::new(Source::Fssp, Mode::Fail);
        let engine = engine(vec![fssp.clone()]);
        let lead = CanonicalLead::new("ИВАНОВ ИВАН", "", "7701123456");

        engine.enrich_one(lead.clone()).await;
        engine.enrich_one(lead).await;

        assert_eq!(fssp.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_calling() {
        let fssp = Scripted::new(Source::Fssp, Mode::Fail);
        let engine = EnrichmentEngine::new(
            vec![fssp.clone()],
            EngineSettings {
                breaker_threshold: 2,
                ..EngineSettings::default()
            },
            None,
        );

        for i in 0..3 {
            let lead = CanonicalLead::new(format!("ЛИЦО НОМЕР {}", i), "", "");
            let result = engine.enrich_one(lead).await;
            assert_eq!(result.lead.status_of(Source::Fssp), Some(FragmentStatus::Error));
        }

        assert_eq!(fssp.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let engine = engine(vec![Scripted::new(Source::Fssp, Mode::Debt(10.0))]);
        let leads: Vec<CanonicalLead> = (0..20)
            .map(|i| CanonicalLead::new(format!("ЛИЦО {}", i), "", format!("77011234{:02}", i)))
            .collect();
        let ids: Vec<String> = leads.iter().map(|l| l.lead_id.clone()).collect();

        let batch = engine.enrich_batch(leads).await;

        let out: Vec<String> = batch.leads.iter().map(|l| l.lead.lead_id.clone()).collect();
        assert_eq!(out, ids);
        assert!(batch.errors.is_empty());
    }
}
