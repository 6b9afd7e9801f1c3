//! End-to-end scoring run:
//! normalize -> region filter -> enrich -> score -> run filters.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::enrichment::{EnrichmentEngine, EnrichmentStats};
use crate::errors::AppError;
use crate::ingest::{self, RawBatch};
use crate::model::{LogisticModel, ProbabilityModel};
use crate::models::{CanonicalLead, EnrichmentError, RunParams, ScoredLead};
use crate::normalization::{self, NormalizationStats};
use crate::scoring::{
    scoring_stats, ScoringEngine, ScoringParams, ScoringStats, DEFAULT_HIGH_DEBT_THRESHOLD,
};

/// Everything a run produced, ready for export.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub normalization: NormalizationStats,
    /// Leads removed by the region filter before enrichment.
    pub region_filtered: usize,
    pub enriched: usize,
    /// Leads removed by the run filters after scoring.
    pub filtered: usize,
    pub leads: Vec<ScoredLead>,
    pub errors: Vec<EnrichmentError>,
    pub scoring: ScoringStats,
    pub enrichment: EnrichmentStats,
}

pub struct Pipeline {
    engine: EnrichmentEngine,
    base_params: ScoringParams,
    model: Option<Arc<dyn ProbabilityModel>>,
}

impl Pipeline {
    pub fn new(
        engine: EnrichmentEngine,
        base_params: ScoringParams,
        model: Option<Arc<dyn ProbabilityModel>>,
    ) -> Self {
        Self {
            engine,
            base_params,
            model,
        }
    }

    /// Builds the engine from config. An unreadable model is not fatal: the
    /// run degrades to rule-only scoring.
    pub fn from_config(config: &Config, clock: SharedClock) -> Self {
        let engine = EnrichmentEngine::from_config(config, clock);
        let model = config.ml_model_path.as_deref().and_then(|path| {
            match LogisticModel::load(path) {
                Ok(model) => Some(Arc::new(model) as Arc<dyn ProbabilityModel>),
                Err(e) => {
                    warn!("⚠ ML model not loaded, scoring rule-only: {}", e);
                    None
                }
            }
        });
        let base_params = ScoringParams::from_config(config, DEFAULT_HIGH_DEBT_THRESHOLD);
        Self::new(engine, base_params, model)
    }

    pub fn engine(&self) -> &EnrichmentEngine {
        &self.engine
    }

    pub async fn run_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        params: &RunParams,
    ) -> Result<RunReport, AppError> {
        let batches = ingest::read_files(paths)?;
        Ok(self.run(&batches, params).await)
    }

    pub async fn run(&self, batches: &[RawBatch], params: &RunParams) -> RunReport {
        let run_id = Uuid::new_v4();
        info!("Starting scoring run {}", run_id);

        let normalized = normalization::load(batches);
        let candidates = normalized.leads.len();
        let leads = filter_by_region(normalized.leads, &params.regions);
        let region_filtered = candidates - leads.len();
        if region_filtered > 0 {
            info!("Region filter removed {} leads", region_filtered);
        }

        let batch = self.engine.enrich_batch(leads).await;
        let enriched = batch.leads.len();

        let scoring_params = ScoringParams {
            high_debt_threshold: params.min_debt_amount,
            ..self.base_params
        };
        let mut scorer = ScoringEngine::new(scoring_params);
        if params.use_ml_model {
            match &self.model {
                Some(model) => scorer = scorer.with_model(model.clone()),
                None => warn!("⚠ ML scoring requested but no model is loaded, using rules only"),
            }
        }
        let scored = scorer.score_batch(&batch.leads, params.use_ml_model);

        let leads = apply_filters(scored, params);
        let filtered = enriched - leads.len();
        let scoring = scoring_stats(&leads);

        info!(
            "✓ Run {} complete: {} leads scored, {} targets, {} enrichment errors",
            run_id,
            leads.len(),
            scoring.target_leads,
            batch.errors.len()
        );

        RunReport {
            run_id,
            normalization: normalized.stats,
            region_filtered,
            enriched,
            filtered,
            leads,
            errors: batch.errors,
            scoring,
            enrichment: self.engine.stats(),
        }
    }
}

/// Keeps leads whose region is in `regions` (case-insensitive). Empty keeps all.
pub fn filter_by_region(leads: Vec<CanonicalLead>, regions: &[String]) -> Vec<CanonicalLead> {
    if regions.is_empty() {
        return leads;
    }
    let wanted: Vec<String> = regions.iter().map(|r| r.trim().to_lowercase()).collect();
    leads
        .into_iter()
        .filter(|lead| wanted.contains(&lead.region.to_lowercase()))
        .collect()
}

/// Post-scoring filters, applied in a fixed order.
pub fn apply_filters(leads: Vec<ScoredLead>, params: &RunParams) -> Vec<ScoredLead> {
    leads
        .into_iter()
        .filter(|l| !params.exclude_bankrupt || !l.enriched.is_bankrupt)
        .filter(|l| !params.exclude_no_debt || l.enriched.total_debt > 0.0)
        .filter(|l| !params.only_with_property || l.enriched.has_property)
        .filter(|l| !params.only_bank_mfo_debt || l.enriched.has_bank_or_mfo_debt())
        .filter(|l| !params.only_recent_court_order || l.enriched.has_recent_court_order)
        .filter(|l| !params.only_active_inn || l.enriched.inn_active)
        .collect()
}
