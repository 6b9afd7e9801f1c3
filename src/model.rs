use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::errors::{AppError, ResultExt};
use crate::models::EnrichedLead;

/// The model could not produce a probability; scoring falls back to rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("model produced an invalid output: {0}")]
    InvalidOutput(String),
}

/// Black-box probability that a lead converts, in whole percent.
pub trait ProbabilityModel: Send + Sync {
    fn predict_probability(&self, lead: &EnrichedLead) -> Result<u8, ModelError>;
}

/// Per-feature weights, in the order the model was trained on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub total_debt: f64,
    pub debt_count: f64,
    pub has_property: f64,
    pub has_recent_court_order: f64,
    pub inn_active: f64,
    pub is_bankrupt: f64,
}

/// Logistic regression exported as JSON:
///
/// ```json
/// {"intercept": -1.5, "weights": {"total_debt": 0.000002, "debt_count": 0.3}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub intercept: f64,
    #[serde(default)]
    pub weights: FeatureWeights,
}

impl LogisticModel {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading model {}", path.display()))?;
        let model: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing model {}", path.display()))?;
        info!("✓ Loaded logistic model from {}", path.display());
        Ok(model)
    }

    fn logit(&self, lead: &EnrichedLead) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let w = &self.weights;
        self.intercept
            + w.total_debt * lead.total_debt
            + w.debt_count * lead.debts.len() as f64
            + w.has_property * flag(lead.has_property)
            + w.has_recent_court_order * flag(lead.has_recent_court_order)
            + w.inn_active * flag(lead.inn_active)
            + w.is_bankrupt * flag(lead.is_bankrupt)
    }
}

impl ProbabilityModel for LogisticModel {
    fn predict_probability(&self, lead: &EnrichedLead) -> Result<u8, ModelError> {
        let z = self.logit(lead);
        let p = 1.0 / (1.0 + (-z).exp());
        if !p.is_finite() {
            return Err(ModelError::InvalidOutput(format!("logit {}", z)));
        }
        Ok((p * 100.0).clamp(0.0, 100.0) as u8)
    }
}
