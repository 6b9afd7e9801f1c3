//! Rule-based lead scoring.
//!
//! Every rule is evaluated on every lead, in table order; the signed points
//! are summed and clamped to `0..=100`. The first three triggered reasons are
//! kept. An optional probability model can be blended in, and a model
//! failure never blocks scoring.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::model::ProbabilityModel;
use crate::models::{EnrichedLead, ScoredLead};

pub const DEFAULT_HIGH_DEBT_THRESHOLD: f64 = 250_000.0;
pub const DEFAULT_LOW_DEBT_FLOOR: f64 = 100_000.0;
pub const DEFAULT_TARGET_THRESHOLD: u8 = 50;

const RULE_WEIGHT: f64 = 0.7;
const MODEL_WEIGHT: f64 = 0.3;

/// Thresholds the rules are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoringParams {
    /// Total debt above which the high-debt bonus applies.
    pub high_debt_threshold: f64,
    /// Total debt below which the low-debt penalty applies.
    pub low_debt_floor: f64,
    pub target_threshold: u8,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            high_debt_threshold: DEFAULT_HIGH_DEBT_THRESHOLD,
            low_debt_floor: DEFAULT_LOW_DEBT_FLOOR,
            target_threshold: DEFAULT_TARGET_THRESHOLD,
        }
    }
}

impl ScoringParams {
    pub fn from_config(config: &Config, high_debt_threshold: f64) -> Self {
        Self {
            high_debt_threshold,
            low_debt_floor: config.low_debt_floor,
            target_threshold: config.target_score_threshold,
        }
    }
}

// ============ Rules ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    HighDebt,
    BankOrMfoDebt,
    NoProperty,
    RecentCourtOrder,
    NotBankrupt,
    InnActive,
    ManyDebts,
    LowDebt,
    OnlyTaxOrUtilityDebts,
    Bankrupt,
    DeadOrInactiveInn,
}

/// Evaluation order. Reasons are reported in this order too.
pub const RULES: [Rule; 11] = [
    Rule::HighDebt,
    Rule::BankOrMfoDebt,
    Rule::NoProperty,
    Rule::RecentCourtOrder,
    Rule::NotBankrupt,
    Rule::InnActive,
    Rule::ManyDebts,
    Rule::LowDebt,
    Rule::OnlyTaxOrUtilityDebts,
    Rule::Bankrupt,
    Rule::DeadOrInactiveInn,
];

impl Rule {
    pub fn points(&self) -> i32 {
        match self {
            Rule::HighDebt => 30,
            Rule::BankOrMfoDebt => 20,
            Rule::NoProperty => 10,
            Rule::RecentCourtOrder => 15,
            Rule::NotBankrupt => 10,
            Rule::InnActive => 5,
            Rule::ManyDebts => 5,
            Rule::LowDebt => -15,
            Rule::OnlyTaxOrUtilityDebts => -10,
            Rule::Bankrupt => -100,
            Rule::DeadOrInactiveInn => -100,
        }
    }

    pub fn applies(&self, lead: &EnrichedLead, params: &ScoringParams) -> bool {
        match self {
            Rule::HighDebt => lead.total_debt > params.high_debt_threshold,
            Rule::BankOrMfoDebt => lead.has_bank_or_mfo_debt(),
            Rule::NoProperty => !lead.has_property,
            Rule::RecentCourtOrder => lead.has_recent_court_order,
            Rule::NotBankrupt => !lead.is_bankrupt,
            Rule::InnActive => lead.inn_active,
            Rule::ManyDebts => lead.debts.len() > 2,
            Rule::LowDebt => lead.total_debt < params.low_debt_floor,
            Rule::OnlyTaxOrUtilityDebts => lead.only_tax_or_utility_debts(),
            Rule::Bankrupt => lead.is_bankrupt,
            Rule::DeadOrInactiveInn => !lead.inn_active || lead.flagged_deceased_or_wanted,
        }
    }

    pub fn reason(&self, params: &ScoringParams) -> String {
        match self {
            Rule::HighDebt => format!(
                "Сумма долгов больше {} рублей",
                group_thousands(params.high_debt_threshold)
            ),
            Rule::BankOrMfoDebt => "Долг от банка или МФО".to_string(),
            Rule::NoProperty => "Нет имущества".to_string(),
            Rule::RecentCourtOrder => "Судебный приказ за последние 3 месяца".to_string(),
            Rule::NotBankrupt => "Нет признаков банкротства".to_string(),
            Rule::InnActive => "ИНН активен".to_string(),
            Rule::ManyDebts => "Более двух долгов".to_string(),
            Rule::LowDebt => format!(
                "Долг менее {} рублей",
                group_thousands(params.low_debt_floor)
            ),
            Rule::OnlyTaxOrUtilityDebts => "Только налоговые долги или ЖКХ".to_string(),
            Rule::Bankrupt => "Человек признан банкротом".to_string(),
            Rule::DeadOrInactiveInn => "ИНН мертвый или человек умер/в розыске".to_string(),
        }
    }
}

/// `250000.0` -> `"250,000"`.
fn group_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}

/// Rules triggered by `lead`, in table order.
pub fn triggered_rules(lead: &EnrichedLead, params: &ScoringParams) -> Vec<Rule> {
    RULES
        .iter()
        .copied()
        .filter(|rule| rule.applies(lead, params))
        .collect()
}

// ============ Cohorts ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    HighDebtRecentCourt,
    BankOnlyNoProperty,
    MultipleDebtsActive,
    MediumDebtProperty,
    Default,
}

/// Priority order; the first match wins.
pub const COHORTS: [Cohort; 5] = [
    Cohort::HighDebtRecentCourt,
    Cohort::BankOnlyNoProperty,
    Cohort::MultipleDebtsActive,
    Cohort::MediumDebtProperty,
    Cohort::Default,
];

impl Cohort {
    pub fn label(&self) -> &'static str {
        match self {
            Cohort::HighDebtRecentCourt => "high_debt_recent_court",
            Cohort::BankOnlyNoProperty => "bank_only_no_property",
            Cohort::MultipleDebtsActive => "multiple_debts_active",
            Cohort::MediumDebtProperty => "medium_debt_property",
            Cohort::Default => "default",
        }
    }

    pub fn matches(&self, lead: &EnrichedLead, params: &ScoringParams) -> bool {
        match self {
            Cohort::HighDebtRecentCourt => {
                lead.total_debt > params.high_debt_threshold && lead.has_recent_court_order
            }
            Cohort::BankOnlyNoProperty => lead.has_bank_or_mfo_debt() && !lead.has_property,
            Cohort::MultipleDebtsActive => lead.debts.len() > 2 && lead.inn_active,
            Cohort::MediumDebtProperty => {
                lead.total_debt > params.low_debt_floor
                    && lead.total_debt < params.high_debt_threshold
                    && lead.has_property
            }
            Cohort::Default => true,
        }
    }
}

pub fn assign_cohort(lead: &EnrichedLead, params: &ScoringParams) -> Cohort {
    COHORTS
        .iter()
        .copied()
        .find(|cohort| cohort.matches(lead, params))
        .unwrap_or(Cohort::Default)
}

// ============ Engine ============

/// Scores enriched leads, optionally blending in a probability model.
#[derive(Clone, Default)]
pub struct ScoringEngine {
    params: ScoringParams,
    model: Option<Arc<dyn ProbabilityModel>>,
}

impl ScoringEngine {
    pub fn new(params: ScoringParams) -> Self {
        Self {
            params,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ProbabilityModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// Pure rule score: same lead in, same score out.
    pub fn score(&self, lead: &EnrichedLead) -> ScoredLead {
        self.score_inner(lead, false)
    }

    /// Rule score blended 70/30 with the model probability, when a model is
    /// configured and answers.
    pub fn score_with_model(&self, lead: &EnrichedLead) -> ScoredLead {
        self.score_inner(lead, true)
    }

    fn score_inner(&self, lead: &EnrichedLead, use_model: bool) -> ScoredLead {
        let params = &self.params;
        let rules = triggered_rules(lead, params);

        let sum: i32 = rules.iter().map(Rule::points).sum();
        let mut score = sum.clamp(0, 100);
        let mut reasons: Vec<String> = rules.iter().map(|r| r.reason(params)).collect();

        if use_model {
            if let Some(model) = &self.model {
                match model.predict_probability(lead) {
                    Ok(probability) => {
                        let blended =
                            score as f64 * RULE_WEIGHT + f64::from(probability) * MODEL_WEIGHT;
                        score = (blended.round() as i32).clamp(0, 100);
                        reasons.push(format!("ML-оценка: {}", probability));
                    }
                    Err(e) => {
                        warn!("⚠ Model unavailable for lead {}: {}", lead.lead.lead_id, e);
                    }
                }
            }
        }

        let score = score as u8;
        let is_target = score >= params.target_threshold
            && !lead.is_bankrupt
            && lead.inn_active
            && !lead.flagged_deceased_or_wanted;

        ScoredLead {
            enriched: lead.clone(),
            score,
            reasons: pad_reasons(reasons),
            is_target,
            group: assign_cohort(lead, params).label().to_string(),
        }
    }

    pub fn score_batch(&self, leads: &[EnrichedLead], use_model: bool) -> Vec<ScoredLead> {
        leads
            .iter()
            .map(|lead| self.score_inner(lead, use_model))
            .collect()
    }
}

/// Scores with default floor and target threshold.
pub fn score(lead: &EnrichedLead, min_debt_threshold: f64) -> ScoredLead {
    ScoringEngine::new(ScoringParams {
        high_debt_threshold: min_debt_threshold,
        ..ScoringParams::default()
    })
    .score(lead)
}

/// First three reasons, right-padded with empty strings.
fn pad_reasons(reasons: Vec<String>) -> [String; 3] {
    let mut it = reasons.into_iter();
    [
        it.next().unwrap_or_default(),
        it.next().unwrap_or_default(),
        it.next().unwrap_or_default(),
    ]
}

// ============ Statistics ============

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringStats {
    pub total_leads: usize,
    pub target_leads: usize,
    pub target_percentage: f64,
    pub avg_score: f64,
    pub min_score: u8,
    pub max_score: u8,
    pub groups_distribution: BTreeMap<String, usize>,
    pub score_ranges: BTreeMap<String, usize>,
}

pub fn scoring_stats(leads: &[ScoredLead]) -> ScoringStats {
    if leads.is_empty() {
        return ScoringStats::default();
    }

    let mut stats = ScoringStats {
        total_leads: leads.len(),
        min_score: u8::MAX,
        ..ScoringStats::default()
    };
    for range in ["0-25", "26-50", "51-75", "76-100"] {
        stats.score_ranges.insert(range.to_string(), 0);
    }

    let mut total: u64 = 0;
    for lead in leads {
        total += u64::from(lead.score);
        stats.min_score = stats.min_score.min(lead.score);
        stats.max_score = stats.max_score.max(lead.score);
        if lead.is_target {
            stats.target_leads += 1;
        }
        *stats.groups_distribution.entry(lead.group.clone()).or_insert(0) += 1;

        let range = match lead.score {
            0..=25 => "0-25",
            26..=50 => "26-50",
            51..=75 => "51-75",
            _ => "76-100",
        };
        *stats.score_ranges.entry(range.to_string()).or_insert(0) += 1;
    }

    stats.avg_score = total as f64 / leads.len() as f64;
    stats.target_percentage = stats.target_leads as f64 * 100.0 / leads.len() as f64;
    stats
}

/// Target leads, highest score first; ties keep input order.
pub fn target_leads(leads: &[ScoredLead]) -> Vec<ScoredLead> {
    let mut targets: Vec<ScoredLead> = leads.iter().filter(|l| l.is_target).cloned().collect();
    targets.sort_by(|a, b| b.score.cmp(&a.score));
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use crate::models::{CanonicalLead, Debt, DebtKind, DebtStatus, Source};

    fn debt(kind: DebtKind, amount: f64) -> Debt {
        Debt {
            amount,
            kind,
            creditor: String::new(),
            status: DebtStatus::Active,
            date: None,
            source: Source::Fssp,
        }
    }

    fn lead_with(debts: Vec<Debt>) -> EnrichedLead {
        let mut lead = EnrichedLead::from_canonical(CanonicalLead::new("ИВАНОВ ИВАН", "", "7701123456"));
        lead.total_debt = debts.iter().map(|d| d.amount).sum();
        lead.debts = debts;
        lead
    }

    struct FixedModel(Result<u8, ModelError>);

    impl ProbabilityModel for FixedModel {
        fn predict_probability(&self, _lead: &EnrichedLead) -> Result<u8, ModelError> {
            self.0.clone()
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(250_000.0), "250,000");
        assert_eq!(group_thousands(1_000_000.0), "1,000,000");
        assert_eq!(group_thousands(999.0), "999");
    }

    #[test]
    fn test_rule_points_table() {
        let total: i32 = RULES.iter().map(Rule::points).sum();
        assert_eq!(total, 30 + 20 + 10 + 15 + 10 + 5 + 5 - 15 - 10 - 100 - 100);
    }

    #[test]
    fn test_low_debt_tax_only_lead() {
        let lead = lead_with(vec![debt(DebtKind::Tax, 5_000.0)]);
        let scored = ScoringEngine::default().score(&lead);

        // no property +10, not bankrupt +10, inn active +5, low debt -15, tax only -10
        assert_eq!(scored.score, 0);
        assert_eq!(scored.reasons[0], "Нет имущества");
        assert_eq!(scored.reasons[2], "ИНН активен");
        assert!(!scored.is_target);
    }

    #[test]
    fn test_inactive_inn_excludes() {
        let mut lead = lead_with(vec![debt(DebtKind::Bank, 900_000.0)]);
        lead.inn_active = false;
        let scored = ScoringEngine::default().score(&lead);
        assert_eq!(scored.score, 0);
        assert!(!scored.is_target);
    }

    #[test]
    fn test_deceased_flag_excludes_target() {
        let mut lead = lead_with(vec![debt(DebtKind::Bank, 900_000.0)]);
        lead.has_recent_court_order = true;
        lead.flagged_deceased_or_wanted = true;
        let scored = ScoringEngine::default().score(&lead);
        assert!(!scored.is_target);
        assert!(triggered_rules(&lead, &ScoringParams::default()).contains(&Rule::DeadOrInactiveInn));
    }

    #[test]
    fn test_cohort_priority() {
        let params = ScoringParams::default();

        let mut lead = lead_with(vec![debt(DebtKind::Bank, 300_000.0)]);
        lead.has_recent_court_order = true;
        assert_eq!(assign_cohort(&lead, &params), Cohort::HighDebtRecentCourt);

        lead.has_recent_court_order = false;
        assert_eq!(assign_cohort(&lead, &params), Cohort::BankOnlyNoProperty);

        let many = lead_with(vec![
            debt(DebtKind::Other, 1.0),
            debt(DebtKind::Other, 1.0),
            debt(DebtKind::Other, 1.0),
        ]);
        assert_eq!(assign_cohort(&many, &params), Cohort::MultipleDebtsActive);

        let mut medium = lead_with(vec![debt(DebtKind::Tax, 150_000.0)]);
        medium.has_property = true;
        assert_eq!(assign_cohort(&medium, &params), Cohort::MediumDebtProperty);

        let plain = lead_with(vec![]);
        assert_eq!(assign_cohort(&plain, &params), Cohort::Default);
    }

    #[test]
    fn test_model_blend() {
        let mut lead = lead_with(vec![debt(DebtKind::Bank, 600_000.0)]);
        lead.has_recent_court_order = true;
        let engine = ScoringEngine::default().with_model(Arc::new(FixedModel(Ok(40))));

        let scored = engine.score_with_model(&lead);
        // 90 * 0.7 + 40 * 0.3 = 75
        assert_eq!(scored.score, 75);
        assert!(scored.reasons.iter().all(|r| !r.starts_with("ML")));

        let rule_only = engine.score(&lead);
        assert_eq!(rule_only.score, 90);
    }

    #[test]
    fn test_model_reason_fills_free_slot() {
        let mut lead = lead_with(vec![]);
        lead.has_property = true;
        lead.inn_active = false;
        let engine = ScoringEngine::default().with_model(Arc::new(FixedModel(Ok(10))));
        let scored = engine.score_with_model(&lead);
        // not bankrupt, low debt, inactive inn fire; ML reason truncated away
        assert_eq!(scored.reasons[2], "ИНН мертвый или человек умер/в розыске");

        let mut bare = lead_with(vec![debt(DebtKind::Other, 200_000.0)]);
        bare.has_property = true;
        bare.is_bankrupt = true;
        let scored = engine.score_with_model(&bare);
        assert_eq!(scored.reasons[0], "ИНН активен");
        assert_eq!(scored.reasons[1], "Человек признан банкротом");
        assert_eq!(scored.reasons[2], "ML-оценка: 10");
    }

    #[test]
    fn test_model_failure_falls_back() {
        let lead = lead_with(vec![debt(DebtKind::Bank, 600_000.0)]);
        let engine = ScoringEngine::default().with_model(Arc::new(FixedModel(Err(
            ModelError::Unavailable("offline".into()),
        ))));
        assert_eq!(engine.score_with_model(&lead), engine.score(&lead));
    }

    #[test]
    fn test_stats_and_targets() {
        let engine = ScoringEngine::default();
        let mut high = lead_with(vec![debt(DebtKind::Bank, 600_000.0)]);
        high.has_recent_court_order = true;
        let low = lead_with(vec![debt(DebtKind::Tax, 10.0)]);
        let mid = lead_with(vec![debt(DebtKind::Bank, 300_000.0)]);

        let scored = engine.score_batch(&[low, mid, high], false);
        let stats = scoring_stats(&scored);

        assert_eq!(stats.total_leads, 3);
        assert_eq!(stats.target_leads, 2);
        assert_eq!(stats.min_score, 0);
        assert_eq!(stats.max_score, 90);
        assert_eq!(stats.score_ranges["0-25"], 1);
        assert_eq!(stats.score_ranges["76-100"], 1);

        let targets = target_leads(&scored);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].score, 90);
        assert_eq!(targets[1].score, 75);
    }

    #[test]
    fn test_empty_stats() {
        assert_eq!(scoring_stats(&[]), ScoringStats::default());
    }
}
