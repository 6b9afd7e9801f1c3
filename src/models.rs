use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

// ============ Canonical Lead ============

/// A normalized candidate record, the unit of work for enrichment.
///
/// At least one of `full_name`, `phone` or `tax_id` is non-empty; records
/// violating this are dropped by the normalizer before they get here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalLead {
    /// Content fingerprint of `full_name + phone + tax_id`.
    pub lead_id: String,
    /// Uppercased, cleaned full name (ФИО) or empty.
    pub full_name: String,
    /// E.164 phone number or empty.
    pub phone: String,
    /// 10 or 12 digit INN or empty.
    pub tax_id: String,
    /// Date of birth, when the upload carried a parsable one.
    pub date_of_birth: Option<NaiveDate>,
    /// Free-text address as uploaded.
    pub address: String,
    /// Region inferred from address or phone prefix.
    pub region: String,
    /// Name of the uploaded file this record came from.
    pub source_file: String,
    /// Kind of upload the record came from.
    #[serde(default)]
    pub source_type: SourceType,
}

/// Upload kind, detected from the file name first and the columns second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Tax authority export.
    Fns,
    /// Public services portal export.
    Gosuslugi,
    /// Delivery service customer base.
    Delivery,
    /// No known name, but an INN column.
    InnBased,
    /// No known name, but a phone column.
    PhoneBased,
    #[default]
    Generic,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Fns => "fns",
            SourceType::Gosuslugi => "gosuslugi",
            SourceType::Delivery => "delivery",
            SourceType::InnBased => "inn_based",
            SourceType::PhoneBased => "phone_based",
            SourceType::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CanonicalLead {
    /// Builds a lead and derives its `lead_id` from the identity fields.
    pub fn new(
        full_name: impl Into<String>,
        phone: impl Into<String>,
        tax_id: impl Into<String>,
    ) -> Self {
        let full_name = full_name.into();
        let phone = phone.into();
        let tax_id = tax_id.into();
        let lead_id = lead_fingerprint(&full_name, &phone, &tax_id);
        Self {
            lead_id,
            full_name,
            phone,
            tax_id,
            date_of_birth: None,
            address: String::new(),
            region: String::new(),
            source_file: String::new(),
            source_type: SourceType::Generic,
        }
    }

    pub fn with_date_of_birth(mut self, dob: Option<NaiveDate>) -> Self {
        self.date_of_birth = dob;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = source_file.into();
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    /// True when the record carries at least one usable identity field.
    pub fn has_identity(&self) -> bool {
        !self.full_name.is_empty() || !self.phone.is_empty() || !self.tax_id.is_empty()
    }
}

/// Deterministic lead identity: first 16 hex chars of SHA-256 over the
/// concatenated identity fields. Identical inputs always collide.
pub fn lead_fingerprint(full_name: &str, phone: &str, tax_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(full_name.as_bytes());
    hasher.update(phone.as_bytes());
    hasher.update(tax_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ============ Sources ============

/// The five fixed upstream registries.
///
/// Variant order is the fragment merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Enforcement proceedings (ФССП).
    Fssp,
    /// Bankruptcy register (Федресурс).
    Fedresurs,
    /// Real estate register (Росреестр).
    Rosreestr,
    /// Court orders.
    Courts,
    /// Tax authority (ФНС).
    Tax,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Fssp,
        Source::Fedresurs,
        Source::Rosreestr,
        Source::Courts,
        Source::Tax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Fssp => "fssp",
            Source::Fedresurs => "fedresurs",
            Source::Rosreestr => "rosreestr",
            Source::Courts => "courts",
            Source::Tax => "tax",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one adapter call for one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "skipped-missing-key")]
    SkippedMissingKey,
}

impl FragmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentStatus::Ok => "ok",
            FragmentStatus::Error => "error",
            FragmentStatus::SkippedMissingKey => "skipped-missing-key",
        }
    }
}

impl fmt::Display for FragmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Debts & Court Orders ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtKind {
    Bank,
    Mfo,
    Tax,
    Utilities,
    Other,
}

impl DebtKind {
    /// Classifies a debt by keywords in the creditor name.
    pub fn from_creditor(creditor: &str) -> Self {
        let lower = creditor.to_lowercase();
        let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has_any(&["мфо", "мфк", "микрофинанс", "mfo", "займ"]) {
            DebtKind::Mfo
        } else if has_any(&["банк", "bank", "кредит"]) {
            DebtKind::Bank
        } else if has_any(&["налог", "фнс", "tax"]) {
            DebtKind::Tax
        } else if has_any(&["жкх", "коммунальн", "utilit", "водоканал", "энерго"]) {
            DebtKind::Utilities
        } else {
            DebtKind::Other
        }
    }

    pub fn is_bank_or_mfo(&self) -> bool {
        matches!(self, DebtKind::Bank | DebtKind::Mfo)
    }

    pub fn is_tax_or_utilities(&self) -> bool {
        matches!(self, DebtKind::Tax | DebtKind::Utilities)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtStatus {
    Active,
    Closed,
    Unknown,
}

impl DebtStatus {
    /// Maps free-text upstream statuses (Russian or English, any case)
    /// onto the fixed vocabulary.
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if lower.is_empty() {
            return DebtStatus::Unknown;
        }

        const CLOSED: &[&str] = &[
            "closed",
            "completed",
            "finished",
            "окончен",
            "прекращен",
            "завершен",
            "исполнено",
        ];
        const ACTIVE: &[&str] = &[
            "active",
            "ongoing",
            "in progress",
            "в процессе",
            "производств",
            "взыскание",
            "исполняется",
            "рассматривается",
            "открыто",
        ];

        if CLOSED.iter().any(|w| lower.contains(w)) {
            DebtStatus::Closed
        } else if ACTIVE.iter().any(|w| lower.contains(w)) {
            DebtStatus::Active
        } else {
            DebtStatus::Unknown
        }
    }
}

/// One debt as reported by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: DebtKind,
    pub creditor: String,
    pub status: DebtStatus,
    pub date: Option<NaiveDate>,
    pub source: Source,
}

/// A court order (судебный приказ) found for the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourtOrder {
    pub case_number: String,
    pub court: String,
    pub status: DebtStatus,
    /// `None` when the upstream date could not be parsed.
    pub date: Option<NaiveDate>,
    pub amount: Option<f64>,
}

// ============ Fragments ============

/// One adapter's typed partial update to an enriched lead.
///
/// Fields a source has no opinion on stay `None`/empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentFragment {
    pub source: Source,
    pub debts: Vec<Debt>,
    pub is_bankrupt: Option<bool>,
    pub has_property: Option<bool>,
    pub property_count: usize,
    pub encumbrance_count: usize,
    pub court_orders: Vec<CourtOrder>,
    pub has_recent_court_order: Option<bool>,
    pub inn_active: Option<bool>,
    /// Deceased or wanted, as flagged by the tax authority.
    pub flagged_deceased_or_wanted: Option<bool>,
}

impl EnrichmentFragment {
    pub fn empty(source: Source) -> Self {
        Self {
            source,
            debts: Vec::new(),
            is_bankrupt: None,
            has_property: None,
            property_count: 0,
            encumbrance_count: 0,
            court_orders: Vec::new(),
            has_recent_court_order: None,
            inn_active: None,
            flagged_deceased_or_wanted: None,
        }
    }
}

// ============ Enriched Lead ============

/// A canonical lead plus everything the sources reported about it.
///
/// Created empty at orchestration start and mutated only through
/// [`EnrichedLead::apply`]; scoring treats it as immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedLead {
    #[serde(flatten)]
    pub lead: CanonicalLead,
    pub total_debt: f64,
    pub debts: Vec<Debt>,
    pub has_property: bool,
    pub property_count: usize,
    pub encumbrance_count: usize,
    pub is_bankrupt: bool,
    pub inn_active: bool,
    pub flagged_deceased_or_wanted: bool,
    pub has_recent_court_order: bool,
    pub court_orders: Vec<CourtOrder>,
    pub enrichment_status: BTreeMap<Source, FragmentStatus>,
}

impl EnrichedLead {
    /// Baseline before any source reports: no debts, no property, not
    /// bankrupt, INN presumed active until the tax authority says otherwise.
    pub fn from_canonical(lead: CanonicalLead) -> Self {
        Self {
            lead,
            total_debt: 0.0,
            debts: Vec::new(),
            has_property: false,
            property_count: 0,
            encumbrance_count: 0,
            is_bankrupt: false,
            inn_active: true,
            flagged_deceased_or_wanted: false,
            has_recent_court_order: false,
            court_orders: Vec::new(),
            enrichment_status: BTreeMap::new(),
        }
    }

    /// Merges one fragment additively.
    ///
    /// Debts and court orders accumulate, property and recency flags are
    /// OR'd. Bankruptcy is taken from Fedresurs only, INN liveness and the
    /// deceased/wanted flag from the tax authority only.
    pub fn apply(&mut self, fragment: EnrichmentFragment) {
        let source = fragment.source;

        for debt in fragment.debts {
            self.total_debt += debt.amount;
            self.debts.push(debt);
        }
        self.court_orders.extend(fragment.court_orders);

        if let Some(has_property) = fragment.has_property {
            self.has_property |= has_property;
        }
        self.property_count += fragment.property_count;
        self.encumbrance_count += fragment.encumbrance_count;

        if let Some(recent) = fragment.has_recent_court_order {
            self.has_recent_court_order |= recent;
        }

        if source == Source::Fedresurs {
            if let Some(bankrupt) = fragment.is_bankrupt {
                self.is_bankrupt = bankrupt;
            }
        }

        if source == Source::Tax {
            if let Some(active) = fragment.inn_active {
                self.inn_active = active;
            }
            if let Some(flagged) = fragment.flagged_deceased_or_wanted {
                self.flagged_deceased_or_wanted = flagged;
            }
        }
    }

    /// Merges a set of fragments in the fixed source order, regardless of
    /// the order they were produced in.
    pub fn merge_all(&mut self, mut fragments: Vec<EnrichmentFragment>) {
        fragments.sort_by_key(|f| f.source);
        for fragment in fragments {
            self.apply(fragment);
        }
    }

    pub fn has_bank_or_mfo_debt(&self) -> bool {
        self.debts.iter().any(|d| d.kind.is_bank_or_mfo())
    }

    /// Non-empty and every debt is a tax or utilities debt.
    pub fn only_tax_or_utility_debts(&self) -> bool {
        !self.debts.is_empty() && self.debts.iter().all(|d| d.kind.is_tax_or_utilities())
    }

    pub fn status_of(&self, source: Source) -> Option<FragmentStatus> {
        self.enrichment_status.get(&source).copied()
    }
}

// ============ Scored Lead ============

/// An enriched lead with its score, reasons and cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredLead {
    #[serde(flatten)]
    pub enriched: EnrichedLead,
    /// 0..=100.
    pub score: u8,
    /// Exactly three entries, padded with empty strings.
    pub reasons: [String; 3],
    pub is_target: bool,
    pub group: String,
}

// ============ Errors surfaced to callers ============

/// A recovered per-lead, per-source failure, exposed for external logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentError {
    pub full_name: String,
    pub tax_id: String,
    pub error_text: String,
    pub source_name: String,
}

impl EnrichmentError {
    pub fn new(lead: &CanonicalLead, source_name: impl Into<String>, error_text: impl Into<String>) -> Self {
        Self {
            full_name: lead.full_name.clone(),
            tax_id: lead.tax_id.clone(),
            error_text: error_text.into(),
            source_name: source_name.into(),
        }
    }
}

// ============ Run Parameters ============

/// Parameters of one scoring run, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    /// Regions to keep; empty keeps all.
    pub regions: Vec<String>,
    /// High-debt threshold for scoring.
    pub min_debt_amount: f64,
    pub exclude_bankrupt: bool,
    pub exclude_no_debt: bool,
    pub only_with_property: bool,
    pub only_bank_mfo_debt: bool,
    pub only_recent_court_order: bool,
    pub only_active_inn: bool,
    pub use_ml_model: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            min_debt_amount: 250_000.0,
            exclude_bankrupt: false,
            exclude_no_debt: false,
            only_with_property: false,
            only_bank_mfo_debt: false,
            only_recent_court_order: false,
            only_active_inn: false,
            use_ml_model: false,
        }
    }
}
