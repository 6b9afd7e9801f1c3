use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{info, warn};

use super::{bool_field, decode_body, parse_amount, str_field, SourceAdapter, SourceError, SourceResult};
use crate::fetch_client::{FetchClient, FetchRequest, FetchStats};
use crate::models::{Debt, DebtKind, DebtStatus, EnrichmentFragment, Source};

/// Tax authority (ФНС). Authoritative for INN liveness and the
/// deceased/wanted flags. Searchable by INN only.
pub struct TaxAdapter {
    base_url: String,
    client: FetchClient,
}

impl TaxAdapter {
    pub fn new(base_url: &str, client: FetchClient) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for TaxAdapter {
    fn source(&self) -> Source {
        Source::Tax
    }

    fn accepts_name(&self) -> bool {
        false
    }

    async fn search_by_tax_id(&self, tax_id: &str) -> SourceResult {
        let url = format!("{}/inn/{}/status", self.base_url, tax_id);
        let response = match self.client.fetch(&FetchRequest::get(url)).await {
            Ok(response) => response,
            Err(e) => return SourceResult::Err(e.into()),
        };

        match decode_body(&response, "innStatus") {
            Ok(Some(data)) => {
                let fragment = parse_status(&data);
                if fragment.flagged_deceased_or_wanted == Some(true) {
                    warn!("⚠ Tax INN {}: person flagged deceased or wanted", tax_id);
                }
                info!(
                    "✓ Tax INN {}: active={}",
                    tax_id,
                    fragment.inn_active.unwrap_or(true)
                );
                SourceResult::Ok(fragment)
            }
            Ok(None) => {
                SourceResult::Err(SourceError::Parse("expected JSON INN status".to_string()))
            }
            Err(e) => SourceResult::Err(e),
        }
    }

    async fn search_by_name_and_dob(
        &self,
        _full_name: &str,
        _dob: Option<NaiveDate>,
    ) -> SourceResult {
        SourceResult::MissingKey
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

fn parse_status(data: &Value) -> EnrichmentFragment {
    let status = str_field(data, "status").to_lowercase();
    let active = matches!(status.as_str(), "active" | "действующий" | "действует");

    let mut fragment = EnrichmentFragment::empty(Source::Tax);
    fragment.inn_active = Some(active);
    fragment.flagged_deceased_or_wanted =
        Some(bool_field(data, "is_dead") || bool_field(data, "is_wanted"));

    let debt = data.get("debt").and_then(parse_amount).unwrap_or(0.0);
    if debt > 0.0 {
        fragment.debts.push(Debt {
            amount: debt,
            kind: DebtKind::Tax,
            creditor: "ФНС России".to_string(),
            status: DebtStatus::Active,
            date: None,
            source: Source::Tax,
        });
    }
    fragment
}
