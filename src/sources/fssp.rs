use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    decode_body, format_dob, parse_amount, parse_date, split_full_name, str_field, SourceAdapter,
    SourceError, SourceResult,
};
use crate::fetch_client::{FetchClient, FetchError, FetchRequest, FetchStats};
use crate::models::{Debt, DebtKind, DebtStatus, EnrichmentFragment, Source};

/// Enforcement proceedings register (ФССП). Reports debts under collection.
pub struct FsspAdapter {
    search_url: String,
    client: FetchClient,
}

impl FsspAdapter {
    pub fn new(base_url: &str, client: FetchClient) -> Self {
        Self {
            search_url: format!("{}/iss/ip", base_url.trim_end_matches('/')),
            client,
        }
    }

    async fn search(&self, request: FetchRequest, key: &str) -> SourceResult {
        let response = match self.client.fetch(&request).await {
            Ok(response) => response,
            Err(e) => return SourceResult::Err(e.into()),
        };

        let result = decode_body(&response, "searchResults").map(|data| match data {
            Some(data) => parse_items(&data),
            None => {
                debug!("FSSP page for {} carried no embedded results", key);
                EnrichmentFragment::empty(Source::Fssp)
            }
        });

        if let Ok(fragment) = &result {
            info!("✓ FSSP {}: {} proceedings", key, fragment.debts.len());
        }
        result.into()
    }
}

#[async_trait]
impl SourceAdapter for FsspAdapter {
    fn source(&self) -> Source {
        Source::Fssp
    }

    async fn search_by_tax_id(&self, tax_id: &str) -> SourceResult {
        if !matches!(tax_id.len(), 10 | 12) {
            return SourceResult::Err(SourceError::Fetch(FetchError::InvalidRequest(format!(
                "invalid INN format: {}",
                tax_id
            ))));
        }
        let request = FetchRequest::get(&self.search_url)
            .query("type", "ip")
            .query("inn", tax_id);
        self.search(request, &format!("INN {}", tax_id)).await
    }

    async fn search_by_name_and_dob(
        &self,
        full_name: &str,
        dob: Option<NaiveDate>,
    ) -> SourceResult {
        let Some((last, first, middle)) = split_full_name(full_name) else {
            return SourceResult::MissingKey;
        };
        let request = FetchRequest::get(&self.search_url)
            .query("type", "physical")
            .query("lastname", last)
            .query("firstname", first)
            .query("middlename", middle)
            .query("birthdate", format_dob(dob));
        self.search(request, &format!("FIO {}", full_name)).await
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

/// Reads `result.items[]` into debts.
fn parse_items(data: &Value) -> EnrichmentFragment {
    let mut fragment = EnrichmentFragment::empty(Source::Fssp);

    let items = data
        .pointer("/result/items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for item in &items {
        let creditor = str_field(item, "creditor");
        let amount = item.get("debt_amount").and_then(parse_amount).unwrap_or(0.0);
        fragment.debts.push(Debt {
            amount,
            kind: DebtKind::from_creditor(&creditor),
            status: DebtStatus::normalize(&str_field(item, "status")),
            date: parse_date(&str_field(item, "case_date")),
            creditor,
            source: Source::Fssp,
        });
    }

    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_items_normalizes_fields() {
        let data = json!({
            "result": {
                "items": [
                    {"debt_amount": "150 000,50", "creditor": "ПАО Сбербанк", "status": "Исполнительное производство", "case_date": "01.02.2024", "case_number": "1/24"},
                    {"debt_amount": 3000, "creditor": "ИФНС России №5", "status": "окончено", "case_date": "garbage"}
                ]
            }
        });
        let fragment = parse_items(&data);

        assert_eq!(fragment.debts.len(), 2);
        assert_eq!(fragment.debts[0].kind, DebtKind::Bank);
        assert_eq!(fragment.debts[0].status, DebtStatus::Active);
        assert_eq!(fragment.debts[0].amount, 150000.5);
        assert_eq!(fragment.debts[0].date, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(fragment.debts[1].kind, DebtKind::Tax);
        assert_eq!(fragment.debts[1].status, DebtStatus::Closed);
        assert_eq!(fragment.debts[1].date, None);
    }

    #[test]
    fn test_parse_items_tolerates_missing_sections() {
        assert!(parse_items(&json!({})).debts.is_empty());
        assert!(parse_items(&json!({"result": {"items": null}})).debts.is_empty());
    }
}
