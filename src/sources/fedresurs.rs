use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::info;

use super::{bool_field, decode_body, SourceAdapter, SourceError, SourceResult};
use crate::fetch_client::{FetchClient, FetchRequest, FetchStats};
use crate::models::{DebtStatus, EnrichmentFragment, Source};

/// Bankruptcy register (Федресурс). The only authority on bankruptcy.
pub struct FedresursAdapter {
    search_url: String,
    client: FetchClient,
}

impl FedresursAdapter {
    pub fn new(base_url: &str, client: FetchClient) -> Self {
        Self {
            search_url: format!("{}/backend/persons", base_url.trim_end_matches('/')),
            client,
        }
    }

    fn search_body(inn: Option<&str>, name: Option<&str>) -> Value {
        json!({
            "searchType": "parties",
            "isActive": null,
            "regionId": null,
            "inn": inn,
            "name": name,
            "orderBy": "relevance",
            "isAscending": false,
            "limit": 50,
            "offset": 0
        })
    }

    async fn search(&self, body: Value, key: &str) -> SourceResult {
        let request = FetchRequest::post_json(&self.search_url, body);
        let response = match self.client.fetch(&request).await {
            Ok(response) => response,
            Err(e) => return SourceResult::Err(e.into()),
        };

        let data = match decode_body(&response, "searchResult") {
            Ok(Some(data)) => data,
            Ok(None) => {
                return SourceResult::Err(SourceError::Parse(
                    "expected JSON search result".to_string(),
                ))
            }
            Err(e) => return SourceResult::Err(e),
        };

        let fragment = parse_search_result(&data);
        info!(
            "✓ Fedresurs {}: bankrupt={}",
            key,
            fragment.is_bankrupt.unwrap_or(false)
        );
        SourceResult::Ok(fragment)
    }
}

#[async_trait]
impl SourceAdapter for FedresursAdapter {
    fn source(&self) -> Source {
        Source::Fedresurs
    }

    async fn search_by_tax_id(&self, tax_id: &str) -> SourceResult {
        self.search(Self::search_body(Some(tax_id), None), &format!("INN {}", tax_id))
            .await
    }

    async fn search_by_name_and_dob(
        &self,
        full_name: &str,
        _dob: Option<NaiveDate>,
    ) -> SourceResult {
        self.search(
            Self::search_body(None, Some(full_name)),
            &format!("FIO {}", full_name),
        )
        .await
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

/// A person is bankrupt when any matched case is flagged active or its
/// status names an ongoing procedure.
fn parse_search_result(data: &Value) -> EnrichmentFragment {
    let records = data
        .pointer("/data/searchResult")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let bankrupt = records.iter().any(|record| {
        let status = record
            .pointer("/status/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        bool_field(record, "isActive") || DebtStatus::normalize(status) == DebtStatus::Active
    });

    let mut fragment = EnrichmentFragment::empty(Source::Fedresurs);
    fragment.is_bankrupt = Some(bankrupt);
    fragment
}
