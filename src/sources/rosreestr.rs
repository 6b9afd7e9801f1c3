use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use super::{decode_body, SourceAdapter, SourceError, SourceResult};
use crate::fetch_client::{FetchClient, FetchRequest, FetchStats};
use crate::models::{EnrichmentFragment, Source};

/// Real estate register (Росреестр). Searchable by INN only.
pub struct RosreestrAdapter {
    properties_url: String,
    client: FetchClient,
}

impl RosreestrAdapter {
    pub fn new(base_url: &str, client: FetchClient) -> Self {
        Self {
            properties_url: format!(
                "{}/api/online/fir_object/properties",
                base_url.trim_end_matches('/')
            ),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for RosreestrAdapter {
    fn source(&self) -> Source {
        Source::Rosreestr
    }

    fn accepts_name(&self) -> bool {
        false
    }

    async fn search_by_tax_id(&self, tax_id: &str) -> SourceResult {
        let request = FetchRequest::get(&self.properties_url).query("inn", tax_id);
        let response = match self.client.fetch(&request).await {
            Ok(response) => response,
            Err(e) => return SourceResult::Err(e.into()),
        };

        match decode_body(&response, "properties") {
            Ok(Some(data)) => {
                let fragment = parse_properties(&data);
                info!(
                    "✓ Rosreestr INN {}: {} objects, {} encumbrances",
                    tax_id, fragment.property_count, fragment.encumbrance_count
                );
                SourceResult::Ok(fragment)
            }
            Ok(None) => SourceResult::Err(SourceError::Parse(
                "expected JSON property list".to_string(),
            )),
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

fn parse_properties(data: &Value) -> EnrichmentFragment {
    let properties = data
        .get("properties")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let encumbrances: usize = properties
        .iter()
        .map(|p| {
            p.get("encumbrances")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0)
        })
        .sum();

    let mut fragment = EnrichmentFragment::empty(Source::Rosreestr);
    fragment.has_property = Some(!properties.is_empty());
    fragment.property_count = properties.len();
    fragment.encumbrance_count = encumbrances;
    fragment
}
