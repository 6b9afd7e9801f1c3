use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use tracing::info;

use super::{
    decode_body, format_dob, parse_amount, parse_date, str_field, SourceAdapter, SourceError,
    SourceResult,
};
use crate::clock::SharedClock;
use crate::fetch_client::{FetchClient, FetchRequest, FetchStats};
use crate::models::{CourtOrder, DebtStatus, EnrichmentFragment, Source};

/// Window within which a court order counts as recent.
pub const RECENT_ORDER_DAYS: i64 = 90;

/// General jurisdiction courts (ГАС «Правосудие»). Searchable by name only.
pub struct CourtsAdapter {
    search_url: String,
    client: FetchClient,
    clock: SharedClock,
}

impl CourtsAdapter {
    pub fn new(base_url: &str, client: FetchClient, clock: SharedClock) -> Self {
        Self {
            search_url: format!("{}/index.php", base_url.trim_end_matches('/')),
            client,
            clock,
        }
    }
}

#[async_trait]
impl SourceAdapter for CourtsAdapter {
    fn source(&self) -> Source {
        Source::Courts
    }

    fn accepts_tax_id(&self) -> bool {
        false
    }

    async fn search_by_tax_id(&self, _tax_id: &str) -> SourceResult {
        SourceResult::MissingKey
    }

    async fn search_by_name_and_dob(
        &self,
        full_name: &str,
        dob: Option<NaiveDate>,
    ) -> SourceResult {
        let request = FetchRequest::get(&self.search_url)
            .query("fio", full_name)
            .query("birth_date", format_dob(dob));
        let response = match self.client.fetch(&request).await {
            Ok(response) => response,
            Err(e) => return SourceResult::Err(e.into()),
        };

        match decode_body(&response, "courtOrders") {
            Ok(Some(data)) => {
                let fragment = parse_court_orders(&data, self.clock.today());
                info!(
                    "✓ Courts FIO {}: {} orders, recent={}",
                    full_name,
                    fragment.court_orders.len(),
                    fragment.has_recent_court_order.unwrap_or(false)
                );
                SourceResult::Ok(fragment)
            }
            Ok(None) => SourceResult::Err(SourceError::Parse(
                "expected JSON court order list".to_string(),
            )),
            Err(e) => SourceResult::Err(e),
        }
    }

    fn fetch_stats(&self) -> FetchStats {
        self.client.stats()
    }
}

/// True when `date` falls within the recency window ending at `today`.
/// Unknown dates are never recent.
pub fn is_recent(date: Option<NaiveDate>, today: NaiveDate) -> bool {
    match date {
        Some(date) => date >= today - Duration::days(RECENT_ORDER_DAYS),
        None => false,
    }
}

fn parse_court_orders(data: &Value, today: NaiveDate) -> EnrichmentFragment {
    let orders: Vec<CourtOrder> = data
        .get("court_orders")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|item| CourtOrder {
            case_number: str_field(item, "case_number"),
            court: str_field(item, "court"),
            status: DebtStatus::normalize(&str_field(item, "status")),
            date: parse_date(&str_field(item, "date")),
            amount: item.get("amount").and_then(parse_amount),
        })
        .collect();

    let mut fragment = EnrichmentFragment::empty(Source::Courts);
    fragment.has_recent_court_order = Some(orders.iter().any(|o| is_recent(o.date, today)));
    fragment.court_orders = orders;
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_recency_window() {
        let today = day(2024, 6, 1);
        assert!(is_recent(Some(day(2024, 5, 22)), today));
        assert!(is_recent(Some(today - Duration::days(90)), today));
        assert!(!is_recent(Some(today - Duration::days(91)), today));
        assert!(!is_recent(None, today));
    }

    #[test]
    fn test_unparsable_dates_are_not_recent() {
        let data = json!({"court_orders": [
            {"case_number": "2-100/2024", "date": "недавно", "court": "Мировой суд", "status": "рассматривается"}
        ]});
        let fragment = parse_court_orders(&data, day(2024, 6, 1));
        assert_eq!(fragment.court_orders.len(), 1);
        assert_eq!(fragment.court_orders[0].date, None);
        assert_eq!(fragment.court_orders[0].status, DebtStatus::Active);
        assert_eq!(fragment.has_recent_court_order, Some(false));
    }

    #[test]
    fn test_mixed_formats_detect_recent_order() {
        let data = json!({"court_orders": [
            {"case_number": "2-1/2023", "date": "2023-01-10", "amount": "5 000 руб."},
            {"case_number": "2-2/2024", "date": "20/05/2024", "amount": 12000}
        ]});
        let fragment = parse_court_orders(&data, day(2024, 6, 1));
        assert_eq!(fragment.has_recent_court_order, Some(true));
        assert_eq!(fragment.court_orders[0].amount, Some(5000.0));
    }
}
