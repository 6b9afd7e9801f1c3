//! Input normalization and deduplication.
//!
//! Maps arbitrary upload headers onto the canonical schema, cleans the
//! identity fields, infers a region and removes duplicate candidates before
//! any network call is spent on them.

use chrono::NaiveDate;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::ingest::{self, RawBatch};
use crate::models::{CanonicalLead, SourceType};
use crate::sources::parse_date;

pub const UNKNOWN_REGION: &str = "unknown";

/// Canonical columns an upload header can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    FullName,
    Phone,
    TaxId,
    DateOfBirth,
    Address,
}

const COLUMN_SYNONYMS: &[(&str, Field)] = &[
    ("фио", Field::FullName),
    ("фамилияимяотчество", Field::FullName),
    ("имя", Field::FullName),
    ("клиент", Field::FullName),
    ("fio", Field::FullName),
    ("name", Field::FullName),
    ("fullname", Field::FullName),
    ("full_name", Field::FullName),
    ("телефон", Field::Phone),
    ("тел", Field::Phone),
    ("тел.", Field::Phone),
    ("мобильный", Field::Phone),
    ("phone", Field::Phone),
    ("phone_number", Field::Phone),
    ("mobile", Field::Phone),
    ("инн", Field::TaxId),
    ("inn", Field::TaxId),
    ("tax_id", Field::TaxId),
    ("taxid", Field::TaxId),
    ("датарождения", Field::DateOfBirth),
    ("дата_рождения", Field::DateOfBirth),
    ("др", Field::DateOfBirth),
    ("dob", Field::DateOfBirth),
    ("date_birth", Field::DateOfBirth),
    ("birth_date", Field::DateOfBirth),
    ("birthdate", Field::DateOfBirth),
    ("dateofbirth", Field::DateOfBirth),
    ("адрес", Field::Address),
    ("адресрегистрации", Field::Address),
    ("адрес_регистрации", Field::Address),
    ("address", Field::Address),
];

const ADDRESS_REGIONS: &[(&str, &str)] = &[
    ("московская область", "Московская область"),
    ("москва", "Москва"),
    ("moscow", "Москва"),
    ("санкт-петербург", "Санкт-Петербург"),
    ("петербург", "Санкт-Петербург"),
    ("спб", "Санкт-Петербург"),
    ("татарстан", "Татарстан"),
    ("казань", "Татарстан"),
    ("саратов", "Саратов"),
    ("калуга", "Калуга"),
    ("краснодар", "Краснодар"),
    ("свердловская область", "Екатеринбург"),
    ("екатеринбург", "Екатеринбург"),
    ("новосибирск", "Новосибирск"),
];

const PHONE_REGIONS: &[(&str, &str)] = &[
    ("+7495", "Москва"),
    ("+7499", "Москва"),
    ("+7812", "Санкт-Петербург"),
    ("+7843", "Татарстан"),
    ("+7845", "Саратов"),
    ("+7484", "Калуга"),
    ("+7861", "Краснодар"),
    ("+7343", "Екатеринбург"),
    ("+7383", "Новосибирск"),
];

/// Maps a header to its canonical field, ignoring case and all whitespace.
pub fn map_column(header: &str) -> Option<Field> {
    let key: String = header
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    COLUMN_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, field)| *field)
}

/// Normalizes a phone number to E.164, or returns an empty string.
///
/// Russian 10 and 11 digit forms are rewritten directly; everything else
/// goes through libphonenumber with RU as the default region. Idempotent.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let foreign = trimmed.starts_with('+') && !digits.starts_with('7');

    if !foreign {
        match (digits.len(), digits.chars().next()) {
            (11, Some('8')) => return format!("+7{}", &digits[1..]),
            (11, Some('7')) => return format!("+{}", digits),
            (10, _) => return format!("+7{}", digits),
            _ => {}
        }
    }

    match phonenumber::parse(Some(CountryId::RU), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            number.format().mode(Mode::E164).to_string()
        }
        _ => {
            debug!("Discarding unparsable phone: {}", raw);
            String::new()
        }
    }
}

/// Uppercases, keeps letters, spaces and hyphens, collapses whitespace.
/// Names of two characters or fewer are blanked.
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || *c == '-')
        .collect();
    let name = cleaned.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if name.chars().count() <= 2 {
        String::new()
    } else {
        name
    }
}

/// Keeps digits only; accepts exactly 10 (legal entity) or 12 (person).
pub fn normalize_tax_id(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if matches!(digits.len(), 10 | 12) {
        digits
    } else {
        String::new()
    }
}

pub fn parse_date_of_birth(raw: &str) -> Option<NaiveDate> {
    parse_date(raw)
}

/// Address keywords first, then the phone area code.
pub fn extract_region(address: &str, phone: &str) -> String {
    let address = address.to_lowercase();
    ADDRESS_REGIONS
        .iter()
        .find(|(key, _)| address.contains(key))
        .or_else(|| {
            PHONE_REGIONS
                .iter()
                .find(|(prefix, _)| phone.starts_with(prefix))
        })
        .map(|(_, region)| region.to_string())
        .unwrap_or_else(|| UNKNOWN_REGION.to_string())
}

const FILE_NAME_SOURCES: &[(&str, SourceType)] = &[
    ("фнс", SourceType::Fns),
    ("fns", SourceType::Fns),
    ("госуслуги", SourceType::Gosuslugi),
    ("gosuslugi", SourceType::Gosuslugi),
    ("доставка", SourceType::Delivery),
    ("delivery", SourceType::Delivery),
    ("еда", SourceType::Delivery),
];

/// Classifies an upload by file name keywords, then by which identity
/// columns it carries.
pub fn detect_source_type(file_name: &str, headers: &[String]) -> SourceType {
    let file_name = file_name.to_lowercase();
    if let Some((_, source_type)) = FILE_NAME_SOURCES
        .iter()
        .find(|(key, _)| file_name.contains(key))
    {
        return *source_type;
    }

    let has_column = |field: Field, keyword: &str| {
        headers
            .iter()
            .any(|h| map_column(h) == Some(field) || h.to_lowercase().contains(keyword))
    };
    if has_column(Field::TaxId, "инн") {
        SourceType::InnBased
    } else if has_column(Field::Phone, "телефон") {
        SourceType::PhoneBased
    } else {
        SourceType::Generic
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationStats {
    pub records_in: usize,
    pub dropped_no_identity: usize,
    pub exact_duplicates: usize,
    pub tax_id_duplicates: usize,
    pub name_dob_duplicates: usize,
    pub records_out: usize,
    pub regions: BTreeMap<String, usize>,
    pub source_types: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub leads: Vec<CanonicalLead>,
    pub stats: NormalizationStats,
}

/// Normalizes one batch. Records without any identity field are dropped.
pub fn normalize_batch(batch: &RawBatch) -> (Vec<CanonicalLead>, usize) {
    let columns: Vec<Option<Field>> = batch.headers.iter().map(|h| map_column(h)).collect();
    let source_type = detect_source_type(&batch.source_file, &batch.headers);
    debug!("{} detected as {} upload", batch.source_file, source_type);
    let mut leads = Vec::with_capacity(batch.rows.len());
    let mut dropped = 0;

    for row in &batch.rows {
        let value = |field: Field| {
            columns
                .iter()
                .position(|c| *c == Some(field))
                .and_then(|idx| row.get(idx))
                .map(|s| s.trim())
                .unwrap_or("")
        };

        let full_name = normalize_name(value(Field::FullName));
        let phone = normalize_phone(value(Field::Phone));
        let tax_id = normalize_tax_id(value(Field::TaxId));
        let address = value(Field::Address).to_string();
        let region = extract_region(&address, &phone);

        let lead = CanonicalLead::new(full_name, phone, tax_id)
            .with_date_of_birth(parse_date_of_birth(value(Field::DateOfBirth)))
            .with_address(address)
            .with_region(region)
            .with_source_file(batch.source_file.clone())
            .with_source_type(source_type);

        if lead.has_identity() {
            leads.push(lead);
        } else {
            dropped += 1;
        }
    }

    (leads, dropped)
}

type ExactKey = (String, String, String, Option<NaiveDate>, String, String);

fn exact_key(lead: &CanonicalLead) -> ExactKey {
    (
        lead.full_name.clone(),
        lead.phone.clone(),
        lead.tax_id.clone(),
        lead.date_of_birth,
        lead.address.clone(),
        lead.region.clone(),
    )
}

/// Stable, three-stage deduplication: exact records, then tax-ID, then
/// name + date of birth for every record without a tax-ID. An empty name is
/// still a key, so nameless records without a tax-ID collapse by birth date.
pub fn deduplicate(leads: Vec<CanonicalLead>, stats: &mut NormalizationStats) -> Vec<CanonicalLead> {
    let mut exact = HashSet::new();
    let stage1: Vec<CanonicalLead> = leads
        .into_iter()
        .filter(|lead| {
            let fresh = exact.insert(exact_key(lead));
            if !fresh {
                stats.exact_duplicates += 1;
            }
            fresh
        })
        .collect();

    let mut tax_ids = HashSet::new();
    let stage2: Vec<CanonicalLead> = stage1
        .into_iter()
        .filter(|lead| {
            if lead.tax_id.is_empty() {
                return true;
            }
            let fresh = tax_ids.insert(lead.tax_id.clone());
            if !fresh {
                stats.tax_id_duplicates += 1;
            }
            fresh
        })
        .collect();

    let mut name_dob = HashSet::new();
    stage2
        .into_iter()
        .filter(|lead| {
            if !lead.tax_id.is_empty() {
                return true;
            }
            let fresh = name_dob.insert((lead.full_name.clone(), lead.date_of_birth));
            if !fresh {
                stats.name_dob_duplicates += 1;
            }
            fresh
        })
        .collect()
}

/// Normalizes and deduplicates a set of raw batches as one candidate pool.
pub fn load(batches: &[RawBatch]) -> NormalizedBatch {
    let mut stats = NormalizationStats::default();
    let mut leads = Vec::new();

    for batch in batches {
        stats.records_in += batch.rows.len();
        let (normalized, dropped) = normalize_batch(batch);
        stats.dropped_no_identity += dropped;
        leads.extend(normalized);
    }

    let leads = deduplicate(leads, &mut stats);
    stats.records_out = leads.len();
    for lead in &leads {
        *stats.regions.entry(lead.region.clone()).or_insert(0) += 1;
        *stats
            .source_types
            .entry(lead.source_type.to_string())
            .or_insert(0) += 1;
    }

    info!(
        "✓ Normalized {} records into {} leads ({} without identity, {} duplicates)",
        stats.records_in,
        stats.records_out,
        stats.dropped_no_identity,
        stats.exact_duplicates + stats.tax_id_duplicates + stats.name_dob_duplicates
    );

    NormalizedBatch { leads, stats }
}

/// Reads the files and runs [`load`] over them.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<NormalizedBatch, AppError> {
    let batches = ingest::read_files(paths)?;
    Ok(load(&batches))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_column_ignores_case_and_spaces() {
        assert_eq!(map_column("ФИО"), Some(Field::FullName));
        assert_eq!(map_column(" Full_Name "), Some(Field::FullName));
        assert_eq!(map_column("Дата рождения"), Some(Field::DateOfBirth));
        assert_eq!(map_column("Фамилия Имя Отчество"), Some(Field::FullName));
        assert_eq!(map_column("INN"), Some(Field::TaxId));
        assert_eq!(map_column("email"), None);
    }

    #[test]
    fn test_phone_rules() {
        assert_eq!(normalize_phone("8 (916) 123-45-67"), "+79161234567");
        assert_eq!(normalize_phone("79161234567"), "+79161234567");
        assert_eq!(normalize_phone("9161234567"), "+79161234567");
        assert_eq!(normalize_phone("+7 916 123 45 67"), "+79161234567");
        assert_eq!(normalize_phone("12345"), "");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn test_name_rules() {
        assert_eq!(normalize_name("  иванов   иван  иванович "), "ИВАНОВ ИВАН ИВАНОВИЧ");
        assert_eq!(normalize_name("Римский-Корсаков Н.А."), "РИМСКИЙ-КОРСАКОВ НА");
        assert_eq!(normalize_name("Ли"), "");
        assert_eq!(normalize_name("12345"), "");
    }

    #[test]
    fn test_tax_id_rules() {
        assert_eq!(normalize_tax_id("7701-123-456"), "7701123456");
        assert_eq!(normalize_tax_id("770112345678"), "770112345678");
        assert_eq!(normalize_tax_id("77011234"), "");
    }

    #[test]
    fn test_region_from_address_then_phone() {
        assert_eq!(extract_region("г. Казань, ул. Баумана", ""), "Татарстан");
        assert_eq!(extract_region("Московская область, Химки", "+74951234567"), "Московская область");
        assert_eq!(extract_region("", "+78121234567"), "Санкт-Петербург");
        assert_eq!(extract_region("", "+79161234567"), UNKNOWN_REGION);
    }

    #[test]
    fn test_rows_without_identity_are_dropped() {
        let batch = RawBatch::new(
            "a.csv",
            vec!["ФИО".into(), "Телефон".into(), "Комментарий".into()],
            vec![
                vec!["Ли".into(), "123".into(), "мусор".into()],
                vec!["Иванов Иван".into(), "".into(), "".into()],
            ],
        );
        let (leads, dropped) = normalize_batch(&batch);
        assert_eq!(dropped, 1);
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].source_file, "a.csv");
        assert_eq!(leads[0].source_type, SourceType::PhoneBased);
        assert_eq!(leads[0].region, UNKNOWN_REGION);
    }

    #[test]
    fn test_source_type_prefers_file_name_over_columns() {
        let headers = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();

        assert_eq!(
            detect_source_type("Выгрузка_ФНС_2024.csv", &headers(&["Телефон"])),
            SourceType::Fns
        );
        assert_eq!(detect_source_type("gosuslugi.xlsx", &headers(&[])), SourceType::Gosuslugi);
        assert_eq!(detect_source_type("клиенты_еда.csv", &headers(&["ИНН"])), SourceType::Delivery);
        assert_eq!(
            detect_source_type("base.csv", &headers(&["ФИО", "ИНН клиента", "Телефон"])),
            SourceType::InnBased
        );
        assert_eq!(
            detect_source_type("base.csv", &headers(&["name", "mobile"])),
            SourceType::PhoneBased
        );
        assert_eq!(detect_source_type("base.csv", &headers(&["ФИО"])), SourceType::Generic);
    }

    #[test]
    fn test_dedup_stages() {
        let dob = NaiveDate::from_ymd_opt(1980, 1, 1);
        let leads = vec![
            CanonicalLead::new("ИВАНОВ ИВАН", "+79161234567", "7701123456"),
            CanonicalLead::new("ИВАНОВ ИВАН", "+79161234567", "7701123456").with_source_file("b.csv"),
            CanonicalLead::new("ПЕТРОВ ПЁТР", "", "7701123456"),
            CanonicalLead::new("СИДОРОВ СИДОР", "", "").with_date_of_birth(dob),
            CanonicalLead::new("СИДОРОВ СИДОР", "+79990000000", "").with_date_of_birth(dob),
            CanonicalLead::new("СИДОРОВ СИДОР", "", ""),
            CanonicalLead::new("", "+79990000001", ""),
            CanonicalLead::new("", "+79990000001", "").with_address("Москва"),
            CanonicalLead::new("", "+79990000002", ""),
        ];
        let mut stats = NormalizationStats::default();
        let out = deduplicate(leads, &mut stats);

        let names: Vec<&str> = out.iter().map(|l| l.full_name.as_str()).collect();
        assert_eq!(names, vec!["ИВАНОВ ИВАН", "СИДОРОВ СИДОР", "СИДОРОВ СИДОР", ""]);
        assert_eq!(stats.exact_duplicates, 1);
        assert_eq!(stats.tax_id_duplicates, 1);
        assert_eq!(stats.name_dob_duplicates, 3);
    }

    #[test]
    fn test_nameless_leads_collapse_on_empty_name_key() {
        let dob = NaiveDate::from_ymd_opt(1990, 5, 5);
        let leads = vec![
            CanonicalLead::new("", "+79990000001", ""),
            CanonicalLead::new("", "+79990000002", ""),
            CanonicalLead::new("", "+79990000003", "").with_date_of_birth(dob),
            CanonicalLead::new("", "+79990000004", "770708389312"),
        ];
        let mut stats = NormalizationStats::default();
        let out = deduplicate(leads, &mut stats);

        let phones: Vec<&str> = out.iter().map(|l| l.phone.as_str()).collect();
        assert_eq!(phones, vec!["+79990000001", "+79990000003", "+79990000004"]);
        assert_eq!(stats.name_dob_duplicates, 1);
    }
}
