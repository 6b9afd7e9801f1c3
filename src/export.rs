use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::errors::{AppError, ResultExt};
use crate::models::{EnrichmentError, ScoredLead};

pub const SCORED_HEADER: [&str; 8] = [
    "phone", "fullName", "score", "reason1", "reason2", "reason3", "isTarget", "group",
];

pub const ERRORS_HEADER: [&str; 4] = ["fullName", "taxId", "errorText", "sourceName"];

/// Writes scored leads with the fixed column set.
pub fn write_scored<W: Write>(writer: W, leads: &[ScoredLead]) -> Result<(), AppError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(SCORED_HEADER)?;
    for lead in leads {
        let score = lead.score.to_string();
        csv.write_record([
            lead.enriched.lead.phone.as_str(),
            lead.enriched.lead.full_name.as_str(),
            score.as_str(),
            lead.reasons[0].as_str(),
            lead.reasons[1].as_str(),
            lead.reasons[2].as_str(),
            if lead.is_target { "1" } else { "0" },
            lead.group.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_errors<W: Write>(writer: W, errors: &[EnrichmentError]) -> Result<(), AppError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(ERRORS_HEADER)?;
    for error in errors {
        csv.write_record([
            error.full_name.as_str(),
            error.tax_id.as_str(),
            error.error_text.as_str(),
            error.source_name.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_scored(path: &Path, leads: &[ScoredLead]) -> Result<(), AppError> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_scored(file, leads)?;
    info!("✓ Wrote {} scored leads to {}", leads.len(), path.display());
    Ok(())
}

pub fn export_errors(path: &Path, errors: &[EnrichmentError]) -> Result<(), AppError> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_errors(file, errors)?;
    info!("✓ Wrote {} enrichment errors to {}", errors.len(), path.display());
    Ok(())
}
