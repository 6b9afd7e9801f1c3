use std::path::Path;
use tracing::{info, warn};

use crate::errors::{AppError, ResultExt};

/// One uploaded file as untyped rows under its original headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(source_file: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            source_file: source_file.into(),
            headers,
            rows,
        }
    }
}

/// Reads every file; a single unreadable file fails the run.
pub fn read_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RawBatch>, AppError> {
    paths.iter().map(|p| read_file(p.as_ref())).collect()
}

/// Reads one delimited file, sniffing the delimiter and the encoding.
pub fn read_file(path: &Path) -> Result<RawBatch, AppError> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let content = decode(bytes);
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let batch = parse_str(&source_file, &content)
        .with_context(|| format!("parsing {}", path.display()))?;
    info!(
        "Read {} rows from {} ({} columns)",
        batch.rows.len(),
        batch.source_file,
        batch.headers.len()
    );
    Ok(batch)
}

/// Parses delimited text whose first row is the header.
pub fn parse_str(source_file: &str, content: &str) -> Result<RawBatch, AppError> {
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(|h| h.trim().to_string()).collect(),
        None => {
            warn!("⚠ {} is empty", source_file);
            return Ok(RawBatch::new(source_file, Vec::new(), Vec::new()));
        }
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawBatch::new(source_file, headers, rows))
}

/// UTF-8 first; anything else is taken to be a Windows-1251 export.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1251.decode(&bytes);
            decoded.into_owned()
        }
    }
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// Candidates are tab, semicolon, comma and pipe. The one producing the most
/// consistent field count (more than one field) wins.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }

        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}
