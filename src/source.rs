//! CSV snapshot reading.
//!
//! Turns CSV text with a header line into [`RawRow`]s in file order.

use std::path::Path;

use crate::{ErrorDetail, record::RawRow};

/// Parse CSV text. The first line is the header; blank lines are skipped and
/// short lines simply omit their trailing columns.
pub fn parse_rows(text: &str) -> Result<Vec<RawRow>, csv::Error> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| name.trim().to_owned())
        .collect();
    reader
        .records()
        .map(|record| -> Result<RawRow, csv::Error> {
            let record = record?;
            Ok(headers
                .iter()
                .zip(record.iter())
                .map(|(name, cell)| (name.clone(), cell.to_owned()))
                .collect())
        })
        .collect()
}

/// Read and parse a CSV file.
pub async fn read_rows(path: impl AsRef<Path>) -> Result<Vec<RawRow>, ErrorDetail> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(ErrorDetail::ReadCsv)?;
    parse_rows(&text).map_err(ErrorDetail::ParseCsv)
}
