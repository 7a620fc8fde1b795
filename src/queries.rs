use crate::{HarvestError, Result};
use std::io::Read;
use std::path::Path;

/// Header naming the query column, matched case-insensitively.
pub const QUERY_COLUMN: &str = "queries";

/// Reads the query column of the CSV file at `path`.
pub fn read_queries(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path).map_err(|e| HarvestError::io(path, e))?;
    parse_queries(file)
}

/// Reads the `queries` column from CSV input, in row order.
/// Rows without a value in that column come back as empty strings.
pub fn parse_queries(input: impl Read) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(QUERY_COLUMN))
        .ok_or_else(|| {
            HarvestError::QuerySourceError(format!("no '{}' column found", QUERY_COLUMN))
        })?;

    let mut queries = Vec::new();
    for record in reader.records() {
        let record = record?;
        queries.push(record.get(column).unwrap_or_default().trim().to_string());
    }
    Ok(queries)
}
