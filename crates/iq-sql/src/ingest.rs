//! Structured uploads: a CSV file becomes a fresh table in the target database.
//!
//! Headers are normalised into portable identifiers, fully empty rows and
//! columns are dropped, and each column gets the narrowest of integer, real
//! or text that fits every non-empty cell. Empty text cells load as `''`;
//! empty numeric cells load as NULL.

use csv::{ReaderBuilder, Trim};
use iq_error::{IqError, Result};
use serde::Serialize;

const TABLE_NAME_MAX: usize = 50;
const COLUMN_NAME_MAX: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    /// Column type accepted by PostgreSQL, MySQL and SQLite alike.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Real => "DOUBLE PRECISION",
            ColumnKind::Text => "TEXT",
        }
    }

    fn infer<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> Self {
        let mut present = cells.map(str::trim).filter(|c| !c.is_empty());
        if present.clone().all(|c| c.parse::<i64>().is_ok()) {
            ColumnKind::Integer
        } else if present.all(|c| c.parse::<f64>().is_ok()) {
            ColumnKind::Real
        } else {
            ColumnKind::Text
        }
    }
}

/// A parsed upload, ready to be written as one table.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedTable {
    pub name: String,
    pub columns: Vec<String>,
    pub kinds: Vec<ColumnKind>,
    /// Row-major cells; `None` is an empty cell.
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub table: String,
    pub rows: usize,
}

/// `upload_` plus the file name up to its first dot, non-alphanumerics as `_`.
pub fn table_name_for(filename: &str) -> String {
    let stem = filename.split('.').next().unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
        .chars()
        .take(TABLE_NAME_MAX)
        .collect();
    format!("upload_{cleaned}")
}

/// Turns raw headers into unique lower-case identifiers of at most 60 chars.
/// Blank or symbol-only headers become `col_<position>`.
pub fn column_names(headers: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(headers.len());
    for (i, header) in headers.iter().enumerate() {
        let replaced: String = header
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let collapsed = replaced
            .split('_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase();
        let mut name: String = collapsed.chars().take(COLUMN_NAME_MAX).collect();
        if name.is_empty() {
            name = format!("col_{i}");
        }

        let base = name.clone();
        let mut counter = 1;
        while out.contains(&name) {
            let suffix = format!("_{counter}");
            let keep = COLUMN_NAME_MAX.saturating_sub(suffix.chars().count());
            name = base.chars().take(keep).collect::<String>() + &suffix;
            counter += 1;
        }
        out.push(name);
    }
    out
}

/// Parses an uploaded file into a table. Only CSV is accepted.
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<UploadedTable> {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
        return Err(IqError::InvalidRequest {
            reason: "Excel workbooks are not supported, export the sheet as CSV".to_string(),
        });
    }
    if !lower.ends_with(".csv") {
        return Err(IqError::InvalidRequest {
            reason: format!("Unsupported file format for '{filename}'. Please upload a CSV file."),
        });
    }
    parse_csv(&table_name_for(filename), bytes)
}

fn invalid(e: impl std::fmt::Display) -> IqError {
    IqError::InvalidRequest {
        reason: format!("Failed to process structured file: {e}"),
    }
}

pub fn parse_csv(name: &str, bytes: &[u8]) -> Result<UploadedTable> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers().map_err(invalid)?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(invalid("the file has no header row"));
    }

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(invalid)?;
        if record.len() > headers.len() {
            return Err(invalid(format!(
                "row {} has {} fields but the header has {}",
                line + 1,
                record.len(),
                headers.len()
            )));
        }
        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|cell| Some(cell.to_string()).filter(|c| !c.is_empty()))
            .collect();
        row.resize(headers.len(), None);
        if row.iter().any(Option::is_some) {
            rows.push(row);
        }
    }

    let keep: Vec<usize> = (0..headers.len())
        .filter(|&col| rows.iter().any(|r| r[col].is_some()))
        .collect();
    if keep.is_empty() && !rows.is_empty() {
        return Err(invalid("every column is empty"));
    }
    // Header-only files keep their columns as an empty table.
    let keep = if rows.is_empty() {
        (0..headers.len()).collect()
    } else {
        keep
    };

    let kept_headers: Vec<String> = keep.iter().map(|&c| headers[c].clone()).collect();
    let rows: Vec<Vec<Option<String>>> = rows
        .into_iter()
        .map(|mut r| keep.iter().map(|&c| r[c].take()).collect())
        .collect();
    let kinds = (0..keep.len())
        .map(|c| ColumnKind::infer(rows.iter().filter_map(move |r| r[c].as_deref())))
        .collect();

    Ok(UploadedTable {
        name: name.to_string(),
        columns: column_names(&kept_headers),
        kinds,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_come_from_the_file_stem() {
        assert_eq!(table_name_for("Sales 2024.final.csv"), "upload_sales_2024");
        assert_eq!(table_name_for("q1-report.csv"), "upload_q1_report");
        let long = format!("{}.csv", "x".repeat(80));
        assert_eq!(table_name_for(&long).len(), "upload_".len() + 50);
    }

    #[test]
    fn headers_are_normalised_and_deduplicated() {
        let headers: Vec<String> = ["Order ID", "", "Unit Price ($)", "order id", "__", "Région"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            column_names(&headers),
            vec!["order_id", "col_1", "unit_price", "order_id_1", "col_4", "région"]
        );

        let long = vec!["a".repeat(70), "a".repeat(65)];
        let names = column_names(&long);
        assert_eq!(names[0], "a".repeat(60));
        assert_eq!(names[1], format!("{}_1", "a".repeat(58)));
    }

    #[test]
    fn empty_rows_and_columns_are_dropped() {
        let csv = "region,notes,amount,units\nnorth,,120.5,3\n,,,\nsouth,,80,\n";
        let table = parse_csv("upload_sales", csv.as_bytes()).unwrap();
        assert_eq!(table.columns, vec!["region", "amount", "units"]);
        assert_eq!(table.kinds, vec![ColumnKind::Text, ColumnKind::Real, ColumnKind::Integer]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec![Some("south".into()), Some("80".into()), None]);
    }

    #[test]
    fn quoted_fields_and_short_rows_parse() {
        let csv = "name,comment\n\"Smith, J\",\"said \"\"hi\"\"\"\nDoe\n";
        let table = parse_csv("t", csv.as_bytes()).unwrap();
        assert_eq!(table.rows[0][0].as_deref(), Some("Smith, J"));
        assert_eq!(table.rows[0][1].as_deref(), Some("said \"hi\""));
        assert_eq!(table.rows[1], vec![Some("Doe".into()), None]);
    }

    #[test]
    fn header_only_file_is_an_empty_table() {
        let table = parse_csv("t", b"a,b\n").unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn malformed_uploads_are_rejected() {
        assert!(matches!(parse_csv("t", b""), Err(IqError::InvalidRequest { .. })));
        assert!(parse_csv("t", b"a,b\n1,2,3\n").is_err());
        assert!(parse_upload("book.xlsx", b"PK").is_err());
        assert!(parse_upload("notes.txt", b"a\n1\n").is_err());
        assert_eq!(parse_upload("Orders.CSV", b"id\n1\n").unwrap().name, "upload_orders");
    }
}
