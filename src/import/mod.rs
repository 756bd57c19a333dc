//! Dynamic tabular importer
//!
//! Uploads with an unknown column layout are kept in a single wide cell
//! store keyed by `(upload_id, row_index, column)`. No schema is created per
//! upload; the original headers stay addressable through the mapping kept on
//! the [`TableRef`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::traits::TabularStore;
use crate::types::*;
use crate::utils::validate_upload_id;

/// Longest sanitized column name, matching common SQL identifier limits
pub const MAX_COLUMN_NAME_LEN: usize = 63;

/// One row of an upload, addressable by original header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedRow {
    pub row_index: usize,
    /// `(original header, value)` pairs in header order
    pub values: Vec<(String, String)>,
}

impl ImportedRow {
    /// Value of the first column with this original header
    pub fn get(&self, header: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn cells(&self) -> Vec<String> {
        self.values.iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Headers and rows split out of delimited text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Turn an arbitrary header into a safe column identifier
///
/// Non `[A-Za-z0-9_]` characters become `_`, the result is lowercased,
/// prefixed with `col_` when empty or starting with a digit and cut to
/// [`MAX_COLUMN_NAME_LEN`] characters.
pub fn sanitize_column_name(header: &str) -> String {
    let mut name: String = header
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name = format!("col_{name}");
    }
    name.truncate(MAX_COLUMN_NAME_LEN);
    name
}

/// Sanitize all headers, suffixing `_2`, `_3`, ... on collisions
pub fn map_columns(headers: &[String]) -> Vec<ColumnMapping> {
    let mut used: HashSet<String> = HashSet::new();
    let mut mappings = Vec::with_capacity(headers.len());

    for header in headers {
        let base = sanitize_column_name(header);
        let mut column = base.clone();
        let mut n = 1;
        while used.contains(&column) {
            n += 1;
            let suffix = format!("_{n}");
            let mut stem = base.clone();
            stem.truncate(MAX_COLUMN_NAME_LEN - suffix.len());
            column = format!("{stem}{suffix}");
        }
        used.insert(column.clone());
        mappings.push(ColumnMapping {
            header: header.clone(),
            column,
        });
    }
    mappings
}

fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(10)
        .collect();

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

        // the header line must split into several fields
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

/// Split delimited text into headers and rows
///
/// The delimiter is sniffed among tab, `;`, `,` and `|`. The first
/// non-empty record is the header line; blank records are dropped.
pub fn parse_delimited(content: &str) -> ReconResult<ParsedTable> {
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(content);
    debug!(delimiter = %(delimiter as char), "sniffed delimiter");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut table = ParsedTable::default();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReconError::Parse {
            row: index,
            message: e.to_string(),
        })?;
        let values: Vec<String> = record.iter().map(|v| v.trim().to_string()).collect();
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        if table.headers.is_empty() {
            table.headers = values;
        } else {
            table.rows.push(values);
        }
    }
    Ok(table)
}

/// Stores and queries uploads through a [`TabularStore`]
pub struct TabularImporter<S: TabularStore> {
    storage: S,
}

impl<S: TabularStore> TabularImporter<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Store rows under an upload id, replacing an earlier upload with the same id
    ///
    /// Cells are kept as text without validation. Rows shorter than the
    /// header line are padded with empty values; surplus cells are dropped.
    pub async fn import(
        &mut self,
        upload_id: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> ReconResult<TableRef> {
        validate_upload_id(upload_id)?;
        if headers.is_empty() {
            return Err(ReconError::Validation(
                "Upload must have at least one header".to_string(),
            ));
        }

        let columns = map_columns(headers);
        let mut cells = Vec::with_capacity(rows.len() * columns.len());
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() > columns.len() {
                debug!(row_index, extra = row.len() - columns.len(), "dropping surplus cells");
            }
            for (i, mapping) in columns.iter().enumerate() {
                cells.push(Cell {
                    upload_id: upload_id.to_string(),
                    row_index,
                    column: mapping.column.clone(),
                    value: row.get(i).cloned().unwrap_or_default(),
                });
            }
        }

        let table = TableRef {
            table_name: format!("upload_{}", sanitize_column_name(upload_id)),
            upload_id: upload_id.to_string(),
            columns,
            row_count: rows.len(),
        };
        self.storage.replace_upload(&table, cells).await?;
        info!(upload_id, rows = table.row_count, columns = table.columns.len(), "stored upload");
        Ok(table)
    }

    /// Parse delimited text and store it
    pub async fn import_delimited(&mut self, upload_id: &str, content: &str) -> ReconResult<TableRef> {
        let parsed = parse_delimited(content)?;
        self.import(upload_id, &parsed.headers, &parsed.rows).await
    }

    /// Read back up to `limit` rows of an upload
    pub async fn query(
        &self,
        table_ref: &TableRef,
        upload_id: &str,
        limit: Option<usize>,
    ) -> ReconResult<Vec<ImportedRow>> {
        if table_ref.upload_id != upload_id {
            return Err(ReconError::Validation(format!(
                "table {} does not belong to upload {upload_id}",
                table_ref.table_name
            )));
        }
        let table = self
            .storage
            .get_upload(upload_id)
            .await?
            .ok_or_else(|| ReconError::UploadNotFound(upload_id.to_string()))?;

        let cells = self.storage.load_cells(upload_id, limit).await?;
        let mut by_row: HashMap<usize, HashMap<String, String>> = HashMap::new();
        for cell in cells {
            by_row
                .entry(cell.row_index)
                .or_default()
                .insert(cell.column, cell.value);
        }

        let mut row_indices: Vec<usize> = by_row.keys().copied().collect();
        row_indices.sort_unstable();
        if let Some(limit) = limit {
            row_indices.truncate(limit);
        }

        Ok(row_indices
            .into_iter()
            .map(|row_index| {
                let stored = by_row.remove(&row_index).unwrap_or_default();
                let values = table
                    .columns
                    .iter()
                    .map(|m| {
                        let value = stored.get(&m.column).cloned().unwrap_or_default();
                        (m.header.clone(), value)
                    })
                    .collect();
                ImportedRow { row_index, values }
            })
            .collect())
    }

    /// Headers and all rows of an upload, in stored order
    pub async fn load(&self, upload_id: &str) -> ReconResult<(TableRef, Vec<Vec<String>>)> {
        let table = self
            .storage
            .get_upload(upload_id)
            .await?
            .ok_or_else(|| ReconError::UploadNotFound(upload_id.to_string()))?;
        let rows = self
            .query(&table, upload_id, None)
            .await?
            .into_iter()
            .map(|row| row.cells())
            .collect();
        Ok((table, rows))
    }

    /// Remove an upload
    pub async fn drop_upload(&mut self, upload_id: &str) -> ReconResult<bool> {
        self.storage.drop_upload(upload_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStorage;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_sanitize_column_name() {
        assert_eq!(sanitize_column_name("Buchungstag"), "buchungstag");
        assert_eq!(sanitize_column_name("Kontonummer/IBAN"), "kontonummer_iban");
        assert_eq!(sanitize_column_name("Betrag (€)"), "betrag____");
        assert_eq!(sanitize_column_name("1. Spalte"), "col_1__spalte");
        assert_eq!(sanitize_column_name(""), "col_");
        assert_eq!(sanitize_column_name(&"x".repeat(80)).len(), MAX_COLUMN_NAME_LEN);
    }

    #[test]
    fn test_map_columns_deduplicates() {
        let mappings = map_columns(&strings(&["Betrag", "betrag", "Betrag"]));
        let columns: Vec<&str> = mappings.iter().map(|m| m.column.as_str()).collect();
        assert_eq!(columns, vec!["betrag", "betrag_2", "betrag_3"]);
    }

    #[test]
    fn test_parse_delimited_sniffs_semicolon() {
        let content = "Buchungstag;Betrag;Verwendungszweck\n04.03.2024;500,00;Miete März\n\n05.03.2024;\"1.200,00\";\"Kaution; Rest\"\n";
        let table = parse_delimited(content).unwrap();
        assert_eq!(table.headers, strings(&["Buchungstag", "Betrag", "Verwendungszweck"]));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][2], "Kaution; Rest");
    }

    #[test]
    fn test_parse_delimited_tab_and_comma() {
        let tabbed = parse_delimited("Date\tAmount\n2024-03-04\t500.00\n").unwrap();
        assert_eq!(tabbed.headers, strings(&["Date", "Amount"]));
        let comma = parse_delimited("Date,Amount,Memo\n2024-03-04,500.00,Rent\n").unwrap();
        assert_eq!(comma.rows[0], strings(&["2024-03-04", "500.00", "Rent"]));
    }

    #[tokio::test]
    async fn test_import_and_query_by_original_header() {
        let mut importer = TabularImporter::new(MemoryStorage::new());
        let headers = strings(&["Buchungstag", "Betrag", "IBAN", "Verwendungszweck"]);
        let rows = vec![
            strings(&["04.03.2024", "500,00", "DE89370400440532013000", "Miete März"]),
            strings(&["05.03.2024", "300,00"]),
        ];

        let table = importer.import("upload-1", &headers, &rows).await.unwrap();
        assert_eq!(table.row_count, 2);
        assert_eq!(table.column_for("Verwendungszweck"), Some("verwendungszweck"));

        let result = importer.query(&table, "upload-1", None).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].get("Betrag"), Some("500,00"));
        assert_eq!(result[0].get("Verwendungszweck"), Some("Miete März"));
        assert_eq!(result[1].get("IBAN"), Some(""));

        let limited = importer.query(&table, "upload-1", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_reupload_replaces_prior_table() {
        let mut importer = TabularImporter::new(MemoryStorage::new());
        importer
            .import(
                "upload-1",
                &strings(&["Datum", "Betrag", "Notiz"]),
                &[strings(&["01.03.2024", "1", "a"]), strings(&["02.03.2024", "2", "b"])],
            )
            .await
            .unwrap();
        let table = importer
            .import("upload-1", &strings(&["Datum", "Betrag"]), &[strings(&["03.03.2024", "3"])])
            .await
            .unwrap();

        let rows = importer.query(&table, "upload-1", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Betrag"), Some("3"));
        assert_eq!(rows[0].get("Notiz"), None);
    }

    #[tokio::test]
    async fn test_query_rejects_foreign_table_ref() {
        let mut importer = TabularImporter::new(MemoryStorage::new());
        let table = importer
            .import("upload-1", &strings(&["Betrag"]), &[strings(&["1"])])
            .await
            .unwrap();
        let result = importer.query(&table, "upload-2", None).await;
        assert!(matches!(result, Err(ReconError::Validation(_))));

        assert!(importer.drop_upload("upload-1").await.unwrap());
        let result = importer.query(&table, "upload-1", None).await;
        assert!(matches!(result, Err(ReconError::UploadNotFound(_))));
    }
}
