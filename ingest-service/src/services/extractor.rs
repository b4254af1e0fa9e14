//! Row extraction: turns an uploaded file into an ordered sequence of
//! header-keyed records.

use crate::models::RawRecord;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Row limit exceeded: {rows} > {max}")]
    RowLimitExceeded { rows: usize, max: usize },

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    Malformed(#[from] csv::Error),
}

/// Header list plus the first rows of a file, for upload preview.
#[derive(Debug, Clone)]
pub struct FilePreview {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
}

/// Extension of the stored file, falling back to the declared upload name
/// when the storage path carries none.
fn sniff_extension(path: &Path, declared_name: &str) -> String {
    path.extension()
        .or_else(|| Path::new(declared_name).extension())
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn record_to_raw(headers: &[String], record: &csv::StringRecord) -> RawRecord {
    let mut raw = RawRecord::new();
    for (i, header) in headers.iter().enumerate() {
        let cell = record.get(i).unwrap_or_default();
        raw.insert(header.clone(), Value::String(cell.to_string()));
    }
    raw
}

/// Extract all rows from the file at `path`, keyed by the header row.
///
/// The row ceiling is enforced during parsing: as soon as more than
/// `max_rows` data rows are seen, extraction aborts before any downstream
/// work happens.
pub async fn extract(
    path: &Path,
    declared_name: &str,
    max_rows: usize,
) -> Result<Vec<RawRecord>, ExtractError> {
    let ext = sniff_extension(path, declared_name);
    if ext != "csv" {
        return Err(ExtractError::UnsupportedFormat(ext));
    }

    let bytes = tokio::fs::read(path).await?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record_to_raw(&headers, &record));
        if rows.len() > max_rows {
            return Err(ExtractError::RowLimitExceeded {
                rows: rows.len(),
                max: max_rows,
            });
        }
    }

    Ok(rows)
}

/// Extract the header list and the first `limit` rows only.
///
/// Header derivation is the same function of the parsed file as in
/// [`extract`], so preview and full processing cannot diverge.
pub async fn preview(
    path: &Path,
    declared_name: &str,
    limit: usize,
) -> Result<FilePreview, ExtractError> {
    let ext = sniff_extension(path, declared_name);
    if ext != "csv" {
        return Err(ExtractError::UnsupportedFormat(ext));
    }

    let bytes = tokio::fs::read(path).await?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        if rows.len() >= limit {
            break;
        }
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record_to_raw(&headers, &record));
    }

    Ok(FilePreview { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .expect("create temp file");
        file.write_all(content.as_bytes()).expect("write csv");
        file
    }

    #[tokio::test]
    async fn extracts_rows_keyed_by_header() {
        let file = write_csv("Transaction ID,Amount\nT1,100\nT2,200\n");

        let rows = extract(file.path(), "upload.csv", 100).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Transaction ID"], "T1");
        assert_eq!(rows[1]["Amount"], "200");
    }

    #[tokio::test]
    async fn rejects_unknown_extension() {
        let file = write_csv("a,b\n1,2\n");

        let err = extract(file.path(), "upload.xlsx", 100).await;
        // Storage path extension wins; a genuinely unknown one fails.
        assert!(err.is_ok());

        let err = extract(std::path::Path::new("/tmp/blob"), "upload.pdf", 100).await;
        assert!(matches!(err, Err(ExtractError::UnsupportedFormat(ref e)) if e == "pdf"));
    }

    #[tokio::test]
    async fn enforces_row_ceiling() {
        let mut content = String::from("id,amount\n");
        for i in 0..6 {
            content.push_str(&format!("T{},1\n", i));
        }
        let file = write_csv(&content);

        let err = extract(file.path(), "upload.csv", 5).await;
        assert!(matches!(
            err,
            Err(ExtractError::RowLimitExceeded { rows: 6, max: 5 })
        ));
    }

    #[tokio::test]
    async fn preview_returns_headers_and_first_rows() {
        let file = write_csv("id,amount\nT1,1\nT2,2\nT3,3\n");

        let preview = preview(file.path(), "upload.csv", 2).await.unwrap();

        assert_eq!(preview.headers, vec!["id", "amount"]);
        assert_eq!(preview.rows.len(), 2);
        assert_eq!(preview.rows[1]["id"], "T2");
    }

    #[tokio::test]
    async fn skips_blank_rows_and_pads_short_ones() {
        let file = write_csv("id,amount\nT1\n,\nT2,5\n");

        let rows = extract(file.path(), "upload.csv", 100).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "T1");
        assert_eq!(rows[0]["amount"], "");
        assert_eq!(rows[1]["amount"], "5");
    }
}
