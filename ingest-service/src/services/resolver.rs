//! Field resolution: maps a raw record into a [`CanonicalInput`] using the
//! job's column mapping, falling back to well-known header names.

use crate::models::{CanonicalInput, ColumnMapping, RawRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

/// A row-level resolution failure. Never fatal to the batch: the processor
/// records the row as rejected and moves on.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Missing Transaction ID")]
    MissingTransactionId,

    #[error("Invalid Amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid Date: {0}")]
    InvalidDate(String),
}

/// Column-name candidates probed when no explicit mapping names a source
/// column. Both machine and human-readable headers are supported.
const TRANSACTION_ID_KEYS: &[&str] = &["transactionId", "Transaction ID"];
const AMOUNT_KEYS: &[&str] = &["amount", "Amount"];
const REFERENCE_KEYS: &[&str] = &["referenceNumber", "Reference Number"];
const DATE_KEYS: &[&str] = &["date", "Date"];

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// An explicitly mapped column always wins, even when absent from the row;
/// fallback candidates are only probed without a mapping entry.
fn resolve_field(raw: &RawRecord, mapped: Option<&String>, fallback: &[&str]) -> Option<String> {
    if let Some(column) = mapped {
        return raw.get(column).and_then(value_to_string);
    }
    for key in fallback {
        if let Some(value) = raw.get(*key) {
            return value_to_string(value);
        }
    }
    None
}

fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}

/// Resolve one raw record into its canonical shape.
pub fn resolve(raw: &RawRecord, mapping: Option<&ColumnMapping>) -> Result<CanonicalInput, ResolveError> {
    let transaction_id = resolve_field(
        raw,
        mapping.and_then(|m| m.transaction_id.as_ref()),
        TRANSACTION_ID_KEYS,
    )
    .unwrap_or_default()
    .trim()
    .to_string();
    if transaction_id.is_empty() {
        return Err(ResolveError::MissingTransactionId);
    }

    // Absent amount coerces to zero; a present non-numeric value is an error.
    let amount = match resolve_field(raw, mapping.and_then(|m| m.amount.as_ref()), AMOUNT_KEYS) {
        Some(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ResolveError::InvalidAmount(s.clone()))?,
        _ => 0.0,
    };

    // Absent date defaults to the processing time.
    let date = match resolve_field(raw, mapping.and_then(|m| m.date.as_ref()), DATE_KEYS) {
        Some(s) if !s.trim().is_empty() => {
            parse_date(s.trim()).ok_or_else(|| ResolveError::InvalidDate(s.clone()))?
        }
        _ => Utc::now(),
    };

    let reference_number = resolve_field(
        raw,
        mapping.and_then(|m| m.reference_number.as_ref()),
        REFERENCE_KEYS,
    )
    .unwrap_or_default()
    .trim()
    .to_string();

    Ok(CanonicalInput {
        transaction_id,
        amount,
        reference_number,
        date,
        raw: raw.clone(),
    })
}
