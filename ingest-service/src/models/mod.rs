//! Domain models for ingest-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// A raw extracted row: header-keyed cells, retained verbatim for audit
/// and rejection reporting.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Ingestion Job Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Draft,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Draft,
        }
    }
}

/// Optional user-supplied mapping from canonical field to source column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub transaction_id: Option<String>,
    pub amount: Option<String>,
    pub reference_number: Option<String>,
    pub date: Option<String>,
}

/// Running counters for one job's processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: i64,
    pub matched: i64,
    pub partial: i64,
    pub duplicate: i64,
    pub unmatched: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
}

impl JobStats {
    /// Tally one successfully classified row.
    pub fn record_outcome(&mut self, status: MatchStatus) {
        self.total += 1;
        self.processed += 1;
        match status {
            MatchStatus::Exact => self.matched += 1,
            MatchStatus::Partial => self.partial += 1,
            MatchStatus::Duplicate => self.duplicate += 1,
            MatchStatus::Unmatched => self.unmatched += 1,
        }
    }

    /// Tally one row that failed canonicalization.
    pub fn record_rejected(&mut self) {
        self.failed += 1;
        self.skipped += 1;
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub status: String,
    pub mapping: Option<Json<ColumnMapping>>,
    pub fingerprint: Option<String>,
    pub reused_from: Option<Uuid>,
    pub error_message: Option<String>,
    pub stats_total: i64,
    pub stats_matched: i64,
    pub stats_partial: i64,
    pub stats_duplicate: i64,
    pub stats_unmatched: i64,
    pub stats_processed: i64,
    pub stats_skipped: i64,
    pub stats_failed: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl IngestionJob {
    pub fn status(&self) -> JobStatus {
        JobStatus::from_str(&self.status)
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            total: self.stats_total,
            matched: self.stats_matched,
            partial: self.stats_partial,
            duplicate: self.stats_duplicate,
            unmatched: self.stats_unmatched,
            processed: self.stats_processed,
            skipped: self.stats_skipped,
            failed: self.stats_failed,
        }
    }

    pub fn mapping(&self) -> Option<&ColumnMapping> {
        self.mapping.as_ref().map(|m| &m.0)
    }
}

// ============================================================================
// Fingerprint Claim Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Processing,
    Completed,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FingerprintClaim {
    pub fingerprint: String,
    pub job_id: Uuid,
    pub status: String,
    pub error_message: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl FingerprintClaim {
    pub fn status(&self) -> ClaimStatus {
        ClaimStatus::from_str(&self.status)
    }
}

// ============================================================================
// Canonical Record Models
// ============================================================================

/// A normalized, validated input row before persistence.
#[derive(Debug, Clone)]
pub struct CanonicalInput {
    pub transaction_id: String,
    pub amount: f64,
    pub reference_number: String,
    pub date: DateTime<Utc>,
    pub raw: RawRecord,
}

impl CanonicalInput {
    /// Calendar day of the transaction, the date component of the
    /// duplicate-detection tuple.
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CanonicalRecord {
    pub record_id: Uuid,
    pub job_id: Uuid,
    pub transaction_id: String,
    pub amount: f64,
    pub reference_number: String,
    pub record_date: DateTime<Utc>,
    pub record_day: NaiveDate,
    pub raw: Json<RawRecord>,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// System-of-Record Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct SystemRecord {
    pub system_record_id: Uuid,
    pub transaction_id: String,
    pub amount: f64,
    pub reference_number: String,
    pub record_date: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Reconciliation Outcome Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Exact,
    Partial,
    Duplicate,
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Partial => "partial",
            Self::Duplicate => "duplicate",
            Self::Unmatched => "unmatched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "exact" => Self::Exact,
            "partial" => Self::Partial,
            "duplicate" => Self::Duplicate,
            "unmatched" => Self::Unmatched,
            _ => Self::Unmatched,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationOutcome {
    pub outcome_id: Uuid,
    pub job_id: Uuid,
    pub record_id: Uuid,
    pub system_record_id: Option<Uuid>,
    pub status: String,
    pub mismatches: Json<Vec<String>>,
    pub created_utc: DateTime<Utc>,
}

impl ReconciliationOutcome {
    pub fn status(&self) -> MatchStatus {
        MatchStatus::from_str(&self.status)
    }
}

// ============================================================================
// Rejected Row Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct RejectedRow {
    pub rejected_row_id: Uuid,
    pub job_id: Uuid,
    pub row_number: i64,
    pub reason: String,
    pub raw: Json<RawRecord>,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Match Rule Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Duplicate,
    Exact,
    Partial,
    Unmatched,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Exact => "exact",
            Self::Partial => "partial",
            Self::Unmatched => "unmatched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "duplicate" => Self::Duplicate,
            "exact" => Self::Exact,
            "partial" => Self::Partial,
            "unmatched" => Self::Unmatched,
            _ => Self::Unmatched,
        }
    }
}

/// Free-form rule configuration. Field names follow the stored JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_variance_percent: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MatchRule {
    pub rule_id: Uuid,
    pub name: String,
    pub rule_type: String,
    pub config: Json<RuleConfig>,
    pub priority: i64,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

impl MatchRule {
    pub fn rule_type(&self) -> RuleType {
        RuleType::from_str(&self.rule_type)
    }
}

// ============================================================================
// Audit Log Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct AuditLog {
    pub audit_id: Uuid,
    pub record_type: String,
    pub record_id: Uuid,
    pub actor: Option<Uuid>,
    pub action: String,
    pub changes: Option<Json<serde_json::Value>>,
    pub created_utc: DateTime<Utc>,
}
