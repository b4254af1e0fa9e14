//! Database service for ingest-service.

use crate::models::{
    AuditLog, CanonicalInput, CanonicalRecord, ClaimStatus, ColumnMapping, FingerprintClaim,
    IngestionJob, JobStats, JobStatus, MatchRule, MatchStatus, RawRecord, ReconciliationOutcome,
    RejectedRow, SystemRecord,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::rules::default_rules;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Result of attempting to claim a fingerprint.
///
/// `claimed` is true when this call inserted the claim row; otherwise
/// `existing` carries the row that already owns the fingerprint.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub claimed: bool,
    pub existing: Option<FingerprintClaim>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ingest-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to SQLite"
        );

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("SQLite connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Ingestion Job Operations
    // =========================================================================

    #[instrument(skip(self, mapping))]
    pub async fn create_job(
        &self,
        filename: &str,
        storage_path: &str,
        mapping: Option<&ColumnMapping>,
        status: JobStatus,
    ) -> Result<IngestionJob, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_job"])
            .start_timer();

        let job_id = Uuid::new_v4();
        let now = Utc::now();

        let job = sqlx::query_as::<_, IngestionJob>(
            r#"
            INSERT INTO ingestion_jobs (job_id, filename, storage_path, status, mapping, created_utc, updated_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(filename)
        .bind(storage_path)
        .bind(status.as_str())
        .bind(mapping.map(Json))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job.job_id, status = %job.status, "Ingestion job created");

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestionJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_job"])
            .start_timer();

        let job = sqlx::query_as::<_, IngestionJob>(
            "SELECT * FROM ingestion_jobs WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// Move a draft job to `processing`, optionally attaching a column
    /// mapping. Conditional on the job still being a draft, so a job is
    /// submitted at most once.
    #[instrument(skip(self, mapping), fields(job_id = %job_id))]
    pub async fn submit_job(
        &self,
        job_id: Uuid,
        mapping: Option<&ColumnMapping>,
    ) -> Result<Option<IngestionJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["submit_job"])
            .start_timer();

        let job = sqlx::query_as::<_, IngestionJob>(
            r#"
            UPDATE ingestion_jobs
            SET status = ?,
                mapping = COALESCE(?, mapping),
                updated_utc = ?
            WHERE job_id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(mapping.map(Json))
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Draft.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to submit job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// Checkpoint a job's running statistics.
    ///
    /// Only the single owning worker writes statistics during a run and its
    /// tally only grows, so values are monotonic and safe to poll at any
    /// point while the job is `processing`.
    #[instrument(skip(self, stats), fields(job_id = %job_id))]
    pub async fn update_job_stats(&self, job_id: Uuid, stats: &JobStats) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_job_stats"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET stats_total = ?, stats_matched = ?, stats_partial = ?,
                stats_duplicate = ?, stats_unmatched = ?, stats_processed = ?,
                stats_skipped = ?, stats_failed = ?, updated_utc = ?
            WHERE job_id = ?
            "#,
        )
        .bind(stats.total)
        .bind(stats.matched)
        .bind(stats.partial)
        .bind(stats.duplicate)
        .bind(stats.unmatched)
        .bind(stats.processed)
        .bind(stats.skipped)
        .bind(stats.failed)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update job stats: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    /// Mark a job completed with its final statistics and confirmed
    /// fingerprint.
    #[instrument(skip(self, stats), fields(job_id = %job_id))]
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        stats: &JobStats,
        fingerprint: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_job"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = ?, fingerprint = ?,
                stats_total = ?, stats_matched = ?, stats_partial = ?,
                stats_duplicate = ?, stats_unmatched = ?, stats_processed = ?,
                stats_skipped = ?, stats_failed = ?, updated_utc = ?
            WHERE job_id = ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(fingerprint)
        .bind(stats.total)
        .bind(stats.matched)
        .bind(stats.partial)
        .bind(stats.duplicate)
        .bind(stats.unmatched)
        .bind(stats.processed)
        .bind(stats.skipped)
        .bind(stats.failed)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to complete job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job_id, "Job completed");

        Ok(())
    }

    /// Complete a job by adopting another job's results: statistics are
    /// copied, not recomputed, and `reused_from` records the original.
    #[instrument(skip(self, stats), fields(job_id = %job_id, reused_from = %reused_from))]
    pub async fn complete_job_reused(
        &self,
        job_id: Uuid,
        fingerprint: &str,
        reused_from: Uuid,
        stats: &JobStats,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_job_reused"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = ?, fingerprint = ?, reused_from = ?,
                stats_total = ?, stats_matched = ?, stats_partial = ?,
                stats_duplicate = ?, stats_unmatched = ?, stats_processed = ?,
                stats_skipped = ?, stats_failed = ?, updated_utc = ?
            WHERE job_id = ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(fingerprint)
        .bind(reused_from)
        .bind(stats.total)
        .bind(stats.matched)
        .bind(stats.partial)
        .bind(stats.duplicate)
        .bind(stats.unmatched)
        .bind(stats.processed)
        .bind(stats.skipped)
        .bind(stats.failed)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to complete job as reused: {}", e))
        })?;

        timer.observe_duration();
        info!(job_id = %job_id, reused_from = %reused_from, "Job completed from prior results");

        Ok(())
    }

    /// Mark a job failed with a terminal error message. The fingerprint is
    /// recorded when it was computed before the failure.
    #[instrument(skip(self, message), fields(job_id = %job_id))]
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        fingerprint: Option<&str>,
        message: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_job"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = ?, error_message = ?,
                fingerprint = COALESCE(?, fingerprint),
                updated_utc = ?
            WHERE job_id = ?
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(message)
        .bind(fingerprint)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fail job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job_id, "Job failed");

        Ok(())
    }

    // =========================================================================
    // Fingerprint Claim Operations
    // =========================================================================

    /// Atomically claim a fingerprint for `job_id`.
    ///
    /// Insert-if-absent: on a fingerprint collision the existing claim is
    /// returned instead of an error, so the caller can decide policy.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn claim_fingerprint(
        &self,
        fingerprint: &str,
        job_id: Uuid,
    ) -> Result<ClaimOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_fingerprint"])
            .start_timer();

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO fingerprint_claims (fingerprint, job_id, status, created_utc, updated_utc)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint)
        .bind(job_id)
        .bind(ClaimStatus::Processing.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to claim fingerprint: {}", e))
        })?;

        let outcome = if result.rows_affected() == 1 {
            ClaimOutcome {
                claimed: true,
                existing: None,
            }
        } else {
            ClaimOutcome {
                claimed: false,
                existing: self.get_claim(fingerprint).await?,
            }
        };

        timer.observe_duration();

        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn get_claim(&self, fingerprint: &str) -> Result<Option<FingerprintClaim>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_claim"])
            .start_timer();

        let claim = sqlx::query_as::<_, FingerprintClaim>(
            "SELECT * FROM fingerprint_claims WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get claim: {}", e)))?;

        timer.observe_duration();

        Ok(claim)
    }

    /// Take over a failed claim for `job_id`.
    ///
    /// Compare-and-swap: succeeds only if the claim is still `failed` at
    /// update time, so two jobs can never both win the reclaim.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn reclaim_failed_fingerprint(
        &self,
        fingerprint: &str,
        job_id: Uuid,
    ) -> Result<Option<FingerprintClaim>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reclaim_failed_fingerprint"])
            .start_timer();

        let claim = sqlx::query_as::<_, FingerprintClaim>(
            r#"
            UPDATE fingerprint_claims
            SET job_id = ?, status = ?, error_message = NULL, updated_utc = ?
            WHERE fingerprint = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(ClaimStatus::Processing.as_str())
        .bind(Utc::now())
        .bind(fingerprint)
        .bind(ClaimStatus::Failed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to reclaim fingerprint: {}", e))
        })?;

        timer.observe_duration();

        Ok(claim)
    }

    /// Mark an owned claim completed. The write is accepted only while
    /// `job_id` still owns the claim.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn mark_claim_completed(
        &self,
        fingerprint: &str,
        job_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_claim_completed"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE fingerprint_claims
            SET status = ?, updated_utc = ?
            WHERE fingerprint = ? AND job_id = ?
            "#,
        )
        .bind(ClaimStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(fingerprint)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark claim completed: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    /// Mark an owned claim failed, recording the error so a later upload of
    /// the same content may reclaim it.
    #[instrument(skip(self, message), fields(job_id = %job_id))]
    pub async fn mark_claim_failed(
        &self,
        fingerprint: &str,
        job_id: Uuid,
        message: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_claim_failed"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE fingerprint_claims
            SET status = ?, error_message = ?, updated_utc = ?
            WHERE fingerprint = ? AND job_id = ?
            "#,
        )
        .bind(ClaimStatus::Failed.as_str())
        .bind(message)
        .bind(Utc::now())
        .bind(fingerprint)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark claim failed: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    /// Claims stuck in `processing` since before `cutoff`. A claim left
    /// behind by a crashed worker blocks its fingerprint until failed or
    /// cleared manually; this is the monitoring surface for that state.
    #[instrument(skip(self))]
    pub async fn stale_processing_claims(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<FingerprintClaim>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["stale_processing_claims"])
            .start_timer();

        let claims = sqlx::query_as::<_, FingerprintClaim>(
            r#"
            SELECT * FROM fingerprint_claims
            WHERE status = ? AND updated_utc < ?
            ORDER BY updated_utc
            "#,
        )
        .bind(ClaimStatus::Processing.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list stale claims: {}", e))
        })?;

        timer.observe_duration();

        Ok(claims)
    }

    // =========================================================================
    // Canonical Record Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(job_id = %job_id))]
    pub async fn insert_canonical_record(
        &self,
        job_id: Uuid,
        input: &CanonicalInput,
    ) -> Result<CanonicalRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_canonical_record"])
            .start_timer();

        let record = sqlx::query_as::<_, CanonicalRecord>(
            r#"
            INSERT INTO canonical_records
                (record_id, job_id, transaction_id, amount, reference_number, record_date, record_day, raw, created_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(&input.transaction_id)
        .bind(input.amount)
        .bind(&input.reference_number)
        .bind(input.date)
        .bind(input.day())
        .bind(Json(&input.raw))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert canonical record: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    /// Count records sharing the duplicate tuple
    /// {transactionId, referenceNumber, amount, calendar day}, within one
    /// job when `job_id` is given or across all jobs otherwise. Includes
    /// the record itself.
    #[instrument(skip(self, input))]
    pub async fn count_duplicates(
        &self,
        job_id: Option<Uuid>,
        input: &CanonicalInput,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_duplicates"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM canonical_records
            WHERE transaction_id = ? AND reference_number = ?
              AND amount = ? AND record_day = ?
              AND (? IS NULL OR job_id = ?)
            "#,
        )
        .bind(&input.transaction_id)
        .bind(&input.reference_number)
        .bind(input.amount)
        .bind(input.day())
        .bind(job_id)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count duplicates: {}", e))
        })?;

        timer.observe_duration();

        Ok(count)
    }

    // =========================================================================
    // System-of-Record Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn find_system_record(
        &self,
        transaction_id: &str,
    ) -> Result<Option<SystemRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_system_record"])
            .start_timer();

        let record = sqlx::query_as::<_, SystemRecord>(
            "SELECT * FROM system_records WHERE transaction_id = ? LIMIT 1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find system record: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn insert_system_record(
        &self,
        transaction_id: &str,
        amount: f64,
        reference_number: &str,
        record_date: DateTime<Utc>,
    ) -> Result<SystemRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_system_record"])
            .start_timer();

        let record = sqlx::query_as::<_, SystemRecord>(
            r#"
            INSERT INTO system_records
                (system_record_id, transaction_id, amount, reference_number, record_date, created_utc)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(transaction_id)
        .bind(amount)
        .bind(reference_number)
        .bind(record_date)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert system record: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    // =========================================================================
    // Reconciliation Outcome Operations
    // =========================================================================

    #[instrument(skip(self, mismatches), fields(job_id = %job_id))]
    pub async fn insert_outcome(
        &self,
        job_id: Uuid,
        record_id: Uuid,
        system_record_id: Option<Uuid>,
        status: MatchStatus,
        mismatches: &[String],
    ) -> Result<ReconciliationOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_outcome"])
            .start_timer();

        let outcome = sqlx::query_as::<_, ReconciliationOutcome>(
            r#"
            INSERT INTO reconciliation_outcomes
                (outcome_id, job_id, record_id, system_record_id, status, mismatches, created_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(record_id)
        .bind(system_record_id)
        .bind(status.as_str())
        .bind(Json(mismatches))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert outcome: {}", e)))?;

        timer.observe_duration();

        Ok(outcome)
    }

    /// Outcomes for one job, optionally filtered by status, in processing
    /// order. Review-UI query surface.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn outcomes_by_job(
        &self,
        job_id: Uuid,
        status: Option<MatchStatus>,
    ) -> Result<Vec<ReconciliationOutcome>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["outcomes_by_job"])
            .start_timer();

        let outcomes = sqlx::query_as::<_, ReconciliationOutcome>(
            r#"
            SELECT * FROM reconciliation_outcomes
            WHERE job_id = ? AND (? IS NULL OR status = ?)
            ORDER BY created_utc, outcome_id
            "#,
        )
        .bind(job_id)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list outcomes: {}", e)))?;

        timer.observe_duration();

        Ok(outcomes)
    }

    // =========================================================================
    // Rejected Row Operations
    // =========================================================================

    #[instrument(skip(self, raw, reason), fields(job_id = %job_id, row_number = row_number))]
    pub async fn insert_rejected_row(
        &self,
        job_id: Uuid,
        row_number: i64,
        reason: &str,
        raw: &RawRecord,
    ) -> Result<RejectedRow, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_rejected_row"])
            .start_timer();

        let rejected = sqlx::query_as::<_, RejectedRow>(
            r#"
            INSERT INTO rejected_rows (rejected_row_id, job_id, row_number, reason, raw, created_utc)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(row_number)
        .bind(reason)
        .bind(Json(raw))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert rejected row: {}", e))
        })?;

        timer.observe_duration();

        Ok(rejected)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn rejected_rows_by_job(&self, job_id: Uuid) -> Result<Vec<RejectedRow>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rejected_rows_by_job"])
            .start_timer();

        let rows = sqlx::query_as::<_, RejectedRow>(
            "SELECT * FROM rejected_rows WHERE job_id = ? ORDER BY row_number",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list rejected rows: {}", e))
        })?;

        timer.observe_duration();

        Ok(rows)
    }

    // =========================================================================
    // Match Rule Operations
    // =========================================================================

    /// Install the default rule set if the rules table is empty.
    #[instrument(skip(self))]
    pub async fn ensure_default_rules(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ensure_default_rules"])
            .start_timer();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM match_rules")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to count rules: {}", e))
            })?;

        if count == 0 {
            for seed in default_rules() {
                sqlx::query(
                    r#"
                    INSERT INTO match_rules (rule_id, name, rule_type, config, priority, active, created_utc)
                    VALUES (?, ?, ?, ?, ?, 1, ?)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(seed.name)
                .bind(seed.rule_type.as_str())
                .bind(Json(&seed.config))
                .bind(seed.priority)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to seed rule: {}", e))
                })?;
            }
            info!("Default match rules installed");
        }

        timer.observe_duration();

        Ok(())
    }

    /// Active rules in ascending priority order, the shape the rule engine
    /// consumes.
    #[instrument(skip(self))]
    pub async fn active_rules(&self) -> Result<Vec<MatchRule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_rules"])
            .start_timer();

        let rules = sqlx::query_as::<_, MatchRule>(
            "SELECT * FROM match_rules WHERE active = 1 ORDER BY priority",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load rules: {}", e)))?;

        timer.observe_duration();

        Ok(rules)
    }

    /// Toggle a rule's active flag. Rule administration is an external
    /// collaborator concern; this is the minimal write it needs.
    #[instrument(skip(self), fields(rule_id = %rule_id))]
    pub async fn set_rule_active(&self, rule_id: Uuid, active: bool) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_rule_active"])
            .start_timer();

        let result = sqlx::query("UPDATE match_rules SET active = ? WHERE rule_id = ?")
            .bind(active)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to toggle rule: {}", e))
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Audit Log Operations
    // =========================================================================

    /// Append one audit entry. `actor` is None for system actions. The
    /// audit table has no update or delete path anywhere in the service.
    #[instrument(skip(self, changes))]
    pub async fn record_audit(
        &self,
        record_type: &str,
        record_id: Uuid,
        actor: Option<Uuid>,
        action: &str,
        changes: Option<&serde_json::Value>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_audit"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (audit_id, record_type, record_id, actor, action, changes, created_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record_type)
        .bind(record_id)
        .bind(actor)
        .bind(action)
        .bind(changes.map(Json))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record audit: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn audit_trail(
        &self,
        record_type: &str,
        record_id: Uuid,
    ) -> Result<Vec<AuditLog>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["audit_trail"])
            .start_timer();

        let entries = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT * FROM audit_logs
            WHERE record_type = ? AND record_id = ?
            ORDER BY created_utc DESC
            "#,
        )
        .bind(record_type)
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load audit trail: {}", e))
        })?;

        timer.observe_duration();

        Ok(entries)
    }
}
