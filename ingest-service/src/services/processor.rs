//! Batch processor: drives one ingestion job end to end.
//!
//! Lifecycle: `draft → processing → {completed | failed}`. The processor
//! only ever sees jobs already in `processing`; it computes the content
//! fingerprint, applies the claim policy, then resolves, classifies and
//! persists rows in batches with per-row failure isolation.

use crate::config::PipelineConfig;
use crate::models::{CanonicalInput, IngestionJob, JobStats, JobStatus, MatchRule};
use crate::services::database::Database;
use crate::services::metrics::{
    record_claim_decision, record_error, record_job, record_row_outcome, record_row_rejected,
    JOB_DURATION,
};
use crate::services::resolver::ResolveError;
use crate::services::{extractor, resolver, rules};
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How the claim policy resolved for this job's fingerprint.
#[derive(Debug, Clone, Copy)]
enum ClaimDecision {
    /// This job owns the claim and must process rows.
    Proceed,
    /// Identical content was already processed; adopt that job's results.
    Reuse { original_job: Uuid },
    /// Identical content is processing elsewhere right now.
    Blocked { owner: Uuid },
}

fn rejection_label(err: &ResolveError) -> &'static str {
    match err {
        ResolveError::MissingTransactionId => "missing_transaction_id",
        ResolveError::InvalidAmount(_) => "invalid_amount",
        ResolveError::InvalidDate(_) => "invalid_date",
    }
}

pub struct JobProcessor {
    db: Arc<Database>,
    config: PipelineConfig,
}

impl JobProcessor {
    pub fn new(db: Arc<Database>, config: PipelineConfig) -> Self {
        Self { db, config }
    }

    /// Process one dispatched job to a terminal state.
    ///
    /// Returns `Err` only when even the failure path could not be
    /// persisted; everything else ends with the job `completed` or
    /// `failed` and `Ok(())`.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process(&self, job_id: Uuid) -> Result<(), AppError> {
        let Some(job) = self.db.get_job(job_id).await? else {
            warn!(job_id = %job_id, "Dispatched job not found, skipping");
            return Ok(());
        };
        if job.status() == JobStatus::Draft {
            // Drafts are never enqueued; refuse rather than process.
            warn!(job_id = %job_id, "Refusing to process draft job");
            return Ok(());
        }

        let started = Instant::now();

        let bytes = match tokio::fs::read(&job.storage_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let message = format!("Failed to read uploaded file: {}", err);
                record_error("file_read");
                return self.finish_failed(&job, None, false, &message, started).await;
            }
        };
        let fingerprint = format!("{:x}", Sha256::digest(&bytes));

        let decision = match self.apply_claim_policy(&job, &fingerprint).await {
            Ok(decision) => decision,
            Err(err) => {
                let message = format!("Fingerprint claim failed: {}", err);
                record_error("claim");
                return self
                    .finish_failed(&job, Some(&fingerprint), false, &message, started)
                    .await;
            }
        };

        match decision {
            ClaimDecision::Reuse { original_job } => {
                record_claim_decision("reused");
                self.finish_reused(&job, &fingerprint, original_job).await?;
                JOB_DURATION
                    .with_label_values(&["completed"])
                    .observe(started.elapsed().as_secs_f64());
                Ok(())
            }
            ClaimDecision::Blocked { owner } => {
                record_claim_decision("blocked");
                let message =
                    format!("Duplicate upload is already processing in job {}", owner);
                self.finish_failed(&job, Some(&fingerprint), false, &message, started)
                    .await
            }
            ClaimDecision::Proceed => match self.run_rows(&job).await {
                Ok(stats) => {
                    self.db.complete_job(job.job_id, &stats, &fingerprint).await?;
                    self.db
                        .mark_claim_completed(&fingerprint, job.job_id)
                        .await?;
                    record_job("completed");
                    JOB_DURATION
                        .with_label_values(&["completed"])
                        .observe(started.elapsed().as_secs_f64());
                    info!(
                        job_id = %job.job_id,
                        total = stats.total,
                        matched = stats.matched,
                        partial = stats.partial,
                        duplicate = stats.duplicate,
                        unmatched = stats.unmatched,
                        rejected = stats.failed,
                        "Job processing completed"
                    );
                    Ok(())
                }
                Err(err) => {
                    record_error("job");
                    self.finish_failed(&job, Some(&fingerprint), true, &err.to_string(), started)
                        .await
                }
            },
        }
    }

    /// Claim policy: insert-if-absent, then decide on the existing claim.
    ///
    /// Losing the reclaim race loops back to re-read the claim's new state
    /// so the appropriate branch still applies.
    async fn apply_claim_policy(
        &self,
        job: &IngestionJob,
        fingerprint: &str,
    ) -> Result<ClaimDecision, AppError> {
        loop {
            let outcome = self.db.claim_fingerprint(fingerprint, job.job_id).await?;
            if outcome.claimed {
                record_claim_decision("claimed");
                return Ok(ClaimDecision::Proceed);
            }

            let Some(existing) = outcome.existing else {
                // Insert lost to a concurrent claim that is not visible
                // yet; re-read.
                continue;
            };

            if existing.job_id == job.job_id {
                // Re-dispatch of our own interrupted job: resume ownership.
                return Ok(ClaimDecision::Proceed);
            }

            match existing.status() {
                crate::models::ClaimStatus::Completed => {
                    return Ok(ClaimDecision::Reuse {
                        original_job: existing.job_id,
                    });
                }
                crate::models::ClaimStatus::Processing => {
                    return Ok(ClaimDecision::Blocked {
                        owner: existing.job_id,
                    });
                }
                crate::models::ClaimStatus::Failed => {
                    if self
                        .db
                        .reclaim_failed_fingerprint(fingerprint, job.job_id)
                        .await?
                        .is_some()
                    {
                        record_claim_decision("reclaimed");
                        return Ok(ClaimDecision::Proceed);
                    }
                    // Another job reclaimed first; fall through and
                    // re-check the claim's new state.
                }
            }
        }
    }

    /// Extract, resolve, classify and persist all rows for an owned job.
    ///
    /// Any error out of here is fatal for the job; a single row's
    /// resolution failure is not an error, it becomes a rejected row and
    /// the loop continues.
    async fn run_rows(&self, job: &IngestionJob) -> Result<JobStats, AppError> {
        let rows = extractor::extract(
            Path::new(&job.storage_path),
            &job.filename,
            self.config.max_rows,
        )
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("{}", e)))?;

        let rules = self.db.active_rules().await?;
        let mapping = job.mapping();

        let mut stats = JobStats::default();
        let batch_size = self.config.batch_size.max(1);

        for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
            for (offset, raw) in batch.iter().enumerate() {
                let row_number = (batch_index * batch_size + offset + 1) as i64;
                match resolver::resolve(raw, mapping) {
                    Ok(input) => {
                        self.process_row(job, &input, &rules, &mut stats).await?;
                    }
                    Err(err) => {
                        self.db
                            .insert_rejected_row(job.job_id, row_number, &err.to_string(), raw)
                            .await?;
                        stats.record_rejected();
                        record_row_rejected(rejection_label(&err));
                    }
                }
            }
            // Checkpoint after every batch so progress is observable
            // mid-flight.
            self.db.update_job_stats(job.job_id, &stats).await?;
        }

        Ok(stats)
    }

    /// Happy path for one resolved row: persist, count duplicates, match,
    /// classify, record the outcome and the audit entry.
    async fn process_row(
        &self,
        job: &IngestionJob,
        input: &CanonicalInput,
        rules: &[MatchRule],
        stats: &mut JobStats,
    ) -> Result<(), AppError> {
        let record = self.db.insert_canonical_record(job.job_id, input).await?;

        // Duplicate counts are taken after this row is persisted, so row N
        // observes rows 1..=N of its own job.
        let duplicate_count = self.db.count_duplicates(Some(job.job_id), input).await?;
        let duplicate_count_global = self.db.count_duplicates(None, input).await?;

        let system = self.db.find_system_record(&input.transaction_id).await?;

        let evaluation = rules::evaluate(
            input,
            system.as_ref(),
            duplicate_count,
            duplicate_count_global,
            rules,
        );

        self.db
            .insert_outcome(
                job.job_id,
                record.record_id,
                system.as_ref().map(|s| s.system_record_id),
                evaluation.status,
                &evaluation.mismatches,
            )
            .await?;

        self.db
            .record_audit(
                "CanonicalRecord",
                record.record_id,
                None,
                "reconciled",
                Some(&serde_json::json!({ "status": evaluation.status.as_str() })),
            )
            .await?;

        stats.record_outcome(evaluation.status);
        record_row_outcome(evaluation.status.as_str());

        Ok(())
    }

    /// Terminal success via another job's results: copy its statistics at
    /// completion time, never recompute.
    async fn finish_reused(
        &self,
        job: &IngestionJob,
        fingerprint: &str,
        original_job: Uuid,
    ) -> Result<(), AppError> {
        let stats = match self.db.get_job(original_job).await? {
            Some(original) => original.stats(),
            None => JobStats::default(),
        };
        self.db
            .complete_job_reused(job.job_id, fingerprint, original_job, &stats)
            .await?;
        record_job("reused");
        Ok(())
    }

    /// Terminal failure: persist the message, release the claim if this
    /// job owned it.
    async fn finish_failed(
        &self,
        job: &IngestionJob,
        fingerprint: Option<&str>,
        claim_owned: bool,
        message: &str,
        started: Instant,
    ) -> Result<(), AppError> {
        warn!(job_id = %job.job_id, error = %message, "Job processing failed");
        self.db.fail_job(job.job_id, fingerprint, message).await?;
        if claim_owned {
            if let Some(fingerprint) = fingerprint {
                self.db
                    .mark_claim_failed(fingerprint, job.job_id, message)
                    .await?;
            }
        }
        record_job("failed");
        JOB_DURATION
            .with_label_values(&["failed"])
            .observe(started.elapsed().as_secs_f64());
        Ok(())
    }
}
