//! Integration tests for the ingestion pipeline: extraction, field
//! resolution, rule classification, statistics and the audit trail.

mod common;

use chrono::{TimeZone, Utc};
use common::{fingerprint_of, pipeline_config, TestContext};
use ingest_service::models::{ClaimStatus, JobStatus, MatchStatus};

#[tokio::test]
async fn csv_rows_are_classified_and_job_completes() {
    let ctx = TestContext::new().await;
    let date = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
    ctx.seed_system_record("T1", 100.0, "R1", date).await;
    ctx.seed_system_record("T2", 100.0, "R2", date).await;

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Reference Number,Date\n\
         T1,100,R1,2024-01-15\n\
         T2,101,R2,2024-01-15\n\
         T9,50,R9,2024-01-15\n",
    );
    let job = ctx.submitted_job(&file, None).await;

    ctx.processor().process(job.job_id).await.unwrap();

    let job = ctx.job(job.job_id).await;
    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.fingerprint.is_some());

    let stats = job.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.partial, 1);
    assert_eq!(stats.unmatched, 1);
    assert_eq!(stats.duplicate, 0);
    assert_eq!(stats.failed, 0);

    let outcomes = ctx.db.outcomes_by_job(job.job_id, None).await.unwrap();
    assert_eq!(outcomes.len(), 3);

    let partial = ctx
        .db
        .outcomes_by_job(job.job_id, Some(MatchStatus::Partial))
        .await
        .unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(*partial[0].mismatches, vec!["amount".to_string()]);
}

#[tokio::test]
async fn malformed_rows_are_rejected_without_failing_the_job() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Date\n\
         T1,10,2024-01-15\n\
         ,20,2024-01-15\n\
         T2,not-a-number,2024-01-15\n",
    );
    let job = ctx.submitted_job(&file, None).await;

    ctx.processor().process(job.job_id).await.unwrap();

    let job = ctx.job(job.job_id).await;
    assert_eq!(job.status(), JobStatus::Completed);

    let stats = job.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.skipped, 2);

    let rejected = ctx.db.rejected_rows_by_job(job.job_id).await.unwrap();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0].row_number, 2);
    assert_eq!(rejected[0].reason, "Missing Transaction ID");
    assert_eq!(rejected[1].row_number, 3);
    assert!(rejected[1].reason.starts_with("Invalid Amount"));
}

#[tokio::test]
async fn repeated_rows_within_one_file_are_flagged_duplicate() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Reference Number,Date\n\
         T1,100,R1,2024-01-15\n\
         T1,100,R1,2024-01-15\n",
    );
    let job = ctx.submitted_job(&file, None).await;

    ctx.processor().process(job.job_id).await.unwrap();

    let stats = ctx.job(job.job_id).await.stats();
    // The first occurrence classifies normally; only the repeat is a
    // duplicate.
    assert_eq!(stats.unmatched, 1);
    assert_eq!(stats.duplicate, 1);
}

#[tokio::test]
async fn duplicates_are_detected_across_jobs() {
    let ctx = TestContext::new().await;

    let first = ctx.write_file(
        "first.csv",
        "Transaction ID,Amount,Reference Number,Date\nT1,100,R1,2024-01-15\n",
    );
    let job = ctx.submitted_job(&first, None).await;
    ctx.processor().process(job.job_id).await.unwrap();

    // Different file content, same transaction tuple.
    let second = ctx.write_file(
        "second.csv",
        "Transaction ID,Amount,Reference Number,Date\n\
         T1,100,R1,2024-01-15\n\
         T2,5,R2,2024-01-15\n",
    );
    let job = ctx.submitted_job(&second, None).await;
    ctx.processor().process(job.job_id).await.unwrap();

    let stats = ctx.job(job.job_id).await.stats();
    assert_eq!(stats.duplicate, 1);
    assert_eq!(stats.unmatched, 1);
}

#[tokio::test]
async fn row_limit_exceeded_fails_job_and_claim() {
    let ctx = TestContext::new().await;

    let mut content = String::from("Transaction ID,Amount,Date\n");
    for i in 0..4 {
        content.push_str(&format!("T{},1,2024-01-15\n", i));
    }
    let file = ctx.write_file("upload.csv", &content);
    let job = ctx.submitted_job(&file, None).await;

    let mut config = pipeline_config();
    config.max_rows = 3;
    ctx.processor_with(config).process(job.job_id).await.unwrap();

    let job = ctx.job(job.job_id).await;
    assert_eq!(job.status(), JobStatus::Failed);
    let message = job.error_message.expect("failure message recorded");
    assert!(message.contains("Row limit exceeded"), "{}", message);

    // No partial results survive a fatal failure before the row loop.
    let outcomes = ctx.db.outcomes_by_job(job.job_id, None).await.unwrap();
    assert!(outcomes.is_empty());

    // The claim is released for a later retry.
    let claim = ctx
        .db
        .get_claim(&fingerprint_of(&file))
        .await
        .unwrap()
        .expect("claim recorded");
    assert_eq!(claim.status(), ClaimStatus::Failed);
    assert!(claim.error_message.is_some());
}

#[tokio::test]
async fn unsupported_file_type_fails_the_job() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file("statement.pdf", "%PDF-1.4 not really");
    let job = ctx.submitted_job(&file, None).await;

    ctx.processor().process(job.job_id).await.unwrap();

    let job = ctx.job(job.job_id).await;
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .contains("Unsupported file type"));
}

#[tokio::test]
async fn draft_jobs_are_refused() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Date\nT1,1,2024-01-15\n",
    );
    let draft = ctx
        .db
        .create_job("upload.csv", &file.to_string_lossy(), None, JobStatus::Draft)
        .await
        .unwrap();

    ctx.processor().process(draft.job_id).await.unwrap();

    let job = ctx.job(draft.job_id).await;
    assert_eq!(job.status(), JobStatus::Draft);
    assert!(ctx
        .db
        .outcomes_by_job(job.job_id, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn submit_transitions_a_draft_exactly_once() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Date\nT1,1,2024-01-15\n",
    );
    let draft = ctx
        .db
        .create_job("upload.csv", &file.to_string_lossy(), None, JobStatus::Draft)
        .await
        .unwrap();

    let submitted = ctx.db.submit_job(draft.job_id, None).await.unwrap();
    assert_eq!(submitted.unwrap().status(), JobStatus::Processing);

    // A second submit finds the job no longer in draft.
    let resubmitted = ctx.db.submit_job(draft.job_id, None).await.unwrap();
    assert!(resubmitted.is_none());
}

#[tokio::test]
async fn every_processed_record_gets_an_audit_entry() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Date\nT1,1,2024-01-15\n",
    );
    let job = ctx.submitted_job(&file, None).await;

    ctx.processor().process(job.job_id).await.unwrap();

    let outcomes = ctx.db.outcomes_by_job(job.job_id, None).await.unwrap();
    assert_eq!(outcomes.len(), 1);

    let trail = ctx
        .db
        .audit_trail("CanonicalRecord", outcomes[0].record_id)
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "reconciled");
    assert!(trail[0].actor.is_none());
}

#[tokio::test]
async fn explicit_column_mapping_overrides_default_headers() {
    let ctx = TestContext::new().await;
    let date = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
    ctx.seed_system_record("T1", 100.0, "R1", date).await;

    let file = ctx.write_file(
        "upload.csv",
        "txn,value,ref,when\nT1,100,R1,2024-01-15\n",
    );
    let mapping = ingest_service::models::ColumnMapping {
        transaction_id: Some("txn".to_string()),
        amount: Some("value".to_string()),
        reference_number: Some("ref".to_string()),
        date: Some("when".to_string()),
    };
    let job = ctx.submitted_job(&file, Some(&mapping)).await;

    ctx.processor().process(job.job_id).await.unwrap();

    let stats = ctx.job(job.job_id).await.stats();
    assert_eq!(stats.matched, 1);
}

#[tokio::test]
async fn deactivated_rules_are_skipped() {
    let ctx = TestContext::new().await;
    let date = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
    ctx.seed_system_record("T1", 100.0, "R1", date).await;

    // Deactivate the exact rule; an exact-matching row falls through to
    // partial.
    let rules = ctx.db.active_rules().await.unwrap();
    let exact = rules.iter().find(|r| r.rule_type == "exact").unwrap();
    assert!(ctx.db.set_rule_active(exact.rule_id, false).await.unwrap());

    let file = ctx.write_file(
        "upload.csv",
        "Transaction ID,Amount,Reference Number,Date\nT1,100,R1,2024-01-15\n",
    );
    let job = ctx.submitted_job(&file, None).await;
    ctx.processor().process(job.job_id).await.unwrap();

    let stats = ctx.job(job.job_id).await.stats();
    assert_eq!(stats.matched, 0);
    assert_eq!(stats.partial, 1);
}
