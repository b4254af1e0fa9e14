//! Integration tests for fingerprint claims: idempotent re-uploads,
//! in-flight duplicates and retry after failure.

mod common;

use chrono::{Duration, Utc};
use common::{fingerprint_of, pipeline_config, TestContext};
use ingest_service::models::{ClaimStatus, JobStatus};
use uuid::Uuid;

const CONTENT: &str = "Transaction ID,Amount,Reference Number,Date\n\
                       T1,100,R1,2024-01-15\n\
                       T2,55,R2,2024-01-15\n";

#[tokio::test]
async fn identical_content_reuses_completed_results() {
    let ctx = TestContext::new().await;

    let first = ctx.write_file("first.csv", CONTENT);
    let original = ctx.submitted_job(&first, None).await;
    ctx.processor().process(original.job_id).await.unwrap();

    let original = ctx.job(original.job_id).await;
    assert_eq!(original.status(), JobStatus::Completed);
    assert!(original.reused_from.is_none());

    // Same bytes under a different name fingerprint identically.
    let second = ctx.write_file("second.csv", CONTENT);
    assert_eq!(fingerprint_of(&first), fingerprint_of(&second));

    let reupload = ctx.submitted_job(&second, None).await;
    ctx.processor().process(reupload.job_id).await.unwrap();

    let reupload = ctx.job(reupload.job_id).await;
    assert_eq!(reupload.status(), JobStatus::Completed);
    assert_eq!(reupload.reused_from, Some(original.job_id));
    assert_eq!(reupload.stats(), original.stats());

    // Reuse adopts results without re-processing any rows.
    let outcomes = ctx
        .db
        .outcomes_by_job(reupload.job_id, None)
        .await
        .unwrap();
    assert!(outcomes.is_empty());

    // The claim still belongs to the original job.
    let claim = ctx
        .db
        .get_claim(&fingerprint_of(&first))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.job_id, original.job_id);
    assert_eq!(claim.status(), ClaimStatus::Completed);
}

#[tokio::test]
async fn in_flight_duplicate_fails_the_later_job() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file("upload.csv", CONTENT);
    let fingerprint = fingerprint_of(&file);

    // Another job holds a processing claim on the same content.
    let holder = Uuid::new_v4();
    let outcome = ctx.db.claim_fingerprint(&fingerprint, holder).await.unwrap();
    assert!(outcome.claimed);

    let job = ctx.submitted_job(&file, None).await;
    ctx.processor().process(job.job_id).await.unwrap();

    let job = ctx.job(job.job_id).await;
    assert_eq!(job.status(), JobStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.contains("already processing"), "{}", message);
    assert!(message.contains(&holder.to_string()), "{}", message);

    // The holder's claim is untouched.
    let claim = ctx.db.get_claim(&fingerprint).await.unwrap().unwrap();
    assert_eq!(claim.job_id, holder);
    assert_eq!(claim.status(), ClaimStatus::Processing);
}

#[tokio::test]
async fn failed_claim_is_reclaimed_by_a_retry() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file("upload.csv", CONTENT);

    // First attempt fails on the row ceiling and releases the claim.
    let first = ctx.submitted_job(&file, None).await;
    let mut config = pipeline_config();
    config.max_rows = 1;
    ctx.processor_with(config)
        .process(first.job_id)
        .await
        .unwrap();
    assert_eq!(ctx.job(first.job_id).await.status(), JobStatus::Failed);

    // A fresh upload of the same content takes over the claim.
    let retry = ctx.submitted_job(&file, None).await;
    ctx.processor().process(retry.job_id).await.unwrap();

    let retry = ctx.job(retry.job_id).await;
    assert_eq!(retry.status(), JobStatus::Completed);
    assert!(retry.reused_from.is_none());
    assert_eq!(retry.stats().total, 2);

    let claim = ctx
        .db
        .get_claim(&fingerprint_of(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.job_id, retry.job_id);
    assert_eq!(claim.status(), ClaimStatus::Completed);
}

#[tokio::test]
async fn interrupted_job_resumes_its_own_claim() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file("upload.csv", CONTENT);
    let job = ctx.submitted_job(&file, None).await;

    // Simulate a crash after claiming but before completion.
    let fingerprint = fingerprint_of(&file);
    let outcome = ctx
        .db
        .claim_fingerprint(&fingerprint, job.job_id)
        .await
        .unwrap();
    assert!(outcome.claimed);

    ctx.processor().process(job.job_id).await.unwrap();

    assert_eq!(ctx.job(job.job_id).await.status(), JobStatus::Completed);
    let claim = ctx.db.get_claim(&fingerprint).await.unwrap().unwrap();
    assert_eq!(claim.status(), ClaimStatus::Completed);
}

#[tokio::test]
async fn stale_processing_claims_are_reported() {
    let ctx = TestContext::new().await;

    let claimed = ctx
        .db
        .claim_fingerprint("abc123", Uuid::new_v4())
        .await
        .unwrap();
    assert!(claimed.claimed);

    let stale = ctx
        .db
        .stale_processing_claims(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].fingerprint, "abc123");

    let none = ctx
        .db
        .stale_processing_claims(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn concurrent_submissions_of_identical_content_settle_cleanly() {
    let ctx = TestContext::new().await;

    let file = ctx.write_file("upload.csv", CONTENT);
    let a = ctx.submitted_job(&file, None).await;
    let b = ctx.submitted_job(&file, None).await;

    let processor_a = ctx.processor();
    let processor_b = ctx.processor();
    let (ra, rb) = tokio::join!(
        processor_a.process(a.job_id),
        processor_b.process(b.job_id)
    );
    ra.unwrap();
    rb.unwrap();

    let a = ctx.job(a.job_id).await;
    let b = ctx.job(b.job_id).await;

    // Exactly one job owns the claim and both reach a terminal state; the
    // loser either failed on the in-flight duplicate or reused the
    // winner's results, depending on timing.
    let claim = ctx
        .db
        .get_claim(&fingerprint_of(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.status(), ClaimStatus::Completed);
    assert!(claim.job_id == a.job_id || claim.job_id == b.job_id);

    for job in [&a, &b] {
        assert!(matches!(
            job.status(),
            JobStatus::Completed | JobStatus::Failed
        ));
    }
    let owner = if claim.job_id == a.job_id { &a } else { &b };
    assert_eq!(owner.status(), JobStatus::Completed);
}
