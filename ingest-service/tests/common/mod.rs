//! Common test utilities for ingest-service integration tests.

use chrono::{DateTime, Utc};
use ingest_service::config::PipelineConfig;
use ingest_service::models::{ColumnMapping, IngestionJob, JobStatus};
use ingest_service::services::{Database, JobProcessor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ingest_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Pipeline defaults for tests; individual tests override limits as needed.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        max_rows: 50_000,
        batch_size: 1_000,
        worker_count: 1,
        upload_dir: ".".to_string(),
    }
}

/// One isolated database plus a scratch directory for upload fixtures.
pub struct TestContext {
    pub db: Arc<Database>,
    dir: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestContext {
    pub async fn new() -> Self {
        init_tracing();

        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("ingest-test.db");
        let db = Database::new(&format!("sqlite:{}", db_path.display()), 2, 1)
            .await
            .expect("connect test database");
        db.run_migrations().await.expect("run migrations");
        db.ensure_default_rules().await.expect("seed default rules");

        Self {
            db: Arc::new(db),
            dir,
        }
    }

    pub fn processor(&self) -> JobProcessor {
        self.processor_with(pipeline_config())
    }

    pub fn processor_with(&self, config: PipelineConfig) -> JobProcessor {
        JobProcessor::new(self.db.clone(), config)
    }

    /// Write an upload fixture into the scratch directory.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    /// Create a draft job for a stored file and submit it for processing.
    pub async fn submitted_job(
        &self,
        storage_path: &Path,
        mapping: Option<&ColumnMapping>,
    ) -> IngestionJob {
        let filename = storage_path
            .file_name()
            .expect("fixture has a file name")
            .to_string_lossy()
            .to_string();
        let draft = self
            .db
            .create_job(
                &filename,
                &storage_path.to_string_lossy(),
                mapping,
                JobStatus::Draft,
            )
            .await
            .expect("create draft job");
        self.db
            .submit_job(draft.job_id, None)
            .await
            .expect("submit job")
            .expect("draft transitions to processing")
    }

    pub async fn seed_system_record(
        &self,
        transaction_id: &str,
        amount: f64,
        reference_number: &str,
        record_date: DateTime<Utc>,
    ) {
        self.db
            .insert_system_record(transaction_id, amount, reference_number, record_date)
            .await
            .expect("seed system record");
    }

    pub async fn job(&self, job_id: Uuid) -> IngestionJob {
        self.db
            .get_job(job_id)
            .await
            .expect("load job")
            .expect("job exists")
    }
}

/// Content fingerprint as the pipeline computes it.
pub fn fingerprint_of(path: &Path) -> String {
    use sha2::{Digest, Sha256};
    let bytes = std::fs::read(path).expect("read fixture");
    format!("{:x}", Sha256::digest(&bytes))
}
