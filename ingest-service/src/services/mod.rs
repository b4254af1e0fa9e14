//! Services module for ingest-service.

pub mod database;
pub mod extractor;
pub mod metrics;
pub mod processor;
pub mod resolver;
pub mod rules;

pub use database::{ClaimOutcome, Database};
pub use metrics::{
    get_metrics, init_metrics, record_claim_decision, record_error, record_job,
    record_row_outcome, record_row_rejected,
};
pub use processor::JobProcessor;
