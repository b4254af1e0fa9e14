//! Ingest Service - Transaction file ingestion and reconciliation pipeline.

pub mod config;
pub mod models;
pub mod queue;
pub mod services;
pub mod startup;
