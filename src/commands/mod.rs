//! Command implementations for the CLI
//!
//! - start: run the ingestion server and batch scheduler
//! - test: test configuration validity and print a summary
//! - config: configuration display and validation

pub mod config;
pub mod start;
