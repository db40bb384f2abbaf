//! Core traits for the SMC exporter
//!
//! This module defines the abstract interfaces at the edges of the engine.
//!
//! - [`SmcApi`]: Authenticated session against the SMC REST API
//! - [`KeyValueStore`]: Persisted configuration and list registry storage
//! - [`StatusReporter`]: Batch outcome reporting to the orchestrator
//! - [`RuleWorkflow`]: IDS rule-file export/import

pub mod smc_api;
pub mod kv_store;
pub mod reporter;
pub mod rule_workflow;

pub use smc_api::{ApiRequest, ApiResponse, HttpMethod, SmcApi, execute_with_reauth};
pub use kv_store::KeyValueStore;
pub use reporter::StatusReporter;
pub use rule_workflow::RuleWorkflow;
