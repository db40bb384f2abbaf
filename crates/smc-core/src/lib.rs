// # smc-core
//
// Core library for the SMC intelligence exporter.
//
// ## Architecture Overview
//
// This library reconciles indicator batches into the managed list objects of
// a Security Management Center (SMC):
// - **SmcApi**: Trait for an authenticated, versioned SMC REST session
// - **KeyValueStore**: Trait for the persisted configuration store
// - **ListRegistry**: Maps list roles to remote list identifiers, creating lists on first use
// - **ListReconciler**: Applies add/delete updates per list-type protocol
// - **BatchDispatcher**: Single-consumer loop that classifies batches and reports outcomes
// - **StatusReporter** / **RuleWorkflow**: External collaborators at the edges
//
// ## Design Principles
//
// 1. **Raw transport at the seam**: `SmcApi::execute` never retries; each
//    protocol step owns its single re-login-and-replay
// 2. **Explicit context**: configuration and stores are injected, never global
// 3. **Message passing**: sessions are handed to the dispatcher through a
//    single-slot watch channel
// 4. **Library-first**: the daemon is a thin wiring layer

pub mod traits;
pub mod model;
pub mod dispatcher;
pub mod reconciler;
pub mod registry;
pub mod rules;
pub mod config;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{ApiRequest, ApiResponse, HttpMethod, KeyValueStore, RuleWorkflow, SmcApi, StatusReporter};
pub use dispatcher::{BatchDispatcher, BatchGroup, DispatcherEvent, SessionReceiver, SessionSlot, SharedSession, retire_session};
pub use reconciler::{ListReconciler, ReconcileOutcome};
pub use registry::ListRegistry;
pub use model::{Batch, BatchStatus, Element, ElementKind, ListKind, ListParams, ListRole, UpdateKind};
pub use config::{ControllerConfig, DispatcherConfig, SmcConfig};
pub use error::{Error, Result};
pub use rules::StagingRuleWorkflow;
pub use state::{FileKeyValueStore, MemoryKeyValueStore};
