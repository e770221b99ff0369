//! Job persistence, retry policy and the orchestration state machine.

pub mod orchestrator;
pub mod retry;
pub mod sqlite;
pub mod store;

pub use orchestrator::{
    Collaborators, JobOrchestrator, OrchestratorError, OrchestratorSettings, SUPPORTED_EXTENSIONS,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
