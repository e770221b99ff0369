//! Infrastructure layer: storage, media tooling, remote inference, job
//! persistence and orchestration.

pub mod artifacts;
pub mod config;
pub mod inference;
pub mod jobs;
pub mod media;

pub use config::{AppConfig, ConfigError, InferenceMode, JobStoreKind};
