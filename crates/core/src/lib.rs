//! `demusify-core`: domain building blocks for the video de-music pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the `Job` record, its state machine, artifact references and the failure
//! taxonomy that collaborators map their errors onto.

pub mod artifact;
pub mod error;
pub mod failure;
pub mod filename;
pub mod id;
pub mod inference;
pub mod job;

pub use artifact::ArtifactRef;
pub use error::{DomainError, DomainResult};
pub use failure::{FailureKind, JobError};
pub use filename::sanitize_filename;
pub use id::JobId;
pub use inference::InferenceHandle;
pub use job::{Job, JobState};
