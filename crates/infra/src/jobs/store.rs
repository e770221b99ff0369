//! Job persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use demusify_core::{Job, JobId, JobState};

/// Job store abstraction.
///
/// `update` is a compare-and-swap on the job state: the write only lands if
/// the stored record is still in `expected`. A concurrent writer that already
/// advanced the job makes the call fail with [`JobStoreError::StateConflict`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    async fn create(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Replace the stored record if its state is still `expected`.
    async fn update(&self, job: &Job, expected: JobState) -> Result<(), JobStoreError>;

    /// Remove a job, again only if it is still in `expected`.
    async fn delete(&self, id: JobId, expected: JobState) -> Result<(), JobStoreError>;

    /// Most recent jobs first.
    async fn list(&self, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs sitting in `state` whose last update is older than `older_than`.
    async fn list_stale(
        &self,
        state: JobState,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {id} is {found}, expected {expected}")]
    StateConflict {
        id: JobId,
        expected: JobState,
        found: JobState,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job map lock poisoned".to_string())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job, expected: JobState) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(JobStoreError::NotFound(job.id))?;
        if stored.state != expected {
            return Err(JobStoreError::StateConflict {
                id: job.id,
                expected,
                found: stored.state,
            });
        }
        *stored = job.clone();
        Ok(())
    }

    async fn delete(&self, id: JobId, expected: JobState) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let found = jobs.get(&id).ok_or(JobStoreError::NotFound(id))?.state;
        if found != expected {
            return Err(JobStoreError::StateConflict {
                id,
                expected,
                found,
            });
        }
        jobs.remove(&id);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_stale(
        &self,
        state: JobState,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.state == state && j.updated_at < older_than)
            .cloned()
            .collect();
        result.sort_by_key(|j| j.updated_at);
        Ok(result)
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).create(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(id).await
    }

    async fn update(&self, job: &Job, expected: JobState) -> Result<(), JobStoreError> {
        (**self).update(job, expected).await
    }

    async fn delete(&self, id: JobId, expected: JobState) -> Result<(), JobStoreError> {
        (**self).delete(id, expected).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(limit).await
    }

    async fn list_stale(
        &self,
        state: JobState,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_stale(state, older_than).await
    }
}

/// Shared behaviour checks, run against every store implementation.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use demusify_core::{ArtifactRef, FailureKind};

    pub fn new_job() -> Job {
        let id = JobId::new();
        Job::new(id, ArtifactRef::upload(id, "mp4")).with_original_name("clip.mp4")
    }

    pub async fn create_get_round_trip(store: &dyn JobStore) {
        let job = new_job();
        store.create(&job).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap(), Some(job.clone()));
        assert_eq!(
            store.create(&job).await.unwrap_err(),
            JobStoreError::AlreadyExists(job.id)
        );
        assert_eq!(store.get(JobId::new()).await.unwrap(), None);
    }

    pub async fn update_is_compare_and_swap(store: &dyn JobStore) {
        let mut job = new_job();
        store.create(&job).await.unwrap();

        job.begin_split().unwrap();
        store.update(&job, JobState::Created).await.unwrap();

        // A second writer still believing the job is Created loses.
        let mut stale = job.clone();
        stale.state = JobState::Created;
        stale.fail(FailureKind::SplitFailed, "late").unwrap();
        let err = store.update(&stale, JobState::Created).await.unwrap_err();
        assert_eq!(
            err,
            JobStoreError::StateConflict {
                id: job.id,
                expected: JobState::Created,
                found: JobState::Splitting,
            }
        );
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().state,
            JobState::Splitting
        );

        let missing = new_job();
        assert_eq!(
            store.update(&missing, JobState::Created).await.unwrap_err(),
            JobStoreError::NotFound(missing.id)
        );
    }

    pub async fn delete_is_guarded_by_state(store: &dyn JobStore) {
        let mut job = new_job();
        store.create(&job).await.unwrap();
        job.fail(FailureKind::SplitFailed, "boom").unwrap();
        store.update(&job, JobState::Created).await.unwrap();

        assert_eq!(
            store.delete(job.id, JobState::Ready).await.unwrap_err(),
            JobStoreError::StateConflict {
                id: job.id,
                expected: JobState::Ready,
                found: JobState::Failed,
            }
        );
        assert!(store.get(job.id).await.unwrap().is_some());

        store.delete(job.id, JobState::Failed).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap(), None);
        assert_eq!(
            store.delete(job.id, JobState::Failed).await.unwrap_err(),
            JobStoreError::NotFound(job.id)
        );
    }

    pub async fn listing(store: &dyn JobStore) {
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = new_job();
            ids.push(job.id);
            store.create(&job).await.unwrap();
        }
        let listed = store.list(2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);

        let future = Utc::now() + chrono::Duration::seconds(60);
        let stale = store.list_stale(JobState::Created, future).await.unwrap();
        assert_eq!(stale.len(), 3);
        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(
            store
                .list_stale(JobState::Created, past)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            store
                .list_stale(JobState::Merging, future)
                .await
                .unwrap()
                .is_empty()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_create_get() {
        contract::create_get_round_trip(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn in_memory_compare_and_swap() {
        contract::update_is_compare_and_swap(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn in_memory_delete() {
        contract::delete_is_guarded_by_state(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn in_memory_listing() {
        contract::listing(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn arc_store_delegates() {
        let store = InMemoryJobStore::arc();
        let job = contract::new_job();
        store.create(&job).await.unwrap();
        let shared: Arc<dyn JobStore> = store.clone();
        assert!(shared.get(job.id).await.unwrap().is_some());
    }
}
