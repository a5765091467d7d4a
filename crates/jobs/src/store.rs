//! Job storage.
//!
//! The transition methods (`complete` / `fail` / `begin_retry`) are
//! conditional writes: they return `Ok(Some(job))` only for the caller whose
//! expected prior status still held at write time. A caller receiving
//! `Ok(None)` lost the race and must not apply its side effects.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sketchforge_core::{JobId, OwnerId};

use crate::types::{Job, JobStatus};

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("owner isolation violation")]
    OwnerIsolation,

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Owner-scoped read; accessing another owner's job is an isolation
    /// error, not a not-found.
    async fn get(&self, owner_id: OwnerId, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Newest first.
    async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Job>, JobStoreError>;

    /// `processing -> completed` with the output reference, only if the job
    /// is still processing.
    async fn complete(
        &self,
        job_id: JobId,
        output_ref: String,
    ) -> Result<Option<Job>, JobStoreError>;

    /// `processing -> failed` with a failure message, only if the job is
    /// still processing.
    async fn fail(&self, job_id: JobId, error: String) -> Result<Option<Job>, JobStoreError>;

    /// `failed -> processing`, only if the job is currently failed. This is
    /// the sole path back into processing.
    async fn begin_retry(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Jobs still `processing` whose `updated_at` is older than the cutoff.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError>;

    /// Clear the unseen flag; returns the updated job.
    async fn mark_seen(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError>;
}

/// In-memory job store for dev/tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sync(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    pub fn get_sync(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        match jobs.get(&job_id) {
            Some(job) if job.owner_id == owner_id => Ok(Some(job.clone())),
            Some(_) => Err(JobStoreError::OwnerIsolation),
            None => Ok(None),
        }
    }

    /// Conditional transition shared by the public methods.
    fn transition_if(
        &self,
        job_id: JobId,
        expected: JobStatus,
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        if job.status != expected {
            return Ok(None);
        }
        // `expected` matching makes this infallible for the closed machine.
        job.transition(to)
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        apply(job);
        Ok(Some(job.clone()))
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        self.insert_sync(job)
    }

    async fn get(&self, owner_id: OwnerId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.get_sync(owner_id, job_id)
    }

    async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn complete(
        &self,
        job_id: JobId,
        output_ref: String,
    ) -> Result<Option<Job>, JobStoreError> {
        self.transition_if(job_id, JobStatus::Processing, JobStatus::Completed, |job| {
            job.output_ref = Some(output_ref);
        })
    }

    async fn fail(&self, job_id: JobId, error: String) -> Result<Option<Job>, JobStoreError> {
        self.transition_if(job_id, JobStatus::Processing, JobStatus::Failed, |job| {
            job.error = Some(error);
        })
    }

    async fn begin_retry(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError> {
        // Owner check first: retry is an owner-initiated action.
        match self.get_sync(owner_id, job_id)? {
            Some(_) => {}
            None => return Err(JobStoreError::NotFound(job_id)),
        }
        self.transition_if(job_id, JobStatus::Failed, JobStatus::Processing, |_| {})
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < cutoff)
            .cloned()
            .collect();
        result.sort_by_key(|j| j.updated_at);
        Ok(result)
    }

    async fn mark_seen(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job_id) {
            Some(job) if job.owner_id == owner_id => {
                job.unseen = false;
                Ok(Some(job.clone()))
            }
            Some(_) => Err(JobStoreError::OwnerIsolation),
            None => Ok(None),
        }
    }
}
