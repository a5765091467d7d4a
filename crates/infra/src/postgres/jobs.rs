//! Postgres job store: transitions are conditional `UPDATE ... WHERE status`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use sketchforge_core::{JobId, OwnerId, Style};
use sketchforge_jobs::{Job, JobStatus, JobStore, JobStoreError};

use super::is_unique_violation;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str =
    "id, owner_id, style, input_ref, output_ref, status, error, unseen, created_at, updated_at";

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let style: String = row.try_get("style").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;
    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(storage)?),
        owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(storage)?),
        style: Style::from_str(&style).map_err(|e| JobStoreError::Storage(e.to_string()))?,
        input_ref: row.try_get("input_ref").map_err(storage)?,
        output_ref: row.try_get("output_ref").map_err(storage)?,
        status: JobStatus::from_str(&status).map_err(JobStoreError::Storage)?,
        error: row.try_get("error").map_err(storage)?,
        unseen: row.try_get("unseen").map_err(storage)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(storage)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(storage)?,
    })
}

fn storage(error: impl std::fmt::Display) -> JobStoreError {
    JobStoreError::Storage(error.to_string())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, owner_id, style, input_ref, output_ref, status, error, unseen, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(*job.id.as_uuid())
        .bind(*job.owner_id.as_uuid())
        .bind(job.style.as_str())
        .bind(&job.input_ref)
        .bind(&job.output_ref)
        .bind(job.status.as_str())
        .bind(&job.error)
        .bind(job.unseen)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job.id),
            Err(e) if is_unique_violation(&e) => Err(JobStoreError::AlreadyExists(job.id)),
            Err(e) => Err(storage(e)),
        }
    }

    async fn get(&self, owner_id: OwnerId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(*job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => {
                let job = job_from_row(&row)?;
                if job.owner_id != owner_id {
                    return Err(JobStoreError::OwnerIsolation);
                }
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(*owner_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self, output_ref), fields(job_id = %job_id))]
    async fn complete(
        &self,
        job_id: JobId,
        output_ref: String,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs
             SET status = 'completed', output_ref = $2, updated_at = now()
             WHERE id = $1 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(*job_id.as_uuid())
        .bind(output_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    #[instrument(skip(self, error), fields(job_id = %job_id))]
    async fn fail(&self, job_id: JobId, error: String) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs
             SET status = 'failed', error = $2, updated_at = now()
             WHERE id = $1 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(*job_id.as_uuid())
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, job_id = %job_id))]
    async fn begin_retry(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError> {
        // Owner check first; retry is an owner-initiated action.
        match self.get(owner_id, job_id).await? {
            Some(_) => {}
            None => return Err(JobStoreError::NotFound(job_id)),
        }

        let row = sqlx::query(&format!(
            "UPDATE jobs
             SET status = 'processing', error = NULL, updated_at = now()
             WHERE id = $1 AND owner_id = $2 AND status = 'failed'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(*job_id.as_uuid())
        .bind(*owner_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'processing' AND updated_at < $1
             ORDER BY updated_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn mark_seen(
        &self,
        owner_id: OwnerId,
        job_id: JobId,
    ) -> Result<Option<Job>, JobStoreError> {
        match self.get(owner_id, job_id).await? {
            Some(_) => {}
            None => return Ok(None),
        }

        let row = sqlx::query(&format!(
            "UPDATE jobs SET unseen = FALSE WHERE id = $1 AND owner_id = $2 RETURNING {JOB_COLUMNS}"
        ))
        .bind(*job_id.as_uuid())
        .bind(*owner_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| job_from_row(&row)).transpose()
    }
}
