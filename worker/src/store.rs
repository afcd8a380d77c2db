// ==============================================================================
// store.rs - Job Record Store
// ==============================================================================
// Description: Persistence for analysis job records (Postgres and in-memory)
// Author: Matt Barham
// Created: 2026-09-25
// Modified: 2026-10-16
// Version: 1.2.0
// ==============================================================================
// Both stores enforce at most one processing job per owner. In Postgres this
// is the partial unique index analysis_jobs_one_active_per_owner.
// Reopening is a compare-and-set on the stored status, so concurrent reruns
// of one job cannot both start.
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::job::{AnalysisJob, JobStatus, StageArtifacts};

pub const SCHEMA_SQL: &str = include_str!("../migrations/001_analysis_jobs.sql");

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("owner '{0}' already has an analysis in progress")]
    ActiveJobExists(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    DuplicateJob(Uuid),

    #[error("job {0} is already processing")]
    AlreadyProcessing(Uuid),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; fails with ActiveJobExists when the owner is busy
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError>;

    /// Overwrite an existing job record
    async fn update(&self, job: &AnalysisJob) -> Result<(), StoreError>;

    /// Overwrite a job only if its stored record is not processing
    ///
    /// Fails with AlreadyProcessing when another run holds the job.
    async fn reopen(&self, job: &AnalysisJob) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError>;

    /// Jobs currently marked processing
    async fn processing_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError>;
}

// ==============================================================================
// In-memory store
// ==============================================================================

/// Store for tests and local single-process runs
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, AnalysisJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_busy(jobs: &HashMap<Uuid, AnalysisJob>, job: &AnalysisJob) -> bool {
        job.status == JobStatus::Processing
            && jobs.values().any(|other| {
                other.job_id != job.job_id
                    && other.owner_id == job.owner_id
                    && other.status == JobStatus::Processing
            })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::DuplicateJob(job.job_id));
        }
        if Self::owner_busy(&jobs, job) {
            return Err(StoreError::ActiveJobExists(job.owner_id.clone()));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job.job_id) {
            return Err(StoreError::NotFound(job.job_id));
        }
        if Self::owner_busy(&jobs, job) {
            return Err(StoreError::ActiveJobExists(job.owner_id.clone()));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn reopen(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&job.job_id) {
            None => return Err(StoreError::NotFound(job.job_id)),
            Some(stored) if stored.status == JobStatus::Processing => {
                return Err(StoreError::AlreadyProcessing(job.job_id));
            }
            Some(_) => {}
        }
        if Self::owner_busy(&jobs, job) {
            return Err(StoreError::ActiveJobExists(job.owner_id.clone()));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn processing_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .cloned()
            .collect())
    }
}

// ==============================================================================
// Postgres store
// ==============================================================================

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    owner_id: String,
    genome_path: String,
    status: String,
    current_step: String,
    progress_percent: i16,
    error_message: Option<String>,
    artifacts: Json<StageArtifacts>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for AnalysisJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(AnalysisJob {
            job_id: row.id,
            owner_id: row.owner_id,
            genome_path: row.genome_path,
            status: row.status.parse().map_err(StoreError::Database)?,
            current_step: row.current_step.parse().map_err(StoreError::Database)?,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            error_message: row.error_message,
            artifacts: row.artifacts.0,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const SELECT_JOB: &str = "SELECT id, owner_id, genome_path, status, current_step, progress_percent,
        error_message, artifacts, created_at, started_at, completed_at
   FROM genetics.analysis_jobs";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema, table and indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn write_update(&self, sql: &str, job: &AnalysisJob) -> Result<u64, StoreError> {
        let result = sqlx::query(sql)
            .bind(job.job_id)
            .bind(job.status.as_str())
            .bind(job.current_step.as_str())
            .bind(i16::from(job.progress_percent))
            .bind(&job.error_message)
            .bind(Json(&job.artifacts))
            .bind(job.started_at)
            .bind(job.completed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, job))?;

        Ok(result.rows_affected())
    }
}

const OWNER_INDEX: &str = "analysis_jobs_one_active_per_owner";

fn map_write_error(e: sqlx::Error, job: &AnalysisJob) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.constraint() == Some(OWNER_INDEX) {
                StoreError::ActiveJobExists(job.owner_id.clone())
            } else {
                StoreError::DuplicateJob(job.job_id)
            }
        }
        _ => StoreError::from(e),
    }
}

const UPDATE_JOB: &str = "UPDATE genetics.analysis_jobs
    SET status = $2,
        current_step = $3,
        progress_percent = $4,
        error_message = $5,
        artifacts = $6,
        started_at = $7,
        completed_at = $8
  WHERE id = $1";

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO genetics.analysis_jobs
                (id, owner_id, genome_path, status, current_step, progress_percent,
                 error_message, artifacts, created_at, started_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.job_id)
        .bind(&job.owner_id)
        .bind(&job.genome_path)
        .bind(job.status.as_str())
        .bind(job.current_step.as_str())
        .bind(i16::from(job.progress_percent))
        .bind(&job.error_message)
        .bind(Json(&job.artifacts))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, job))?;

        Ok(())
    }

    async fn update(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        if self.write_update(UPDATE_JOB, job).await? == 0 {
            return Err(StoreError::NotFound(job.job_id));
        }
        Ok(())
    }

    async fn reopen(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let sql = format!("{} AND status <> 'processing'", UPDATE_JOB);
        if self.write_update(&sql, job).await? == 0 {
            // Either the job is gone or another run already holds it
            return match self.get(job.job_id).await? {
                Some(_) => Err(StoreError::AlreadyProcessing(job.job_id)),
                None => Err(StoreError::NotFound(job.job_id)),
            };
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_JOB))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AnalysisJob::try_from).transpose()
    }

    async fn processing_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError> {
        let rows: Vec<JobRow> =
            sqlx::query_as(&format!("{} WHERE status = 'processing'", SELECT_JOB))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(AnalysisJob::try_from).collect()
    }
}
