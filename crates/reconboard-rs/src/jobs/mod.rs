pub mod dispatcher;
pub mod reconcile;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    db,
    error::{Result, ServiceError},
    models::{Job, JobState, JobStatus, ReconcileSummary, Team},
};

pub use dispatcher::Dispatcher;
pub use reconcile::{Ingested, Reconciler};

impl Job {
    /// A fresh work order for `team`, denormalizing the team's id and name.
    pub fn queued(job_type: &str, team: &Team, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            job_id: Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            ip_range: team.ip_range.clone(),
            status: JobState::Queued,
            team_id: team.team_id.clone(),
            team_name: team.name.clone(),
            created_at: now,
            started_at: None,
            completed_at: None,
            hosts_found: 0,
            ports_found: 0,
            error_msg: String::new(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal(
                self.job_id.clone(),
                self.status.as_str(),
            ));
        }
        Ok(())
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != JobState::Queued {
            self.ensure_open()?;
            return Err(ServiceError::Conflict(format!(
                "job {} is already {}",
                self.job_id,
                self.status.as_str()
            )));
        }
        self.status = JobState::Running;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>, summary: ReconcileSummary) -> Result<()> {
        self.ensure_open()?;
        if self.status != JobState::Running {
            return Err(ServiceError::JobNotRunning(self.job_id.clone()));
        }
        self.status = JobState::Complete;
        self.completed_at = Some(at);
        self.hosts_found = summary.hosts_processed;
        self.ports_found = summary.ports_processed;
        Ok(())
    }

    pub fn fail(&mut self, at: DateTime<Utc>, message: &str) -> Result<()> {
        self.ensure_open()?;
        self.status = JobState::Failed;
        self.completed_at = Some(at);
        self.error_msg = message.to_string();
        Ok(())
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        self.status = JobState::Cancelled;
        self.completed_at = Some(at);
        Ok(())
    }
}

pub async fn cancel(pool: &SqlitePool, job_id: &str) -> Result<Job> {
    let mut tx = db::begin_write(pool).await?;
    let mut job = db::jobs::get(&mut *tx, job_id)
        .await?
        .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;
    job.cancel(Utc::now())?;
    db::jobs::save(&mut *tx, &job).await?;
    tx.commit().await?;
    info!(job_id = %job.job_id, team = %job.team_name, "job cancelled");
    Ok(job)
}

/// Records a failure reported by the scanner that was executing the job.
pub async fn fail(pool: &SqlitePool, job_id: &str, message: &str) -> Result<Job> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ServiceError::InvalidInput(
            "failure message cannot be empty".to_string(),
        ));
    }
    let mut tx = db::begin_write(pool).await?;
    let mut job = db::jobs::get(&mut *tx, job_id)
        .await?
        .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;
    job.fail(Utc::now(), message)?;
    db::jobs::save(&mut *tx, &job).await?;
    tx.commit().await?;
    info!(job_id = %job.job_id, team = %job.team_name, error = message, "job failed");
    Ok(job)
}

pub async fn list(pool: &SqlitePool, status: Option<JobState>, limit: i64) -> Result<Vec<Job>> {
    let mut conn = pool.acquire().await?;
    db::jobs::list(&mut conn, status, limit).await
}

pub async fn manager_state(pool: &SqlitePool) -> Result<Vec<JobStatus>> {
    let mut conn = pool.acquire().await?;
    db::jobs::list_job_statuses(&mut conn).await
}
