use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    db,
    error::{Result, ServiceError},
    models::Job,
};

/// Hands out scan work orders, rotating through teams in name order.
///
/// The rotation cursor of every job type lives in `job_status` and is only
/// touched here, under `rotation`. The cursor advance and the new job row are
/// committed in a single transaction.
pub struct Dispatcher {
    pool: SqlitePool,
    rotation: Mutex<()>,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            rotation: Mutex::new(()),
        }
    }

    pub async fn next_job(&self, job_type: &str) -> Result<Job> {
        let _rotation = self.rotation.lock().await;
        let mut tx = db::begin_write(&self.pool).await?;

        let status = db::jobs::job_status(&mut *tx, job_type)
            .await?
            .ok_or_else(|| ServiceError::UnknownJobType(job_type.to_string()))?;

        let teams = db::teams::list_ordered(&mut *tx).await?;
        if teams.is_empty() {
            return Err(ServiceError::NoTeamsConfigured);
        }

        let mut cursor = status.job_index;
        if cursor < 0 || cursor as usize >= teams.len() {
            warn!(job_type, cursor, teams = teams.len(), "rotation cursor out of bounds, resetting");
            cursor = 0;
        }
        let team = &teams[cursor as usize];

        let now = Utc::now();
        let mut job = Job::queued(job_type, team, now);
        job.start(now)?;
        job.id = db::jobs::insert(&mut *tx, &job).await?;

        let next = (cursor + 1) % teams.len() as i64;
        db::jobs::set_cursor(&mut *tx, job_type, next).await?;
        tx.commit().await?;

        info!(
            job_id = %job.job_id,
            job_type,
            team = %job.team_name,
            ip_range = %job.ip_range,
            "dispatched job"
        );
        Ok(job)
    }
}
