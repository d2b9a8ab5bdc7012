use sqlx::SqliteConnection;

use crate::{
    error::Result,
    models::{Job, JobState, JobStatus},
};

const JOB_COLUMNS: &str = "id, job_id, job_type, ip_range, status, team_id, team_name, created_at, \
     started_at, completed_at, hosts_found, ports_found, error_msg";

pub async fn ensure_job_type(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO job_status(name, job_index) VALUES(?, 0)")
        .bind(name)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn job_status(conn: &mut SqliteConnection, name: &str) -> Result<Option<JobStatus>> {
    Ok(sqlx::query_as::<_, JobStatus>("SELECT id, name, job_index FROM job_status WHERE name = ?")
        .bind(name)
        .fetch_optional(conn)
        .await?)
}

pub async fn list_job_statuses(conn: &mut SqliteConnection) -> Result<Vec<JobStatus>> {
    Ok(sqlx::query_as::<_, JobStatus>("SELECT id, name, job_index FROM job_status ORDER BY name ASC")
        .fetch_all(conn)
        .await?)
}

pub async fn set_cursor(conn: &mut SqliteConnection, name: &str, job_index: i64) -> Result<()> {
    sqlx::query("UPDATE job_status SET job_index = ? WHERE name = ?")
        .bind(job_index)
        .bind(name)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert(conn: &mut SqliteConnection, job: &Job) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO jobs(job_id, job_type, ip_range, status, team_id, team_name, created_at, started_at, completed_at, hosts_found, ports_found, error_msg) \
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&job.job_id)
    .bind(&job.job_type)
    .bind(&job.ip_range)
    .bind(job.status)
    .bind(&job.team_id)
    .bind(&job.team_name)
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.hosts_found)
    .bind(job.ports_found)
    .bind(&job.error_msg)
    .execute(conn)
    .await?
    .last_insert_rowid())
}

pub async fn get(conn: &mut SqliteConnection, job_id: &str) -> Result<Option<Job>> {
    Ok(sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?"))
        .bind(job_id)
        .fetch_optional(conn)
        .await?)
}

/// Persists the mutable lifecycle fields of a job.
pub async fn save(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = ?, started_at = ?, completed_at = ?, hosts_found = ?, ports_found = ?, error_msg = ? WHERE job_id = ?",
    )
    .bind(job.status)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.hosts_found)
    .bind(job.ports_found)
    .bind(&job.error_msg)
    .bind(&job.job_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list(conn: &mut SqliteConnection, status: Option<JobState>, limit: i64) -> Result<Vec<Job>> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, Job>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?"
            ))
            .bind(status)
            .bind(limit)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, Job>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(conn)
            .await?
        }
    };
    Ok(rows)
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
        .fetch_one(conn)
        .await?)
}
