use sqlx::SqliteConnection;

use crate::{error::Result, models::ScanHistory};

pub async fn append(conn: &mut SqliteConnection, entry: &ScanHistory) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO scan_history(team_id, job_id, scan_time, host_count, port_count, new_ports, missing_ports) VALUES(?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.team_id)
    .bind(&entry.job_id)
    .bind(entry.scan_time)
    .bind(entry.host_count)
    .bind(entry.port_count)
    .bind(entry.new_ports)
    .bind(entry.missing_ports)
    .execute(conn)
    .await?
    .last_insert_rowid())
}

/// Newest first.
pub async fn list_for_team(conn: &mut SqliteConnection, team_id: &str, limit: i64) -> Result<Vec<ScanHistory>> {
    Ok(sqlx::query_as::<_, ScanHistory>(
        "SELECT id, team_id, job_id, scan_time, host_count, port_count, new_ports, missing_ports \
         FROM scan_history WHERE team_id = ? ORDER BY scan_time DESC, id DESC LIMIT ?",
    )
    .bind(team_id)
    .bind(limit)
    .fetch_all(conn)
    .await?)
}
