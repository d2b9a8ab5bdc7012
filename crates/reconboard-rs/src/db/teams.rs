use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::unique_conflict,
    error::{Result, ServiceError},
    iprange::IpRange,
    models::Team,
};

const PALETTE: &[&str] = &[
    "#3B82F6", "#10B981", "#F59E0B", "#EF4444", "#8B5CF6", "#EC4899", "#06B6D4", "#F97316",
];

#[derive(Debug, Clone, Default)]
pub struct TeamInput {
    pub name: String,
    pub ip_range: String,
    pub description: String,
    pub color: Option<String>,
}

impl TeamInput {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::InvalidInput("team name cannot be empty".into()));
        }
        IpRange::parse(&self.ip_range)?;
        Ok(())
    }

    fn color(&self) -> String {
        match self.color.as_deref().map(str::trim) {
            Some(color) if !color.is_empty() => color.to_string(),
            _ => default_color(&self.name),
        }
    }
}

/// Stable palette color derived from the team name.
pub fn default_color(name: &str) -> String {
    let hash = name
        .chars()
        .fold(0usize, |acc, c| (acc * 31 + c as usize) % PALETTE.len());
    PALETTE[hash].to_string()
}

const TEAM_COLUMNS: &str = "id, team_id, name, ip_range, description, color, created_at";

pub async fn list_ordered(conn: &mut SqliteConnection) -> Result<Vec<Team>> {
    Ok(sqlx::query_as::<_, Team>(&format!(
        "SELECT {TEAM_COLUMNS} FROM teams ORDER BY name ASC"
    ))
    .fetch_all(conn)
    .await?)
}

pub async fn get(conn: &mut SqliteConnection, team_id: &str) -> Result<Option<Team>> {
    Ok(sqlx::query_as::<_, Team>(&format!(
        "SELECT {TEAM_COLUMNS} FROM teams WHERE team_id = ?"
    ))
    .bind(team_id)
    .fetch_optional(conn)
    .await?)
}

pub async fn get_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<Team>> {
    Ok(sqlx::query_as::<_, Team>(&format!(
        "SELECT {TEAM_COLUMNS} FROM teams WHERE name = ?"
    ))
    .bind(name)
    .fetch_optional(conn)
    .await?)
}

pub async fn insert(conn: &mut SqliteConnection, input: &TeamInput) -> Result<Team> {
    input.validate()?;
    let name = input.name.trim().to_string();
    let team_id = Uuid::new_v4().to_string();
    let id = sqlx::query(
        "INSERT INTO teams(team_id, name, ip_range, description, color, created_at) VALUES(?, ?, ?, ?, ?, ?)",
    )
    .bind(&team_id)
    .bind(&name)
    .bind(input.ip_range.trim())
    .bind(&input.description)
    .bind(input.color())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| unique_conflict(e, || format!("team name already exists: {name}")))?
    .last_insert_rowid();

    let team = sqlx::query_as::<_, Team>(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?"))
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(team)
}

/// Updates range, label and (optionally) name in place; the team id never changes.
pub async fn update(conn: &mut SqliteConnection, team_id: &str, input: &TeamInput) -> Result<Team> {
    input.validate()?;
    let name = input.name.trim().to_string();
    let affected = sqlx::query(
        "UPDATE teams SET name = ?, ip_range = ?, description = ?, color = ? WHERE team_id = ?",
    )
    .bind(&name)
    .bind(input.ip_range.trim())
    .bind(&input.description)
    .bind(input.color())
    .bind(team_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| unique_conflict(e, || format!("team name already exists: {name}")))?
    .rows_affected();

    if affected == 0 {
        return Err(ServiceError::TeamNotFound(team_id.to_string()));
    }
    get(conn, team_id)
        .await?
        .ok_or_else(|| ServiceError::TeamNotFound(team_id.to_string()))
}

/// Deletes a team together with its hosts, ports, script results and baselines.
pub async fn delete(conn: &mut SqliteConnection, team_id: &str) -> Result<bool> {
    let affected = sqlx::query("DELETE FROM teams WHERE team_id = ?")
        .bind(team_id)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(affected > 0)
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM teams")
        .fetch_one(conn)
        .await?)
}
