use std::time::Instant;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::{
    classifier::{classify, Severity},
    db,
    error::Result,
    models::{Job, Team},
};

/// Ports of services that are commonly abused once exposed.
pub const DANGEROUS_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 110, 135, 139, 143, 445, 1433, 1521, 3306, 3389, 5432, 5900, 6379, 8080,
    27017,
];

const RECENT_JOBS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub team_name: String,
    pub team_id: String,
    pub host_ip: String,
    pub hostname: String,
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub script_name: String,
    pub output: String,
    pub severity: Severity,
}

#[derive(Debug, Serialize)]
pub struct VulnerabilityReport {
    pub findings: Vec<Finding>,
    pub total_count: usize,
}

#[derive(sqlx::FromRow)]
struct ScriptRow {
    team_name: String,
    team_id: String,
    host_ip: String,
    hostname: String,
    port: u16,
    protocol: String,
    service: String,
    script_name: String,
    output: String,
}

/// Every stored script result that classifies above `none`, most severe first.
pub async fn vulnerability_report(pool: &SqlitePool) -> Result<VulnerabilityReport> {
    let rows = sqlx::query_as::<_, ScriptRow>(
        "SELECT t.name AS team_name, t.team_id, h.ip AS host_ip, h.hostname, p.number AS port, \
                p.protocol, p.service, s.name AS script_name, s.output \
         FROM script_results s \
         JOIN ports p ON p.id = s.port_id \
         JOIN hosts h ON h.id = p.host_id \
         JOIN teams t ON t.team_id = h.team_id \
         ORDER BY t.name ASC, h.ip ASC, p.number ASC, s.id ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut findings: Vec<Finding> = rows
        .into_iter()
        .filter_map(|row| {
            let severity = classify(&row.script_name, &row.output);
            (severity != Severity::None).then(|| Finding {
                team_name: row.team_name,
                team_id: row.team_id,
                host_ip: row.host_ip,
                hostname: row.hostname,
                port: row.port,
                protocol: row.protocol,
                service: row.service,
                script_name: row.script_name,
                output: row.output,
                severity,
            })
        })
        .collect();
    // stable: ties keep team/host/port order
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));

    Ok(VulnerabilityReport {
        total_count: findings.len(),
        findings,
    })
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub teams: Vec<Team>,
    pub total_teams: usize,
    pub total_hosts: i64,
    pub total_ports: i64,
    pub dangerous_ports: i64,
    pub recent_jobs: Vec<Job>,
}

pub async fn dashboard(pool: &SqlitePool) -> Result<Dashboard> {
    let mut conn = pool.acquire().await?;
    let teams = db::teams::list_ordered(&mut conn).await?;
    let totals = db::hosts::counts(&mut conn).await?;

    let listed = DANGEROUS_PORTS
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let dangerous_ports = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM ports WHERE number IN ({listed})"
    ))
    .fetch_one(&mut *conn)
    .await?;

    let recent_jobs = db::jobs::list(&mut conn, None, RECENT_JOBS).await?;

    Ok(Dashboard {
        total_teams: teams.len(),
        teams,
        total_hosts: totals.hosts,
        total_ports: totals.ports,
        dangerous_ports,
        recent_jobs,
    })
}

#[derive(Debug, Default, Serialize)]
pub struct HealthStats {
    pub teams: i64,
    pub hosts: i64,
    pub jobs: i64,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub database: &'static str,
    pub uptime_secs: u64,
    pub version: &'static str,
    pub stats: HealthStats,
}

async fn stats(pool: &SqlitePool) -> Result<HealthStats> {
    let mut conn = pool.acquire().await?;
    Ok(HealthStats {
        teams: db::teams::count(&mut conn).await?,
        hosts: db::hosts::counts(&mut conn).await?.hosts,
        jobs: db::jobs::count(&mut conn).await?,
    })
}

/// Never fails: an unreachable database is reported, not raised.
pub async fn health(pool: &SqlitePool, started_at: Instant) -> Health {
    let (database, stats) = match stats(pool).await {
        Ok(stats) => ("healthy", stats),
        Err(e) => {
            warn!(error = %e, "health check could not reach database");
            ("unhealthy", HealthStats::default())
        }
    };
    Health {
        status: "ok",
        database,
        uptime_secs: started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        stats,
    }
}
