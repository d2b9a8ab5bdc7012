use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::info;

use crate::{
    config::AppConfig,
    db::{self, teams::TeamInput},
    error::{Result, ServiceError},
    iprange::canonical_ip,
    models::{PortBaseline, WILDCARD_HOST},
};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
    pub pruned: usize,
}

/// Brings job types, teams and baselines in line with configuration.
/// Teams are matched by name so their ids survive restarts.
pub async fn apply(pool: &SqlitePool, config: &AppConfig) -> Result<SeedReport> {
    let mut names = HashSet::new();
    for team in &config.teams {
        if !names.insert(team.name.trim()) {
            return Err(ServiceError::Conflict(format!(
                "team {} configured more than once",
                team.name.trim()
            )));
        }
    }

    let mut tx = db::begin_write(pool).await?;
    let mut report = SeedReport::default();

    for job_type in &config.job_types {
        db::jobs::ensure_job_type(&mut *tx, job_type.trim()).await?;
    }

    for team in &config.teams {
        let input = TeamInput {
            name: team.name.clone(),
            ip_range: team.ip_range.clone(),
            description: team.description.clone(),
            color: team.color.clone(),
        };
        match db::teams::get_by_name(&mut *tx, team.name.trim()).await? {
            Some(existing) => {
                db::teams::update(&mut *tx, &existing.team_id, &input).await?;
                report.updated += 1;
            }
            None => {
                db::teams::insert(&mut *tx, &input).await?;
                report.created += 1;
            }
        }
    }

    if config.prune_teams {
        for team in db::teams::list_ordered(&mut *tx).await? {
            if !names.contains(team.name.as_str()) && db::teams::delete(&mut *tx, &team.team_id).await? {
                info!(team = %team.name, "pruned team absent from configuration");
                report.pruned += 1;
            }
        }
    }

    for (team_name, entries) in &config.baselines {
        let team = db::teams::get_by_name(&mut *tx, team_name.trim())
            .await?
            .ok_or_else(|| ServiceError::TeamNotFound(team_name.clone()))?;
        let baselines = entries
            .iter()
            .map(|b| -> Result<PortBaseline> {
                let host_ip = match b.host_ip.trim() {
                    WILDCARD_HOST => WILDCARD_HOST.to_string(),
                    ip => canonical_ip(ip)?,
                };
                Ok(PortBaseline {
                    id: 0,
                    team_id: team.team_id.clone(),
                    host_ip,
                    port: b.port,
                    protocol: b.protocol.trim().to_ascii_lowercase(),
                    service: b.service.clone(),
                    expected: b.expected,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        db::hosts::replace_baselines(&mut *tx, &team.team_id, &baselines).await?;
    }

    tx.commit().await?;
    info!(
        job_types = config.job_types.len(),
        created = report.created,
        updated = report.updated,
        pruned = report.pruned,
        "configuration applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        config::{BaselineConfig, TeamConfig},
        db::memory_pool,
    };

    fn team(name: &str, range: &str) -> TeamConfig {
        TeamConfig {
            name: name.into(),
            ip_range: range.into(),
            description: String::new(),
            color: None,
        }
    }

    fn config(teams: Vec<TeamConfig>) -> AppConfig {
        AppConfig {
            job_types: vec!["nmap".into(), "masscan".into()],
            teams,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn reapplying_keeps_team_ids() {
        let pool = memory_pool().await;
        let first = config(vec![team("red", "10.0.1.0/24"), team("blue", "10.0.2.0/24")]);
        assert_eq!(
            apply(&pool, &first).await.unwrap(),
            SeedReport { created: 2, updated: 0, pruned: 0 }
        );
        let mut conn = pool.acquire().await.unwrap();
        let red = db::teams::get_by_name(&mut conn, "red").await.unwrap().unwrap();
        drop(conn);

        let second = config(vec![team("red", "10.0.9.0/24"), team("blue", "10.0.2.0/24")]);
        assert_eq!(
            apply(&pool, &second).await.unwrap(),
            SeedReport { created: 0, updated: 2, pruned: 0 }
        );
        let mut conn = pool.acquire().await.unwrap();
        let again = db::teams::get_by_name(&mut conn, "red").await.unwrap().unwrap();
        assert_eq!(again.team_id, red.team_id);
        assert_eq!(again.ip_range, "10.0.9.0/24");
        assert_eq!(db::jobs::list_job_statuses(&mut conn).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_team_names_conflict_before_writing() {
        let pool = memory_pool().await;
        let cfg = config(vec![team("red", "10.0.1.0/24"), team("red", "10.0.2.0/24")]);
        assert!(matches!(apply(&pool, &cfg).await, Err(ServiceError::Conflict(_))));

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(db::teams::count(&mut conn).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prune_removes_unlisted_teams_only_when_enabled() {
        let pool = memory_pool().await;
        apply(&pool, &config(vec![team("red", "10.0.1.0/24"), team("gone", "10.0.3.0/24")]))
            .await
            .unwrap();

        let kept = config(vec![team("red", "10.0.1.0/24")]);
        apply(&pool, &kept).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(db::teams::count(&mut conn).await.unwrap(), 2);
        drop(conn);

        let pruning = AppConfig {
            prune_teams: true,
            ..kept
        };
        assert_eq!(apply(&pool, &pruning).await.unwrap().pruned, 1);
        let mut conn = pool.acquire().await.unwrap();
        assert!(db::teams::get_by_name(&mut conn, "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn baselines_are_replaced_per_team() {
        let pool = memory_pool().await;
        let baseline = |port| BaselineConfig {
            host_ip: "*".into(),
            port,
            protocol: "TCP".into(),
            service: String::new(),
            expected: true,
        };
        let mut cfg = config(vec![team("red", "10.0.1.0/24")]);
        cfg.baselines = HashMap::from([("red".to_string(), vec![baseline(22), baseline(443)])]);
        apply(&pool, &cfg).await.unwrap();

        cfg.baselines = HashMap::from([("red".to_string(), vec![baseline(3389)])]);
        apply(&pool, &cfg).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let red = db::teams::get_by_name(&mut conn, "red").await.unwrap().unwrap();
        let stored = db::hosts::baselines_for_team(&mut conn, &red.team_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].port, 3389);
        assert_eq!(stored[0].protocol, "tcp");
    }

    #[tokio::test]
    async fn baseline_for_unknown_team_is_rejected() {
        let pool = memory_pool().await;
        let mut cfg = config(vec![]);
        cfg.baselines = HashMap::from([("ghost".to_string(), vec![])]);
        assert!(matches!(apply(&pool, &cfg).await, Err(ServiceError::TeamNotFound(_))));
    }

    #[tokio::test]
    async fn baseline_hosts_are_stored_in_canonical_form() {
        let pool = memory_pool().await;
        let baseline = |host_ip: &str| BaselineConfig {
            host_ip: host_ip.into(),
            port: 22,
            protocol: "tcp".into(),
            service: String::new(),
            expected: true,
        };
        let mut cfg = config(vec![team("red", "fe80::/64")]);
        cfg.baselines = HashMap::from([("red".to_string(), vec![baseline(" FE80::0:1 ")])]);
        apply(&pool, &cfg).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let red = db::teams::get_by_name(&mut conn, "red").await.unwrap().unwrap();
        let stored = db::hosts::baselines_for_team(&mut conn, &red.team_id).await.unwrap();
        assert_eq!(stored[0].host_ip, "fe80::1");
        drop(conn);

        cfg.baselines = HashMap::from([("red".to_string(), vec![baseline("not-an-ip")])]);
        assert!(matches!(apply(&pool, &cfg).await, Err(ServiceError::InvalidInput(_))));
    }
}
