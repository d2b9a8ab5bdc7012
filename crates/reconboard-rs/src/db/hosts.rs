use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    error::Result,
    models::{Host, HostStatus, HostWithPorts, Port, PortBaseline, ScanHost, ScanPort, ScanScript, ScriptResult},
};

const HOST_COLUMNS: &str = "id, team_id, ip, hostname, os, last_seen, status";
const PORT_COLUMNS: &str =
    "id, host_id, number, state, protocol, service, version, is_baseline, is_new";

pub async fn list_for_team(conn: &mut SqliteConnection, team_id: &str) -> Result<Vec<Host>> {
    Ok(sqlx::query_as::<_, Host>(&format!(
        "SELECT {HOST_COLUMNS} FROM hosts WHERE team_id = ? ORDER BY ip ASC"
    ))
    .bind(team_id)
    .fetch_all(conn)
    .await?)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    team_id: &str,
    ip: &str,
    observed: &ScanHost,
    seen_at: DateTime<Utc>,
) -> Result<Host> {
    let id = sqlx::query(
        "INSERT INTO hosts(team_id, ip, hostname, os, last_seen, status) VALUES(?, ?, ?, ?, ?, ?)",
    )
    .bind(team_id)
    .bind(ip)
    .bind(&observed.hostname)
    .bind(&observed.os)
    .bind(seen_at)
    .bind(HostStatus::Online)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(Host {
        id,
        team_id: team_id.to_string(),
        ip: ip.to_string(),
        hostname: observed.hostname.clone(),
        os: observed.os.clone(),
        last_seen: seen_at,
        status: HostStatus::Online,
    })
}

pub async fn save(conn: &mut SqliteConnection, host: &Host) -> Result<()> {
    sqlx::query("UPDATE hosts SET hostname = ?, os = ?, last_seen = ?, status = ? WHERE id = ?")
        .bind(&host.hostname)
        .bind(&host.os)
        .bind(host.last_seen)
        .bind(host.status)
        .bind(host.id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_ports(conn: &mut SqliteConnection, host_id: i64) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM ports WHERE host_id = ?")
        .bind(host_id)
        .execute(conn)
        .await?
        .rows_affected())
}

pub async fn insert_port(
    conn: &mut SqliteConnection,
    host_id: i64,
    port: &ScanPort,
    is_baseline: bool,
    is_new: bool,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ports(host_id, number, state, protocol, service, version, is_baseline, is_new) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(host_id)
    .bind(port.number)
    .bind(&port.state)
    .bind(&port.protocol)
    .bind(&port.service)
    .bind(&port.version)
    .bind(is_baseline)
    .bind(is_new)
    .execute(conn)
    .await?
    .last_insert_rowid())
}

pub async fn insert_script(conn: &mut SqliteConnection, port_id: i64, script: &ScanScript) -> Result<()> {
    sqlx::query("INSERT INTO script_results(port_id, name, output) VALUES(?, ?, ?)")
        .bind(port_id)
        .bind(&script.name)
        .bind(&script.output)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn ports_for_host(conn: &mut SqliteConnection, host_id: i64) -> Result<Vec<Port>> {
    Ok(sqlx::query_as::<_, Port>(&format!(
        "SELECT {PORT_COLUMNS} FROM ports WHERE host_id = ? ORDER BY number ASC, protocol ASC"
    ))
    .bind(host_id)
    .fetch_all(conn)
    .await?)
}

pub async fn scripts_for_port(conn: &mut SqliteConnection, port_id: i64) -> Result<Vec<ScriptResult>> {
    Ok(sqlx::query_as::<_, ScriptResult>(
        "SELECT id, port_id, name, output FROM script_results WHERE port_id = ? ORDER BY id ASC",
    )
    .bind(port_id)
    .fetch_all(conn)
    .await?)
}

/// Hosts of a team with their ports, loaded in two queries.
pub async fn list_with_ports(conn: &mut SqliteConnection, team_id: &str) -> Result<Vec<HostWithPorts>> {
    let hosts = list_for_team(&mut *conn, team_id).await?;
    let ports = sqlx::query_as::<_, Port>(
        "SELECT p.id, p.host_id, p.number, p.state, p.protocol, p.service, p.version, p.is_baseline, p.is_new \
         FROM ports p JOIN hosts h ON h.id = p.host_id \
         WHERE h.team_id = ? ORDER BY p.number ASC, p.protocol ASC",
    )
    .bind(team_id)
    .fetch_all(conn)
    .await?;

    let mut by_host: HashMap<i64, Vec<Port>> = HashMap::new();
    for port in ports {
        by_host.entry(port.host_id).or_default().push(port);
    }

    Ok(hosts
        .into_iter()
        .map(|host| HostWithPorts {
            ports: by_host.remove(&host.id).unwrap_or_default(),
            host,
        })
        .collect())
}

pub async fn baselines_for_team(conn: &mut SqliteConnection, team_id: &str) -> Result<Vec<PortBaseline>> {
    Ok(sqlx::query_as::<_, PortBaseline>(
        "SELECT id, team_id, host_ip, port, protocol, service, expected FROM port_baselines WHERE team_id = ? ORDER BY id ASC",
    )
    .bind(team_id)
    .fetch_all(conn)
    .await?)
}

/// Replaces every baseline declaration of a team.
pub async fn replace_baselines(
    conn: &mut SqliteConnection,
    team_id: &str,
    baselines: &[PortBaseline],
) -> Result<()> {
    sqlx::query("DELETE FROM port_baselines WHERE team_id = ?")
        .bind(team_id)
        .execute(&mut *conn)
        .await?;
    for baseline in baselines {
        sqlx::query(
            "INSERT INTO port_baselines(team_id, host_ip, port, protocol, service, expected) VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(team_id)
        .bind(&baseline.host_ip)
        .bind(baseline.port)
        .bind(&baseline.protocol)
        .bind(&baseline.service)
        .bind(baseline.expected)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct InventoryCounts {
    pub hosts: i64,
    pub ports: i64,
}

pub async fn counts(conn: &mut SqliteConnection) -> Result<InventoryCounts> {
    let (hosts, ports): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM hosts), (SELECT COUNT(*) FROM ports)",
    )
    .fetch_one(conn)
    .await?;
    Ok(InventoryCounts { hosts, ports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{memory_pool, teams},
        models::ScanHost,
    };

    fn observed(ip: &str) -> ScanHost {
        ScanHost {
            ip: ip.to_string(),
            hostname: "box.local".into(),
            os: "Linux".into(),
            status: "up".into(),
            ports: vec![],
        }
    }

    fn tcp(number: u16) -> ScanPort {
        ScanPort {
            number,
            state: "open".into(),
            protocol: "tcp".into(),
            service: String::new(),
            version: String::new(),
            scripts: vec![],
        }
    }

    #[tokio::test]
    async fn deleting_team_cascades_through_inventory() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let team = teams::insert(
            &mut conn,
            &teams::TeamInput {
                name: "red".into(),
                ip_range: "10.0.0.0/24".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let host = insert(&mut conn, &team.team_id, "10.0.0.5", &observed("10.0.0.5"), Utc::now())
            .await
            .unwrap();
        let port_id = insert_port(&mut conn, host.id, &tcp(22), false, true).await.unwrap();
        insert_script(
            &mut conn,
            port_id,
            &ScanScript {
                name: "ssh-hostkey".into(),
                output: "2048 aa:bb".into(),
            },
        )
        .await
        .unwrap();

        assert!(teams::delete(&mut conn, &team.team_id).await.unwrap());
        let totals = counts(&mut conn).await.unwrap();
        assert_eq!(totals.hosts, 0);
        assert_eq!(totals.ports, 0);
        assert!(scripts_for_port(&mut conn, port_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_with_ports_groups_by_host() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let team = teams::insert(
            &mut conn,
            &teams::TeamInput {
                name: "blue".into(),
                ip_range: "10.1.0.0/24".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let a = insert(&mut conn, &team.team_id, "10.1.0.2", &observed("10.1.0.2"), Utc::now()).await.unwrap();
        let b = insert(&mut conn, &team.team_id, "10.1.0.1", &observed("10.1.0.1"), Utc::now()).await.unwrap();
        insert_port(&mut conn, a.id, &tcp(443), false, true).await.unwrap();
        insert_port(&mut conn, a.id, &tcp(80), false, true).await.unwrap();

        let listed = list_with_ports(&mut conn, &team.team_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].host.id, b.id);
        assert!(listed[0].ports.is_empty());
        let numbers: Vec<u16> = listed[1].ports.iter().map(|p| p.number).collect();
        assert_eq!(numbers, [80, 443]);
    }
}
