use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    str::FromStr,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use chrono::Utc;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    classifier::{classify, Severity},
    db,
    error::{Result, ServiceError},
    iprange::{canonical_ip, IpRange},
    models::{
        HostStatus, Job, JobState, PortBaseline, ReconcileSummary, Scan, ScanHistory, ScanScript,
    },
};

/// Per-team locks so two uploads for one team never interleave, while
/// different teams proceed independently.
#[derive(Default)]
struct TeamLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TeamLocks {
    fn for_team(&self, team_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(team_id.to_string()).or_default())
    }
}

pub struct Reconciler {
    pool: SqlitePool,
    team_locks: TeamLocks,
}

#[derive(Debug, Default)]
struct Drift {
    new_ports: i64,
    missing_ports: i64,
}

/// What became of an uploaded scan.
#[derive(Debug)]
pub enum Ingested {
    Reconciled(ReconcileSummary),
    Failed(Box<Job>),
}

impl Reconciler {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            team_locks: TeamLocks::default(),
        }
    }

    /// Entry point for scanner uploads. A run the scanner itself reports as
    /// failed fails the job and leaves the inventory untouched.
    pub async fn ingest(&self, job_id: &str, scan: &Scan) -> Result<Ingested> {
        if let Some(message) = scan.failure() {
            warn!(job_id, error = %message, "scanner reported a failed run");
            return crate::jobs::fail(&self.pool, job_id, &message)
                .await
                .map(|job| Ingested::Failed(Box::new(job)));
        }
        self.reconcile(job_id, scan).await.map(Ingested::Reconciled)
    }

    /// Merges a scanner's findings for `job_id` into the team inventory and
    /// completes the job. Nothing is persisted unless everything is.
    pub async fn reconcile(&self, job_id: &str, scan: &Scan) -> Result<ReconcileSummary> {
        let ips = validate(scan)?;

        let team_id = {
            let mut conn = self.pool.acquire().await?;
            db::jobs::get(&mut conn, job_id)
                .await?
                .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?
                .team_id
        };

        let lock = self.team_locks.for_team(&team_id);
        let _team = lock.lock().await;

        let mut tx = db::begin_write(&self.pool).await?;
        let mut job = db::jobs::get(&mut *tx, job_id)
            .await?
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal(
                job.job_id.clone(),
                job.status.as_str(),
            ));
        }
        if job.status != JobState::Running {
            return Err(ServiceError::JobNotRunning(job.job_id.clone()));
        }

        match merge(&mut *tx, &mut job, scan, &ips).await {
            Ok(summary) => {
                tx.commit().await.inspect_err(|e| {
                    error!(job_id, error = %e, "commit of scan results failed");
                })?;
                info!(
                    job_id,
                    team = %job.team_name,
                    hosts = summary.hosts_processed,
                    ports = summary.ports_processed,
                    "scan reconciled"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(job_id, team = %job.team_name, error = %e, "scan reconciliation rolled back");
                Err(e)
            }
        }
    }
}

/// Canonical address of every reported host, in payload order.
fn validate(scan: &Scan) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut ips = Vec::with_capacity(scan.hosts.len());
    for host in &scan.hosts {
        let ip = canonical_ip(&host.ip)?;
        if !seen.insert(ip.clone()) {
            return Err(ServiceError::InvalidInput(format!(
                "host {ip} reported more than once"
            )));
        }
        ips.push(ip);
    }
    Ok(ips)
}

async fn merge(
    conn: &mut SqliteConnection,
    job: &mut Job,
    scan: &Scan,
    ips: &[String],
) -> Result<ReconcileSummary> {
    let now = Utc::now();
    let team = db::teams::get(&mut *conn, &job.team_id)
        .await?
        .ok_or_else(|| ServiceError::TeamNotFound(job.team_id.clone()))?;
    let scope = IpRange::parse(&team.ip_range).ok();
    let baselines = db::hosts::baselines_for_team(&mut *conn, &team.team_id).await?;

    let mut unseen: HashMap<String, _> = db::hosts::list_for_team(&mut *conn, &team.team_id)
        .await?
        .into_iter()
        .map(|host| (host.ip.clone(), host))
        .collect();

    let mut summary = ReconcileSummary {
        hosts_processed: 0,
        ports_processed: 0,
    };
    let mut observed: Vec<(String, u16, String)> = Vec::new();
    let mut drift = Drift::default();
    let mut flagged = 0usize;

    for (scan_host, ip) in scan.hosts.iter().zip(ips) {
        let ip = ip.as_str();

        if let (Some(scope), Ok(addr)) = (&scope, IpAddr::from_str(ip)) {
            if !scope.contains(&addr) {
                warn!(job_id = %job.job_id, team = %team.name, ip, "host reported outside team range");
            }
        }

        let host = match unseen.remove(ip) {
            Some(mut host) => {
                host.hostname = scan_host.hostname.clone();
                host.os = scan_host.os.clone();
                host.last_seen = now;
                host.status = HostStatus::Online;
                db::hosts::save(&mut *conn, &host).await?;
                db::hosts::delete_ports(&mut *conn, host.id).await?;
                host
            }
            None => db::hosts::insert(&mut *conn, &team.team_id, ip, scan_host, now).await?,
        };

        for port in &scan_host.ports {
            let in_baseline = baselines
                .iter()
                .any(|b| b.expected && b.matches(ip, port.number, &port.protocol));
            if !in_baseline {
                drift.new_ports += 1;
            }
            let port_id =
                db::hosts::insert_port(&mut *conn, host.id, port, in_baseline, !in_baseline).await?;

            for script in &port.scripts {
                let severity = classify(&script.name, &script.output);
                if severity >= Severity::High {
                    flagged += 1;
                    info!(
                        job_id = %job.job_id,
                        ip,
                        port = port.number,
                        script = %script.name,
                        severity = severity.as_str(),
                        "script finding flagged"
                    );
                }
                store_script(&mut *conn, port_id, script).await?;
            }

            observed.push((ip.to_string(), port.number, port.protocol.clone()));
            summary.ports_processed += 1;
        }

        summary.hosts_processed += 1;
    }

    for host in unseen.values_mut() {
        host.status = HostStatus::Offline;
        db::hosts::save(&mut *conn, host).await?;
    }

    drift.missing_ports = missing_ports(&baselines, &observed);

    job.complete(now, summary)?;
    db::jobs::save(&mut *conn, job).await?;
    db::history::append(
        &mut *conn,
        &ScanHistory {
            id: 0,
            team_id: team.team_id.clone(),
            job_id: job.job_id.clone(),
            scan_time: now,
            host_count: summary.hosts_processed,
            port_count: summary.ports_processed,
            new_ports: drift.new_ports,
            missing_ports: drift.missing_ports,
        },
    )
    .await?;

    if !unseen.is_empty() || flagged > 0 {
        info!(
            job_id = %job.job_id,
            team = %team.name,
            offline = unseen.len(),
            flagged,
            new_ports = drift.new_ports,
            missing_ports = drift.missing_ports,
            "inventory drift"
        );
    }
    Ok(summary)
}

/// Script output is best-effort detail: a row that cannot be stored is
/// rolled back to its savepoint and skipped.
async fn store_script(
    conn: &mut SqliteConnection,
    port_id: i64,
    script: &ScanScript,
) -> Result<()> {
    let mut savepoint = conn.begin().await?;
    match db::hosts::insert_script(&mut *savepoint, port_id, script).await {
        Ok(()) => savepoint.commit().await?,
        Err(e) => {
            warn!(port_id, script = %script.name, error = %e, "failed to save script result");
            savepoint.rollback().await?;
        }
    }
    Ok(())
}

fn missing_ports(baselines: &[PortBaseline], observed: &[(String, u16, String)]) -> i64 {
    baselines
        .iter()
        .filter(|b| b.expected)
        .filter(|b| !observed.iter().any(|(ip, number, proto)| b.matches(ip, *number, proto)))
        .count() as i64
}
