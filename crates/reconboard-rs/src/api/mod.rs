use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    auth::{Access, Caller, Role},
    db,
    error::{Result, ServiceError},
    jobs::{self, Ingested},
    models::{HostWithPorts, Job, JobState, JobStatus, ReconcileSummary, Scan, ScanHistory},
    parser::parse_nmap_xml,
    report::{self, Dashboard, Health, VulnerabilityReport},
    AppState,
};

const VIEWER: Access = Access::Role(Role::Viewer);
const SCANNER: Access = Access::Role(Role::Scanner);
const ADMIN: Access = Access::Role(Role::Admin);

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(report::health(&state.pool, state.started_at).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    query: std::result::Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<Vec<Job>>> {
    caller.require(Access::Any)?;
    let Query(query) = query?;

    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            JobState::parse(raw)
                .ok_or_else(|| ServiceError::InvalidInput(format!("unknown job status: {raw}")))?,
        ),
    };
    let limit = state.config.job_limit(query.limit);
    Ok(Json(jobs::list(&state.pool, status, limit).await?))
}

pub async fn job_manager(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<JobStatus>>> {
    caller.require(VIEWER)?;
    Ok(Json(jobs::manager_state(&state.pool).await?))
}

pub async fn next_job(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(job_type): Path<String>,
) -> Result<Json<Job>> {
    caller.require(SCANNER)?;
    Ok(Json(state.dispatcher.next_job(&job_type).await?))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReconcileResponse {
    Success(ReconcileSummary),
    Failed { job: Box<Job> },
}

impl From<Ingested> for ReconcileResponse {
    fn from(outcome: Ingested) -> Self {
        match outcome {
            Ingested::Reconciled(summary) => Self::Success(summary),
            Ingested::Failed(job) => Self::Failed { job },
        }
    }
}

pub async fn upload_results(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
    payload: std::result::Result<Json<Scan>, JsonRejection>,
) -> Result<Json<ReconcileResponse>> {
    caller.require(SCANNER)?;
    let Json(scan) = payload?;
    Ok(Json(state.reconciler.ingest(&job_id, &scan).await?.into()))
}

pub async fn upload_nmap(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
    body: String,
) -> Result<Json<ReconcileResponse>> {
    caller.require(SCANNER)?;
    let scan = parse_nmap_xml(&body)?;
    Ok(Json(state.reconciler.ingest(&job_id, &scan).await?.into()))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    message: String,
}

pub async fn fail_job(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
    payload: std::result::Result<Json<FailRequest>, JsonRejection>,
) -> Result<Json<Job>> {
    caller.require(SCANNER)?;
    let Json(req) = payload?;
    Ok(Json(jobs::fail(&state.pool, &job_id, &req.message).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>> {
    caller.require(ADMIN)?;
    let job = jobs::cancel(&state.pool, &job_id).await?;
    Ok(Json(json!({"status": "success", "message": "job cancelled", "job": job})))
}

pub async fn vulnerabilities(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<VulnerabilityReport>> {
    caller.require(VIEWER)?;
    Ok(Json(report::vulnerability_report(&state.pool).await?))
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Dashboard>> {
    caller.require(VIEWER)?;
    Ok(Json(report::dashboard(&state.pool).await?))
}

pub async fn team_hosts(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(team_id): Path<String>,
) -> Result<Json<Vec<HostWithPorts>>> {
    caller.require(VIEWER)?;
    let mut conn = state.pool.acquire().await?;
    if db::teams::get(&mut conn, &team_id).await?.is_none() {
        return Err(ServiceError::TeamNotFound(team_id));
    }
    Ok(Json(db::hosts::list_with_ports(&mut conn, &team_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    limit: Option<i64>,
}

pub async fn team_history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(team_id): Path<String>,
    query: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ScanHistory>>> {
    caller.require(VIEWER)?;
    let Query(query) = query?;
    let mut conn = state.pool.acquire().await?;
    if db::teams::get(&mut conn, &team_id).await?.is_none() {
        return Err(ServiceError::TeamNotFound(team_id));
    }
    let limit = state.config.job_limit(query.limit);
    Ok(Json(db::history::list_for_team(&mut conn, &team_id, limit).await?))
}
