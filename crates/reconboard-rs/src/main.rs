mod api;
mod auth;
mod classifier;
mod config;
mod db;
mod error;
mod iprange;
mod jobs;
mod models;
mod parser;
mod report;

use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    api::{
        cancel_job, dashboard, fail_job, health, job_manager, list_jobs, next_job, team_history,
        team_hosts, upload_nmap, upload_results, vulnerabilities,
    },
    auth::{auth_middleware, TokenStore},
    config::AppConfig,
    jobs::{Dispatcher, Reconciler},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::SqlitePool,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<Reconciler>,
    pub tokens: TokenStore,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Arc::new(AppConfig::load()?);

    let pool = db::create_pool(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    db::run_migrations(&pool).await?;
    db::seed::apply(&pool, &config)
        .await
        .context("failed to apply team configuration")?;

    if config.api_tokens.is_empty() {
        warn!("no api tokens configured, every protected route will answer 401");
    }

    let state = AppState {
        pool: pool.clone(),
        dispatcher: Arc::new(Dispatcher::new(pool.clone())),
        reconciler: Arc::new(Reconciler::new(pool)),
        tokens: TokenStore::from_config(&config.api_tokens),
        config: config.clone(),
        started_at: Instant::now(),
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "reconboard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/manager", get(job_manager))
        .route("/api/jobs/next/{job_type}", get(next_job))
        .route("/api/jobs/{job_id}/results", post(upload_results))
        .route("/api/jobs/{job_id}/results/nmap", post(upload_nmap))
        .route("/api/jobs/{job_id}/fail", post(fail_job))
        .route("/api/jobs/{job_id}/cancel", post(cancel_job))
        .route("/api/vulnerabilities", get(vulnerabilities))
        .route("/api/dashboard", get(dashboard))
        .route("/api/teams/{team_id}/hosts", get(team_hosts))
        .route("/api/teams/{team_id}/history", get(team_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}
