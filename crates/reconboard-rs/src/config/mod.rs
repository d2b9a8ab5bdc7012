use std::{collections::HashMap, env, fs};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{auth::Role, models::WILDCARD_HOST};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub job_types: Vec<String>,
    pub default_job_limit: i64,
    pub max_job_limit: i64,
    /// Bearer token to the roles it grants.
    pub api_tokens: HashMap<String, Vec<Role>>,
    pub teams: Vec<TeamConfig>,
    /// Delete teams (and their inventory) that are no longer listed in `teams`.
    pub prune_teams: bool,
    /// Port baselines keyed by team name.
    pub baselines: HashMap<String, Vec<BaselineConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    pub ip_range: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default = "wildcard_host")]
    pub host_ip: String,
    pub port: u16,
    #[serde(default = "tcp")]
    pub protocol: String,
    #[serde(default)]
    pub service: String,
    #[serde(default = "expected")]
    pub expected: bool,
}

fn wildcard_host() -> String {
    WILDCARD_HOST.to_string()
}

fn tcp() -> String {
    "tcp".to_string()
}

fn expected() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var("RECONBOARD_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        let file_cfg: Option<AppConfig> = fs::read_to_string(&path)
            .ok()
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .with_context(|| format!("failed to parse {path}"))?;

        let mut cfg = file_cfg.unwrap_or_default();

        if let Ok(v) = env::var("RB_HOST") {
            cfg.host = v;
        }
        if let Ok(v) = env::var("RB_PORT") {
            cfg.port = v.parse().with_context(|| format!("invalid RB_PORT: {v}"))?;
        }
        if let Ok(v) = env::var("RB_DATABASE_URL") {
            cfg.database_url = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_types.iter().any(|t| t.trim().is_empty()) {
            bail!("job_types cannot contain empty names");
        }
        if self.max_job_limit < 1 {
            bail!("max_job_limit must be at least 1");
        }
        if !(1..=self.max_job_limit).contains(&self.default_job_limit) {
            bail!(
                "default_job_limit must be between 1 and max_job_limit ({})",
                self.max_job_limit
            );
        }
        if let Some((token, _)) = self.api_tokens.iter().find(|(_, roles)| roles.is_empty()) {
            bail!("api token {}… grants no roles", token.chars().take(4).collect::<String>());
        }
        Ok(())
    }

    /// Effective page size for a job listing request.
    pub fn job_limit(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(n) if n > 0 => n.min(self.max_job_limit),
            _ => self.default_job_limit,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: "sqlite://reconboard.db".to_string(),
            job_types: vec!["nmap".to_string()],
            default_job_limit: 50,
            max_job_limit: 500,
            api_tokens: HashMap::new(),
            teams: Vec::new(),
            prune_teams: false,
            baselines: HashMap::new(),
        }
    }
}
