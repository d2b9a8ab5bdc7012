use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    #[serde(skip)]
    pub id: i64,
    pub team_id: String,
    pub name: String,
    pub ip_range: String,
    pub description: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    #[serde(skip)]
    pub id: i64,
    pub team_id: String,
    pub ip: String,
    pub hostname: String,
    pub os: String,
    pub last_seen: DateTime<Utc>,
    pub status: HostStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Port {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub host_id: i64,
    pub number: u16,
    pub state: String,
    pub protocol: String,
    pub service: String,
    pub version: String,
    pub is_baseline: bool,
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScriptResult {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub port_id: i64,
    pub name: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostWithPorts {
    #[serde(flatten)]
    pub host: Host,
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    #[serde(skip)]
    pub id: i64,
    pub job_id: String,
    pub job_type: String,
    pub ip_range: String,
    pub status: JobState,
    pub team_id: String,
    pub team_name: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub hosts_found: i64,
    pub ports_found: i64,
    pub error_msg: String,
}

/// Rotation cursor for one job type.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobStatus {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub job_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanHistory {
    #[serde(skip)]
    pub id: i64,
    pub team_id: String,
    pub job_id: String,
    pub scan_time: DateTime<Utc>,
    pub host_count: i64,
    pub port_count: i64,
    pub new_ports: i64,
    pub missing_ports: i64,
}

/// Expected (or forbidden) port declaration for a team. `host_ip` of `*`
/// applies to every host of the team.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PortBaseline {
    #[serde(skip)]
    pub id: i64,
    pub team_id: String,
    pub host_ip: String,
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub expected: bool,
}

pub const WILDCARD_HOST: &str = "*";

impl PortBaseline {
    pub fn matches(&self, host_ip: &str, number: u16, protocol: &str) -> bool {
        (self.host_ip == WILDCARD_HOST || self.host_ip == host_ip)
            && self.port == number
            && (self.protocol.is_empty() || self.protocol.eq_ignore_ascii_case(protocol))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanScript {
    pub name: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPort {
    pub number: u16,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScanScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanHost {
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ports: Vec<ScanPort>,
}

/// Result payload uploaded by a scanner worker for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hosts: Vec<ScanHost>,
}

impl Scan {
    /// The failure message when the scanner itself reports the run as
    /// unsuccessful. Such a payload must not be merged into the inventory.
    pub fn failure(&self) -> Option<String> {
        let status = self.status.trim();
        if !(status.eq_ignore_ascii_case("error") || status.eq_ignore_ascii_case("failed")) {
            return None;
        }
        let message = self
            .error
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("scanner reported status {status}"));
        Some(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub hosts_processed: i64,
    pub ports_processed: i64,
}
