use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::{
    error::{Result, ServiceError},
    models::{Scan, ScanHost, ScanPort, ScanScript},
};

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "@start", default)]
    start: Option<i64>,
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
    #[serde(default)]
    runstats: Option<NmapRunStats>,
}

#[derive(Debug, Deserialize)]
struct NmapRunStats {
    #[serde(default)]
    finished: Option<NmapFinished>,
}

#[derive(Debug, Deserialize)]
struct NmapFinished {
    #[serde(rename = "@time", default)]
    time: Option<i64>,
    #[serde(rename = "@exit", default)]
    exit: Option<String>,
    #[serde(rename = "@errormsg", default)]
    errormsg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    #[serde(default)]
    status: Option<NmapState>,
    #[serde(rename = "address", default)]
    addresses: Vec<NmapAddress>,
    #[serde(default)]
    hostnames: Option<NmapHostnames>,
    #[serde(default)]
    ports: Option<NmapPorts>,
    #[serde(default)]
    os: Option<NmapOs>,
}

#[derive(Debug, Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype", default)]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct NmapHostnames {
    #[serde(rename = "hostname", default)]
    hostnames: Vec<NmapHostname>,
}

#[derive(Debug, Deserialize)]
struct NmapHostname {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct NmapOs {
    #[serde(rename = "osmatch", default)]
    matches: Vec<NmapOsMatch>,
}

#[derive(Debug, Deserialize)]
struct NmapOsMatch {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct NmapPorts {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, Deserialize)]
struct NmapPort {
    #[serde(rename = "@portid")]
    portid: u16,
    #[serde(rename = "@protocol")]
    protocol: String,
    state: NmapState,
    #[serde(default)]
    service: Option<NmapService>,
    #[serde(rename = "script", default)]
    scripts: Vec<NmapScript>,
}

#[derive(Debug, Deserialize)]
struct NmapState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NmapService {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@product", default)]
    product: String,
    #[serde(rename = "@version", default)]
    version: String,
    #[serde(rename = "@extrainfo", default)]
    extrainfo: String,
}

#[derive(Debug, Deserialize)]
struct NmapScript {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@output", default)]
    output: String,
}

impl NmapService {
    fn version_string(&self) -> String {
        [&self.product, &self.version, &self.extrainfo]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Converts an nmap XML report into a scan payload. Hosts reported down and
/// ports that are not open are left out.
pub fn parse_nmap_xml(xml: &str) -> Result<Scan> {
    let run: NmapRun =
        from_str(xml).map_err(|e| ServiceError::InvalidInput(format!("invalid nmap xml: {e}")))?;

    let (end_time, status, error) = match run.runstats.and_then(|r| r.finished) {
        Some(finished) if finished.exit.as_deref() == Some("error") => {
            (timestamp(finished.time), "error", finished.errormsg)
        }
        Some(finished) => (timestamp(finished.time), "complete", None),
        None => (None, "complete", None),
    };
    let mut scan = Scan {
        status: status.to_string(),
        start_time: timestamp(run.start),
        end_time,
        error,
        hosts: Vec::with_capacity(run.hosts.len()),
    };

    for host in run.hosts {
        let state = host.status.map(|s| s.state).unwrap_or_else(|| "up".to_string());
        if state != "up" {
            continue;
        }
        let ip = host
            .addresses
            .iter()
            .find(|a| a.addrtype != "mac")
            .map(|a| a.addr.clone())
            .ok_or_else(|| ServiceError::InvalidInput("nmap host without ip address".to_string()))?;

        let hostname = host
            .hostnames
            .and_then(|h| h.hostnames.into_iter().next().map(|e| e.name))
            .unwrap_or_default();
        let os = host
            .os
            .and_then(|o| o.matches.into_iter().next().map(|m| m.name))
            .unwrap_or_default();

        let ports = host
            .ports
            .map(|p| p.ports)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.state.state == "open")
            .map(|p| ScanPort {
                number: p.portid,
                state: p.state.state,
                protocol: p.protocol,
                service: p.service.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
                version: p.service.as_ref().map(NmapService::version_string).unwrap_or_default(),
                scripts: p
                    .scripts
                    .into_iter()
                    .map(|s| ScanScript {
                        name: s.id,
                        output: s.output,
                    })
                    .collect(),
            })
            .collect();

        scan.hosts.push(ScanHost {
            ip,
            hostname,
            os,
            status: state,
            ports,
        });
    }

    Ok(scan)
}
