use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
    str::FromStr,
};

use ipnet::IpNet;

use crate::error::ServiceError;

/// Target expression accepted for a team: `10.0.0.0/24`, `10.0.0.1-254`,
/// `10.0.0.7`, or a comma list of addresses and networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRange {
    Cidr(IpNet),
    LastOctet { base: Ipv4Addr, end: u8 },
    Single(IpAddr),
    List(Vec<IpRange>),
}

impl IpRange {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ServiceError::InvalidInput(
                "IP range cannot be empty".to_string(),
            ));
        }

        if raw.contains('/') && !raw.contains(',') {
            if let Ok(net) = IpNet::from_str(raw) {
                return Ok(Self::Cidr(net));
            }
        }

        if let Some(range) = parse_last_octet(raw) {
            return Ok(range);
        }

        if let Ok(ip) = IpAddr::from_str(raw) {
            return Ok(Self::Single(ip));
        }

        let mut entries = Vec::new();
        for item in raw.split(',') {
            let item = item.trim();
            if let Ok(ip) = IpAddr::from_str(item) {
                entries.push(Self::Single(ip));
            } else if let Ok(net) = IpNet::from_str(item) {
                entries.push(Self::Cidr(net));
            } else {
                return Err(ServiceError::InvalidInput(format!(
                    "invalid IP address or range: {item}"
                )));
            }
        }
        Ok(Self::List(entries))
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Cidr(net) => net.contains(ip),
            Self::Single(single) => single == ip,
            Self::LastOctet { base, end } => match ip {
                IpAddr::V4(v4) => {
                    let [a, b, c, d] = v4.octets();
                    let [ba, bb, bc, start] = base.octets();
                    (a, b, c) == (ba, bb, bc) && d >= start && d <= *end
                }
                IpAddr::V6(_) => false,
            },
            Self::List(entries) => entries.iter().any(|entry| entry.contains(ip)),
        }
    }
}

/// Canonical text form of a host address, so `FE80::1` and `fe80::0:1`
/// name the same host.
pub fn canonical_ip(raw: &str) -> Result<String, ServiceError> {
    IpAddr::from_str(raw.trim())
        .map(|ip| ip.to_string())
        .map_err(|_| ServiceError::InvalidInput(format!("invalid host ip: {raw:?}")))
}

fn parse_last_octet(raw: &str) -> Option<IpRange> {
    let (start, end) = raw.split_once('-')?;
    let base = Ipv4Addr::from_str(start.trim()).ok()?;
    let end_digits = end.trim();
    if end_digits.is_empty() || end_digits.len() > 3 || !end_digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let end: u8 = end_digits.parse().ok()?;
    if end < base.octets()[3] {
        return None;
    }
    Some(IpRange::LastOctet { base, end })
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cidr(net) => write!(f, "{net}"),
            Self::LastOctet { base, end } => write!(f, "{base}-{end}"),
            Self::Single(ip) => write!(f, "{ip}"),
            Self::List(entries) => {
                let parts: Vec<String> = entries.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    #[test]
    fn parses_every_accepted_form() {
        assert!(matches!(IpRange::parse("10.1.0.0/24"), Ok(IpRange::Cidr(_))));
        assert!(matches!(
            IpRange::parse("10.1.0.1-254"),
            Ok(IpRange::LastOctet { end: 254, .. })
        ));
        assert!(matches!(IpRange::parse(" 10.1.0.9 "), Ok(IpRange::Single(_))));
        match IpRange::parse("10.1.0.9, 10.2.0.0/16") {
            Ok(IpRange::List(entries)) => assert_eq!(entries.len(), 2),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_ranges() {
        for raw in ["", "   ", "10.1.0.1-", "10.1.0.300", "10.1.0.9-3", "example.com", "10.1.0.1,,10.1.0.2"] {
            assert!(
                matches!(IpRange::parse(raw), Err(ServiceError::InvalidInput(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn contains_respects_range_bounds() {
        let dashed = IpRange::parse("192.168.5.10-20").unwrap();
        assert!(dashed.contains(&ip("192.168.5.10")));
        assert!(dashed.contains(&ip("192.168.5.20")));
        assert!(!dashed.contains(&ip("192.168.5.21")));
        assert!(!dashed.contains(&ip("192.168.6.15")));

        let cidr = IpRange::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&ip("10.200.3.4")));
        assert!(!cidr.contains(&ip("11.0.0.1")));

        let list = IpRange::parse("172.16.0.1,172.17.0.0/16").unwrap();
        assert!(list.contains(&ip("172.17.9.9")));
        assert!(!list.contains(&ip("172.16.0.2")));
    }

    #[test]
    fn canonical_ip_normalizes_textual_variants() {
        assert_eq!(canonical_ip(" 10.0.0.7 ").unwrap(), "10.0.0.7");
        assert_eq!(canonical_ip("FE80::1").unwrap(), "fe80::1");
        assert_eq!(canonical_ip("fe80:0:0:0:0:0:0:1").unwrap(), "fe80::1");
        assert!(matches!(canonical_ip("10.0.0.256"), Err(ServiceError::InvalidInput(_))));
    }
}
