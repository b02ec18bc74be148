//! Client IP extraction and allow-list matching.

use std::collections::HashSet;
use std::net::IpAddr;

use eyre::{eyre, Result};
use ipnet::IpNet;

/// Maps IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) back to plain IPv4 so
/// one list entry covers both forms.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}

/// The addresses a request may legitimately be attributed to, most specific
/// first: the first valid `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the socket peer.
pub fn client_ip_candidates(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    socket_peer: Option<IpAddr>,
) -> Vec<IpAddr> {
    let mut candidates = Vec::new();

    if let Some(header) = forwarded_for {
        if let Some(ip) = header
            .split(',')
            .map(str::trim)
            .find_map(|entry| entry.parse::<IpAddr>().ok())
        {
            candidates.push(normalize_ip(ip));
        }
    }
    if let Some(header) = real_ip {
        if let Ok(ip) = header.trim().parse::<IpAddr>() {
            candidates.push(normalize_ip(ip));
        }
    }
    if let Some(ip) = socket_peer {
        candidates.push(normalize_ip(ip));
    }

    candidates
}

/// Literal addresses and CIDR ranges that bypass rate limiting entirely.
#[derive(Debug, Default, Clone)]
pub struct IpAllowList {
    literals: HashSet<IpAddr>,
    networks: Vec<IpNet>,
}

impl IpAllowList {
    /// Parses a mixed list of IP literals and CIDR ranges.
    pub fn new(entries: &[String]) -> Result<Self> {
        let mut literals = HashSet::new();
        let mut networks = Vec::new();
        for entry in entries {
            let entry = entry.trim();
            if let Ok(ip) = entry.parse::<IpAddr>() {
                literals.insert(normalize_ip(ip));
            } else if let Ok(net) = entry.parse::<IpNet>() {
                networks.push(net);
            } else {
                return Err(eyre!("invalid allow list entry: {entry}"));
            }
        }
        Ok(IpAllowList { literals, networks })
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.networks.is_empty()
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        let ip = normalize_ip(ip);
        self.literals.contains(&ip) || self.networks.iter().any(|net| net.contains(&ip))
    }

    /// True when any of the request's candidate addresses is allow-listed.
    pub fn any_allowed(&self, candidates: &[IpAddr]) -> bool {
        candidates.iter().any(|ip| self.is_allowed(*ip))
    }
}
