//! resolv.conf(5) reading and writing

use std::fmt;
use std::net::{AddrParseError, IpAddr, Ipv6Addr};
use std::path::Path;

use super::name::Fqdn;
use super::OSConfig;
use crate::error::{Error, Result};

/// Substring identifying a file written by this crate
pub const GENERATED_MARKER: &str = "generated by meshlink";

const HEADER: &str = "# resolv.conf(5) file generated by meshlink\n\
                      # DO NOT EDIT THIS FILE BY HAND -- CHANGES WILL BE OVERWRITTEN\n\n";

/// A DNS manager that announces itself in the header of resolv.conf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvOwner {
    SystemdResolved,
    NetworkManager,
    Resolvconf,
}

impl fmt::Display for ResolvOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvOwner::SystemdResolved => write!(f, "systemd-resolved"),
            ResolvOwner::NetworkManager => write!(f, "NetworkManager"),
            ResolvOwner::Resolvconf => write!(f, "resolvconf"),
        }
    }
}

/// Render nameservers and search domains in resolv.conf format
///
/// Nameservers keep their order, one line each, followed by a single
/// `search` line when there are any domains.
pub fn write_resolv_conf(servers: &[IpAddr], domains: &[Fqdn]) -> String {
    let mut out = String::from(HEADER);
    for ns in servers {
        out.push_str("nameserver ");
        out.push_str(&ns.to_string());
        out.push('\n');
    }
    if !domains.is_empty() {
        out.push_str("search");
        for domain in domains {
            out.push(' ');
            out.push_str(domain.without_trailing_dot());
        }
        out.push('\n');
    }
    out
}

/// Extract nameservers and search domains from resolv.conf contents
///
/// Any malformed address or domain fails the whole read; everything other
/// than `nameserver` and `search` lines is ignored.
pub fn read_resolv(contents: &str) -> Result<OSConfig> {
    let mut config = OSConfig::default();

    for line in contents.lines() {
        let line = line.trim();
        let mut fields = line.split_whitespace();

        match fields.next() {
            Some("nameserver") => {
                let addr = fields.next().unwrap_or_default();
                let ip = parse_nameserver(addr).map_err(|source| Error::InvalidNameserver {
                    line: line.to_string(),
                    source,
                })?;
                config.nameservers.push(ip);
            }
            Some("search") => {
                let mut found = false;
                for domain in fields {
                    config.search_domains.push(Fqdn::new(domain)?);
                    found = true;
                }
                if !found {
                    return Err(Error::InvalidSearchDomain {
                        domain: line.to_string(),
                        reason: "search line without domains".into(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

/// Parse a nameserver address, accepting an IPv6 zone such as `fe80::1%eth0`
///
/// `IpAddr` cannot carry the zone, so it is dropped.
fn parse_nameserver(addr: &str) -> std::result::Result<IpAddr, AddrParseError> {
    match addr.split_once('%') {
        Some((host, zone)) if !zone.is_empty() => host.parse::<Ipv6Addr>().map(IpAddr::V6),
        _ => addr.parse(),
    }
}

/// Read and parse a resolv.conf file
pub fn read_resolv_file(path: &Path) -> Result<OSConfig> {
    let contents = std::fs::read_to_string(path)?;
    read_resolv(&contents)
}

/// Identify which DNS manager, if any, generated `contents`
///
/// Only the leading comment block is inspected; the first non-empty,
/// non-comment line ends the search.
pub fn resolv_owner(contents: &str) -> Option<ResolvOwner> {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('#') {
            return None;
        }

        if line.contains("systemd-resolved") {
            return Some(ResolvOwner::SystemdResolved);
        } else if line.contains("NetworkManager") {
            return Some(ResolvOwner::NetworkManager);
        } else if line.contains("resolvconf") {
            return Some(ResolvOwner::Resolvconf);
        }
    }
    None
}
