//! System DNS configuration
//!
//! This module provides:
//! - [`Config`]: the desired DNS state pushed down by the engine
//! - [`Manager`]: tracks the applied state and drives a [`DnsBackend`]
//! - [`DirectBackend`]: manages `/etc/resolv.conf` directly, with backup
//!   and restore of the host's own file
//!
//! Backends are chosen once per mode by [`new_backend`]; the manager only
//! ever talks to them through the [`DnsBackend`] trait.

mod direct;
mod manager;
mod name;
pub mod resolv;

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exec::CommandRunner;

pub use direct::DirectBackend;
pub use manager::{BackendFactory, Manager};
pub use name::Fqdn;
pub use resolv::ResolvOwner;

/// Default location of the system resolver configuration
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Where the host's own resolv.conf is kept while ours is in place
pub const BACKUP_CONF: &str = "/etc/resolv.pre-meshlink-backup.conf";

/// Symlink target used by earlier releases
pub const LEGACY_CONF: &str = "/etc/resolv.meshlink.conf";

/// Desired DNS state
///
/// Equality is structural and order-sensitive, matching resolv.conf
/// semantics. The default value means "no DNS management".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Resolvers, in order of preference
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,

    /// Search suffixes, in order
    #[serde(default)]
    pub search_domains: Vec<Fqdn>,

    /// Resolve only the search domains through our resolvers (split DNS)
    #[serde(default)]
    pub per_domain: bool,
}

impl Config {
    pub fn is_zero(&self) -> bool {
        self.nameservers.is_empty() && self.search_domains.is_empty() && !self.per_domain
    }

    /// The host-level view of this config, without split-DNS semantics
    pub fn to_os_config(&self) -> OSConfig {
        OSConfig {
            nameservers: self.nameservers.clone(),
            search_domains: self.search_domains.clone(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nameservers=[")?;
        for (i, ns) in self.nameservers.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", ns)?;
        }
        write!(f, "] search=[")?;
        for (i, domain) in self.search_domains.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", domain)?;
        }
        write!(f, "] per_domain={}", self.per_domain)
    }
}

/// DNS settings as found on the host
///
/// Distinct from [`Config`]: it describes what was discovered in the live
/// system, not what is wanted, and has no split-DNS notion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OSConfig {
    pub nameservers: Vec<IpAddr>,
    pub search_domains: Vec<Fqdn>,
}

impl OSConfig {
    pub fn is_zero(&self) -> bool {
        self.nameservers.is_empty() && self.search_domains.is_empty()
    }
}

/// Filesystem locations managed by the direct backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvPaths {
    /// Live resolver configuration
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,

    /// Backup of the host's file while ours is installed; must be on the
    /// same filesystem as `resolv_conf`
    #[serde(default = "default_backup")]
    pub backup: PathBuf,

    /// Obsolete artifacts removed on close
    #[serde(default = "default_legacy")]
    pub legacy: Vec<PathBuf>,
}

impl ResolvPaths {
    /// Paths rooted in `dir`, for sandboxed use
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            resolv_conf: dir.join("resolv.conf"),
            backup: dir.join("resolv.pre-meshlink-backup.conf"),
            legacy: vec![dir.join("resolv.meshlink.conf")],
        }
    }
}

impl Default for ResolvPaths {
    fn default() -> Self {
        Self {
            resolv_conf: default_resolv_conf(),
            backup: default_backup(),
            legacy: default_legacy(),
        }
    }
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from(RESOLV_CONF)
}

fn default_backup() -> PathBuf {
    PathBuf::from(BACKUP_CONF)
}

fn default_legacy() -> Vec<PathBuf> {
    vec![PathBuf::from(LEGACY_CONF)]
}

/// Construction parameters for a [`Manager`]
#[derive(Clone)]
pub struct ManagerConfig {
    /// Tunnel interface the DNS settings belong to
    pub interface_name: String,
    /// Start in split-DNS mode
    pub per_domain: bool,
    pub paths: ResolvPaths,
    /// Used for resolver service checks
    pub runner: Arc<dyn CommandRunner>,
}

impl ManagerConfig {
    pub fn new(interface_name: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            interface_name: interface_name.into(),
            per_domain: false,
            paths: ResolvPaths::default(),
            runner,
        }
    }

    pub fn with_paths(mut self, paths: ResolvPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_per_domain(mut self, per_domain: bool) -> Self {
        self.per_domain = per_domain;
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("interface_name", &self.interface_name)
            .field("per_domain", &self.per_domain)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

/// A platform mechanism for applying DNS settings
pub trait DnsBackend: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Make the system DNS settings match `config`
    fn up(&mut self, config: &Config) -> Result<()>;

    /// Undo the effects of `up`.
    ///
    /// Idempotent; does nothing if `up` was never called.
    fn down(&mut self) -> Result<()>;

    /// Whether the backend can route only some domains to our resolvers
    fn supports_split_dns(&self) -> bool {
        false
    }

    /// The host's own DNS settings, ignoring anything we installed
    fn base_config(&self) -> Result<OSConfig>;

    /// Final teardown at process exit
    fn close(&mut self) -> Result<()> {
        self.down()
    }
}

/// Backend for platforms where DNS is handled elsewhere
#[derive(Debug, Default)]
pub struct NoopBackend;

impl DnsBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn up(&mut self, config: &Config) -> Result<()> {
        log::debug!("dns: no system DNS integration, ignoring {}", config);
        Ok(())
    }

    fn down(&mut self) -> Result<()> {
        Ok(())
    }

    fn base_config(&self) -> Result<OSConfig> {
        Ok(OSConfig::default())
    }
}

/// Create the platform backend for the requested mode
#[cfg(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
))]
pub fn new_backend(mconfig: &ManagerConfig) -> Box<dyn DnsBackend> {
    if mconfig.per_domain {
        log::warn!(
            "dns: split DNS requested for {} but no split-capable resolver is available; \
             using global resolv.conf",
            mconfig.interface_name
        );
    }

    if let Ok(contents) = std::fs::read_to_string(&mconfig.paths.resolv_conf) {
        if let Some(owner) = resolv::resolv_owner(&contents) {
            log::warn!(
                "dns: {} is managed by {}, taking it over directly",
                mconfig.paths.resolv_conf.display(),
                owner
            );
        }
    }

    Box::new(DirectBackend::new(
        mconfig.paths.clone(),
        mconfig.runner.clone(),
    ))
}

/// Create the platform backend for the requested mode
#[cfg(not(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
)))]
pub fn new_backend(_mconfig: &ManagerConfig) -> Box<dyn DnsBackend> {
    Box::new(NoopBackend)
}
