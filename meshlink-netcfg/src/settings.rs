//! Settings file for the network reconciler

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dns::{ManagerConfig, ResolvPaths};
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::router;

/// Default tunnel interface name
pub const DEFAULT_INTERFACE: &str = "meshlink0";

/// Longest interface name the kernels we support accept (IFNAMSIZ - 1)
const MAX_INTERFACE_NAME: usize = 15;

/// Top-level settings
///
/// # Example Configuration
///
/// ```toml
/// interface = "meshlink0"
/// command_timeout_ms = 1000
///
/// [dns]
/// resolv_conf = "/etc/resolv.conf"
///
/// [desired]
/// local_addrs = ["100.64.0.1/32"]
/// routes = ["100.64.0.0/10"]
///
/// [desired.dns]
/// nameservers = ["100.100.100.100"]
/// search_domains = ["internal.example."]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Tunnel interface to manage
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Upper bound for each external command, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Resolver file locations
    #[serde(default)]
    pub dns: ResolvPaths,

    /// State to converge the host to
    #[serde(default)]
    pub desired: router::Config,
}

fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

fn default_command_timeout_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            command_timeout_ms: default_command_timeout_ms(),
            dns: ResolvPaths::default(),
            desired: router::Config::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(Error::Config("interface name is required".into()));
        }

        if self.interface.len() > MAX_INTERFACE_NAME {
            return Err(Error::Config(format!(
                "interface name {:?} is longer than {} bytes",
                self.interface, MAX_INTERFACE_NAME
            )));
        }

        if self.command_timeout_ms == 0 {
            return Err(Error::Config("command_timeout_ms cannot be 0".into()));
        }

        if self.dns.resolv_conf == self.dns.backup {
            return Err(Error::Config(format!(
                "dns.backup must differ from dns.resolv_conf ({})",
                self.dns.resolv_conf.display()
            )));
        }

        let dns = &self.desired.dns;
        if dns.nameservers.is_empty() && !dns.search_domains.is_empty() {
            // An empty nameserver list means "no DNS", which would silently
            // drop the search domains.
            return Err(Error::Config(
                "desired.dns.search_domains requires at least one nameserver".into(),
            ));
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Build the DNS manager parameters for these settings
    pub fn manager_config(&self, runner: Arc<dyn CommandRunner>) -> ManagerConfig {
        ManagerConfig::new(self.interface.clone(), runner)
            .with_paths(self.dns.clone())
            .with_per_domain(self.desired.dns.per_domain)
    }

    /// Generate a sample settings file
    pub fn sample() -> String {
        r#"# meshlink network reconciler settings

# Tunnel interface to manage (default: "meshlink0")
interface = "meshlink0"

# Upper bound for each external command such as ip, ifconfig or route,
# in milliseconds (default: 1000)
command_timeout_ms = 1000

# Resolver file locations. The backup must live on the same filesystem as
# resolv_conf so it can be renamed back into place.
[dns]
resolv_conf = "/etc/resolv.conf"
backup = "/etc/resolv.pre-meshlink-backup.conf"
# Files left by older releases, removed on shutdown
legacy = ["/etc/resolv.meshlink.conf"]

# Desired state of the tunnel interface
[desired]
local_addrs = ["100.64.0.1/32", "fd7a:115c:a1e0::1/128"]
routes = ["100.64.0.0/10", "fd7a:115c:a1e0::/48"]

# Desired DNS. Leave nameservers empty to keep the host's own resolv.conf.
[desired.dns]
nameservers = ["100.100.100.100"]
search_domains = ["internal.example."]

# Route only the search domains through the nameservers above. Falls back
# to global resolv.conf when no split-capable resolver is available.
per_domain = false
"#
        .to_string()
    }
}
