//! Tunnel interface address and route management
//!
//! A [`Router`] owns the addresses and routes it has applied to the tunnel
//! interface. Each [`Router::set`] diffs the desired [`Config`] against that
//! state and issues only the add/remove commands needed to converge,
//! through a platform [`NetBackend`].
//!
//! # Platforms
//!
//! | Platform | Backend | Tools |
//! |----------|---------|-------|
//! | illumos, Solaris | [`SunosBackend`] | `ipadm`, `ifconfig`, `route` |
//! | FreeBSD, OpenBSD, macOS | [`BsdBackend`] | `ifconfig`, `route` |
//! | Linux | [`LinuxBackend`] | `ip` |

mod bsd;
pub mod diff;
mod linux;
mod sunos;
mod userspace;

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::dns;
use crate::error::{Error, Result};
use crate::exec::{self, CommandRunner};

pub use bsd::BsdBackend;
pub use diff::{diff, select_gateways, Diff, Gateways};
pub use linux::LinuxBackend;
pub use sunos::SunosBackend;
pub use userspace::UserspaceRouter;

/// Desired network state for the tunnel interface
///
/// Duplicate entries are collapsed by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Interface addresses with their prefix length, e.g. `100.64.0.1/32`
    #[serde(default)]
    pub local_addrs: Vec<IpNet>,

    /// Destinations routed via the interface
    #[serde(default)]
    pub routes: Vec<IpNet>,

    #[serde(default)]
    pub dns: dns::Config,
}

/// Applies a desired [`Config`] to the host
pub trait Router: Send {
    /// Bring the tunnel interface administratively up
    fn up(&mut self) -> Result<()>;

    /// Converge to `config`; `None` removes everything this router applied
    fn set(&mut self, config: Option<&Config>) -> Result<()>;

    /// Tear down DNS and clean up the interface
    fn close(&mut self) -> Result<()>;
}

/// Platform commands for changing interface addresses and routes
pub trait NetBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn link_up(&self, runner: &dyn CommandRunner, iface: &str) -> Result<()>;

    fn add_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()>;

    fn del_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()>;

    /// Add a route via the interface.
    ///
    /// `gateway` is a local address of the same family as `route`, for
    /// platforms that insist on a next hop even for interface routes.
    fn add_route(
        &self,
        runner: &dyn CommandRunner,
        iface: &str,
        route: IpNet,
        gateway: Option<IpAddr>,
    ) -> Result<()>;

    fn del_route(&self, runner: &dyn CommandRunner, iface: &str, route: IpNet) -> Result<()>;

    /// Remove whatever a previous run may have left on the interface.
    ///
    /// Best effort: failures are logged, not returned.
    fn cleanup(&self, runner: &dyn CommandRunner, iface: &str);

    /// Whether a failed [`NetBackend::link_up`] should fail [`Router::up`]
    fn up_failure_is_fatal(&self) -> bool {
        true
    }
}

/// The address family keyword used by `ifconfig` and `route`
pub(crate) fn inet(net: &IpNet) -> &'static str {
    match net {
        IpNet::V4(_) => "inet",
        IpNet::V6(_) => "inet6",
    }
}

/// Run one tool invocation, discarding its output on success
pub(crate) fn run(runner: &dyn CommandRunner, args: Vec<String>) -> Result<()> {
    let out = runner.run(&args)?;
    log::debug!("router: {}: ok {}", exec::display(&args), out.trim());
    Ok(())
}

/// Run a cleanup step, logging rather than returning failures
pub(crate) fn run_logged(runner: &dyn CommandRunner, args: Vec<String>) {
    if let Err(e) = run(runner, args) {
        log::info!("router: cleanup: {}", e);
    }
}

/// The backend for the platform this crate was built for
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
pub fn platform_backend() -> Result<Box<dyn NetBackend>> {
    Ok(Box::new(SunosBackend))
}

/// The backend for the platform this crate was built for
#[cfg(any(target_os = "freebsd", target_os = "openbsd", target_os = "macos"))]
pub fn platform_backend() -> Result<Box<dyn NetBackend>> {
    Ok(Box::new(BsdBackend))
}

/// The backend for the platform this crate was built for
#[cfg(target_os = "linux")]
pub fn platform_backend() -> Result<Box<dyn NetBackend>> {
    Ok(Box::new(LinuxBackend))
}

/// The backend for the platform this crate was built for
#[cfg(not(any(
    target_os = "illumos",
    target_os = "solaris",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "linux"
)))]
pub fn platform_backend() -> Result<Box<dyn NetBackend>> {
    Err(Error::NotSupported(format!(
        "userspace router on {}",
        std::env::consts::OS
    )))
}

/// Create the userspace router for this platform
pub fn new_userspace_router(
    tun_name: impl Into<String>,
    runner: Arc<dyn CommandRunner>,
    dns: dns::Manager,
) -> Result<Box<dyn Router>> {
    let tun_name = tun_name.into();
    if tun_name.is_empty() {
        return Err(Error::Config("empty interface name".into()));
    }
    let backend = platform_backend()?;
    Ok(Box::new(UserspaceRouter::new(tun_name, backend, runner, dns)))
}

/// Remove state left on `tun_name` by a previous, possibly crashed, run
pub fn cleanup(tun_name: &str, runner: &dyn CommandRunner) {
    match platform_backend() {
        Ok(backend) => backend.cleanup(runner, tun_name),
        Err(e) => log::debug!("cleanup of {} skipped: {}", tun_name, e),
    }
}
