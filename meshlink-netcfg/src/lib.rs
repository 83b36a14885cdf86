//! Host network configuration for the meshlink tunnel
//!
//! This crate converges the host's view of a tunnel interface to a desired
//! state pushed down by the engine: the addresses on the interface, the
//! routes through it, and the system resolver configuration.
//!
//! # Components
//!
//! - **DNS Manager** ([`dns::Manager`]): tracks the applied DNS config and
//!   drives a platform [`dns::DnsBackend`], switching backends when split
//!   DNS is turned on or off
//! - **Direct resolv.conf backend** ([`dns::DirectBackend`]): takes over
//!   `/etc/resolv.conf`, keeping the host's own file aside and putting it
//!   back byte for byte on shutdown
//! - **Userspace router** ([`router::UserspaceRouter`]): diffs desired
//!   addresses and routes against what it applied and runs only the
//!   needed `ipadm`/`ifconfig`/`route`/`ip` commands
//!
//! All operations are synchronous. External tools run through a
//! [`CommandRunner`]; the production [`SystemRunner`] kills any tool that
//! exceeds its timeout.
//!
//! # Platform Requirements
//!
//! Root privileges, or `CAP_NET_ADMIN` plus write access to `/etc` on
//! Linux. The userspace router supports illumos, Solaris, FreeBSD, OpenBSD,
//! macOS and Linux; the direct DNS backend is used on Linux, the BSDs and
//! illumos/Solaris.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use meshlink_netcfg::{dns, router, Settings, SystemRunner};
//!
//! let settings = Settings::load("meshlink.toml")?;
//! let runner = Arc::new(SystemRunner::with_timeout(settings.command_timeout())?);
//! let manager = dns::Manager::new(settings.manager_config(runner.clone()));
//!
//! let mut router = router::new_userspace_router(&settings.interface, runner, manager)?;
//! router.up()?;
//! router.set(Some(&settings.desired))?;
//! // ...
//! router.set(None)?;
//! router.close()?;
//! ```

pub mod dns;
pub mod error;
pub mod exec;
pub mod router;
pub mod settings;

pub use error::{Error, ErrorCollector, Result};
pub use exec::{CommandRunner, SystemRunner};
pub use router::Router;
pub use settings::{Settings, DEFAULT_INTERFACE};
