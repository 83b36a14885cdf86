//! illumos and Solaris backend (`ipadm`, `ifconfig`, `route`)

use std::net::IpAddr;

use ipnet::IpNet;

use super::{inet, run, run_logged, NetBackend};
use crate::error::Result;
use crate::exec::{argv, CommandRunner};

/// Marker embedded in the address objects this backend creates
const ADDROBJ_TAG: &str = "meshlink";

#[derive(Debug, Default, Clone, Copy)]
pub struct SunosBackend;

impl SunosBackend {
    /// Address object name for `addr`, e.g. `meshlink0/meshlinkinet1a2b3c4d`
    ///
    /// Each address gets its own object, so several addresses of one family
    /// can coexist on the interface. The suffix is stable across runs.
    fn addrobj(iface: &str, addr: &IpNet) -> String {
        format!(
            "{}/{}{}{:08x}",
            iface,
            ADDROBJ_TAG,
            inet(addr),
            fnv1a(addr.to_string().as_bytes())
        )
    }

    /// Address objects left on `iface` by a previous run
    fn stale_addrobjs(runner: &dyn CommandRunner, iface: &str) -> Vec<String> {
        let out = match runner.run(&argv(["ipadm", "show-addr", "-p", "-o", "addrobj"])) {
            Ok(out) => out,
            Err(e) => {
                log::info!("router: {}: ipadm show-addr: {}", iface, e);
                return Vec::new();
            }
        };

        out.split_whitespace()
            .filter(|obj| match obj.split_once('/') {
                Some((name, tag)) => name == iface && tag.contains(ADDROBJ_TAG),
                None => false,
            })
            .map(str::to_string)
            .collect()
    }
}

impl NetBackend for SunosBackend {
    fn name(&self) -> &'static str {
        "sunos"
    }

    fn link_up(&self, runner: &dyn CommandRunner, iface: &str) -> Result<()> {
        run(runner, argv(["ifconfig", iface, "up"]))
    }

    fn add_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()> {
        // Point-to-point: the remote end is our own address.
        let local = format!("local={},remote={}", addr, addr.addr());
        run(
            runner,
            argv([
                "ipadm".to_string(),
                "create-addr".into(),
                "-t".into(),
                "-T".into(),
                "static".into(),
                "-a".into(),
                local,
                Self::addrobj(iface, &addr),
            ]),
        )
    }

    fn del_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()> {
        let obj = Self::addrobj(iface, &addr);
        run(runner, argv(["ipadm", "delete-addr", obj.as_str()]))
    }

    fn add_route(
        &self,
        runner: &dyn CommandRunner,
        iface: &str,
        route: IpNet,
        gateway: Option<IpAddr>,
    ) -> Result<()> {
        // route(8) wants a next hop even for interface routes. Without one of
        // the right family the empty argument makes the tool fail this route
        // alone.
        let gateway = gateway.map(|gw| gw.to_string()).unwrap_or_default();
        run(
            runner,
            argv([
                "route".to_string(),
                "-q".into(),
                "-n".into(),
                "add".into(),
                format!("-{}", inet(&route)),
                route.trunc().to_string(),
                "-ifp".into(),
                iface.into(),
                gateway,
                "-iface".into(),
            ]),
        )
    }

    fn del_route(&self, runner: &dyn CommandRunner, iface: &str, route: IpNet) -> Result<()> {
        run(
            runner,
            argv([
                "route".to_string(),
                "-q".into(),
                "-n".into(),
                "delete".into(),
                format!("-{}", inet(&route)),
                route.trunc().to_string(),
                "-iface".into(),
                iface.into(),
            ]),
        )
    }

    fn cleanup(&self, runner: &dyn CommandRunner, iface: &str) {
        for obj in Self::stale_addrobjs(runner, iface) {
            run_logged(runner, argv(["ipadm", "down-addr", "-t", obj.as_str()]));
            run_logged(runner, argv(["ipadm", "delete-addr", obj.as_str()]));
            run_logged(runner, argv(["ipadm", "delete-if", iface]));
        }
        run_logged(runner, argv(["ifconfig", iface, "unplumb"]));
        run_logged(runner, argv(["ifconfig", iface, "inet6", "unplumb"]));
    }

    fn up_failure_is_fatal(&self) -> bool {
        false
    }
}

/// 32-bit FNV-1a, short enough for an ipadm address object name
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash: u32, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}
