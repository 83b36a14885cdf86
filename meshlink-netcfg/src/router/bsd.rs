//! BSD backend (`ifconfig`, `route`)

use std::net::IpAddr;

use ipnet::IpNet;

use super::{inet, run, run_logged, NetBackend};
use crate::error::Result;
use crate::exec::{argv, CommandRunner};

#[derive(Debug, Default, Clone, Copy)]
pub struct BsdBackend;

impl NetBackend for BsdBackend {
    fn name(&self) -> &'static str {
        "bsd"
    }

    fn link_up(&self, runner: &dyn CommandRunner, iface: &str) -> Result<()> {
        run(runner, argv(["ifconfig", iface, "up"]))
    }

    fn add_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()> {
        run(
            runner,
            argv([
                "ifconfig".to_string(),
                iface.into(),
                inet(&addr).into(),
                addr.to_string(),
                addr.addr().to_string(),
                "alias".into(),
            ]),
        )
    }

    fn del_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()> {
        run(
            runner,
            argv([
                "ifconfig".to_string(),
                iface.into(),
                inet(&addr).into(),
                addr.to_string(),
                "-alias".into(),
            ]),
        )
    }

    fn add_route(
        &self,
        runner: &dyn CommandRunner,
        iface: &str,
        route: IpNet,
        _gateway: Option<IpAddr>,
    ) -> Result<()> {
        run(runner, route_argv("add", iface, &route))
    }

    fn del_route(&self, runner: &dyn CommandRunner, iface: &str, route: IpNet) -> Result<()> {
        run(runner, route_argv("delete", iface, &route))
    }

    fn cleanup(&self, runner: &dyn CommandRunner, iface: &str) {
        // A leftover interface survives `down`; only destroy frees the name.
        run_logged(runner, argv(["ifconfig", iface, "down"]));
        run_logged(runner, argv(["ifconfig", iface, "destroy"]));
    }
}

fn route_argv(action: &str, iface: &str, route: &IpNet) -> Vec<String> {
    argv([
        "route".to_string(),
        "-q".into(),
        "-n".into(),
        action.into(),
        format!("-{}", inet(route)),
        route.trunc().to_string(),
        "-iface".into(),
        iface.into(),
    ])
}
