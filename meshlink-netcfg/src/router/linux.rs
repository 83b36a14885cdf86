//! Linux backend (iproute2)

use std::net::IpAddr;

use ipnet::IpNet;

use super::{run, run_logged, NetBackend};
use crate::error::Result;
use crate::exec::{argv, CommandRunner};

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxBackend;

impl NetBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn link_up(&self, runner: &dyn CommandRunner, iface: &str) -> Result<()> {
        run(runner, argv(["ip", "link", "set", "dev", iface, "up"]))
    }

    fn add_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()> {
        run(runner, argv(["ip", "addr", "add", &addr.to_string(), "dev", iface]))
    }

    fn del_addr(&self, runner: &dyn CommandRunner, iface: &str, addr: IpNet) -> Result<()> {
        run(runner, argv(["ip", "addr", "del", &addr.to_string(), "dev", iface]))
    }

    fn add_route(
        &self,
        runner: &dyn CommandRunner,
        iface: &str,
        route: IpNet,
        _gateway: Option<IpAddr>,
    ) -> Result<()> {
        run(
            runner,
            argv(["ip", "route", "add", &route.trunc().to_string(), "dev", iface]),
        )
    }

    fn del_route(&self, runner: &dyn CommandRunner, iface: &str, route: IpNet) -> Result<()> {
        run(
            runner,
            argv(["ip", "route", "del", &route.trunc().to_string(), "dev", iface]),
        )
    }

    fn cleanup(&self, runner: &dyn CommandRunner, iface: &str) {
        run_logged(runner, argv(["ip", "addr", "flush", "dev", iface]));
        run_logged(runner, argv(["ip", "link", "set", "dev", iface, "down"]));
        // A kernel-created tun device goes away with its owner; this only
        // matters for one left behind by a crashed run.
        run_logged(runner, argv(["ip", "link", "del", "dev", iface]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::recorder::Recorder;

    #[test]
    fn test_iproute2_argv() {
        let runner = Recorder::default();
        let addr: IpNet = "100.64.0.1/32".parse().unwrap();
        let route: IpNet = "fd7a::9/48".parse().unwrap();

        LinuxBackend.link_up(&runner, "meshlink0").unwrap();
        LinuxBackend.add_addr(&runner, "meshlink0", addr).unwrap();
        LinuxBackend.add_route(&runner, "meshlink0", route, None).unwrap();
        LinuxBackend.del_route(&runner, "meshlink0", route).unwrap();
        LinuxBackend.del_addr(&runner, "meshlink0", addr).unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "ip link set dev meshlink0 up",
                "ip addr add 100.64.0.1/32 dev meshlink0",
                "ip route add fd7a::/48 dev meshlink0",
                "ip route del fd7a::/48 dev meshlink0",
                "ip addr del 100.64.0.1/32 dev meshlink0",
            ]
        );
    }

    #[test]
    fn test_cleanup() {
        let runner = Recorder::failing(&["ip addr flush"]);
        LinuxBackend.cleanup(&runner, "meshlink0");
        assert_eq!(
            runner.calls(),
            vec![
                "ip addr flush dev meshlink0",
                "ip link set dev meshlink0 down",
                "ip link del dev meshlink0",
            ]
        );
    }

    #[test]
    fn test_cleanup_deletes_link_when_earlier_steps_fail() {
        let runner = Recorder::failing(&["ip addr", "ip link set"]);
        LinuxBackend.cleanup(&runner, "meshlink0");
        assert_eq!(runner.calls().last().map(String::as_str), Some("ip link del dev meshlink0"));
    }
}
