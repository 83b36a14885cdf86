//! Integration tests for meshlink-netcfg
//!
//! These tests drive the router, the DNS manager and the direct resolv.conf
//! backend together against a temporary directory, with external tools
//! replaced by a scripted runner.

use std::collections::BTreeSet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ipnet::IpNet;
use meshlink_netcfg::dns::{self, DirectBackend, DnsBackend, Fqdn, ManagerConfig, ResolvPaths};
use meshlink_netcfg::router::{self, SunosBackend, UserspaceRouter};
use meshlink_netcfg::{CommandRunner, Error, Result, Router};

/// Records every command and fails those starting with a configured prefix
///
/// When `strict`, it also behaves like the real tools in refusing to create
/// an address object or route that already exists, or to delete one that
/// does not.
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    strict: bool,
    objects: Mutex<BTreeSet<String>>,
}

impl ScriptedRunner {
    fn new() -> Arc<Self> {
        let runner = Self::default();
        // No resolver daemon in the sandbox.
        runner.fail_on("systemctl");
        Arc::new(runner)
    }

    fn strict() -> Arc<Self> {
        let runner = Self {
            strict: true,
            ..Default::default()
        };
        runner.fail_on("systemctl");
        Arc::new(runner)
    }

    fn fail_on(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_string());
    }

    fn clear_failures(&self) {
        self.failing.lock().unwrap().retain(|p| p == "systemctl");
    }

    /// Commands issued so far, excluding resolver service checks
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
            .into_iter()
            .filter(|c| !c.starts_with("systemctl"))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, argv: &[String]) -> Result<String> {
        let line = argv.join(" ");
        self.calls.lock().unwrap().push(line.clone());
        let fails = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|p| line.starts_with(p.as_str()));
        if fails {
            return Err(Error::Command {
                command: line,
                code: Some(1),
                output: "scripted failure\n".into(),
            });
        }

        if !self.strict {
            return Ok(String::new());
        }

        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        let change = match args.as_slice() {
            ["ipadm", "create-addr", .., obj] => Some((true, obj.to_string())),
            ["ipadm", "delete-addr", obj] => Some((false, obj.to_string())),
            ["route", "-q", "-n", "add", _, net, ..] => Some((true, format!("route {}", net))),
            ["route", "-q", "-n", "delete", _, net, ..] => Some((false, format!("route {}", net))),
            _ => None,
        };
        if let Some((create, key)) = change {
            let mut objects = self.objects.lock().unwrap();
            let ok = if create {
                objects.insert(key)
            } else {
                objects.remove(&key)
            };
            if !ok {
                return Err(Error::Command {
                    command: line,
                    code: Some(1),
                    output: "object already exists or not found\n".into(),
                });
            }
        }
        Ok(String::new())
    }
}

fn manager(dir: &Path, runner: Arc<ScriptedRunner>) -> dns::Manager {
    let mconfig = ManagerConfig::new("meshlink0", runner).with_paths(ResolvPaths::in_dir(dir));
    dns::Manager::with_factory(
        mconfig,
        Box::new(|mconfig: &ManagerConfig| {
            Box::new(DirectBackend::new(mconfig.paths.clone(), mconfig.runner.clone()))
                as Box<dyn DnsBackend>
        }),
    )
}

fn router(dir: &Path) -> (UserspaceRouter, Arc<ScriptedRunner>) {
    router_with(dir, ScriptedRunner::new())
}

fn router_with(dir: &Path, runner: Arc<ScriptedRunner>) -> (UserspaceRouter, Arc<ScriptedRunner>) {
    let dns = manager(dir, runner.clone());
    let router = UserspaceRouter::new("meshlink0", Box::new(SunosBackend), runner.clone(), dns);
    (router, runner)
}

fn dns_config(nameservers: &[&str], search: &[&str]) -> dns::Config {
    dns::Config {
        nameservers: nameservers.iter().map(|s| s.parse().unwrap()).collect(),
        search_domains: search.iter().map(|s| Fqdn::new(s).unwrap()).collect(),
        per_domain: false,
    }
}

fn net_config(addrs: &[&str], routes: &[&str], dns: dns::Config) -> router::Config {
    router::Config {
        local_addrs: addrs.iter().map(|s| s.parse().unwrap()).collect(),
        routes: routes.iter().map(|s| s.parse().unwrap()).collect(),
        dns,
    }
}

/// On a host without resolv.conf, our file is created without a backup and
/// removed again when DNS is cleared
#[test]
fn test_fresh_host_file_created_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    let manager = manager(dir.path(), ScriptedRunner::new());

    manager
        .set(dns_config(&["100.100.100.100"], &["corp.example"]))
        .unwrap();

    let written = fs::read_to_string(&paths.resolv_conf).unwrap();
    assert!(written.contains("generated by meshlink"));
    assert!(written.contains("nameserver 100.100.100.100\n"));
    assert!(written.contains("search corp.example\n"));
    assert!(!paths.backup.exists());

    manager.set(dns::Config::default()).unwrap();
    assert!(!paths.resolv_conf.exists());
    assert!(!paths.backup.exists());
}

/// The host's own resolv.conf comes back byte for byte
#[test]
fn test_foreign_file_restored_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    let original = "# managed by hand\nnameserver 8.8.8.8\n\noptions edns0  \n";
    fs::write(&paths.resolv_conf, original).unwrap();

    let manager = manager(dir.path(), ScriptedRunner::new());
    manager.set(dns_config(&["100.100.100.100"], &[])).unwrap();

    assert_eq!(fs::read_to_string(&paths.backup).unwrap(), original);
    assert_eq!(
        manager.base_config().unwrap().nameservers,
        vec!["8.8.8.8".parse::<IpAddr>().unwrap()]
    );

    manager.set(dns::Config::default()).unwrap();
    assert_eq!(fs::read_to_string(&paths.resolv_conf).unwrap(), original);
    assert!(!paths.backup.exists());
}

/// The generated file reads back as the config that produced it
#[test]
fn test_generated_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    let manager = manager(dir.path(), ScriptedRunner::new());
    let config = dns_config(&["100.100.100.100", "fd7a::53"], &["a.example", "b.example."]);

    manager.set(config.clone()).unwrap();

    let read = dns::resolv::read_resolv_file(&paths.resolv_conf).unwrap();
    assert_eq!(read, config.to_os_config());
}

/// Tearing down and reapplying the same config leaves the same state
#[test]
fn test_teardown_then_reapply() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    fs::write(&paths.resolv_conf, "nameserver 8.8.8.8\n").unwrap();

    let manager = manager(dir.path(), ScriptedRunner::new());
    let config = dns_config(&["100.100.100.100"], &["corp.example"]);

    manager.set(config.clone()).unwrap();
    let first = fs::read(&paths.resolv_conf).unwrap();

    manager.down().unwrap();
    assert_eq!(fs::read_to_string(&paths.resolv_conf).unwrap(), "nameserver 8.8.8.8\n");

    manager.up().unwrap();
    assert_eq!(fs::read(&paths.resolv_conf).unwrap(), first);
    assert_eq!(fs::read_to_string(&paths.backup).unwrap(), "nameserver 8.8.8.8\n");
}

/// Replacing the only address issues exactly one removal then one addition
#[test]
fn test_router_replaces_address() {
    let dir = tempfile::tempdir().unwrap();
    let (mut router, runner) = router_with(dir.path(), ScriptedRunner::strict());

    router
        .set(Some(&net_config(&["10.0.0.1/32"], &[], dns::Config::default())))
        .unwrap();
    assert_eq!(
        runner.take(),
        vec!["ipadm create-addr -t -T static -a local=10.0.0.1/32,remote=10.0.0.1 meshlink0/meshlinkinet0b2d7c67"]
    );

    router
        .set(Some(&net_config(&["10.0.0.2/32"], &[], dns::Config::default())))
        .unwrap();
    assert_eq!(
        runner.take(),
        vec![
            "ipadm delete-addr meshlink0/meshlinkinet0b2d7c67",
            "ipadm create-addr -t -T static -a local=10.0.0.2/32,remote=10.0.0.2 meshlink0/meshlinkinet7247e76c",
        ]
    );
    let applied: Vec<IpNet> = router.local_addrs().iter().copied().collect();
    assert_eq!(applied, vec!["10.0.0.2/32".parse::<IpNet>().unwrap()]);
}

/// Applying the same config twice changes nothing the second time
#[test]
fn test_router_set_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    let (mut router, runner) = router_with(dir.path(), ScriptedRunner::strict());
    let config = net_config(
        &["100.64.0.1/32", "fd7a::1/128"],
        &["100.64.0.0/10", "fd7a::/48"],
        dns_config(&["100.100.100.100"], &[]),
    );

    router.set(Some(&config)).unwrap();
    assert_eq!(runner.take().len(), 4);
    let written = fs::read(&paths.resolv_conf).unwrap();

    router.set(Some(&config)).unwrap();
    assert!(runner.take().is_empty());
    assert_eq!(fs::read(&paths.resolv_conf).unwrap(), written);
}

/// A failed route leaves DNS untouched until a retry succeeds
#[test]
fn test_route_failure_gates_dns() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    fs::write(&paths.resolv_conf, "nameserver 8.8.8.8\n").unwrap();

    let (mut router, runner) = router(dir.path());
    runner.fail_on("route -q -n add");
    let config = net_config(
        &["100.64.0.1/32"],
        &["100.64.0.0/10"],
        dns_config(&["100.100.100.100"], &[]),
    );

    let err = router.set(Some(&config)).unwrap_err();
    assert!(matches!(err, Error::Command { .. }));
    assert_eq!(fs::read_to_string(&paths.resolv_conf).unwrap(), "nameserver 8.8.8.8\n");
    assert!(router.local_addrs().is_empty());

    runner.clear_failures();
    runner.take();
    router.set(Some(&config)).unwrap();

    // The address add is repeated because the failed batch was not committed.
    assert_eq!(runner.take().len(), 2);
    assert!(fs::read_to_string(&paths.resolv_conf)
        .unwrap()
        .contains("nameserver 100.100.100.100"));
}

/// Shutdown removes everything applied, restores DNS and cleans the interface
#[test]
fn test_shutdown_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    fs::write(&paths.resolv_conf, "nameserver 8.8.8.8\n").unwrap();

    let (mut router, runner) = router_with(dir.path(), ScriptedRunner::strict());
    router.up().unwrap();
    router
        .set(Some(&net_config(
            &["100.64.0.1/32"],
            &["100.64.0.0/10"],
            dns_config(&["100.100.100.100"], &[]),
        )))
        .unwrap();
    runner.take();

    router.set(None).unwrap();
    assert_eq!(
        runner.take(),
        vec![
            "ipadm delete-addr meshlink0/meshlinkinet05e25b51",
            "route -q -n delete -inet 100.64.0.0/10 -iface meshlink0",
        ]
    );
    assert_eq!(fs::read_to_string(&paths.resolv_conf).unwrap(), "nameserver 8.8.8.8\n");

    router.close().unwrap();
    let calls = runner.take();
    assert_eq!(calls.first().map(String::as_str), Some("ipadm show-addr -p -o addrobj"));
    assert!(calls.contains(&"ifconfig meshlink0 unplumb".to_string()));
    assert_eq!(fs::read_to_string(&paths.resolv_conf).unwrap(), "nameserver 8.8.8.8\n");
}

/// Several addresses of one family each get their own address object
#[test]
fn test_router_multiple_addresses_same_family() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    let (mut router, runner) = router_with(dir.path(), ScriptedRunner::strict());
    let config = net_config(
        &["100.64.0.1/32", "100.64.0.2/32"],
        &[],
        dns_config(&["100.100.100.100"], &[]),
    );

    router.set(Some(&config)).unwrap();
    assert_eq!(router.local_addrs().len(), 2);
    assert!(paths.resolv_conf.exists());

    router
        .set(Some(&net_config(&["100.64.0.2/32"], &[], config.dns.clone())))
        .unwrap();
    assert_eq!(
        runner.take().last().map(String::as_str),
        Some("ipadm delete-addr meshlink0/meshlinkinet05e25b51")
    );
}

/// Routes naming the same network in two spellings are installed once
#[test]
fn test_router_routes_equal_after_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let (mut router, runner) = router_with(dir.path(), ScriptedRunner::strict());
    let config = net_config(
        &["10.0.0.1/32"],
        &["10.0.0.0/8", "10.1.2.3/8"],
        dns::Config::default(),
    );

    router.set(Some(&config)).unwrap();
    router.set(Some(&config)).unwrap();

    let adds: Vec<String> = runner
        .take()
        .into_iter()
        .filter(|c| c.starts_with("route -q -n add"))
        .collect();
    assert_eq!(adds, vec!["route -q -n add -inet 10.0.0.0/8 -ifp meshlink0 10.0.0.1 -iface"]);
}

/// A spurious `ifconfig up` failure on illumos does not fail bring-up
#[test]
fn test_sunos_up_failure_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (mut router, runner) = router(dir.path());
    runner.fail_on("ifconfig meshlink0 up");
    assert!(router.up().is_ok());
}

/// Closing a backend that never came up is harmless
#[test]
fn test_close_without_up() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ResolvPaths::in_dir(dir.path());
    fs::write(&paths.resolv_conf, "nameserver 8.8.8.8\n").unwrap();

    let mut backend = DirectBackend::new(paths.clone(), ScriptedRunner::new());
    backend.close().unwrap();
    backend.close().unwrap();
    assert_eq!(fs::read_to_string(&paths.resolv_conf).unwrap(), "nameserver 8.8.8.8\n");
}
