//! Router driving external network tools from userspace

use std::collections::BTreeSet;
use std::sync::Arc;

use ipnet::IpNet;

use super::diff::{diff, select_gateways};
use super::{Config, NetBackend, Router};
use crate::dns;
use crate::error::{Error, ErrorCollector, Result};
use crate::exec::CommandRunner;

/// Converges a tunnel interface through a [`NetBackend`]
///
/// The applied address and route sets are replaced only after a pass with
/// no failures. After a partial failure they keep their previous value, so
/// the next `set` with the same config recomputes the same pending work.
pub struct UserspaceRouter {
    tun_name: String,
    backend: Box<dyn NetBackend>,
    runner: Arc<dyn CommandRunner>,
    dns: dns::Manager,

    local: BTreeSet<IpNet>,
    routes: BTreeSet<IpNet>,
}

impl UserspaceRouter {
    pub fn new(
        tun_name: impl Into<String>,
        backend: Box<dyn NetBackend>,
        runner: Arc<dyn CommandRunner>,
        dns: dns::Manager,
    ) -> Self {
        let tun_name = tun_name.into();
        log::info!("router: {}: using {} backend", tun_name, backend.name());
        Self {
            tun_name,
            backend,
            runner,
            dns,
            local: BTreeSet::new(),
            routes: BTreeSet::new(),
        }
    }

    pub fn tun_name(&self) -> &str {
        &self.tun_name
    }

    /// Addresses applied by the last fully successful `set`
    pub fn local_addrs(&self) -> &BTreeSet<IpNet> {
        &self.local
    }

    /// Routes applied by the last fully successful `set`
    pub fn routes(&self) -> &BTreeSet<IpNet> {
        &self.routes
    }

    pub fn dns(&self) -> &dns::Manager {
        &self.dns
    }

    fn apply_addrs(&self, desired: &BTreeSet<IpNet>, errs: &mut ErrorCollector) {
        let runner = self.runner.as_ref();
        let d = diff(&self.local, desired);

        for addr in d.to_remove {
            let result = self.backend.del_addr(runner, &self.tun_name, addr);
            if let Err(ref e) = result {
                log::warn!("router: {}: addr del {} failed: {}", self.tun_name, addr, e);
            }
            errs.record(result);
        }
        for addr in d.to_add {
            let result = self.backend.add_addr(runner, &self.tun_name, addr);
            if let Err(ref e) = result {
                log::warn!("router: {}: addr add {} failed: {}", self.tun_name, addr, e);
            }
            errs.record(result);
        }
    }

    fn apply_routes(
        &self,
        config: &Config,
        desired: &BTreeSet<IpNet>,
        errs: &mut ErrorCollector,
    ) {
        let runner = self.runner.as_ref();
        let gateways = select_gateways(&config.local_addrs);
        let d = diff(&self.routes, desired);

        for route in d.to_remove {
            let result = self.backend.del_route(runner, &self.tun_name, route);
            if let Err(ref e) = result {
                log::warn!("router: {}: route del {} failed: {}", self.tun_name, route, e);
            }
            errs.record(result);
        }
        for route in d.to_add {
            let gateway = gateways.for_route(&route);
            let result = self.backend.add_route(runner, &self.tun_name, route, gateway);
            if let Err(ref e) = result {
                log::warn!("router: {}: route add {} failed: {}", self.tun_name, route, e);
            }
            errs.record(result);
        }
    }
}

impl Router for UserspaceRouter {
    fn up(&mut self) -> Result<()> {
        match self.backend.link_up(self.runner.as_ref(), &self.tun_name) {
            Ok(()) => Ok(()),
            Err(e) if !self.backend.up_failure_is_fatal() => {
                // ifconfig up reports failure on illumos even when it works.
                log::warn!("router: {}: link up failed, ignoring: {}", self.tun_name, e);
                Ok(())
            }
            Err(e) => {
                log::warn!("router: {}: link up failed: {}", self.tun_name, e);
                Err(e)
            }
        }
    }

    fn set(&mut self, config: Option<&Config>) -> Result<()> {
        let shutdown = Config::default();
        let config = config.unwrap_or(&shutdown);

        let desired_local: BTreeSet<IpNet> = config.local_addrs.iter().copied().collect();
        // Routes are installed by network address, so compare them that way.
        let desired_routes: BTreeSet<IpNet> = config.routes.iter().map(IpNet::trunc).collect();

        log::info!(
            "router: {}: set {} addrs, {} routes",
            self.tun_name,
            desired_local.len(),
            desired_routes.len()
        );

        let mut errs = ErrorCollector::new();
        self.apply_addrs(&desired_local, &mut errs);
        self.apply_routes(config, &desired_routes, &mut errs);

        if !errs.is_ok() {
            return errs.finish();
        }

        self.local = desired_local;
        self.routes = desired_routes;

        self.dns
            .set(config.dns.clone())
            .map_err(|e| Error::Dns(Box::new(e)))
    }

    fn close(&mut self) -> Result<()> {
        let result = self.dns.down();
        if let Err(ref e) = result {
            log::warn!("router: {}: dns down: {}", self.tun_name, e);
        }

        self.backend.cleanup(self.runner.as_ref(), &self.tun_name);
        self.local.clear();
        self.routes.clear();

        result.map_err(|e| Error::Dns(Box::new(e)))
    }
}
