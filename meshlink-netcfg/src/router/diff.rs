//! Set differences between applied and desired state

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnet::IpNet;

/// Operations needed to move from one set to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// In the current set but not the desired one
    pub to_remove: Vec<T>,
    /// In the desired set but not the current one
    pub to_add: Vec<T>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Compute `current \ desired` and `desired \ current` by exact equality
///
/// Prefixes are compared as values: `10.0.0.1/24` and `10.0.0.1/32` are
/// distinct, and overlap is never considered.
pub fn diff<T: Ord + Clone>(current: &BTreeSet<T>, desired: &BTreeSet<T>) -> Diff<T> {
    Diff {
        to_remove: current.difference(desired).cloned().collect(),
        to_add: desired.difference(current).cloned().collect(),
    }
}

/// Local addresses usable as a route next hop, one per family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gateways {
    pub v4: Option<IpAddr>,
    pub v6: Option<IpAddr>,
}

impl Gateways {
    /// The gateway of the same family as `route`
    pub fn for_route(&self, route: &IpNet) -> Option<IpAddr> {
        match route {
            IpNet::V4(_) => self.v4,
            IpNet::V6(_) => self.v6,
        }
    }
}

/// Pick the first IPv4 and first IPv6 address, in declaration order
pub fn select_gateways(local_addrs: &[IpNet]) -> Gateways {
    let mut gateways = Gateways::default();
    for addr in local_addrs {
        match addr {
            IpNet::V4(_) if gateways.v4.is_none() => gateways.v4 = Some(addr.addr()),
            IpNet::V6(_) if gateways.v6.is_none() => gateways.v6 = Some(addr.addr()),
            _ => {}
        }
    }
    gateways
}
