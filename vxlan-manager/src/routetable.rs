// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The route table seam.
//!
//! A [`RouteTable`] owns the kernel programming of the routes (and FDB / neighbor entries) of
//! the devices it is responsible for.  The manager only ever hands it the complete desired state
//! of a device; computing and applying the delta is the table's business.

use ipnet::Ipv4Net;
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// A layer 3 route.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Route {
    /// The destination
    pub dst: Ipv4Net,
    /// The next hop
    pub gw: Ipv4Addr,
    /// The outgoing device
    pub device: InterfaceName,
}

/// A layer 2 forwarding target of the overlay device: frames for `mac` are encapsulated
/// towards `parent_addr`, and `tunnel_addr` resolves to `mac`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct L2Target {
    /// The MAC address of the remote vxlan device
    pub mac: Mac,
    /// The overlay address of the remote vxlan device
    pub tunnel_addr: Ipv4Addr,
    /// The underlay address of the remote node
    pub parent_addr: Ipv4Addr,
}

/// A route table.  Every call replaces the full desired state of one device.
pub trait RouteTable: Send {
    /// Replace the layer 3 routes of `device`.
    fn set_routes(&mut self, device: &InterfaceName, routes: Vec<Route>);

    /// Replace the layer 2 targets of `device`.
    fn set_l2_routes(&mut self, device: &InterfaceName, targets: Vec<L2Target>);
}

/// IP version handled by a route table.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

/// Parameters of the route table of the parent interface.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ParentRouteTableParams {
    /// Name prefixes of the interfaces owned by the table
    pub interface_prefixes: Vec<String>,
    /// IP version of the table
    pub ip_version: IpVersion,
    /// Whether the table programs vxlan (FDB) entries
    pub vxlan: bool,
    /// Upper bound of every kernel request
    pub netlink_timeout: Duration,
    /// Preferred source address of the routes
    pub device_route_source_address: Option<IpAddr>,
    /// Protocol of the routes
    pub device_route_protocol: u8,
    /// Whether routes not owned by the table are removed
    pub remove_external_routes: bool,
}

/// Constructs the route table of the parent interface once it is known.
pub trait RouteTableFactory: Send {
    /// Create a new parent route table.
    fn new_parent_route_table(&mut self, params: ParentRouteTableParams) -> Box<dyn RouteTable>;
}

impl<F> RouteTableFactory for F
where
    F: FnMut(ParentRouteTableParams) -> Box<dyn RouteTable> + Send,
{
    fn new_parent_route_table(&mut self, params: ParentRouteTableParams) -> Box<dyn RouteTable> {
        self(params)
    }
}
