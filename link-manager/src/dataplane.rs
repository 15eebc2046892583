// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{IpFamily, Link, LinkError, VxlanLinkSpec};
use async_trait::async_trait;
use ipnet::IpNet;
use net::interface::InterfaceName;

/// The link and address operations the overlay agent performs against the kernel.
///
/// Every operation reports a structured [`LinkError`]; in particular a missing link is always
/// reported as [`LinkError::NotFound`] so callers can distinguish it from transient failures.
#[async_trait]
pub trait LinkDataplane: Send + Sync {
    /// Look up a link by name.
    async fn link_by_name(&self, name: &InterfaceName) -> Result<Link, LinkError>;

    /// List every link of the network namespace.
    async fn link_list(&self) -> Result<Vec<Link>, LinkError>;

    /// Create a vxlan device.
    async fn link_add(&self, spec: &VxlanLinkSpec) -> Result<(), LinkError>;

    /// Delete a link.
    async fn link_del(&self, link: &Link) -> Result<(), LinkError>;

    /// Set the MTU of a link.
    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), LinkError>;

    /// Set a link administratively up.
    async fn link_set_up(&self, link: &Link) -> Result<(), LinkError>;

    /// List the addresses of one family assigned to a link.
    async fn addr_list(&self, link: &Link, family: IpFamily) -> Result<Vec<IpNet>, LinkError>;

    /// Assign an address to a link.
    async fn addr_add(&self, link: &Link, addr: IpNet) -> Result<(), LinkError>;

    /// Remove an address from a link.
    async fn addr_del(&self, link: &Link, addr: IpNet) -> Result<(), LinkError>;
}
