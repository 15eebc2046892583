// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconciliation of the overlay's vxlan device and discovery of its parent interface.

use crate::VxlanError;
use crate::vtep::Vtep;
use ipnet::{IpNet, Ipv4Net};
use link_manager::{IpFamily, Link, LinkDataplane, VxlanLinkSpec};
use net::interface::{InterfaceIndex, InterfaceName};
use net::vxlan::Vni;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to the vxlan link during a reconciliation.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum LinkChange {
    /// The link was already as desired (modulo MTU, admin state and addresses).
    Unchanged,
    /// The link did not exist and was created.
    Created,
    /// The link existed with the wrong attributes and was deleted and created again.
    Recreated,
}

impl LinkChange {
    /// True if the link is new, i.e. if it has lost any forwarding state it had.
    #[must_use]
    pub fn is_new(self) -> bool {
        self != LinkChange::Unchanged
    }
}

/// The physical interface carrying the overlay.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct ParentInterface {
    /// The name of the interface
    pub name: InterfaceName,
    /// The index of the interface
    pub index: InterfaceIndex,
    /// The local parent address, with the prefix length it is configured with
    pub address: Ipv4Net,
    /// Other interfaces owning the same address (normally none)
    pub other_candidates: Vec<InterfaceName>,
}

/// Drives the overlay device towards its desired state through a [`LinkDataplane`].
#[derive(Clone)]
pub struct DeviceReconciler {
    dataplane: Arc<dyn LinkDataplane>,
    device_name: InterfaceName,
    vni: Vni,
    port: u16,
}

impl DeviceReconciler {
    /// Create a reconciler for the device `device_name`.
    #[must_use]
    pub fn new(
        dataplane: Arc<dyn LinkDataplane>,
        device_name: InterfaceName,
        vni: Vni,
        port: u16,
    ) -> Self {
        Self {
            dataplane,
            device_name,
            vni,
            port,
        }
    }

    /// The name of the managed device.
    #[must_use]
    pub fn device_name(&self) -> &InterfaceName {
        &self.device_name
    }

    fn link_spec(&self, local: &Vtep) -> VxlanLinkSpec {
        VxlanLinkSpec {
            name: self.device_name.clone(),
            vni: self.vni,
            port: self.port,
            local: local.parent_addr,
            mac: local.mac,
        }
    }

    /// Make the vxlan device match the local [`Vtep`]: create or recreate it if needed, then
    /// set its MTU, bring it up and make the tunnel address its only IPv4 address.
    ///
    /// # Errors
    ///
    /// Returns [`VxlanError::KernelTransient`] or [`VxlanError::KernelFatal`] if a kernel
    /// operation fails.
    pub async fn configure(&self, mtu: u32, local: &Vtep) -> Result<LinkChange, VxlanError> {
        let spec = self.link_spec(local);
        let (link, change) = self.ensure_link(&spec).await?;
        if link.mtu != Some(mtu) {
            debug!("setting mtu of {} to {mtu}", link.name);
            self.dataplane.link_set_mtu(&link, mtu).await?;
        }
        if !link.is_up() {
            debug!("bringing {} up", link.name);
            self.dataplane.link_set_up(&link).await?;
        }
        self.ensure_tunnel_address(&link, local.tunnel_addr).await?;
        Ok(change)
    }

    async fn ensure_link(&self, spec: &VxlanLinkSpec) -> Result<(Link, LinkChange), VxlanError> {
        match self.dataplane.link_by_name(&spec.name).await {
            Ok(link) if spec == &link => Ok((link, LinkChange::Unchanged)),
            Ok(link) => {
                info!(
                    "{} does not match the desired vxlan device, recreating it",
                    link.name
                );
                self.dataplane.link_del(&link).await?;
                Ok((self.create(spec).await?, LinkChange::Recreated))
            }
            Err(err) if err.is_not_found() => {
                info!("vxlan device {} not found, creating it", spec.name);
                Ok((self.create(spec).await?, LinkChange::Created))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn create(&self, spec: &VxlanLinkSpec) -> Result<Link, VxlanError> {
        self.dataplane.link_add(spec).await?;
        Ok(self.dataplane.link_by_name(&spec.name).await?)
    }

    async fn ensure_tunnel_address(
        &self,
        link: &Link,
        tunnel_addr: Ipv4Addr,
    ) -> Result<(), VxlanError> {
        let desired = IpNet::V4(Ipv4Net::from(tunnel_addr));
        let current = self.dataplane.addr_list(link, IpFamily::V4).await?;
        for stray in current.iter().filter(|addr| **addr != desired) {
            info!("removing stray address {stray} from {}", link.name);
            self.dataplane.addr_del(link, *stray).await?;
        }
        if !current.contains(&desired) {
            debug!("assigning {desired} to {}", link.name);
            self.dataplane.addr_add(link, desired).await?;
        }
        Ok(())
    }

    /// Find the interface owning `parent_addr`.  The managed device itself is never a candidate.
    /// If several interfaces own the address, the one with the lowest index is selected.
    ///
    /// # Errors
    ///
    /// Returns [`VxlanError::ParentNotFound`] if no interface owns the address, or a kernel error.
    pub async fn resolve_parent(
        &self,
        parent_addr: Ipv4Addr,
    ) -> Result<ParentInterface, VxlanError> {
        let mut links = self.dataplane.link_list().await?;
        links.sort_by_key(|link| link.index);
        let mut candidates = Vec::new();
        for link in links.iter().filter(|link| link.name != self.device_name) {
            let addresses = match self.dataplane.addr_list(link, IpFamily::V4).await {
                Ok(addresses) => addresses,
                // the link went away while we were looking
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };
            let owned = addresses.into_iter().find_map(|addr| match addr {
                IpNet::V4(net) if net.addr() == parent_addr => Some(net),
                _ => None,
            });
            if let Some(address) = owned {
                candidates.push((link, address));
            }
        }
        let mut candidates = candidates.into_iter();
        let Some((link, address)) = candidates.next() else {
            return Err(VxlanError::ParentNotFound(parent_addr));
        };
        let other_candidates: Vec<_> = candidates.map(|(other, _)| other.name.clone()).collect();
        if !other_candidates.is_empty() {
            warn!(
                "parent address {parent_addr} is owned by several interfaces, using {} (also on {:?})",
                link.name, other_candidates
            );
        }
        Ok(ParentInterface {
            name: link.name.clone(),
            index: link.index,
            address,
            other_candidates,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::MockLinkDataplane;
    use link_manager::LinkError;
    use net::eth::mac::Mac;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn local() -> Vtep {
        Vtep {
            node: "node1".to_string(),
            mac: Mac([0x00, 0x0a, 0x74, 0x9d, 0x68, 0x16]),
            tunnel_addr: Ipv4Addr::new(10, 0, 0, 0),
            parent_addr: Ipv4Addr::new(172, 0, 0, 2),
        }
    }

    fn reconciler(kernel: &MockLinkDataplane) -> DeviceReconciler {
        DeviceReconciler::new(
            Arc::new(kernel.clone()),
            "vxlan.calico".try_into().unwrap(),
            Vni::new_checked(1).unwrap(),
            20,
        )
    }

    #[tokio::test]
    async fn creates_then_leaves_alone() {
        let kernel = MockLinkDataplane::default().with_link("eth0", &["172.0.0.2/16"]);
        let reconciler = reconciler(&kernel);
        assert_eq!(
            reconciler.configure(1410, &local()).await.unwrap(),
            LinkChange::Created
        );
        let link = kernel.link("vxlan.calico").unwrap();
        assert_eq!(link.mtu, Some(1410));
        assert!(link.is_up());
        assert_eq!(link.mac, Some(local().mac));
        assert_eq!(
            kernel.addresses("vxlan.calico"),
            vec!["10.0.0.0/32".parse::<IpNet>().unwrap()]
        );

        assert_eq!(
            reconciler.configure(1410, &local()).await.unwrap(),
            LinkChange::Unchanged
        );
        assert_eq!(kernel.link_creations(), 1);

        // mtu changes are applied in place
        assert_eq!(
            reconciler.configure(1400, &local()).await.unwrap(),
            LinkChange::Unchanged
        );
        assert_eq!(kernel.link("vxlan.calico").unwrap().mtu, Some(1400));
        assert_eq!(kernel.link_creations(), 1);
    }

    #[tokio::test]
    async fn mismatching_device_is_recreated() {
        let kernel = MockLinkDataplane::default().with_link("eth0", &["172.0.0.2/16"]);
        let reconciler = reconciler(&kernel);
        reconciler.configure(1410, &local()).await.unwrap();

        let mut moved = local();
        moved.parent_addr = Ipv4Addr::new(172, 0, 0, 3);
        assert_eq!(
            reconciler.configure(1410, &moved).await.unwrap(),
            LinkChange::Recreated
        );
        assert_eq!(kernel.link_creations(), 2);

        // a non vxlan link squatting the name is replaced too
        let kernel = MockLinkDataplane::default().with_link("vxlan.calico", &[]);
        assert_eq!(
            self::reconciler(&kernel).configure(1410, &local()).await.unwrap(),
            LinkChange::Recreated
        );
        assert!(kernel.link("vxlan.calico").unwrap().is_vxlan());
    }

    #[tokio::test]
    async fn tunnel_address_is_the_only_address() {
        let kernel = MockLinkDataplane::default();
        let reconciler = reconciler(&kernel);
        reconciler.configure(1410, &local()).await.unwrap();
        kernel.add_address("vxlan.calico", "10.9.9.9/24");
        reconciler.configure(1410, &local()).await.unwrap();
        assert_eq!(
            kernel.addresses("vxlan.calico"),
            vec!["10.0.0.0/32".parse::<IpNet>().unwrap()]
        );
    }

    #[tokio::test]
    async fn kernel_failures_are_reported() {
        let kernel = MockLinkDataplane::default();
        kernel.fail_next(LinkError::PermissionDenied("CAP_NET_ADMIN".into()));
        assert!(matches!(
            reconciler(&kernel).configure(1410, &local()).await,
            Err(VxlanError::KernelFatal(_))
        ));
        kernel.fail_next(LinkError::Timeout(std::time::Duration::from_secs(10)));
        assert!(matches!(
            reconciler(&kernel).configure(1410, &local()).await,
            Err(VxlanError::KernelTransient(_))
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn parent_resolution() {
        let kernel = MockLinkDataplane::default()
            .with_link("eth0", &["192.168.0.1/24"])
            .with_link("eth1", &["172.0.0.2/16", "fd00::2/64"])
            .with_link("eth2", &["172.0.0.2/24"]);
        let reconciler = reconciler(&kernel);
        reconciler.configure(1410, &local()).await.unwrap();

        let parent = reconciler
            .resolve_parent(Ipv4Addr::new(172, 0, 0, 2))
            .await
            .unwrap();
        assert_eq!(parent.name.as_ref(), "eth1");
        assert_eq!(parent.address, "172.0.0.2/16".parse::<Ipv4Net>().unwrap());
        assert_eq!(
            parent.other_candidates,
            vec![InterfaceName::try_from("eth2").unwrap()]
        );
        assert!(logs_contain("owned by several interfaces"));

        assert_eq!(
            reconciler.resolve_parent(Ipv4Addr::new(10, 0, 0, 0)).await,
            Err(VxlanError::ParentNotFound(Ipv4Addr::new(10, 0, 0, 0)))
        );
    }
}
