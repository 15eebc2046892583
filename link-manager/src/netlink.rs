// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::address::interface_address;
use crate::{IpFamily, Link, LinkDataplane, LinkError, VxlanLinkSpec};
use async_trait::async_trait;
use futures::TryStreamExt;
use ipnet::IpNet;
use net::interface::InterfaceName;
use rtnetlink::packet_route::address::AddressMessage;
use rtnetlink::packet_route::link::{InfoData, InfoVxlan, LinkAttribute};
use rtnetlink::{Handle, LinkUnspec, LinkVxlan};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// [`LinkDataplane`] backed by an rtnetlink [`Handle`].
///
/// Every request is bounded by the configured netlink timeout; expiry is reported as
/// [`LinkError::Timeout`].
#[derive(Clone, Debug)]
pub struct NetlinkDataplane {
    handle: Arc<Handle>,
    timeout: Duration,
}

impl NetlinkDataplane {
    /// Create a new `NetlinkDataplane` from an [`Arc<Handle>`].
    #[must_use]
    pub fn new(handle: Arc<Handle>, timeout: Duration) -> Self {
        NetlinkDataplane { handle, timeout }
    }

    /// Open a netlink socket and spawn its connection task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Kernel`] if the netlink socket can't be opened.
    ///
    /// # Panics
    ///
    /// If called outside of a tokio runtime.
    pub fn connect(timeout: Duration) -> Result<Self, LinkError> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| LinkError::Kernel {
            errno: None,
            message: format!("failed to open netlink socket: {e}"),
        })?;
        tokio::spawn(connection);
        Ok(Self::new(Arc::new(handle), timeout))
    }

    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, rtnetlink::Error>>,
    ) -> Result<T, LinkError> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(LinkError::from),
            Err(_) => Err(LinkError::Timeout(self.timeout)),
        }
    }

    async fn address_messages(&self, link: &Link) -> Result<Vec<AddressMessage>, LinkError> {
        self.bounded(
            self.handle
                .address()
                .get()
                .set_link_index_filter(link.index.to_u32())
                .execute()
                .try_collect::<Vec<_>>(),
        )
        .await
    }
}

#[async_trait]
impl LinkDataplane for NetlinkDataplane {
    async fn link_by_name(&self, name: &InterfaceName) -> Result<Link, LinkError> {
        let mut request = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        let message = self
            .bounded(request.try_next())
            .await?
            .ok_or_else(|| LinkError::NotFound(format!("link {name}")))?;
        Link::try_from(&message)
    }

    async fn link_list(&self) -> Result<Vec<Link>, LinkError> {
        let messages = self
            .bounded(self.handle.link().get().execute().try_collect::<Vec<_>>())
            .await?;
        Ok(messages
            .iter()
            .filter_map(|message| match Link::try_from(message) {
                Ok(link) => Some(link),
                Err(err) => {
                    debug!("skipping link: {err}");
                    None
                }
            })
            .collect())
    }

    async fn link_add(&self, spec: &VxlanLinkSpec) -> Result<(), LinkError> {
        let mut message = LinkVxlan::new(spec.name.as_ref(), spec.vni.as_u32())
            .set_info_data(InfoData::Vxlan(vec![
                InfoVxlan::Id(spec.vni.as_u32()),
                InfoVxlan::Port(spec.port),
                InfoVxlan::Local(spec.local),
            ]))
            .build();
        message
            .attributes
            .push(LinkAttribute::Address(spec.mac.0.to_vec()));
        info!(
            "creating vxlan device {} (vni {}, port {}, local {}, mac {})",
            spec.name, spec.vni, spec.port, spec.local, spec.mac
        );
        self.bounded(self.handle.link().add(message).execute())
            .await
    }

    async fn link_del(&self, link: &Link) -> Result<(), LinkError> {
        info!("deleting link {} ({})", link.name, link.index);
        self.bounded(self.handle.link().del(link.index.to_u32()).execute())
            .await
    }

    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), LinkError> {
        self.bounded(
            self.handle
                .link()
                .set(
                    LinkUnspec::new_with_index(link.index.to_u32())
                        .mtu(mtu)
                        .build(),
                )
                .execute(),
        )
        .await
    }

    async fn link_set_up(&self, link: &Link) -> Result<(), LinkError> {
        self.bounded(
            self.handle
                .link()
                .set(LinkUnspec::new_with_index(link.index.to_u32()).up().build())
                .execute(),
        )
        .await
    }

    async fn addr_list(&self, link: &Link, family: IpFamily) -> Result<Vec<IpNet>, LinkError> {
        let messages = self.address_messages(link).await?;
        Ok(messages
            .iter()
            .filter_map(|message| match interface_address(message) {
                Ok(addr) => Some(addr),
                Err(err) => {
                    warn!("skipping address of {}: {err}", link.name);
                    None
                }
            })
            .filter(|addr| family.contains(addr))
            .collect())
    }

    async fn addr_add(&self, link: &Link, addr: IpNet) -> Result<(), LinkError> {
        self.bounded(
            self.handle
                .address()
                .add(link.index.to_u32(), addr.addr(), addr.prefix_len())
                .execute(),
        )
        .await
    }

    async fn addr_del(&self, link: &Link, addr: IpNet) -> Result<(), LinkError> {
        let message = self
            .address_messages(link)
            .await?
            .into_iter()
            .find(|message| interface_address(message).is_ok_and(|found| found == addr))
            .ok_or_else(|| LinkError::NotFound(format!("address {addr} on {}", link.name)))?;
        self.bounded(self.handle.address().del(message).execute())
            .await
    }
}
