// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory implementations of the manager's collaborators, for tests.

#![allow(clippy::missing_panics_doc, clippy::panic)]

use crate::ipsets::{IpSetMetadata, IpSets};
use crate::routetable::{L2Target, ParentRouteTableParams, Route, RouteTable, RouteTableFactory};
use async_trait::async_trait;
use ipnet::IpNet;
use link_manager::{
    IpFamily, Link, LinkDataplane, LinkError, LinkKind, VxlanAttrs, VxlanLinkSpec,
};
use net::interface::{AdminState, InterfaceIndex, InterfaceName};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct RouteTableState {
    routes: HashMap<InterfaceName, Vec<Route>>,
    l2: HashMap<InterfaceName, Vec<L2Target>>,
    route_pushes: usize,
    l2_pushes: usize,
}

/// A [`RouteTable`] remembering the last state pushed for each device.  Clones share state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRouteTable {
    state: Arc<Mutex<RouteTableState>>,
}

impl InMemoryRouteTable {
    /// The last routes pushed for `device`, `None` if none were ever pushed.
    #[must_use]
    pub fn routes(&self, device: &str) -> Option<Vec<Route>> {
        lock(&self.state)
            .routes
            .iter()
            .find(|(name, _)| name.as_ref() == device)
            .map(|(_, routes)| routes.clone())
    }

    /// The last layer 2 targets pushed for `device`, `None` if none were ever pushed.
    #[must_use]
    pub fn l2_targets(&self, device: &str) -> Option<Vec<L2Target>> {
        lock(&self.state)
            .l2
            .iter()
            .find(|(name, _)| name.as_ref() == device)
            .map(|(_, targets)| targets.clone())
    }

    /// Number of `set_routes` calls so far.
    #[must_use]
    pub fn route_pushes(&self) -> usize {
        lock(&self.state).route_pushes
    }

    /// Number of `set_l2_routes` calls so far.
    #[must_use]
    pub fn l2_pushes(&self) -> usize {
        lock(&self.state).l2_pushes
    }
}

impl RouteTable for InMemoryRouteTable {
    fn set_routes(&mut self, device: &InterfaceName, routes: Vec<Route>) {
        let mut state = lock(&self.state);
        state.route_pushes += 1;
        state.routes.insert(device.clone(), routes);
    }

    fn set_l2_routes(&mut self, device: &InterfaceName, targets: Vec<L2Target>) {
        let mut state = lock(&self.state);
        state.l2_pushes += 1;
        state.l2.insert(device.clone(), targets);
    }
}

/// An [`IpSets`] remembering the members of each set.  Clones share state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryIpSets {
    sets: Arc<Mutex<BTreeMap<String, (IpSetMetadata, Vec<String>)>>>,
    replacements: Arc<Mutex<usize>>,
}

impl InMemoryIpSets {
    /// The metadata and members of a set.
    #[must_use]
    pub fn members(&self, set_id: &str) -> Option<(IpSetMetadata, Vec<String>)> {
        lock(&self.sets).get(set_id).cloned()
    }

    /// Number of `replace_members` calls so far.
    #[must_use]
    pub fn replacements(&self) -> usize {
        *lock(&self.replacements)
    }
}

impl IpSets for InMemoryIpSets {
    fn replace_members(&mut self, metadata: IpSetMetadata, members: Vec<String>) {
        *lock(&self.replacements) += 1;
        lock(&self.sets).insert(metadata.set_id.clone(), (metadata, members));
    }
}

/// A [`RouteTableFactory`] handing out clones of one [`InMemoryRouteTable`] and recording the
/// parameters it was called with.
#[derive(Clone, Debug, Default)]
pub struct RecordingFactory {
    table: InMemoryRouteTable,
    calls: Arc<Mutex<Vec<ParentRouteTableParams>>>,
}

impl RecordingFactory {
    /// The table handed out.
    #[must_use]
    pub fn table(&self) -> InMemoryRouteTable {
        self.table.clone()
    }

    /// The parameters of every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ParentRouteTableParams> {
        lock(&self.calls).clone()
    }
}

impl RouteTableFactory for RecordingFactory {
    fn new_parent_route_table(&mut self, params: ParentRouteTableParams) -> Box<dyn RouteTable> {
        lock(&self.calls).push(params);
        Box::new(self.table.clone())
    }
}

#[derive(Debug)]
struct MockLink {
    link: Link,
    addresses: Vec<IpNet>,
}

#[derive(Debug, Default)]
struct MockKernel {
    links: BTreeMap<InterfaceIndex, MockLink>,
    last_index: u32,
    link_creations: usize,
    fail_next: Option<LinkError>,
}

impl MockKernel {
    fn next_index(&mut self) -> InterfaceIndex {
        self.last_index += 1;
        InterfaceIndex::try_new(self.last_index).unwrap_or_else(|e| unreachable!("{e}"))
    }

    fn by_name(&mut self, name: &str) -> Option<&mut MockLink> {
        self.links.values_mut().find(|l| l.link.name.as_ref() == name)
    }

    fn by_index(&mut self, link: &Link) -> Result<&mut MockLink, LinkError> {
        self.links
            .get_mut(&link.index)
            .ok_or_else(|| LinkError::NotFound(format!("link {}", link.name)))
    }

    fn injected(&mut self) -> Result<(), LinkError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn eexist(what: String) -> LinkError {
    LinkError::Kernel {
        errno: None,
        message: format!("{what} already exists"),
    }
}

/// An in-memory [`LinkDataplane`].  Clones share the same kernel.
#[derive(Clone, Debug, Default)]
pub struct MockLinkDataplane {
    kernel: Arc<Mutex<MockKernel>>,
}

impl MockLinkDataplane {
    /// Start with a (non vxlan) link which is up and carries `addresses`.
    #[must_use]
    pub fn with_link(self, name: &str, addresses: &[&str]) -> Self {
        self.add_link(name, addresses);
        self
    }

    /// Add a (non vxlan) link which is up and carries `addresses`, behind the back of the
    /// manager.
    pub fn add_link(&self, name: &str, addresses: &[&str]) {
        let mut kernel = lock(&self.kernel);
        let index = kernel.next_index();
        let link = Link {
            index,
            name: InterfaceName::try_from(name).unwrap_or_else(|e| panic!("{e}")),
            mac: None,
            mtu: Some(1500),
            admin_state: AdminState::Up,
            kind: LinkKind::Other,
        };
        let addresses = addresses
            .iter()
            .map(|addr| addr.parse::<IpNet>().unwrap_or_else(|e| panic!("{addr}: {e}")))
            .collect();
        kernel.links.insert(index, MockLink { link, addresses });
    }

    /// A link, as currently known to the kernel.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<Link> {
        lock(&self.kernel).by_name(name).map(|l| l.link.clone())
    }

    /// The addresses of a link.
    #[must_use]
    pub fn addresses(&self, name: &str) -> Vec<IpNet> {
        lock(&self.kernel)
            .by_name(name)
            .map(|l| l.addresses.clone())
            .unwrap_or_default()
    }

    /// Delete a link behind the back of the manager.
    pub fn delete_link(&self, name: &str) {
        let mut kernel = lock(&self.kernel);
        kernel.links.retain(|_, l| l.link.name.as_ref() != name);
    }

    /// Add an address behind the back of the manager.
    pub fn add_address(&self, name: &str, addr: &str) {
        let addr: IpNet = addr.parse().unwrap_or_else(|e| panic!("{addr}: {e}"));
        if let Some(link) = lock(&self.kernel).by_name(name) {
            link.addresses.push(addr);
        }
    }

    /// Remove an address behind the back of the manager.
    pub fn delete_address(&self, name: &str, addr: &str) {
        let addr: IpNet = addr.parse().unwrap_or_else(|e| panic!("{addr}: {e}"));
        if let Some(link) = lock(&self.kernel).by_name(name) {
            link.addresses.retain(|a| *a != addr);
        }
    }

    /// Make the next operation fail with `err`.
    pub fn fail_next(&self, err: LinkError) {
        lock(&self.kernel).fail_next = Some(err);
    }

    /// Number of vxlan links created so far.
    #[must_use]
    pub fn link_creations(&self) -> usize {
        lock(&self.kernel).link_creations
    }
}

#[async_trait]
impl LinkDataplane for MockLinkDataplane {
    async fn link_by_name(&self, name: &InterfaceName) -> Result<Link, LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        kernel
            .by_name(name.as_ref())
            .map(|l| l.link.clone())
            .ok_or_else(|| LinkError::NotFound(format!("link {name}")))
    }

    async fn link_list(&self) -> Result<Vec<Link>, LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        Ok(kernel.links.values().map(|l| l.link.clone()).collect())
    }

    async fn link_add(&self, spec: &VxlanLinkSpec) -> Result<(), LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        if kernel.by_name(spec.name.as_ref()).is_some() {
            return Err(eexist(format!("link {}", spec.name)));
        }
        let index = kernel.next_index();
        let link = Link {
            index,
            name: spec.name.clone(),
            mac: Some(spec.mac),
            mtu: Some(1450),
            admin_state: AdminState::Down,
            kind: LinkKind::Vxlan(VxlanAttrs {
                vni: Some(spec.vni),
                port: Some(spec.port),
                local: Some(spec.local),
            }),
        };
        kernel.link_creations += 1;
        kernel.links.insert(
            index,
            MockLink {
                link,
                addresses: vec![],
            },
        );
        Ok(())
    }

    async fn link_del(&self, link: &Link) -> Result<(), LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        kernel
            .links
            .remove(&link.index)
            .map(|_| ())
            .ok_or_else(|| LinkError::NotFound(format!("link {}", link.name)))
    }

    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        kernel.by_index(link)?.link.mtu = Some(mtu);
        Ok(())
    }

    async fn link_set_up(&self, link: &Link) -> Result<(), LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        kernel.by_index(link)?.link.admin_state = AdminState::Up;
        Ok(())
    }

    async fn addr_list(&self, link: &Link, family: IpFamily) -> Result<Vec<IpNet>, LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        Ok(kernel
            .by_index(link)?
            .addresses
            .iter()
            .filter(|addr| family.contains(addr))
            .copied()
            .collect())
    }

    async fn addr_add(&self, link: &Link, addr: IpNet) -> Result<(), LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        let link = kernel.by_index(link)?;
        if link.addresses.contains(&addr) {
            return Err(eexist(format!("address {addr}")));
        }
        link.addresses.push(addr);
        Ok(())
    }

    async fn addr_del(&self, link: &Link, addr: IpNet) -> Result<(), LinkError> {
        let mut kernel = lock(&self.kernel);
        kernel.injected()?;
        let link = kernel.by_index(link)?;
        let before = link.addresses.len();
        link.addresses.retain(|a| *a != addr);
        if link.addresses.len() == before {
            return Err(LinkError::NotFound(format!("address {addr}")));
        }
        Ok(())
    }
}
