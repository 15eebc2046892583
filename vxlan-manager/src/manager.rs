// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::config::Config;
use crate::desired::{self, ParentContext};
use crate::device::{DeviceReconciler, ParentInterface};
use crate::errors::{MalformedEvent, VxlanError};
use crate::events::{
    HostMetadataUpdate, RouteRemove, RouteUpdate, TunnelEndpointRemove, TunnelEndpointUpdate,
    VxlanEvent,
};
use crate::ipsets::{IpSetMetadata, IpSets};
use crate::resync::{DeviceEvent, ResyncHandle, ResyncLoop};
use crate::routes::{RouteIntent, RouteRegistry};
use crate::routetable::{IpVersion, ParentRouteTableParams, RouteTable, RouteTableFactory};
use crate::vtep::{Vtep, VtepRegistry};
use ipnet::Ipv4Net;
use link_manager::LinkDataplane;
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use net::ipv4::{parse_cidr, parse_host};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Lifecycle of a [`VxlanManager`].
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ManagerState {
    /// The local endpoint is unknown, or the device was not configured for it yet.
    AwaitingLocalVtep,
    /// The device is configured but its parent interface is unknown.
    DeviceReady,
    /// The parent interface is known; some work is pending.
    ParentResolved,
    /// The parent interface is known and every desired state was pushed.
    Steady,
    /// The manager was shut down.
    Shutdown,
}

/// Keeps a node's VXLAN overlay forwarding state in line with the cluster.
///
/// The manager is owned by a single thread which feeds it events ([`VxlanManager::on_update`])
/// and ticks it ([`VxlanManager::complete_deferred_work`]).  The only concurrent actor is the
/// optional resync task ([`VxlanManager::keep_vxlan_device_in_sync`]), which reports its
/// observations back through a channel drained at the start of each tick.
pub struct VxlanManager {
    config: Config,
    vteps: VtepRegistry,
    routes: RouteRegistry,
    host_subnet: Option<Ipv4Net>,

    route_table: Box<dyn RouteTable>,
    ip_sets: Box<dyn IpSets>,
    factory: Option<Box<dyn RouteTableFactory>>,
    no_encap_route_table: Option<Box<dyn RouteTable>>,

    reconciler: DeviceReconciler,
    device_ready: bool,
    parent: Option<ParentInterface>,
    stale_parent: Option<InterfaceName>,

    vteps_dirty: bool,
    routes_dirty: Arc<AtomicBool>,
    ip_sets_dirty: bool,

    local: watch::Sender<Option<Vtep>>,
    device_events_tx: mpsc::UnboundedSender<DeviceEvent>,
    device_events: mpsc::UnboundedReceiver<DeviceEvent>,
    resync: Option<ResyncHandle>,
    shut_down: bool,
}

impl VxlanManager {
    /// Create a manager.
    ///
    /// `route_table` programs the overlay device, `ip_sets` receives the external node CIDRs and
    /// `factory` is called once, when the parent interface is first resolved, to create the
    /// route table of the parent interface.
    pub fn new(
        config: Config,
        ip_sets: impl IpSets + 'static,
        route_table: impl RouteTable + 'static,
        dataplane: Arc<dyn LinkDataplane>,
        factory: impl RouteTableFactory + 'static,
    ) -> Self {
        let reconciler = DeviceReconciler::new(
            dataplane,
            config.device_name.clone(),
            config.vxlan_vni,
            config.vxlan_port,
        );
        let (local, _) = watch::channel(None);
        let (device_events_tx, device_events) = mpsc::unbounded_channel();
        Self {
            vteps: VtepRegistry::new(config.hostname.clone()),
            routes: RouteRegistry::default(),
            host_subnet: None,
            route_table: Box::new(route_table),
            ip_sets: Box::new(ip_sets),
            factory: Some(Box::new(factory)),
            no_encap_route_table: None,
            reconciler,
            device_ready: false,
            parent: None,
            stale_parent: None,
            // the first tick pushes the (possibly empty) full state
            vteps_dirty: true,
            routes_dirty: Arc::new(AtomicBool::new(true)),
            ip_sets_dirty: true,
            local,
            device_events_tx,
            device_events,
            resync: None,
            shut_down: false,
            config,
        }
    }

    /// The configuration of the manager.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The known tunnel endpoints.
    #[must_use]
    pub fn vteps(&self) -> &VtepRegistry {
        &self.vteps
    }

    /// The known route intents.
    #[must_use]
    pub fn routes(&self) -> &RouteRegistry {
        &self.routes
    }

    /// The local tunnel endpoint, if known.
    #[must_use]
    pub fn local_vtep(&self) -> Option<&Vtep> {
        self.vteps.local()
    }

    /// The resolved parent interface, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&ParentInterface> {
        self.parent.as_ref()
    }

    /// True if the layer 2 targets must be pushed on the next tick.
    #[must_use]
    pub fn vteps_dirty(&self) -> bool {
        self.vteps_dirty
    }

    /// True if the layer 3 routes must be pushed on the next tick.
    #[must_use]
    pub fn routes_dirty(&self) -> bool {
        self.routes_dirty.load(Ordering::SeqCst)
    }

    fn mark_routes_dirty(&self) {
        self.routes_dirty.store(true, Ordering::SeqCst);
    }

    /// The lifecycle state of the manager.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        if self.shut_down {
            ManagerState::Shutdown
        } else if self.local_vtep().is_none() || !self.device_ready {
            ManagerState::AwaitingLocalVtep
        } else if self.parent.is_none() || self.no_encap_route_table.is_none() {
            ManagerState::DeviceReady
        } else if self.vteps_dirty || self.ip_sets_dirty || self.routes_dirty() {
            ManagerState::ParentResolved
        } else {
            ManagerState::Steady
        }
    }

    /// Apply a cluster event.  Malformed events are logged and dropped.
    pub fn on_update(&mut self, event: impl Into<VxlanEvent>) {
        if let Err(err) = self.try_update(event) {
            warn!("dropping event: {err}");
        }
    }

    /// Apply a cluster event.
    ///
    /// # Errors
    ///
    /// Returns [`VxlanError::MalformedEvent`] if the event is rejected; the manager is then left
    /// unchanged.
    pub fn try_update(&mut self, event: impl Into<VxlanEvent>) -> Result<(), VxlanError> {
        Ok(self.apply(event.into())?)
    }

    fn apply(&mut self, event: VxlanEvent) -> Result<(), MalformedEvent> {
        match event {
            VxlanEvent::TunnelEndpointUpdate(update) => self.on_vtep_update(update),
            VxlanEvent::TunnelEndpointRemove(remove) => {
                self.on_vtep_remove(&remove);
                Ok(())
            }
            VxlanEvent::RouteUpdate(update) => self.on_route_update(update),
            VxlanEvent::RouteRemove(remove) => self.on_route_remove(&remove),
            VxlanEvent::HostMetadataUpdate(update) => self.on_host_metadata_update(&update),
        }
    }

    fn on_vtep_update(&mut self, update: TunnelEndpointUpdate) -> Result<(), MalformedEvent> {
        if update.node.is_empty() {
            return Err(MalformedEvent::EmptyNode);
        }
        let mac = Mac::try_from(update.mac.as_str()).map_err(|_| MalformedEvent::Mac {
            node: update.node.clone(),
            mac: update.mac.clone(),
        })?;
        let address = |what: &'static str, literal: &str| {
            parse_host(literal).map_err(|_| MalformedEvent::Address {
                node: update.node.clone(),
                what,
                addr: literal.to_string(),
            })
        };
        let tunnel_addr = address("tunnel address", &update.ipv4_addr)?;
        let parent_addr = address("parent address", &update.parent_device_ip)?;
        let vtep = Vtep {
            node: update.node,
            mac,
            tunnel_addr,
            parent_addr,
        };
        let is_local = vtep.node == self.vteps.hostname();
        debug!("vtep update: {vtep:?}");
        let previous = self.vteps.upsert(vtep.clone());
        self.vteps_dirty = true;
        self.mark_routes_dirty();
        if is_local && previous.as_ref() != Some(&vtep) {
            self.local_vtep_changed(Some(vtep));
        }
        Ok(())
    }

    fn on_vtep_remove(&mut self, remove: &TunnelEndpointRemove) {
        if self.vteps.remove(&remove.node).is_none() {
            debug!("no vtep for node {}, ignoring removal", remove.node);
            return;
        }
        self.vteps_dirty = true;
        self.mark_routes_dirty();
        if remove.node == self.vteps.hostname() {
            self.local_vtep_changed(None);
        }
    }

    /// The cached parent was resolved for the previous local endpoint.
    fn local_vtep_changed(&mut self, local: Option<Vtep>) {
        info!("local vtep is now {local:?}");
        self.device_ready = false;
        if let Some(parent) = self.parent.take() {
            self.stale_parent = Some(parent.name);
        }
        self.local.send_replace(local);
    }

    fn on_route_update(&mut self, update: RouteUpdate) -> Result<(), MalformedEvent> {
        if update.node.is_empty() {
            return Err(MalformedEvent::EmptyNode);
        }
        let dst = parse_cidr(&update.dst).map_err(|_| MalformedEvent::Destination {
            node: update.node.clone(),
            dst: update.dst.clone(),
        })?;
        let intent = RouteIntent {
            node: update.node,
            dst,
            gw: update.gw,
            route_type: update.route_type,
        };
        if self.routes.upsert(intent) {
            self.mark_routes_dirty();
        }
        Ok(())
    }

    fn on_route_remove(&mut self, remove: &RouteRemove) -> Result<(), MalformedEvent> {
        let dst = parse_cidr(&remove.dst).map_err(|_| MalformedEvent::Destination {
            node: remove.node.clone(),
            dst: remove.dst.clone(),
        })?;
        if self.routes.remove(&remove.node, dst).is_some() {
            self.mark_routes_dirty();
        }
        Ok(())
    }

    fn on_host_metadata_update(
        &mut self,
        update: &HostMetadataUpdate,
    ) -> Result<(), MalformedEvent> {
        if update.hostname != self.vteps.hostname() {
            return Ok(());
        }
        let subnet = parse_cidr(&update.ipv4_addr).map_err(|_| MalformedEvent::Address {
            node: update.hostname.clone(),
            what: "host address",
            addr: update.ipv4_addr.clone(),
        })?;
        // a bare address says nothing about the subnet
        let subnet = update.ipv4_addr.contains('/').then_some(subnet);
        if subnet != self.host_subnet {
            debug!("local subnet is now {subnet:?}");
            self.host_subnet = subnet;
            self.mark_routes_dirty();
        }
        Ok(())
    }

    /// Replace the CIDRs published in the external-nodes ip set.
    pub fn update_external_nodes_cidrs(&mut self, cidrs: Vec<String>) {
        if cidrs != self.config.external_nodes_cidrs {
            self.config.external_nodes_cidrs = cidrs;
            self.ip_sets_dirty = true;
        }
    }

    /// Configure the vxlan device for `local` and resolve its parent interface.
    ///
    /// # Errors
    ///
    /// Returns [`VxlanError::ParentNotFound`] if no interface owns the parent address (the
    /// device itself is configured), or a kernel error.
    pub async fn configure_vxlan_device(
        &mut self,
        mtu: u32,
        local: &Vtep,
    ) -> Result<(), VxlanError> {
        let link_change = self.reconciler.configure(mtu, local).await?;
        let parent = match self.reconciler.resolve_parent(local.parent_addr).await {
            Ok(parent) => parent,
            Err(err) => {
                if let VxlanError::ParentNotFound(_) = err {
                    self.apply_device_event(DeviceEvent::ParentLost {
                        local: local.clone(),
                        link_change,
                    });
                }
                return Err(err);
            }
        };
        self.apply_device_event(DeviceEvent::Configured {
            local: local.clone(),
            link_change,
            parent,
        });
        Ok(())
    }

    fn apply_device_event(&mut self, event: DeviceEvent) {
        if self.vteps.local() != Some(event.local()) {
            debug!("discarding device event for a previous local vtep");
            return;
        }
        self.device_ready = true;
        let (link_change, parent) = match event {
            DeviceEvent::Configured {
                link_change,
                parent,
                ..
            } => (link_change, Some(parent)),
            DeviceEvent::ParentLost { link_change, .. } => (link_change, None),
        };
        if link_change.is_new() {
            // a new device has no forwarding state
            self.vteps_dirty = true;
            self.mark_routes_dirty();
        }
        if self.parent != parent {
            self.mark_routes_dirty();
            if let Some(old) = self.parent.take() {
                self.stale_parent = Some(old.name);
            }
        }
        let Some(parent) = parent else {
            return;
        };
        if self.parent.is_none() {
            info!(
                "parent interface of {} is {} ({})",
                self.config.device_name, parent.name, parent.address
            );
        }
        if self.no_encap_route_table.is_none()
            && let Some(mut factory) = self.factory.take()
        {
            let params = ParentRouteTableParams {
                interface_prefixes: vec![parent.name.to_string()],
                ip_version: IpVersion::V4,
                vxlan: false,
                netlink_timeout: self.config.netlink_timeout,
                device_route_source_address: self.config.device_route_source_address,
                device_route_protocol: self.config.device_route_protocol,
                remove_external_routes: self.config.remove_external_routes,
            };
            self.no_encap_route_table = Some(factory.new_parent_route_table(params));
        }
        self.parent = Some(parent);
    }

    /// Push every pending desired state.  Called once per tick by the thread owning the manager.
    ///
    /// # Errors
    ///
    /// Returns [`VxlanError::NoEncapTableNotReady`] if no-encap routes are wanted while the parent
    /// interface is unknown.  The routes are then left dirty and no layer 3 route is pushed.
    pub fn complete_deferred_work(&mut self) -> Result<(), VxlanError> {
        while let Ok(event) = self.device_events.try_recv() {
            self.apply_device_event(event);
        }

        if self.ip_sets_dirty {
            self.publish_ip_sets();
            self.ip_sets_dirty = false;
        }

        if self.vteps_dirty {
            let targets = desired::l2_targets(&self.vteps);
            debug!("pushing {} l2 targets", targets.len());
            self.route_table
                .set_l2_routes(&self.config.device_name, targets);
            self.vteps_dirty = false;
        }

        if self.routes_dirty.swap(false, Ordering::SeqCst)
            && let Err(err) = self.push_routes()
        {
            self.mark_routes_dirty();
            return Err(err);
        }
        Ok(())
    }

    fn publish_ip_sets(&mut self) {
        let metadata = IpSetMetadata {
            set_id: self.config.external_nodes_ipset_id.clone(),
            max_size: self.config.max_ip_set_size,
        };
        let members = self.config.external_nodes_cidrs.clone();
        if members.len() > metadata.max_size {
            warn!(
                "{} external node CIDRs exceed the capacity of ip set {} ({})",
                members.len(),
                metadata.set_id,
                metadata.max_size
            );
        }
        self.ip_sets.replace_members(metadata, members);
    }

    fn push_routes(&mut self) -> Result<(), VxlanError> {
        let parent = match (&self.parent, &self.no_encap_route_table) {
            (Some(parent), Some(_)) => Some(ParentContext {
                name: &parent.name,
                subnet: self.host_subnet.unwrap_or(parent.address),
            }),
            _ => None,
        };
        let desired =
            desired::l3_routes(&self.vteps, &self.routes, &self.config.device_name, parent)?;
        debug!(
            "pushing {} overlay routes and {} parent routes",
            desired.overlay.len(),
            desired.parent.len()
        );
        self.route_table
            .set_routes(&self.config.device_name, desired.overlay);
        let Some(table) = &mut self.no_encap_route_table else {
            return Ok(());
        };
        if let Some(stale) = self.stale_parent.take()
            && self.parent.as_ref().is_none_or(|parent| parent.name != stale)
        {
            info!("withdrawing no-encap routes from former parent {stale}");
            table.set_routes(&stale, vec![]);
        }
        if let Some(parent) = &self.parent {
            table.set_routes(&parent.name, desired.parent);
        }
        Ok(())
    }

    /// Spawn a task reconciling the vxlan device with the local endpoint every `period`, and as
    /// soon as the local endpoint changes.  Changes it observes are applied on the next tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn keep_vxlan_device_in_sync(&mut self, mtu: u32, period: Duration) {
        if self.resync.is_some() {
            warn!("device resync already running, ignoring");
            return;
        }
        let resync = ResyncLoop {
            reconciler: self.reconciler.clone(),
            mtu,
            period,
            local: self.local.subscribe(),
            events: self.device_events_tx.clone(),
            routes_dirty: self.routes_dirty.clone(),
        };
        self.resync = Some(resync.spawn());
    }

    /// Stop the resync task (waiting up to the netlink timeout for an in-flight reconciliation).
    pub async fn shutdown(&mut self) {
        if let Some(resync) = self.resync.take() {
            resync.shutdown(self.config.netlink_timeout).await;
        }
        self.shut_down = true;
        info!("vxlan manager shut down");
    }

    /// Run the manager: apply `events` in arrival order and tick every `tick` until `shutdown`
    /// turns true (or its sender goes away) or the event channel closes.
    ///
    /// Unless already started, the device resync task is started with the configured MTU and
    /// resync period.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<VxlanEvent>,
        tick: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        if self.resync.is_none() {
            self.keep_vxlan_device_in_sync(self.config.mtu, self.config.resync_period);
        }
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_update(event),
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Err(err) = self.complete_deferred_work() {
                        if err.is_deferral() {
                            debug!("{err}");
                        } else {
                            warn!("failed to complete deferred work: {err}");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
        self
    }
}
