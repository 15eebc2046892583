// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Cluster events consumed by the [`VxlanManager`](crate::VxlanManager).
//!
//! Events carry the raw literals as published by the cluster datastore; they are validated when
//! they are applied.

use serde::{Deserialize, Serialize};

/// A tunnel endpoint was created or changed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelEndpointUpdate {
    /// The node hosting the endpoint
    pub node: String,
    /// The MAC address of the node's vxlan device, in colon form
    pub mac: String,
    /// The overlay address of the node's vxlan device (bare address or CIDR)
    pub ipv4_addr: String,
    /// The underlay address of the node (bare address or CIDR)
    pub parent_device_ip: String,
}

/// A tunnel endpoint was deleted.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelEndpointRemove {
    /// The node which hosted the endpoint
    pub node: String,
}

/// The kind of a route intent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteType {
    /// Traffic is encapsulated through the overlay device.
    Vxlan,
    /// Traffic is routed natively through the parent interface.
    #[serde(rename = "NOENCAP")]
    NoEncap,
    /// Anything else; ignored.
    #[serde(other)]
    Other,
}

/// A route intent was created or changed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteUpdate {
    /// The kind of route
    #[serde(rename = "type")]
    pub route_type: RouteType,
    /// The node owning the destination
    pub node: String,
    /// The destination CIDR
    pub dst: String,
    /// The gateway as published (may be empty)
    #[serde(default)]
    pub gw: String,
}

/// A route intent was deleted.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteRemove {
    /// The node owning the destination
    pub node: String,
    /// The destination CIDR
    pub dst: String,
}

/// Metadata of a host was created or changed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostMetadataUpdate {
    /// The host
    pub hostname: String,
    /// The host's underlay address, optionally with the prefix length of its subnet
    pub ipv4_addr: String,
}

/// The events the manager reacts to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VxlanEvent {
    /// See [`TunnelEndpointUpdate`]
    TunnelEndpointUpdate(TunnelEndpointUpdate),
    /// See [`TunnelEndpointRemove`]
    TunnelEndpointRemove(TunnelEndpointRemove),
    /// See [`RouteUpdate`]
    RouteUpdate(RouteUpdate),
    /// See [`RouteRemove`]
    RouteRemove(RouteRemove),
    /// See [`HostMetadataUpdate`]
    HostMetadataUpdate(HostMetadataUpdate),
}

macro_rules! impl_from_event {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for VxlanEvent {
                fn from(value: $variant) -> Self {
                    VxlanEvent::$variant(value)
                }
            }
        )*
    };
}

impl_from_event!(
    TunnelEndpointUpdate,
    TunnelEndpointRemove,
    RouteUpdate,
    RouteRemove,
    HostMetadataUpdate
);
