// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Registry of route intents.

use crate::events::RouteType;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A destination reachable through a node of the cluster.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct RouteIntent {
    /// The node owning the destination
    pub node: String,
    /// The destination (host bits are kept as published)
    pub dst: Ipv4Net,
    /// The gateway as published
    pub gw: String,
    /// How the destination is reached
    pub route_type: RouteType,
}

/// Route intents keyed by (node, destination).
#[derive(Clone, Debug, Default)]
pub struct RouteRegistry {
    routes: BTreeMap<(String, Ipv4Net), RouteIntent>,
}

impl RouteRegistry {
    /// Insert or replace an intent.
    ///
    /// Intents which are neither [`RouteType::Vxlan`] nor [`RouteType::NoEncap`] are ignored;
    /// returns whether the registry changed.
    pub fn upsert(&mut self, intent: RouteIntent) -> bool {
        if intent.route_type == RouteType::Other {
            debug!(
                "ignoring route to {} via node {}: unsupported type",
                intent.dst, intent.node
            );
            return false;
        }
        let key = (intent.node.clone(), intent.dst);
        self.routes.insert(key, intent);
        true
    }

    /// Remove an intent.
    pub fn remove(&mut self, node: &str, dst: Ipv4Net) -> Option<RouteIntent> {
        self.routes.remove(&(node.to_string(), dst))
    }

    /// Every intent, ordered by (node, destination).
    pub fn iter(&self) -> impl Iterator<Item = &RouteIntent> {
        self.routes.values()
    }

    /// Every intent of one type, ordered by (node, destination).
    pub fn iter_by_type(&self, route_type: RouteType) -> impl Iterator<Item = &RouteIntent> {
        self.iter()
            .filter(move |intent| intent.route_type == route_type)
    }

    /// Number of intents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True if there are no intents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
