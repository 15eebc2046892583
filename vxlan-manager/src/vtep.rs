// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Registry of the cluster's tunnel endpoints.

use multi_index_map::MultiIndexMap;
use net::eth::mac::Mac;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// A VXLAN tunnel endpoint, one per node.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Vtep {
    /// The node hosting the endpoint
    pub node: String,
    /// The MAC address of the node's vxlan device
    pub mac: Mac,
    /// The overlay address of the node's vxlan device
    pub tunnel_addr: Ipv4Addr,
    /// The underlay address of the node (outer source / destination of encapsulated packets)
    pub parent_addr: Ipv4Addr,
}

#[derive(Clone, Debug, MultiIndexMap)]
#[multi_index_derive(Clone, Debug, Default)]
struct VtepEntry {
    #[multi_index(ordered_unique)]
    node: String,
    #[multi_index(ordered_non_unique)]
    tunnel_addr: Ipv4Addr,
    revision: u64,
    vtep: Vtep,
}

/// The set of known [`Vtep`]s, keyed by node name.
///
/// Every write is stamped with a revision so that, when several nodes claim the same tunnel
/// address, the most recent claim can be told apart from the stale ones.
#[derive(Clone, Debug)]
pub struct VtepRegistry {
    hostname: String,
    entries: MultiIndexVtepEntryMap,
    revision: u64,
}

impl VtepRegistry {
    /// Create an empty registry for the node called `hostname`.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            entries: MultiIndexVtepEntryMap::default(),
            revision: 0,
        }
    }

    /// The name of the local node.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Insert or replace the [`Vtep`] of a node.  Returns the replaced entry.
    pub fn upsert(&mut self, vtep: Vtep) -> Option<Vtep> {
        let previous = self.remove(&vtep.node);
        for other in self.entries.get_by_tunnel_addr(&vtep.tunnel_addr) {
            warn!(
                "tunnel address {} of node {} is also claimed by node {}, using {}",
                vtep.tunnel_addr, vtep.node, other.node, vtep.node
            );
        }
        self.revision += 1;
        let entry = VtepEntry {
            node: vtep.node.clone(),
            tunnel_addr: vtep.tunnel_addr,
            revision: self.revision,
            vtep,
        };
        if self.entries.try_insert(entry).is_err() {
            // the node's entry was removed above
            debug!("failed to register vtep");
        }
        previous
    }

    /// Forget the [`Vtep`] of a node.
    pub fn remove(&mut self, node: &str) -> Option<Vtep> {
        self.entries
            .remove_by_node(&node.to_string())
            .map(|entry| entry.vtep)
    }

    /// The [`Vtep`] of a node.
    #[must_use]
    pub fn get(&self, node: &str) -> Option<&Vtep> {
        self.entries
            .get_by_node(&node.to_string())
            .map(|entry| &entry.vtep)
    }

    /// The [`Vtep`] of the local node.
    #[must_use]
    pub fn local(&self) -> Option<&Vtep> {
        self.get(&self.hostname)
    }

    /// Every [`Vtep`], ordered by node name.
    pub fn iter(&self) -> impl Iterator<Item = &Vtep> {
        self.entries.iter_by_node().map(|entry| &entry.vtep)
    }

    /// Every [`Vtep`] but the local one, ordered by node name.
    pub fn remotes(&self) -> impl Iterator<Item = &Vtep> {
        self.iter().filter(|vtep| vtep.node != self.hostname)
    }

    /// The most recent claimant of a tunnel address.
    #[must_use]
    pub fn tunnel_addr_owner(&self, tunnel_addr: Ipv4Addr) -> Option<&Vtep> {
        self.entries
            .get_by_tunnel_addr(&tunnel_addr)
            .into_iter()
            .max_by_key(|entry| entry.revision)
            .map(|entry| &entry.vtep)
    }

    /// Number of known [`Vtep`]s.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no [`Vtep`] is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn vtep(node: &str, tunnel: [u8; 4], parent: [u8; 4]) -> Vtep {
        Vtep {
            node: node.to_string(),
            mac: Mac([0x00, 0x0a, 0x95, 0x9d, 0x68, tunnel[3]]),
            tunnel_addr: Ipv4Addr::from(tunnel),
            parent_addr: Ipv4Addr::from(parent),
        }
    }

    #[test]
    fn upsert_replaces_and_remove_forgets() {
        let mut registry = VtepRegistry::new("node1");
        assert!(registry.is_empty());
        assert_eq!(registry.upsert(vtep("node2", [10, 0, 80, 0], [172, 0, 12, 1])), None);
        let moved = vtep("node2", [10, 0, 81, 0], [172, 0, 12, 1]);
        assert_eq!(
            registry.upsert(moved.clone()).map(|old| old.tunnel_addr),
            Some(Ipv4Addr::new(10, 0, 80, 0))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("node2"), Some(&moved));
        assert_eq!(registry.tunnel_addr_owner(Ipv4Addr::new(10, 0, 80, 0)), None);
        assert_eq!(registry.remove("node2"), Some(moved));
        assert_eq!(registry.remove("node2"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn local_and_remotes() {
        let mut registry = VtepRegistry::new("node1");
        registry.upsert(vtep("node3", [10, 0, 3, 0], [172, 0, 0, 3]));
        registry.upsert(vtep("node1", [10, 0, 1, 0], [172, 0, 0, 1]));
        registry.upsert(vtep("node2", [10, 0, 2, 0], [172, 0, 0, 2]));
        assert_eq!(registry.local().map(|v| v.node.as_str()), Some("node1"));
        let nodes: Vec<_> = registry.iter().map(|v| v.node.as_str()).collect();
        assert_eq!(nodes, vec!["node1", "node2", "node3"]);
        let remotes: Vec<_> = registry.remotes().map(|v| v.node.as_str()).collect();
        assert_eq!(remotes, vec!["node2", "node3"]);
        registry.remove("node1");
        assert_eq!(registry.local(), None);
    }

    #[test]
    #[traced_test]
    fn duplicate_tunnel_address_last_writer_wins() {
        let mut registry = VtepRegistry::new("node1");
        registry.upsert(vtep("node2", [10, 0, 80, 0], [172, 0, 12, 1]));
        registry.upsert(vtep("node3", [10, 0, 80, 0], [172, 0, 12, 2]));
        assert!(logs_contain("also claimed by node node2"));
        let owner = registry.tunnel_addr_owner(Ipv4Addr::new(10, 0, 80, 0));
        assert_eq!(owner.map(|v| v.node.as_str()), Some("node3"));

        // re-asserting a claim makes it the most recent one
        registry.upsert(vtep("node2", [10, 0, 80, 0], [172, 0, 12, 1]));
        let owner = registry.tunnel_addr_owner(Ipv4Addr::new(10, 0, 80, 0));
        assert_eq!(owner.map(|v| v.node.as_str()), Some("node2"));
        assert_eq!(registry.len(), 2);
    }
}
