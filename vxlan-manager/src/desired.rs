// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Derivation of the desired route table contents from the registries.
//!
//! Everything here is a pure function of its arguments.

use crate::VxlanError;
use crate::events::RouteType;
use crate::routes::RouteRegistry;
use crate::routetable::{L2Target, Route};
use crate::vtep::VtepRegistry;
use ipnet::Ipv4Net;
use net::interface::InterfaceName;
use tracing::{debug, trace};

/// The resolved parent interface, as far as route derivation is concerned.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ParentContext<'a> {
    pub(crate) name: &'a InterfaceName,
    /// The subnet of the local parent address
    pub(crate) subnet: Ipv4Net,
}

/// The layer 3 routes of the overlay device and of the parent interface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DesiredRoutes {
    pub(crate) overlay: Vec<Route>,
    pub(crate) parent: Vec<Route>,
}

/// One target per remote [`Vtep`](crate::vtep::Vtep).  When several nodes claim the same tunnel
/// address only the most recent claim is kept.
pub(crate) fn l2_targets(vteps: &VtepRegistry) -> Vec<L2Target> {
    vteps
        .remotes()
        .filter(|vtep| {
            vteps
                .tunnel_addr_owner(vtep.tunnel_addr)
                .is_none_or(|owner| owner.node == vtep.node)
        })
        .map(|vtep| L2Target {
            mac: vtep.mac,
            tunnel_addr: vtep.tunnel_addr,
            parent_addr: vtep.parent_addr,
        })
        .collect()
}

/// Compute the layer 3 routes.
///
/// Intents owned by the local node, or by a node without a known endpoint, produce nothing.
/// No-encap intents produce a parent route only if the owning node's parent address is in the
/// local parent subnet.
///
/// # Errors
///
/// Returns [`VxlanError::NoEncapTableNotReady`] if a parent route could be produced but the
/// parent is unknown.
pub(crate) fn l3_routes(
    vteps: &VtepRegistry,
    routes: &RouteRegistry,
    overlay: &InterfaceName,
    parent: Option<ParentContext<'_>>,
) -> Result<DesiredRoutes, VxlanError> {
    let mut desired = DesiredRoutes::default();
    for intent in routes.iter() {
        if intent.node == vteps.hostname() {
            debug!("not programming local route to {}", intent.dst);
            continue;
        }
        let Some(vtep) = vteps.get(&intent.node) else {
            debug!(
                "no vtep for node {} yet, skipping route to {}",
                intent.node, intent.dst
            );
            continue;
        };
        match intent.route_type {
            RouteType::Vxlan => desired.overlay.push(Route {
                dst: intent.dst,
                gw: vtep.tunnel_addr,
                device: overlay.clone(),
            }),
            RouteType::NoEncap => {
                let Some(parent) = parent else {
                    return Err(VxlanError::NoEncapTableNotReady);
                };
                if parent.subnet.contains(&vtep.parent_addr) {
                    desired.parent.push(Route {
                        dst: intent.dst,
                        gw: vtep.parent_addr,
                        device: parent.name.clone(),
                    });
                } else {
                    trace!(
                        "node {} is not in subnet {}, skipping route to {}",
                        intent.node, parent.subnet, intent.dst
                    );
                }
            }
            RouteType::Other => {}
        }
    }
    Ok(desired)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::routes::RouteIntent;
    use crate::vtep::Vtep;
    use net::eth::mac::Mac;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    const NODES: u8 = 8;

    fn node(n: u8) -> String {
        format!("node{}", n % NODES)
    }

    fn vtep(n: u8, mac: Mac, parent: u8) -> Vtep {
        let n = n % NODES;
        Vtep {
            node: node(n),
            mac,
            tunnel_addr: Ipv4Addr::new(10, 0, n, 0),
            parent_addr: Ipv4Addr::new(172, 0, parent % 2, n),
        }
    }

    fn registry(entries: &[(u8, Mac, u8)]) -> VtepRegistry {
        let mut vteps = VtepRegistry::new("node0");
        for (n, mac, parent) in entries {
            vteps.upsert(vtep(*n, *mac, *parent));
        }
        vteps
    }

    fn intents(entries: &[(u8, u8, bool)]) -> RouteRegistry {
        let mut routes = RouteRegistry::default();
        for (n, dst, noencap) in entries {
            routes.upsert(RouteIntent {
                node: node(*n),
                dst: Ipv4Net::new(Ipv4Addr::new(192, 168, *dst, 1), 26).unwrap(),
                gw: String::new(),
                route_type: if *noencap {
                    RouteType::NoEncap
                } else {
                    RouteType::Vxlan
                },
            });
        }
        routes
    }

    fn overlay() -> InterfaceName {
        "vxlan.calico".try_into().unwrap()
    }

    #[test]
    fn one_l2_target_per_remote_vtep() {
        bolero::check!()
            .with_type()
            .for_each(|entries: &Vec<(u8, Mac, u8)>| {
                let vteps = registry(entries);
                let targets = l2_targets(&vteps);
                let expected: Vec<_> = vteps.remotes().map(|v| v.mac).collect();
                let got: Vec<_> = targets.iter().map(|t| t.mac).collect();
                assert_eq!(got, expected);
                assert!(
                    targets
                        .iter()
                        .all(|t| t.tunnel_addr != Ipv4Addr::new(10, 0, 0, 0))
                );
            });
    }

    #[test]
    fn overlay_routes_need_a_vtep() {
        bolero::check!().with_type().for_each(
            |(vtep_entries, route_entries): &(Vec<(u8, Mac, u8)>, Vec<(u8, u8, bool)>)| {
                let vteps = registry(vtep_entries);
                let routes = intents(route_entries);
                let eth0: InterfaceName = "eth0".try_into().unwrap();
                let parent = ParentContext {
                    name: &eth0,
                    subnet: "172.0.0.2/24".parse().unwrap(),
                };
                let desired = l3_routes(&vteps, &routes, &overlay(), Some(parent)).unwrap();
                for route in &desired.overlay {
                    let owner = vteps
                        .iter()
                        .find(|v| v.tunnel_addr == route.gw)
                        .unwrap();
                    assert_ne!(owner.node, "node0");
                    assert_eq!(route.device, overlay());
                }
                for route in &desired.parent {
                    assert!(parent.subnet.contains(&route.gw));
                    assert_eq!(route.device, eth0);
                }
                let expected: BTreeSet<_> = routes
                    .iter_by_type(RouteType::Vxlan)
                    .filter(|r| r.node != "node0" && vteps.get(&r.node).is_some())
                    .map(|r| r.dst)
                    .collect();
                let got: BTreeSet<_> = desired.overlay.iter().map(|r| r.dst).collect();
                assert_eq!(got, expected);

                // same inputs, same outputs
                let again = l3_routes(&vteps, &routes, &overlay(), Some(parent)).unwrap();
                assert_eq!(again, desired);
            },
        );
    }

    #[test]
    fn noencap_without_parent_is_deferred() {
        let vteps = registry(&[(1, Mac([2, 0, 0, 0, 0, 1]), 0)]);
        let routes = intents(&[(1, 1, true)]);
        assert_eq!(
            l3_routes(&vteps, &routes, &overlay(), None),
            Err(VxlanError::NoEncapTableNotReady)
        );
        // nothing could be produced for a node without a vtep, so nothing is deferred
        let routes = intents(&[(2, 1, true), (1, 2, false)]);
        let desired = l3_routes(&vteps, &routes, &overlay(), None).unwrap();
        assert_eq!(desired.overlay.len(), 1);
        assert!(desired.parent.is_empty());
    }

    #[test]
    fn cross_subnet_noencap_is_skipped() {
        // parents of odd nodes are in 172.0.1.0/24
        let vteps = registry(&[(1, Mac([2, 0, 0, 0, 0, 1]), 1), (2, Mac([2, 0, 0, 0, 0, 2]), 0)]);
        let routes = intents(&[(1, 1, true), (2, 2, true)]);
        let eth0: InterfaceName = "eth0".try_into().unwrap();
        let parent = ParentContext {
            name: &eth0,
            subnet: "172.0.0.2/24".parse().unwrap(),
        };
        let desired = l3_routes(&vteps, &routes, &overlay(), Some(parent)).unwrap();
        assert_eq!(
            desired.parent,
            vec![Route {
                dst: "192.168.2.1/26".parse().unwrap(),
                gw: Ipv4Addr::new(172, 0, 0, 2),
                device: eth0.clone(),
            }]
        );
    }
}
