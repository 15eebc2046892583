// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors reported by the vxlan manager.

use link_manager::LinkError;
use std::net::Ipv4Addr;

/// Errors reported by the vxlan manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VxlanError {
    /// No interface owns the local VTEP's parent address.
    #[error("no interface owns parent address {0}")]
    ParentNotFound(Ipv4Addr),
    /// No-encap routes are wanted but the parent interface (and its route table) is not known
    /// yet.  The routes stay dirty and are retried on the next tick.
    #[error("no encap route table not set, will defer adding routes")]
    NoEncapTableNotReady,
    /// A kernel operation failed; retrying later may succeed.
    #[error("transient kernel failure: {0}")]
    KernelTransient(LinkError),
    /// A kernel operation failed in a way which requires operator action.
    #[error("kernel failure: {0}")]
    KernelFatal(LinkError),
    /// An event was rejected.
    #[error(transparent)]
    MalformedEvent(#[from] MalformedEvent),
}

impl VxlanError {
    /// True if the error only means that work was postponed.
    #[must_use]
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            VxlanError::NoEncapTableNotReady | VxlanError::ParentNotFound(_)
        )
    }
}

impl From<LinkError> for VxlanError {
    fn from(err: LinkError) -> Self {
        if err.is_fatal() {
            VxlanError::KernelFatal(err)
        } else {
            VxlanError::KernelTransient(err)
        }
    }
}

/// The reasons why an event may be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEvent {
    /// The event names no node.
    #[error("event names no node")]
    EmptyNode,
    /// The MAC address can't be parsed.
    #[error("invalid MAC address '{mac}' for node {node}")]
    Mac {
        /// The node the event is about
        node: String,
        /// The offending literal
        mac: String,
    },
    /// An address can't be parsed.
    #[error("invalid {what} '{addr}' for node {node}")]
    Address {
        /// The node the event is about
        node: String,
        /// Which address of the event is wrong
        what: &'static str,
        /// The offending literal
        addr: String,
    },
    /// The destination of a route can't be parsed.
    #[error("invalid route destination '{dst}' for node {node}")]
    Destination {
        /// The node the route belongs to
        node: String,
        /// The offending literal
        dst: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_errors_are_classified() {
        assert!(matches!(
            VxlanError::from(LinkError::PermissionDenied("nope".into())),
            VxlanError::KernelFatal(_)
        ));
        assert!(matches!(
            VxlanError::from(LinkError::Timeout(std::time::Duration::from_secs(1))),
            VxlanError::KernelTransient(_)
        ));
        assert!(VxlanError::NoEncapTableNotReady.is_deferral());
        assert!(!VxlanError::from(MalformedEvent::EmptyNode).is_deferral());
    }
}
