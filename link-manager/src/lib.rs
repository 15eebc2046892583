// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Kernel link adapter: the narrow set of link and address operations the overlay agent needs
//! from the linux networking stack.
//!
//! [`LinkDataplane`] is the seam consumed by the rest of the agent.
//! [`NetlinkDataplane`] implements it over rtnetlink.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

mod address;
mod dataplane;
mod errors;
mod link;
mod netlink;

pub use address::*;
pub use dataplane::*;
pub use errors::*;
pub use link::*;
pub use netlink::*;

use tracectl::trace_target;
trace_target!("link-manager", tracectl::LevelFilter::INFO, &["netlink"]);
