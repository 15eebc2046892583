// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control plane of a node's participation in a VXLAN overlay.
//!
//! The [`VxlanManager`] consumes a stream of cluster events ([`VxlanEvent`]), keeps the registry
//! of tunnel endpoints and route intents, maintains the local vxlan device and, once per tick
//! ([`VxlanManager::complete_deferred_work`]), pushes the complete desired state to two route
//! tables: the overlay device's table and the "no encap" table of the physical parent interface.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
mod desired;
pub mod device;
pub mod errors;
pub mod events;
pub mod ipsets;
mod manager;
mod resync;
pub mod routes;
pub mod routetable;
pub mod vtep;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use config::{Config, ConfigBuilder, ConfigError};
pub use errors::{MalformedEvent, VxlanError};
pub use events::VxlanEvent;
pub use manager::{ManagerState, VxlanManager};

use tracectl::trace_target;
trace_target!("vxlan-manager", tracectl::LevelFilter::INFO, &["vxlan"]);
