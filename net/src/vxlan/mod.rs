// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! VXLAN identifiers and constants.

mod vni;

#[allow(unused_imports)] // re-export
pub use vni::*;

/// VXLAN constants.
pub struct Vxlan;

impl Vxlan {
    /// The IANA assigned UDP destination port for VXLAN.
    pub const PORT: u16 = 4789;
}
