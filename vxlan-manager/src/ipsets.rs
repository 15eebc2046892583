// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The ip set seam.

use serde::{Deserialize, Serialize};

/// Identity and capacity of an ip set.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct IpSetMetadata {
    /// The identifier of the set
    pub set_id: String,
    /// The maximum number of members the set is sized for
    pub max_size: usize,
}

/// An ip set manager.
pub trait IpSets: Send {
    /// Replace the members of a set.
    fn replace_members(&mut self, metadata: IpSetMetadata, members: Vec<String>);
}
