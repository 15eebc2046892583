// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing targets declared by the linked crates, collected at link time.

use crate::LevelFilter;
use linkme::distributed_slice;

/// One declaration made with [`trace_target!`](crate::trace_target) or
/// [`custom_target!`](crate::custom_target).
#[derive(Debug)]
pub struct TargetDecl {
    pub(crate) target: &'static str,
    pub(crate) name: &'static str,
    pub(crate) level: LevelFilter,
    pub(crate) tags: &'static [&'static str],
}

impl TargetDecl {
    #[doc(hidden)]
    #[must_use]
    pub const fn new(
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            target,
            name,
            level,
            tags,
        }
    }
}

/// Every declaration of every linked crate.  Order is unspecified.
#[distributed_slice]
pub static DECLARED_TARGETS: [TargetDecl];

#[doc(hidden)]
#[macro_export]
macro_rules! __declare_target {
    ($target:expr, $name:expr, $level:expr, $tags:expr) => {
        // anonymous const so one crate may declare several targets
        const _: () = {
            #[::linkme::distributed_slice($crate::targets::DECLARED_TARGETS)]
            static DECL: $crate::targets::TargetDecl =
                $crate::targets::TargetDecl::new($target, $name, $level, $tags);
        };
    };
}

/// Declare the calling module as a tracing target with a display name, default level and tags.
///
/// The crate invoking this must depend on `linkme`.
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        $crate::__declare_target!(module_path!(), $name, $level, $tags);
    };
}

/// Declare a target which is not a module path, for `tracing` macros using `target: "..."`.
#[macro_export]
macro_rules! custom_target {
    ($target:expr, $level:expr, $tags:expr) => {
        $crate::__declare_target!($target, $target, $level, $tags);
    };
}
