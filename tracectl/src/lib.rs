// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Crate to control tracing dynamically at runtime.
//!
//! Every crate of the agent declares its tracing target (and the tags it answers to) with
//! [`trace_target!`].  Declarations are collected at link time, so the full set of targets is
//! known before the first log line is emitted.

pub mod control;
mod display;
pub mod targets;

// re-exports
pub use control::{TraceCtlError, TracingControl, get_trace_ctl};
pub use tracing_subscriber::filter::LevelFilter;
