// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Fixtures for tests which need to talk to a real kernel.

use caps::{CapSet, Capability};
use nix::sched::CloneFlags;
use std::future::Future;
use std::panic::{AssertUnwindSafe, UnwindSafe, catch_unwind, resume_unwind};
use tracing::error;

/// Fixture which runs the supplied function with _additional_ granted capabilities.
///
/// Capabilities raised here are dropped again once `f` returns (or panics).
pub fn with_caps<F: UnwindSafe + FnOnce() -> T, T>(
    caps: impl IntoIterator<Item = Capability>,
) -> impl FnOnce(F) -> T {
    move |f: F| {
        let current_caps = match caps::read(None, CapSet::Effective) {
            Ok(current_caps) => current_caps,
            Err(err) => {
                error!("caps error: {err}");
                panic!("caps error: {err}");
            }
        };
        let needed_caps: Vec<_> = caps
            .into_iter()
            .filter(|cap| !current_caps.contains(cap))
            .collect();
        for cap in &needed_caps {
            caps::raise(None, CapSet::Effective, *cap)
                .unwrap_or_else(|err| panic!("unable to raise capability {cap}: {err}"));
        }
        let ret = catch_unwind(f);
        for cap in &needed_caps {
            caps::drop(None, CapSet::Effective, *cap)
                .unwrap_or_else(|err| panic!("unable to drop capability {cap}: {err}"));
        }
        ret.unwrap_or_else(|panic| resume_unwind(panic))
    }
}

/// Run an (async) function or closure in a brand new, empty network namespace.
///
/// A dedicated thread is spawned and moved into a fresh network namespace (only the loopback
/// device exists there), then a thread local tokio runtime drives `exec` to completion.  The
/// namespace disappears with the thread.
///
/// # Panics
///
/// * If we are unable to spawn a new thread, raise capabilities, or unshare the namespace
/// * If we are unable to create a tokio runtime
/// * If the provided function / closure panics
pub fn in_fresh_netns<
    Exec: (FnOnce() -> Fut) + Send + 'static,
    Fut: Future<Output = Out>,
    Out: Send + 'static,
>(
    exec: Exec,
) -> Out {
    #[allow(clippy::expect_used)] // fixture failures are fatal to the test
    std::thread::Builder::new()
        .name("fresh-netns".to_string())
        .spawn(move || {
            with_caps([Capability::CAP_SYS_ADMIN, Capability::CAP_NET_ADMIN])(AssertUnwindSafe(
                move || {
                    nix::sched::unshare(CloneFlags::CLONE_NEWNET)
                        .unwrap_or_else(|e| panic!("failed to unshare network namespace: {e}"));
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_io()
                        .enable_time()
                        .build()
                        .expect("failed to build tokio runtime");
                    runtime.block_on(exec())
                },
            ))
        })
        .expect("failed to spawn netns thread")
        .join()
        .unwrap_or_else(|panic| resume_unwind(panic))
}
