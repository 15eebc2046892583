// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Background task keeping the vxlan device in sync with the local endpoint.

use crate::VxlanError;
use crate::device::{DeviceReconciler, LinkChange, ParentInterface};
use crate::vtep::Vtep;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Observations of the resync task, reported to the thread owning the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DeviceEvent {
    /// The device is configured for `local` and its parent is known.
    Configured {
        local: Vtep,
        link_change: LinkChange,
        parent: ParentInterface,
    },
    /// The device is configured for `local` but no interface owns the parent address.
    ParentLost { local: Vtep, link_change: LinkChange },
}

impl DeviceEvent {
    pub(crate) fn local(&self) -> &Vtep {
        match self {
            DeviceEvent::Configured { local, .. } | DeviceEvent::ParentLost { local, .. } => local,
        }
    }
}

/// Owner's side of a running resync task.
pub(crate) struct ResyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResyncHandle {
    /// Stop the task, giving an in-flight reconciliation up to `grace` to complete.
    pub(crate) async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let abort = self.task.abort_handle();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => debug!("resync task stopped"),
            Ok(Err(err)) => warn!("resync task failed: {err}"),
            Err(_) => {
                warn!("resync task did not stop within {grace:?}, aborting it");
                abort.abort();
            }
        }
    }
}

pub(crate) struct ResyncLoop {
    pub(crate) reconciler: DeviceReconciler,
    pub(crate) mtu: u32,
    pub(crate) period: Duration,
    pub(crate) local: watch::Receiver<Option<Vtep>>,
    pub(crate) events: mpsc::UnboundedSender<DeviceEvent>,
    pub(crate) routes_dirty: Arc<AtomicBool>,
}

struct Running {
    config: ResyncLoop,
    shutdown: watch::Receiver<bool>,
    last: Option<(Vtep, Option<ParentInterface>)>,
}

impl ResyncLoop {
    /// Spawn the loop on the current tokio runtime.
    pub(crate) fn spawn(self) -> ResyncHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let running = Running {
            config: self,
            shutdown: shutdown_rx,
            last: None,
        };
        let task = tokio::spawn(running.run());
        ResyncHandle { shutdown, task }
    }
}

impl Running {
    async fn run(mut self) {
        info!(
            "keeping {} in sync every {:?}",
            self.config.reconciler.device_name(),
            self.config.period
        );
        loop {
            let local = self.config.local.borrow_and_update().clone();
            if let Some(local) = local {
                if !self.resync(local).await {
                    break;
                }
            } else {
                debug!("local vtep not known yet");
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.period) => {}
                changed = self.config.local.changed() => {
                    if changed.is_err() {
                        debug!("manager is gone");
                        break;
                    }
                    // the manager forgot the device state when the local vtep changed, even if
                    // it changed back before we got to see it
                    self.last = None;
                }
                _ = self.shutdown.changed() => break,
            }
            if *self.shutdown.borrow() {
                break;
            }
        }
        debug!("resync loop exiting");
    }

    /// Reconcile once; returns false if nobody listens to our reports anymore.
    async fn resync(&mut self, local: Vtep) -> bool {
        let reconciler = &self.config.reconciler;
        let link_change = match reconciler.configure(self.config.mtu, &local).await {
            Ok(change) => change,
            Err(err) => {
                error!("failed to configure {}: {err}", reconciler.device_name());
                return true;
            }
        };
        let parent = match reconciler.resolve_parent(local.parent_addr).await {
            Ok(parent) => Some(parent),
            Err(VxlanError::ParentNotFound(addr)) => {
                warn!("no interface owns parent address {addr}, will retry");
                None
            }
            Err(err) => {
                error!("failed to resolve the parent interface: {err}");
                return true;
            }
        };
        let unchanged = self
            .last
            .as_ref()
            .is_some_and(|(vtep, known)| *vtep == local && *known == parent);
        if unchanged && !link_change.is_new() {
            return true;
        }
        self.config.routes_dirty.store(true, Ordering::SeqCst);
        self.last = Some((local.clone(), parent.clone()));
        let event = match parent {
            Some(parent) => DeviceEvent::Configured {
                local,
                link_change,
                parent,
            },
            None => DeviceEvent::ParentLost { local, link_change },
        };
        self.config.events.send(event).is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::MockLinkDataplane;
    use net::eth::mac::Mac;
    use net::vxlan::Vni;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn local() -> Vtep {
        Vtep {
            node: "node1".to_string(),
            mac: Mac([0x00, 0x0a, 0x74, 0x9d, 0x68, 0x16]),
            tunnel_addr: Ipv4Addr::new(10, 0, 0, 0),
            parent_addr: Ipv4Addr::new(172, 0, 0, 2),
        }
    }

    struct Fixture {
        kernel: MockLinkDataplane,
        local: watch::Sender<Option<Vtep>>,
        events: mpsc::UnboundedReceiver<DeviceEvent>,
        dirty: Arc<AtomicBool>,
        handle: ResyncHandle,
    }

    fn start(kernel: MockLinkDataplane) -> Fixture {
        let (local, local_rx) = watch::channel(None);
        let (events_tx, events) = mpsc::unbounded_channel();
        let dirty = Arc::new(AtomicBool::new(false));
        let handle = ResyncLoop {
            reconciler: DeviceReconciler::new(
                Arc::new(kernel.clone()),
                "vxlan.calico".try_into().unwrap(),
                Vni::new_checked(4096).unwrap(),
                4789,
            ),
            mtu: 1410,
            period: Duration::from_secs(1),
            local: local_rx,
            events: events_tx,
            routes_dirty: dirty.clone(),
        }
        .spawn();
        Fixture {
            kernel,
            local,
            events,
            dirty,
            handle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_local_vtep() {
        let mut fixture = start(MockLinkDataplane::default().with_link("eth0", &["172.0.0.2/16"]));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(fixture.kernel.link("vxlan.calico").is_none());
        assert!(fixture.events.try_recv().is_err());

        fixture.local.send_replace(Some(local()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.kernel.link("vxlan.calico").is_some());
        assert!(fixture.dirty.load(Ordering::SeqCst));
        let event = fixture.events.try_recv().unwrap();
        let DeviceEvent::Configured {
            link_change,
            parent,
            ..
        } = event
        else {
            panic!("unexpected {event:?}");
        };
        assert_eq!(link_change, LinkChange::Created);
        assert_eq!(parent.name.as_ref(), "eth0");

        // nothing changes, nothing is reported
        fixture.dirty.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(fixture.events.try_recv().is_err());
        assert!(!fixture.dirty.load(Ordering::SeqCst));
        fixture.handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn recreates_deleted_device_and_reports_parent_loss() {
        let kernel = MockLinkDataplane::default().with_link("eth0", &["172.0.0.2/16"]);
        let mut fixture = start(kernel);
        fixture.local.send_replace(Some(local()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.events.try_recv().is_ok());

        fixture.kernel.delete_link("vxlan.calico");
        fixture.dirty.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(fixture.kernel.link("vxlan.calico").is_some());
        assert!(fixture.dirty.load(Ordering::SeqCst));
        assert!(matches!(
            fixture.events.try_recv(),
            Ok(DeviceEvent::Configured {
                link_change: LinkChange::Created,
                ..
            })
        ));

        fixture.kernel.delete_address("eth0", "172.0.0.2/16");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            fixture.events.try_recv(),
            Ok(DeviceEvent::ParentLost {
                link_change: LinkChange::Unchanged,
                ..
            })
        ));
        fixture.handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn republished_local_vtep_is_reported_again() {
        let mut fixture = start(MockLinkDataplane::default().with_link("eth0", &["172.0.0.2/16"]));
        fixture.local.send_replace(Some(local()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.events.try_recv().is_ok());

        // withdrawn and re-published before the task runs again
        fixture.local.send_replace(None);
        fixture.local.send_replace(Some(local()));
        fixture.dirty.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.dirty.load(Ordering::SeqCst));
        let event = fixture.events.try_recv().unwrap();
        assert_eq!(event.local(), &local());
        assert!(matches!(
            event,
            DeviceEvent::Configured {
                link_change: LinkChange::Unchanged,
                ..
            }
        ));
        fixture.handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_sleep() {
        let fixture = start(MockLinkDataplane::default());
        let begin = tokio::time::Instant::now();
        fixture.handle.shutdown(Duration::from_secs(10)).await;
        assert!(begin.elapsed() < Duration::from_secs(1));
    }
}
