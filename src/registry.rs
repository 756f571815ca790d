//! The authoritative set of running containers.
//!
//! Only the reconcile loop writes to the [`Registry`].  Every mutation
//! publishes a fresh [`Snapshot`] over a watch channel and arms the
//! debouncer; readers work on the snapshot and never hold a lock while
//! rendering.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, log, Level};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::types::{Container, ContainerEvent};

/// Point-in-time view of the registry, keyed by container ID.
pub type Snapshot = Arc<BTreeMap<String, Arc<Container>>>;

pub struct Registry {
    containers: Snapshot,
    proxy_tag: Option<String>,
    debug: bool,
}

impl Registry {
    /// Creates an empty registry.  When `proxy_tag` is set, only containers
    /// whose tag label matches it are admitted.
    pub fn new(proxy_tag: Option<String>) -> Self {
        Self {
            containers: Arc::default(),
            proxy_tag,
            debug: false,
        }
    }

    /// Logs every accepted and ignored container at info level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Applies an event, returning whether the registry was touched.
    ///
    /// Adds replace any existing record for the same ID.  Removing an
    /// unknown ID is a no-op but still counts as touched.
    pub fn apply(&mut self, event: ContainerEvent) -> bool {
        match event {
            ContainerEvent::Added(container) => {
                if let Some(tag) = &self.proxy_tag {
                    if container.proxy_tag() != tag {
                        log!(
                            self.level(),
                            "Ignored container {} due to proxy tag (wanted: '{}', got: '{}')",
                            container.name,
                            tag,
                            container.proxy_tag()
                        );
                        return false;
                    }
                }
                log!(
                    self.level(),
                    "Container added: {} (id: {})",
                    container.name,
                    container.id
                );
                Arc::make_mut(&mut self.containers)
                    .insert(container.id.clone(), Arc::new(container));
                true
            }
            ContainerEvent::Removed { id } => {
                let existed = Arc::make_mut(&mut self.containers).remove(&id).is_some();
                log!(
                    self.level(),
                    "Removed container with ID {} (was previously known: {})",
                    id,
                    existed
                );
                true
            }
        }
    }

    /// Returns the current contents without copying them.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.containers)
    }

    fn level(&self) -> Level {
        if self.debug {
            Level::Info
        } else {
            Level::Debug
        }
    }
}

/// Consumes monitor events until the channel closes or `cancel` fires.
///
/// Each accepted event publishes a new snapshot and arms the debouncer.
/// Arming never blocks: if the debouncer already has a pending arm the
/// extra one is redundant.
pub async fn reconcile(
    mut registry: Registry,
    mut events: mpsc::Receiver<ContainerEvent>,
    snapshots: watch::Sender<Snapshot>,
    arm: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> Registry {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if registry.apply(event) {
                    snapshots.send_replace(registry.snapshot());
                    let _ = arm.try_send(());
                }
            }
        }
    }
    debug!(
        "Reconcile loop finished with {} containers",
        registry.snapshot().len()
    );
    registry
}
