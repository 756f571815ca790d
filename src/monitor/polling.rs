use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::emit;
use crate::error::MonitorError;
use crate::runtime::ContainerRuntime;
use crate::types::ContainerEvent;

/// Lists containers on a fixed interval and diffs against the previous
/// list.
///
/// Containers that start and stop between two polls are never seen.
pub struct PollingMonitor<R> {
    runtime: Arc<R>,
    interval: Duration,
}

impl<R: ContainerRuntime> PollingMonitor<R> {
    pub fn new(runtime: Arc<R>, interval: Duration) -> Self {
        Self { runtime, interval }
    }

    pub async fn run(
        self,
        output: mpsc::Sender<ContainerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), MonitorError> {
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let containers = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.runtime.list_containers() => res.map_err(MonitorError::List)?,
            };

            let mut current = HashSet::with_capacity(containers.len());
            for container in containers {
                current.insert(container.id.clone());
                if !seen.contains(&container.id) {
                    emit(&output, ContainerEvent::Added(container)).await?;
                }
            }

            for id in seen.difference(&current) {
                emit(&output, ContainerEvent::Removed { id: id.clone() }).await?;
            }

            debug!("Poll found {} containers", current.len());
            seen = current;

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
