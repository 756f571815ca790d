//! Watches the runtime and emits [`ContainerEvent`]s.
//!
//! Two strategies share one contract: run until cancelled (returning
//! `Ok`) or until the runtime fails (returning the error).  Neither retries
//! internally; a failed monitor is fatal to the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::runtime::ContainerRuntime;
use crate::types::ContainerEvent;

pub mod polling;
pub mod streaming;

pub use polling::PollingMonitor;
pub use streaming::StreamingMonitor;

/// Default interval between full resyncs of the streaming monitor.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between polls of the polling monitor.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// The monitor selected at startup.
pub enum Monitor<R> {
    Streaming(StreamingMonitor<R>),
    Polling(PollingMonitor<R>),
}

impl<R: ContainerRuntime> Monitor<R> {
    pub fn streaming(runtime: Arc<R>, resync_interval: Duration) -> Self {
        Self::Streaming(StreamingMonitor::new(runtime, resync_interval))
    }

    pub fn polling(runtime: Arc<R>, interval: Duration) -> Self {
        Self::Polling(PollingMonitor::new(runtime, interval))
    }

    pub async fn run(
        self,
        output: mpsc::Sender<ContainerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), MonitorError> {
        match self {
            Self::Streaming(monitor) => monitor.run(output, cancel).await,
            Self::Polling(monitor) => monitor.run(output, cancel).await,
        }
    }
}

/// Sends an event, failing if the consumer has gone away.
async fn emit(
    output: &mpsc::Sender<ContainerEvent>,
    event: ContainerEvent,
) -> Result<(), MonitorError> {
    output
        .send(event)
        .await
        .map_err(|_| MonitorError::ChannelClosed)
}
