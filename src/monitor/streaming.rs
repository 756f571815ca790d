use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::stream::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::emit;
use crate::error::MonitorError;
use crate::runtime::{Action, ContainerRuntime, RuntimeEvent};
use crate::types::ContainerEvent;

/// Follows the runtime's event stream, republishing the full container
/// list on a fixed interval to recover from missed events.
pub struct StreamingMonitor<R> {
    runtime: Arc<R>,
    resync_interval: Duration,
}

impl<R: ContainerRuntime> StreamingMonitor<R> {
    pub fn new(runtime: Arc<R>, resync_interval: Duration) -> Self {
        Self {
            runtime,
            resync_interval,
        }
    }

    pub async fn run(
        self,
        output: mpsc::Sender<ContainerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), MonitorError> {
        // The event stream only connects once polled, so it replays from
        // before the bootstrap list to cover anything created meanwhile.
        let mut events = self.runtime.events(SystemTime::now());
        self.publish_existing(&output).await?;

        let mut resync = interval_at(
            Instant::now() + self.resync_interval,
            self.resync_interval,
        );
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Listening for container events");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle(event, &output).await?,
                    Some(Err(e)) => return Err(MonitorError::Events(e)),
                    None => return Err(MonitorError::EventsClosed),
                },
                _ = resync.tick() => {
                    debug!("Resyncing container list");
                    self.publish_existing(&output).await?;
                }
            }
        }
    }

    async fn handle(
        &self,
        event: RuntimeEvent,
        output: &mpsc::Sender<ContainerEvent>,
    ) -> Result<(), MonitorError> {
        debug!("Container event: {:?} for {}", event.action, event.id);

        if matches!(event.action, Action::Destroy | Action::Rename) {
            emit(output, ContainerEvent::Removed { id: event.id.clone() }).await?;
        }

        if matches!(event.action, Action::Create | Action::Rename) {
            let container = self
                .runtime
                .inspect_container(&event.id)
                .await
                .map_err(|source| MonitorError::Inspect {
                    id: event.id.clone(),
                    source,
                })?;
            emit(output, ContainerEvent::Added(container)).await?;
        }

        Ok(())
    }

    async fn publish_existing(
        &self,
        output: &mpsc::Sender<ContainerEvent>,
    ) -> Result<(), MonitorError> {
        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(MonitorError::List)?;
        debug!("Publishing {} existing containers", containers.len());
        for container in containers {
            emit(output, ContainerEvent::Added(container)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{server_error, MockRuntime};
    use crate::types::container;

    fn start(
        runtime: Arc<MockRuntime>,
        resync: Duration,
    ) -> (
        mpsc::Receiver<ContainerEvent>,
        CancellationToken,
        tokio::task::JoinHandle<Result<(), MonitorError>>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(StreamingMonitor::new(runtime, resync).run(tx, cancel.clone()));
        (rx, cancel, handle)
    }

    #[tokio::test]
    async fn bootstraps_existing_containers() {
        let runtime = Arc::new(MockRuntime::new().with_containers(vec![
            container("a", "a", &[], &[]),
            container("b", "b", &[], &[]),
        ]));
        let (mut rx, cancel, handle) = start(runtime, Duration::from_secs(30));

        for id in ["a", "b"] {
            match rx.recv().await.unwrap() {
                ContainerEvent::Added(c) => assert_eq!(c.id, id),
                other => panic!("unexpected event {other:?}"),
            }
        }

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn translates_runtime_events() {
        let runtime = MockRuntime::new()
            .with_inspect(container("new", "fresh", &[("k", "v")], &[80]))
            .with_inspect(container("moved", "renamed", &[], &[]));
        let events = runtime.event_sender();
        let (mut rx, cancel, handle) = start(Arc::new(runtime), Duration::from_secs(30));

        events
            .send(Ok(RuntimeEvent {
                action: Action::Create,
                id: "new".into(),
            }))
            .unwrap();
        events
            .send(Ok(RuntimeEvent {
                action: Action::Destroy,
                id: "old".into(),
            }))
            .unwrap();
        events
            .send(Ok(RuntimeEvent {
                action: Action::Rename,
                id: "moved".into(),
            }))
            .unwrap();

        match rx.recv().await.unwrap() {
            ContainerEvent::Added(c) => {
                assert_eq!(c.name, "fresh");
                assert_eq!(c.labels["k"], "v");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            ContainerEvent::Removed { id: "old".into() }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ContainerEvent::Removed { id: "moved".into() }
        );
        match rx.recv().await.unwrap() {
            ContainerEvent::Added(c) => assert_eq!(c.name, "renamed"),
            other => panic!("unexpected event {other:?}"),
        }

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn events_replay_from_before_bootstrap() {
        let runtime = Arc::new(
            MockRuntime::new().with_containers(vec![container("a", "a", &[], &[])]),
        );
        let (mut rx, cancel, handle) = start(Arc::clone(&runtime), Duration::from_secs(30));

        assert!(matches!(rx.recv().await, Some(ContainerEvent::Added(_))));
        let since = runtime.events_since.lock().unwrap().unwrap();
        let listed = runtime.list_times.lock().unwrap()[0];
        assert!(since <= listed);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn resync_republishes_list() {
        let runtime = Arc::new(
            MockRuntime::new().with_containers(vec![container("a", "a", &[], &[])]),
        );
        let (mut rx, cancel, handle) = start(Arc::clone(&runtime), Duration::from_secs(30));

        assert!(matches!(rx.recv().await, Some(ContainerEvent::Added(_))));
        let started = Instant::now();
        assert!(matches!(rx.recv().await, Some(ContainerEvent::Added(_))));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(
            runtime.list_calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn inspect_failure_is_fatal() {
        let runtime = MockRuntime::new();
        let events = runtime.event_sender();
        let (_rx, _cancel, handle) = start(Arc::new(runtime), Duration::from_secs(30));

        events
            .send(Ok(RuntimeEvent {
                action: Action::Create,
                id: "ghost".into(),
            }))
            .unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MonitorError::Inspect { ref id, .. } if id == "ghost"));
    }

    #[tokio::test]
    async fn stream_error_is_fatal() {
        let runtime = MockRuntime::new();
        let events = runtime.event_sender();
        let (_rx, _cancel, handle) = start(Arc::new(runtime), Duration::from_secs(30));

        events.send(Err(server_error("connection reset"))).unwrap();
        assert!(matches!(
            handle.await.unwrap(),
            Err(MonitorError::Events(_))
        ));
    }

    #[tokio::test]
    async fn stream_end_is_fatal() {
        let runtime = MockRuntime::new();
        let events = runtime.event_sender();
        let (_rx, _cancel, handle) = start(Arc::new(runtime), Duration::from_secs(30));

        drop(events);
        assert!(matches!(
            handle.await.unwrap(),
            Err(MonitorError::EventsClosed)
        ));
    }

    #[tokio::test]
    async fn list_failure_is_fatal() {
        let runtime = MockRuntime::new();
        *runtime.fail_list.lock().unwrap() = true;
        let (_rx, _cancel, handle) = start(Arc::new(runtime), Duration::from_secs(30));

        assert!(matches!(handle.await.unwrap(), Err(MonitorError::List(_))));
    }
}
