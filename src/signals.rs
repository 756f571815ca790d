use log::{debug, info, warn};

use crate::config::ContainerSignal;
use crate::registry::Snapshot;
use crate::runtime::ContainerRuntime;

/// What happened to a single configured signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered { id: String },
    NotFound,
    Failed { id: String },
}

/// Sends each configured signal to the running container with that name.
///
/// Missing containers and delivery failures are logged; they never stop
/// the remaining signals from being sent.
pub async fn dispatch<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    targets: &[ContainerSignal],
    containers: &Snapshot,
    tag_filtered: bool,
) -> Vec<SignalOutcome> {
    let mut outcomes = Vec::with_capacity(targets.len());

    for target in targets {
        let Some(container) = containers.values().find(|c| c.name == target.name) else {
            if tag_filtered {
                warn!(
                    "Couldn't signal container {} as it is not known. Does it have the correct proxytag set?",
                    target.name
                );
            } else {
                warn!("Couldn't signal container {} as it is not known", target.name);
            }
            outcomes.push(SignalOutcome::NotFound);
            continue;
        };

        info!(
            "Killing container {} ({}) with signal {}",
            container.name, container.id, target.signal
        );
        match runtime.signal_container(&container.id, &target.signal).await {
            Ok(()) => outcomes.push(SignalOutcome::Delivered {
                id: container.id.clone(),
            }),
            Err(e) => {
                warn!(
                    "Unable to send signal {} to container {}: {}",
                    target.signal, target.name, e
                );
                outcomes.push(SignalOutcome::Failed {
                    id: container.id.clone(),
                });
            }
        }
    }

    outcomes
}

/// Logs one line summarising a dispatch.  Returns whether every target
/// was signalled.
pub fn log_summary(outcomes: &[SignalOutcome]) -> bool {
    let mut delivered = Vec::new();
    let mut failed = Vec::new();
    let mut missing = 0;
    for outcome in outcomes {
        match outcome {
            SignalOutcome::Delivered { id } => delivered.push(id.as_str()),
            SignalOutcome::Failed { id } => failed.push(id.as_str()),
            SignalOutcome::NotFound => missing += 1,
        }
    }

    if failed.is_empty() && missing == 0 {
        debug!("Signalled containers {:?}", delivered);
        true
    } else {
        warn!(
            "Signalled {:?}, failed {:?}, {} target(s) not running",
            delivered, failed, missing
        );
        false
    }
}
