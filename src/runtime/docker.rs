use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, KillContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, ContainerSummary, EventMessage, PortTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, info};

use super::{Action, ContainerRuntime, RuntimeEvent};
use crate::error::RuntimeError;
use crate::types::Container;

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the local defaults (unix socket, or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        info!("Connected to Docker using local defaults");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        containers.into_iter().map(container_from_summary).collect()
    }

    async fn inspect_container(&self, id: &str) -> Result<Container, RuntimeError> {
        let detail = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        container_from_inspect(detail)
    }

    fn events(&self, since: SystemTime) -> BoxStream<'static, Result<RuntimeEvent, RuntimeError>> {
        self.docker
            .events(Some(events_options(since)))
            .filter_map(|msg| async move {
                match msg {
                    Ok(event) => runtime_event(event).map(Ok),
                    Err(e) => Some(Err(RuntimeError::from(e))),
                }
            })
            .boxed()
    }

    async fn signal_container(&self, id: &str, signal: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal }))
            .await?;
        Ok(())
    }
}

/// Filters to the container lifecycle actions of interest.  `since` is
/// sent in whole seconds, rounded down.
fn events_options(since: SystemTime) -> EventsOptions<String> {
    let since = since
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    EventsOptions::<String> {
        since: Some(since.to_string()),
        filters: [
            ("type", ["container"].as_slice()),
            ("event", ["create", "destroy", "rename"].as_slice()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect(),
        ..Default::default()
    }
}

fn runtime_event(event: EventMessage) -> Option<RuntimeEvent> {
    let action = match event.action.as_deref() {
        Some("create") => Action::Create,
        Some("destroy") => Action::Destroy,
        Some("rename") => Action::Rename,
        other => {
            debug!("Ignoring container event {:?}", other);
            return None;
        }
    };
    let id = event.actor.and_then(|actor| actor.id)?;
    Some(RuntimeEvent { action, id })
}

fn container_from_summary(summary: ContainerSummary) -> Result<Container, RuntimeError> {
    let id = summary.id.ok_or(RuntimeError::MissingId)?;
    let name = summary
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    // Ports only published on the host are reachable from outside; the
    // proxy talks to the remaining ones over the container network.
    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.typ == Some(PortTypeEnum::TCP) && p.public_port.unwrap_or(0) == 0)
        .map(|p| p.private_port)
        .collect();

    Ok(Container {
        id,
        name,
        labels: summary.labels.unwrap_or_default(),
        ports,
    })
}

fn container_from_inspect(detail: ContainerInspectResponse) -> Result<Container, RuntimeError> {
    let id = detail.id.ok_or(RuntimeError::MissingId)?;
    let name = detail
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let (labels, exposed) = match detail.config {
        Some(config) => (
            config.labels.unwrap_or_default(),
            config
                .exposed_ports
                .map(|ports| ports.into_keys().collect::<Vec<_>>())
                .unwrap_or_default(),
        ),
        None => (HashMap::new(), Vec::new()),
    };
    let bindings = detail.host_config.and_then(|h| h.port_bindings).unwrap_or_default();

    let ports = exposed
        .iter()
        .filter(|spec| {
            !bindings
                .get(spec.as_str())
                .is_some_and(|b| b.as_ref().is_some_and(|b| !b.is_empty()))
        })
        .filter_map(|spec| tcp_port(spec))
        .collect();

    Ok(Container {
        id,
        name,
        labels,
        ports,
    })
}

/// Parses a port spec such as `8080/tcp`, returning the port for TCP specs.
fn tcp_port(spec: &str) -> Option<u16> {
    match spec.split_once('/') {
        Some((port, "tcp")) => port.parse().ok(),
        Some(_) => None,
        None => spec.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use bollard::models::{ContainerConfig, EventActor, HostConfig, Port, PortBinding};

    #[test]
    fn summary_keeps_unpublished_tcp_ports() {
        let summary = ContainerSummary {
            id: Some("abc".into()),
            names: Some(vec!["/web".into()]),
            labels: Some(HashMap::from([("dockgen.vhost".into(), "a.com".into())])),
            ports: Some(vec![
                Port {
                    private_port: 8080,
                    typ: Some(PortTypeEnum::TCP),
                    ..Default::default()
                },
                Port {
                    private_port: 443,
                    public_port: Some(8443),
                    typ: Some(PortTypeEnum::TCP),
                    ..Default::default()
                },
                Port {
                    private_port: 53,
                    typ: Some(PortTypeEnum::UDP),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let c = container_from_summary(summary).unwrap();
        assert_eq!(c.id, "abc");
        assert_eq!(c.name, "web");
        assert_eq!(c.ports, BTreeSet::from([8080]));
        assert_eq!(c.labels["dockgen.vhost"], "a.com");
    }

    #[test]
    fn summary_without_id_is_rejected() {
        assert!(matches!(
            container_from_summary(ContainerSummary::default()),
            Err(RuntimeError::MissingId)
        ));
    }

    #[test]
    fn inspect_excludes_bound_ports() {
        let detail = ContainerInspectResponse {
            id: Some("def".into()),
            name: Some("/api".into()),
            config: Some(ContainerConfig {
                exposed_ports: Some(HashMap::from([
                    ("9090/tcp".to_string(), HashMap::new()),
                    ("80/tcp".to_string(), HashMap::new()),
                    ("53/udp".to_string(), HashMap::new()),
                ])),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                port_bindings: Some(HashMap::from([(
                    "80/tcp".to_string(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some("8000".into()),
                    }]),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let c = container_from_inspect(detail).unwrap();
        assert_eq!(c.name, "api");
        assert_eq!(c.ports, BTreeSet::from([9090]));
    }

    #[test]
    fn events_map_to_actions() {
        let event = |action: &str| EventMessage {
            action: Some(action.into()),
            actor: Some(EventActor {
                id: Some("abc".into()),
                attributes: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            runtime_event(event("rename")),
            Some(RuntimeEvent {
                action: Action::Rename,
                id: "abc".into()
            })
        );
        assert_eq!(runtime_event(event("start")), None);
    }

    #[test]
    fn events_replay_from_whole_seconds() {
        let since = UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_900);
        let opts = events_options(since);
        assert_eq!(opts.since.as_deref(), Some("1700000000"));
        assert_eq!(
            opts.filters["event"],
            vec!["create".to_string(), "destroy".into(), "rename".into()]
        );
    }

    #[test]
    fn port_specs() {
        assert_eq!(tcp_port("8080/tcp"), Some(8080));
        assert_eq!(tcp_port("8080/udp"), None);
        assert_eq!(tcp_port("8080"), Some(8080));
    }
}
