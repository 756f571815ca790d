use std::time::SystemTime;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RuntimeError;
use crate::types::Container;

pub mod docker;
pub use docker::DockerRuntime;

/// Container lifecycle actions the monitors subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Destroy,
    Rename,
}

/// A single lifecycle event reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub action: Action,
    pub id: String,
}

/// Access to the container runtime.
///
/// Listing returns only running containers.  Errors are assumed transient
/// by the runtime but the monitors treat them as fatal.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Lists all running containers.
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError>;

    /// Fetches full details of a single container.
    async fn inspect_container(&self, id: &str) -> Result<Container, RuntimeError>;

    /// Subscribes to create, destroy and rename events, replaying those
    /// that happened at or after `since`.
    fn events(&self, since: SystemTime) -> BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

    /// Delivers a named signal (e.g. `HUP`) to a container.
    async fn signal_container(&self, id: &str, signal: &str) -> Result<(), RuntimeError>;
}
