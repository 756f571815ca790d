use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the container runtime client.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("runtime returned a container without an ID")]
    MissingId,
}

/// Failures that stop a monitor.  The process treats every one as fatal.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("unable to list containers: {0}")]
    List(#[source] RuntimeError),
    #[error("unable to inspect container {id}: {source}")]
    Inspect {
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("error in event stream: {0}")]
    Events(#[source] RuntimeError),
    #[error("event stream ended unexpectedly")]
    EventsClosed,
    #[error("event channel closed")]
    ChannelClosed,
}

/// Failures while loading, rendering or writing templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unable to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse template {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },
    #[error("unable to render template {path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },
    #[error("unable to write template to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
