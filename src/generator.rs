//! The render loop: on each debounce trigger, derive the routing model
//! from the latest registry snapshot, render templates and notify the
//! configured containers if anything changed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ContainerSignal, DebugFlags, User};
use crate::error::TemplateError;
use crate::hostnames::{hostnames, Hostname};
use crate::registry::Snapshot;
use crate::runtime::ContainerRuntime;
use crate::signals;
use crate::templates::Templates;
use crate::types::Container;

/// Everything a template can read.
#[derive(Debug, Serialize)]
pub struct Context<'a> {
    pub containers: &'a BTreeMap<String, Arc<Container>>,
    pub hostnames: BTreeMap<String, Hostname>,
    pub groups: BTreeSet<String>,
    pub users: &'a [User],
}

pub struct Generator<R> {
    runtime: Arc<R>,
    templates: Templates,
    signals: Vec<ContainerSignal>,
    users: Vec<User>,
    groups: BTreeSet<String>,
    tag_filtered: bool,
    debug: DebugFlags,
}

impl<R: ContainerRuntime> Generator<R> {
    pub fn new(runtime: Arc<R>, templates: Templates) -> Self {
        Self {
            runtime,
            templates,
            signals: Vec::new(),
            users: Vec::new(),
            groups: BTreeSet::new(),
            tag_filtered: false,
            debug: DebugFlags::default(),
        }
    }

    pub fn with_signals(mut self, signals: Vec<ContainerSignal>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.groups = users
            .iter()
            .flat_map(|u| u.groups.iter().cloned())
            .collect();
        self.users = users;
        self
    }

    pub fn with_tag_filter(mut self, tag_filtered: bool) -> Self {
        self.tag_filtered = tag_filtered;
        self
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    /// Regenerates on every trigger until cancelled.
    ///
    /// Cancellation is only observed between passes, so a write in
    /// progress always completes.
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<()>,
        snapshots: watch::Receiver<Snapshot>,
        cancel: CancellationToken,
    ) -> Result<(), TemplateError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                trigger = triggers.recv() => {
                    if trigger.is_none() {
                        return Ok(());
                    }
                    let snapshot = snapshots.borrow().clone();
                    self.regenerate(&snapshot).await?;
                }
            }
        }
    }

    /// Runs one pass.  Returns whether any template output changed.
    pub async fn regenerate(&mut self, snapshot: &Snapshot) -> Result<bool, TemplateError> {
        let context = Context {
            containers: snapshot,
            hostnames: hostnames(snapshot),
            groups: self.groups.clone(),
            users: &self.users,
        };
        self.log_debug(&context);

        let updated = self.templates.generate(&context).await?;
        if updated {
            let outcomes = signals::dispatch(
                self.runtime.as_ref(),
                &self.signals,
                snapshot,
                self.tag_filtered,
            )
            .await;
            signals::log_summary(&outcomes);
        } else {
            debug!("Templates unchanged, not sending signals");
        }
        Ok(updated)
    }

    fn log_debug(&self, context: &Context<'_>) {
        if self.debug.hostnames {
            match serde_json::to_string_pretty(&context.hostnames) {
                Ok(json) => info!("Hostnames: {}", json),
                Err(e) => warn!("Unable to serialise hostnames: {}", e),
            }
        }
        if self.debug.headers {
            for hostname in context.hostnames.values() {
                info!("Headers for {}: {:?}", hostname.name, hostname.headers);
            }
        }
    }
}
