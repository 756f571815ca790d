//! Derives the routing model from a registry snapshot.
//!
//! Hostnames are rebuilt from scratch on every regeneration.  Containers
//! are visited in ID order, so when several containers share a hostname
//! the one with the greatest ID wins conflicting header or auth values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::registry::Snapshot;
use crate::types::Container;

/// A primary domain name and everything routed through it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hostname {
    pub name: String,
    pub alternatives: BTreeSet<String>,
    pub containers: Vec<Arc<Container>>,
    pub headers: BTreeMap<String, String>,
    pub requires_auth: bool,
    pub auth_group: Option<String>,
}

impl Hostname {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alternatives: BTreeSet::new(),
            containers: Vec::new(),
            headers: BTreeMap::new(),
            requires_auth: false,
            auth_group: None,
        }
    }

    fn update(&mut self, alternates: &[String], container: &Arc<Container>) {
        self.containers.push(Arc::clone(container));
        self.alternatives.extend(alternates.iter().cloned());
        self.headers.extend(container.headers());

        if let Some(group) = container.auth_group() {
            self.requires_auth = true;
            self.auth_group = Some(group.to_string());
        }
    }
}

/// Builds the mapping of primary hostnames for every proxyable container.
pub fn hostnames(containers: &Snapshot) -> BTreeMap<String, Hostname> {
    let mut hostnames: BTreeMap<String, Hostname> = BTreeMap::new();

    for container in containers.values() {
        let Some(names) = container.vhosts() else {
            continue;
        };
        if !container.should_proxy() {
            continue;
        }

        let (primary, alternates) = names.split_at(1);
        hostnames
            .entry(primary[0].clone())
            .or_insert_with(|| Hostname::new(&primary[0]))
            .update(alternates, container);
    }

    hostnames
}
