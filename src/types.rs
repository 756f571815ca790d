//! Data structures passed between the monitor, the registry and the
//! render loop.
//!
//! A [`Container`] is built once from runtime data and never edited
//! afterwards; a changed container simply arrives again as a new
//! [`ContainerEvent::Added`] and replaces the old record.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::warn;
use serde::{Serialize, Serializer};

/// Domain names to route to the container, comma and/or space separated.
pub const LABEL_VHOST: &str = "dockgen.vhost";
/// Explicit port the container accepts traffic on.
pub const LABEL_PROXY: &str = "dockgen.proxy";
/// Tag compared against the configured `proxy_tag`.
pub const LABEL_PROXY_TAG: &str = "dockgen.proxytag";
/// Prefix for header labels, e.g. `dockgen.headers.csp`.
pub const LABEL_HEADERS: &str = "dockgen.headers";
/// Access group required to reach the container's hostname.
pub const LABEL_AUTH: &str = "dockgen.auth";

/// A lifecycle change observed by a monitor.
///
/// `Added` always carries the full container; consumers treat it as an
/// upsert so repeated deliveries are harmless.  `Removed` only needs the ID.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    Added(Container),
    Removed { id: String },
}

/// A running container as seen by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// TCP ports the container listens on that are not published on the host.
    pub ports: BTreeSet<u16>,
}

impl Container {
    /// Returns the value of the tag label, or an empty string when unset.
    pub fn proxy_tag(&self) -> &str {
        self.labels
            .get(LABEL_PROXY_TAG)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Returns the domain names from the vhost label, primary first.
    pub fn vhosts(&self) -> Option<Vec<String>> {
        let names = split_list(self.labels.get(LABEL_VHOST)?);
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }

    /// Resolves the port traffic should be sent to.
    ///
    /// An explicit proxy label always takes precedence, even when it is
    /// invalid.  Without one, the container must expose exactly one port.
    pub fn port(&self) -> Option<u16> {
        if let Some(value) = self.labels.get(LABEL_PROXY) {
            return match parse_port(value) {
                Ok(port) => Some(port),
                Err(reason) => {
                    warn!(
                        "Invalid port specification on container {}: {} ({})",
                        self.name, value, reason
                    );
                    None
                }
            };
        }

        if self.ports.len() == 1 {
            self.ports.first().copied()
        } else {
            None
        }
    }

    /// Whether the container has both a hostname and a usable port.
    pub fn should_proxy(&self) -> bool {
        self.vhosts().is_some() && self.port().is_some()
    }

    /// Returns the headers declared via header labels.
    ///
    /// Labels are visited in key order so the result does not depend on
    /// the runtime's label ordering.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut keys: Vec<&String> = self
            .labels
            .keys()
            .filter(|k| k.starts_with(LABEL_HEADERS))
            .collect();
        keys.sort();

        let mut headers = BTreeMap::new();
        for key in keys {
            let value = &self.labels[key];
            match parse_header(value) {
                Some((name, value)) => {
                    headers.insert(name, value);
                }
                None => warn!(
                    "Container {} has invalid label {} ({}) - expecting name and value",
                    self.name, key, value
                ),
            }
        }
        headers
    }

    /// Returns the access group from the auth label, if any.
    pub fn auth_group(&self) -> Option<&str> {
        self.labels.get(LABEL_AUTH).map(String::as_str)
    }
}

/// Shape of a container as seen by templates: the raw fields plus the
/// values derived from its labels.
#[derive(Serialize)]
struct ContainerView<'a> {
    id: &'a str,
    name: &'a str,
    labels: BTreeMap<&'a str, &'a str>,
    ports: &'a BTreeSet<u16>,
    port: Option<u16>,
    should_proxy: bool,
    headers: BTreeMap<String, String>,
}

impl Serialize for Container {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let port = self.port();
        ContainerView {
            id: &self.id,
            name: &self.name,
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            ports: &self.ports,
            port,
            should_proxy: port.is_some() && self.vhosts().is_some(),
            headers: self.headers(),
        }
        .serialize(serializer)
    }
}

/// Splits a list on commas and spaces, dropping empty entries.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split([',', ' '])
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a port label value, which must be an integer in 1..=65535.
pub fn parse_port(value: &str) -> Result<u16, String> {
    let port: i64 = value.trim().parse().map_err(|e| format!("{}", e))?;
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err("out of range".to_string()),
    }
}

/// Parses a header label of the form `Name: value`.
///
/// The name ends at the first whitespace; a trailing colon is stripped.
pub fn parse_header(value: &str) -> Option<(String, String)> {
    let (name, rest) = value.trim_start().split_once(char::is_whitespace)?;
    let name = name.trim_end_matches(':').trim();
    let rest = rest.trim();
    if name.is_empty() || rest.is_empty() {
        return None;
    }
    Some((name.to_string(), rest.to_string()))
}

#[cfg(test)]
pub(crate) fn container(id: &str, name: &str, labels: &[(&str, &str)], ports: &[u16]) -> Container {
    Container {
        id: id.to_string(),
        name: name.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ports: ports.iter().copied().collect(),
    }
}
