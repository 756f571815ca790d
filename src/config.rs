use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::debounce::{DEFAULT_CEILING, DEFAULT_QUIET};
use crate::monitor::{DEFAULT_POLL_INTERVAL, DEFAULT_RESYNC_INTERVAL};
use crate::types::split_list;

/// Which monitor strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    #[default]
    Streaming,
    Polling,
}

/// A template source and where its output is written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A container to signal whenever template output changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContainerSignal {
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub signal: String,
}

/// A user exposed to templates for access control.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Extra logging switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub containers: bool,
    pub headers: bool,
    pub hostnames: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub templates: Vec<TemplateConfig>,
    pub signals: Vec<ContainerSignal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_container: Option<String>,
    pub signal_type: String,
    pub users: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_tag: Option<String>,
    pub debug: String,
    pub monitor: MonitorMode,
    pub poll_interval_secs: u64,
    pub resync_interval_secs: u64,
    pub debounce_quiet_ms: u64,
    pub debounce_ceiling_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            templates: vec![TemplateConfig {
                source: "./templates/haproxy.cfg.tpl".into(),
                destination: "/data/output/haproxy.cfg".into(),
            }],
            signals: Vec::new(),
            signal_container: None,
            signal_type: "HUP".into(),
            users: Vec::new(),
            proxy_tag: None,
            debug: String::new(),
            monitor: MonitorMode::Streaming,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL.as_secs(),
            debounce_quiet_ms: DEFAULT_QUIET.as_millis() as u64,
            debounce_ceiling_secs: DEFAULT_CEILING.as_secs(),
        }
    }
}

/// Environment keys taken verbatim rather than parsed, so that values such
/// as `2024` or `007` stay strings.
const STRING_KEYS: &[&str] = &["signal_container", "signal_type", "proxy_tag", "debug"];

impl Config {
    /// Layers defaults, `dockgen.toml`, `dockgen.json` and `DOCKGEN_*`
    /// environment variables.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("dockgen.toml"))
            .merge(Json::file("dockgen.json"))
            .merge(Env::prefixed("DOCKGEN_").ignore(STRING_KEYS));
        for (key, value) in Env::prefixed("DOCKGEN_").only(STRING_KEYS).iter() {
            figment = figment.merge(Serialized::global(key.as_str(), value));
        }
        figment
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Single-container shorthand.
        if let Some(name) = config.signal_container.take().filter(|n| !n.is_empty()) {
            config.signals.push(ContainerSignal {
                name,
                signal: config.signal_type.clone(),
            });
        }

        if config.proxy_tag.as_deref() == Some("") {
            config.proxy_tag = None;
        }

        if config.templates.is_empty() {
            anyhow::bail!("At least one template must be configured");
        }
        for (name, value) in [
            ("poll_interval_secs", config.poll_interval_secs),
            ("resync_interval_secs", config.resync_interval_secs),
            ("debounce_quiet_ms", config.debounce_quiet_ms),
            ("debounce_ceiling_secs", config.debounce_ceiling_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        Ok(config)
    }

    pub fn debug_flags(&self) -> DebugFlags {
        let mut flags = DebugFlags::default();
        for flag in split_list(&self.debug.to_lowercase()) {
            match flag.as_str() {
                "containers" => flags.containers = true,
                "headers" => flags.headers = true,
                "hostnames" => flags.hostnames = true,
                _ => {}
            }
        }
        flags
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn debounce_quiet(&self) -> Duration {
        Duration::from_millis(self.debounce_quiet_ms)
    }

    pub fn debounce_ceiling(&self) -> Duration {
        Duration::from_secs(self.debounce_ceiling_secs)
    }
}

/// Accepts any scalar where a string is expected.  Inline values such as
/// `{name = 7}` arrive as numbers.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct ScalarVisitor;

    impl Visitor<'_> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a string, number or boolean")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}
