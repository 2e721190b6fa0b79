//! Data structures passed between the probe, the runtime and the store.
//!
//! [`AddressRecord`] is produced fresh on every poll of `weave ps` and is
//! never cached; only its fields end up in the key-value store.
//! [`LifecycleEvent`] is the reduced form of a Docker container event.

use serde::{Deserialize, Serialize};

/// Length of the truncated container identifier used as correlation key.
pub const SHORT_ID_LEN: usize = 12;

/// Truncates a container id to its short form. Shorter input is returned as is.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// One container's overlay address as reported by the discovery tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Short container id, or a sentinel such as `weave:expose`.
    pub id: String,
    /// Human-readable name, empty until resolved.
    pub name: String,
    pub mac: String,
    pub ip: String,
    /// Prefix length, kept as the literal text after the `/`.
    pub cidr: String,
}

impl AddressRecord {
    pub fn new(
        id: impl Into<String>,
        mac: impl Into<String>,
        ip: impl Into<String>,
        cidr: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            mac: mac.into(),
            ip: ip.into(),
            cidr: cidr.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Container lifecycle statuses the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Die,
    /// Anything else the daemon reports (`create`, `stop`, ...).
    Other(String),
}

impl From<&str> for EventStatus {
    fn from(s: &str) -> Self {
        match s {
            "start" => EventStatus::Start,
            "die" => EventStatus::Die,
            other => EventStatus::Other(other.to_string()),
        }
    }
}

/// A container lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Full container id as reported by the runtime.
    pub id: String,
    pub status: EventStatus,
    /// Image the container was started from.
    pub from: String,
}

impl LifecycleEvent {
    pub fn new(id: impl Into<String>, status: impl Into<EventStatus>, from: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            from: from.into(),
        }
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Minimal view of a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
}
