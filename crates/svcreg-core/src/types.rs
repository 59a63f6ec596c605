//! Core data types for registered services.
//!
//! A [`Service`] is the registration unit: a descriptor (name, version, endpoints,
//! metadata) plus the [`Node`]s currently running it. Register and deregister
//! calls operate on whole `Service` values; overlapping node ids are merged, not
//! replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A deployable unit and the nodes currently running it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service name, shared by every version and node
    pub name: String,

    /// Version distinguishing concurrently registered variants
    #[serde(default)]
    pub version: String,

    /// Service-level metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Endpoints exposed by the service
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Running instances
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Service {
    /// Creates a service with no nodes or endpoints.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Creates a name-only service, as returned by listing queries.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a node.
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Adds a service-level metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the node with the given id, if present.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One running instance of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within the service
    pub id: String,

    /// `host:port` address; IPv6 hosts may be bracketed
    pub address: String,

    /// Per-node metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    /// Creates a node without metadata.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An endpoint exposed by a service, with optional request/response shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,

    #[serde(default)]
    pub request: Option<Value>,

    #[serde(default)]
    pub response: Option<Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Recursive description of a request or response type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<Value>,
}

impl Value {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            values: Vec::new(),
        }
    }

    pub fn with_field(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }
}

/// Kind of change reported by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// A node record appeared or was refreshed
    Create,
    /// A node record was withdrawn
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change delivered by a watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchResult {
    pub action: Action,

    /// The service carrying exactly the node that changed
    pub service: Service,

    /// When the watcher decoded the event
    pub observed_at: DateTime<Utc>,
}

impl WatchResult {
    pub fn new(action: Action, service: Service) -> Self {
        Self {
            action,
            service,
            observed_at: Utc::now(),
        }
    }
}

/// Deserializes `null` as the type's default value.
///
/// Other registry implementations emit `null` for empty collections.
pub fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
