//! # svcreg core
//!
//! Backend-neutral building blocks for the svcreg service registry.
//!
//! - **Types**: `Service`, `Node`, `Endpoint` and `Value`, the registration unit
//!   that callers hand to a registry, plus the `WatchResult` produced by watchers.
//! - **Registry**: the `Registry` and `Watcher` traits every backend implements,
//!   together with the per-operation option structs.
//! - **Errors**: a `thiserror` hierarchy covering codec, addressing, transport and
//!   configuration failures.
//! - **Configuration**: `RegistryConfig`, loadable from YAML files with
//!   environment variable overrides.
//!
//! ## Example
//!
//! ```
//! use svcreg_core::types::{Node, Service};
//!
//! let service = Service::new("greeter", "1.0.0")
//!     .with_node(Node::new("greeter-1", "10.0.0.5:8080"));
//!
//! assert_eq!(service.nodes.len(), 1);
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{MdnsConfig, RegistryConfig, GLOBAL_DOMAIN, WILDCARD_DOMAIN};
pub use error::{CodecError, ConfigError, RegistryError, Result, TransportError};
pub use registry::{
    resolve_domain, DeregisterOptions, GetOptions, ListOptions, RegisterOptions, Registry,
    RegistryOptions, WatchOptions, Watcher,
};
pub use types::{Action, Endpoint, Node, Service, Value, WatchResult};
