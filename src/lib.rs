//! svcreg - multicast DNS service registry
//!
//! One façade over the workspace crates:
//! - [`core`]: data model, `Registry`/`Watcher` traits, errors and configuration
//! - [`mdns`]: the multicast registry and its transports

pub use svcreg_core as core;
pub use svcreg_mdns as mdns;

pub use svcreg_core::{
    Action, DeregisterOptions, Endpoint, GetOptions, ListOptions, Node, RegisterOptions,
    Registry, RegistryConfig, RegistryError, RegistryOptions, Result, Service, Value,
    WatchOptions, WatchResult, Watcher, GLOBAL_DOMAIN, WILDCARD_DOMAIN,
};
pub use svcreg_mdns::{MdnsRegistry, MdnsTransport, MdnsWatcher, MemoryTransport, Transport};
