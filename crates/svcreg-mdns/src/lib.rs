//! Multicast DNS service registry
//!
//! Services register under a domain and are mirrored into the global domain, so
//! a query for `*` sees every origin domain at once. Each node becomes one
//! advertised record carrying its descriptor in the record's text fields; each
//! service additionally gets a listing record so services can be enumerated.
//!
//! # Architecture
//!
//! - [`codec`]: descriptor to text fields and back (JSON, zlib, hex, 255-char chunks)
//! - [`store`]: what this process has advertised, per domain and service
//! - [`registrar`]: register/deregister, local domain first, then global
//! - [`query`]: deadline-bounded point lookups and listings
//! - [`watch`]: one shared listen stream fanned out to per-watcher queues
//! - [`transport`]: the `mdns-sd` backed transport and an in-process one
//!
//! # Example
//!
//! ```no_run
//! use svcreg_core::{GetOptions, Node, RegisterOptions, Registry, RegistryConfig, Service};
//! use svcreg_mdns::MdnsRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = MdnsRegistry::new(RegistryConfig::default())?;
//!
//!     let service = Service::new("greeter", "1.0.0").with_node(Node::new("n1", "10.0.0.1:8080"));
//!     registry.register(&service, RegisterOptions::default()).await?;
//!
//!     // Every origin domain
//!     let found = registry.get_service("greeter", GetOptions::domain("*")).await?;
//!     println!("{} versions", found.len());
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod query;
pub mod registrar;
pub mod registry;
pub mod store;
pub mod transport;
pub mod watch;

pub use registry::MdnsRegistry;
pub use transport::{MdnsTransport, MemoryTransport, Transport};
pub use watch::{ListenerState, MdnsWatcher};
