//! The registry and watcher seams, plus per-operation options.
//!
//! An empty domain in any option struct means "use the registry's default
//! domain". Queries and watches also accept [`WILDCARD_DOMAIN`], which backends
//! resolve to [`GLOBAL_DOMAIN`] so a single call sees every origin domain.
//!
//! [`WILDCARD_DOMAIN`]: crate::config::WILDCARD_DOMAIN
//! [`GLOBAL_DOMAIN`]: crate::config::GLOBAL_DOMAIN

use crate::error::Result;
use crate::types::{Service, WatchResult};
use async_trait::async_trait;
use std::time::Duration;

/// Effective options of a registry instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Domain used when an operation does not name one
    pub default_domain: String,
    /// How long queries collect answers
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    pub domain: Option<String>,
}

impl RegisterOptions {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeregisterOptions {
    pub domain: Option<String>,
}

impl DeregisterOptions {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub domain: Option<String>,
}

impl GetOptions {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub domain: Option<String>,
}

impl ListOptions {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
        }
    }
}

/// Options for a watch subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Only report changes for this service name
    pub service: Option<String>,
    pub domain: Option<String>,
}

impl WatchOptions {
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Resolves an optional domain against a default, treating empty as absent.
pub fn resolve_domain(domain: Option<&str>, default_domain: &str) -> String {
    match domain {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => default_domain.to_string(),
    }
}

/// A service registry backend.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Watcher type returned by [`Registry::watch`].
    type Watcher: Watcher;

    /// Returns the effective options.
    fn options(&self) -> RegistryOptions;

    /// Short backend name.
    fn name(&self) -> &'static str;

    /// Advertises every node of `service` not already advertised.
    async fn register(&self, service: &Service, opts: RegisterOptions) -> Result<()>;

    /// Withdraws the nodes of `service`.
    async fn deregister(&self, service: &Service, opts: DeregisterOptions) -> Result<()>;

    /// Returns one service per version of `name` currently visible.
    async fn get_service(&self, name: &str, opts: GetOptions) -> Result<Vec<Service>>;

    /// Returns the names of all services currently visible.
    async fn list_services(&self, opts: ListOptions) -> Result<Vec<Service>>;

    /// Subscribes to service changes.
    async fn watch(&self, opts: WatchOptions) -> Result<Self::Watcher>;
}

/// A live subscription to service changes.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Waits for the next change that passes this watcher's filters.
    ///
    /// Returns `RegistryError::WatcherStopped` once [`Watcher::stop`] was called.
    async fn next(&self) -> Result<WatchResult>;

    /// Stops the watcher. Calling it again is a no-op.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_domain() {
        assert_eq!(resolve_domain(None, "micro"), "micro");
        assert_eq!(resolve_domain(Some(""), "micro"), "micro");
        assert_eq!(resolve_domain(Some("team-a"), "micro"), "team-a");
    }

    #[test]
    fn test_watch_options_builder() {
        let opts = WatchOptions::default().service("greeter").in_domain("*");
        assert_eq!(opts.service.as_deref(), Some("greeter"));
        assert_eq!(opts.domain.as_deref(), Some("*"));
    }
}
