//! The mDNS registry: registrar, query engine and watch hub over one transport.

use crate::query::{query_domain, QueryEngine};
use crate::registrar::Registrar;
use crate::transport::{MdnsTransport, Transport};
use crate::watch::{HubConfig, ListenerState, MdnsWatcher, WatchHub};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use svcreg_core::{
    resolve_domain, DeregisterOptions, GetOptions, ListOptions, RegisterOptions, Registry,
    RegistryConfig, RegistryOptions, Result, Service, WatchOptions,
};
use tracing::{debug, info};

/// Multicast DNS service registry.
///
/// Generic over the transport so the same registry runs on real multicast
/// ([`MdnsTransport`]) or in-process ([`crate::transport::MemoryTransport`]).
pub struct MdnsRegistry<T: Transport = MdnsTransport> {
    config: RegistryConfig,
    transport: Arc<T>,
    registrar: Registrar<T>,
    query: QueryEngine<T>,
    hub: WatchHub<T>,
}

impl MdnsRegistry<MdnsTransport> {
    /// Creates a registry on the multicast transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let transport = MdnsTransport::new(&config.mdns)?;
        Self::with_transport(config, Arc::new(transport))
    }
}

impl<T: Transport> MdnsRegistry<T> {
    /// Creates a registry on an existing transport.
    pub fn with_transport(config: RegistryConfig, transport: Arc<T>) -> Result<Self> {
        config.validate()?;

        let hub = WatchHub::new(
            transport.clone(),
            HubConfig {
                watch_queue_capacity: config.watch_queue_capacity,
                listener_queue_capacity: config.listener_queue_capacity,
                restart_backoff: config.listener_restart_backoff(),
            },
        );

        info!(
            default_domain = %config.default_domain,
            timeout_ms = config.timeout_ms,
            "Registry created"
        );

        Ok(Self {
            registrar: Registrar::new(transport.clone()),
            query: QueryEngine::new(transport.clone(), config.timeout()),
            hub,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Domains holding at least one record advertised by this registry.
    pub async fn local_domains(&self) -> Vec<String> {
        self.registrar.domains().await
    }

    /// Ids of the records this registry advertised for a service, listing record included.
    pub async fn advertised_ids(&self, domain: &str, service: &str) -> Vec<String> {
        self.registrar.record_ids(domain, service).await
    }

    pub fn listener_state(&self) -> ListenerState {
        self.hub.listener_state()
    }

    pub fn watcher_count(&self) -> usize {
        self.hub.watcher_count()
    }

    fn domain(&self, domain: Option<&str>) -> String {
        resolve_domain(domain, &self.config.default_domain)
    }
}

#[async_trait]
impl<T: Transport> Registry for MdnsRegistry<T> {
    type Watcher = MdnsWatcher;

    fn options(&self) -> RegistryOptions {
        RegistryOptions {
            default_domain: self.config.default_domain.clone(),
            timeout: self.config.timeout(),
        }
    }

    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn register(&self, service: &Service, opts: RegisterOptions) -> Result<()> {
        let domain = self.domain(opts.domain.as_deref());
        debug!(service = %service.name, domain = %domain, nodes = service.nodes.len(), "Register");
        self.registrar.register(service, &domain).await
    }

    async fn deregister(&self, service: &Service, opts: DeregisterOptions) -> Result<()> {
        let domain = self.domain(opts.domain.as_deref());
        debug!(service = %service.name, domain = %domain, nodes = service.nodes.len(), "Deregister");
        self.registrar.deregister(service, &domain).await
    }

    async fn get_service(&self, name: &str, opts: GetOptions) -> Result<Vec<Service>> {
        let domain = self.domain(opts.domain.as_deref());
        self.query.get_service(name, &domain).await
    }

    async fn list_services(&self, opts: ListOptions) -> Result<Vec<Service>> {
        let domain = self.domain(opts.domain.as_deref());
        self.query.list_services(&domain).await
    }

    async fn watch(&self, opts: WatchOptions) -> Result<MdnsWatcher> {
        let domain = self.domain(opts.domain.as_deref());
        Ok(self.hub.watch(opts.service, query_domain(&domain)))
    }
}

impl<T: Transport> fmt::Display for MdnsRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
