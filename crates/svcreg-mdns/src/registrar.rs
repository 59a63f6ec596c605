//! Registration and deregistration of services.
//!
//! Each call performs the local-domain step under the store lock, releases it,
//! and then repeats the same step against the global domain with every node's
//! metadata carrying its origin domain. Errors from either step are reported
//! (first one wins) but never roll back what already took effect.

use crate::codec::{self, Descriptor};
use crate::store::{AdvertisedRecord, DomainStore, WILDCARD_ID};
use crate::transport::{RecordHandle, RecordSpec, Transport, SERVICES_RECORD};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use svcreg_core::{Node, RegistryError, Result, Service, GLOBAL_DOMAIN};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Metadata key recording a node's origin domain in the global mirror.
pub const DOMAIN_METADATA_KEY: &str = "domain";

pub struct Registrar<T: Transport> {
    transport: Arc<T>,
    /// Held for the whole local step, transport calls included
    store: Mutex<DomainStore>,
}

impl<T: Transport> Registrar<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            store: Mutex::new(DomainStore::new()),
        }
    }

    /// Advertises every node of `service` in `domain` and mirrors it into the
    /// global domain.
    pub async fn register(&self, service: &Service, domain: &str) -> Result<()> {
        let local = self.register_in(service, domain).await;
        if domain == GLOBAL_DOMAIN {
            return local;
        }

        let global = self
            .register_in(&mirror(service, domain), GLOBAL_DOMAIN)
            .await;
        local.and(global)
    }

    /// Withdraws the nodes of `service` from `domain` and from the global mirror.
    pub async fn deregister(&self, service: &Service, domain: &str) -> Result<()> {
        let local = self.deregister_in(service, domain).await;
        if domain == GLOBAL_DOMAIN {
            return local;
        }

        let global = self.deregister_in(service, GLOBAL_DOMAIN).await;
        local.and(global)
    }

    /// Ids of the records stored for a service, listing record included.
    pub async fn record_ids(&self, domain: &str, service: &str) -> Vec<String> {
        self.store
            .lock()
            .await
            .records(domain, service)
            .map(|records| records.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Domains currently holding registrations.
    pub async fn domains(&self) -> Vec<String> {
        self.store.lock().await.domains()
    }

    async fn register_in(&self, service: &Service, domain: &str) -> Result<()> {
        let mut store = self.store.lock().await;

        let mut records = store.take_records(domain, &service.name);
        let created_listing = records.is_empty();
        if created_listing {
            let handle = self
                .transport
                .advertise(listing_record(&service.name, domain))
                .await?;
            records.push(AdvertisedRecord::new(WILDCARD_ID, handle));
        }

        let mut first_err = None;
        for node in &service.nodes {
            if records.iter().any(|r| r.id == node.id) {
                continue;
            }

            match self.advertise_node(service, node, domain).await {
                Ok(handle) => {
                    debug!(
                        service = %service.name,
                        node = %node.id,
                        address = %node.address,
                        domain = domain,
                        "Node advertised"
                    );
                    records.push(AdvertisedRecord::new(node.id.clone(), handle));
                }
                Err(e) => {
                    warn!(
                        service = %service.name,
                        node = %node.id,
                        domain = domain,
                        error = %e,
                        "Failed to advertise node"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }

        // a listing record only lives alongside at least one node record
        if created_listing && records.len() == 1 {
            let listing = records.remove(0);
            if let Err(e) = self.transport.shutdown(&listing.handle).await {
                warn!(service = %service.name, domain = domain, error = %e, "Failed to withdraw listing record");
                first_err.get_or_insert(e.into());
                records.push(listing);
            }
        }

        store.set_records(domain, &service.name, records);
        first_err.map_or(Ok(()), Err)
    }

    async fn deregister_in(&self, service: &Service, domain: &str) -> Result<()> {
        let mut store = self.store.lock().await;

        if !store.has_domain(domain) {
            return Ok(());
        }

        let mut first_err = None;
        let mut remaining = Vec::new();
        for record in store.take_records(domain, &service.name) {
            let requested = !record.is_wildcard() && service.nodes.iter().any(|n| n.id == record.id);
            if !requested {
                remaining.push(record);
                continue;
            }

            match self.transport.shutdown(&record.handle).await {
                Ok(()) => debug!(service = %service.name, node = %record.id, domain = domain, "Node withdrawn"),
                Err(e) => {
                    warn!(service = %service.name, node = %record.id, domain = domain, error = %e, "Failed to withdraw node");
                    first_err.get_or_insert(RegistryError::from(e));
                    // still advertised, keep it so a later call can retry
                    remaining.push(record);
                }
            }
        }

        if remaining.len() == 1 && remaining[0].is_wildcard() {
            let listing = remaining.remove(0);
            match self.transport.shutdown(&listing.handle).await {
                Ok(()) => info!(service = %service.name, domain = domain, "Service removed from domain"),
                Err(e) => {
                    warn!(service = %service.name, domain = domain, error = %e, "Failed to withdraw listing record");
                    first_err.get_or_insert(e.into());
                    remaining.push(listing);
                }
            }
        }

        store.set_records(domain, &service.name, remaining);
        first_err.map_or(Ok(()), Err)
    }

    async fn advertise_node(&self, service: &Service, node: &Node, domain: &str) -> Result<RecordHandle> {
        let text = codec::encode(&Descriptor {
            service: service.name.clone(),
            version: service.version.clone(),
            endpoints: service.endpoints.clone(),
            metadata: node.metadata.clone(),
        })?;

        let address = parse_address(&node.address)?;

        let handle = self
            .transport
            .advertise(RecordSpec {
                instance: node.id.clone(),
                service: service.name.clone(),
                domain: domain.to_string(),
                port: address.port(),
                addresses: vec![address.ip()],
                text,
            })
            .await?;
        Ok(handle)
    }
}

/// The listing record that makes a service name enumerable.
fn listing_record(service: &str, domain: &str) -> RecordSpec {
    RecordSpec {
        instance: service.to_string(),
        service: SERVICES_RECORD.to_string(),
        domain: domain.to_string(),
        port: 0,
        addresses: vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)],
        text: Vec::new(),
    }
}

/// Copy of `service` whose nodes record `domain` as their origin.
fn mirror(service: &Service, domain: &str) -> Service {
    let mut mirrored = service.clone();
    for node in &mut mirrored.nodes {
        node.metadata
            .insert(DOMAIN_METADATA_KEY.to_string(), domain.to_string());
    }
    mirrored
}

/// Parses a `host:port` node address; IPv6 hosts must be bracketed.
pub fn parse_address(address: &str) -> Result<SocketAddr> {
    address
        .parse::<SocketAddr>()
        .map_err(|e| RegistryError::address(address, e.to_string()))
}
