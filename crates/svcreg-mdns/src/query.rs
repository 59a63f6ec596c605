//! Point lookups and listings over bounded-deadline browses.
//!
//! Both queries start a browse and collect whatever arrives until the deadline;
//! only a failure of the browse itself is an error. Records that don't decode, or
//! that belong to someone else, are skipped.

use crate::codec;
use crate::transport::{BrowseQuery, RawEvent, Transport, SERVICES_RECORD};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use svcreg_core::{Node, Result, Service, GLOBAL_DOMAIN, WILDCARD_DOMAIN};
use tracing::{debug, info, trace};

/// Capacity of the per-query answer channel
const BROWSE_CHANNEL_CAPACITY: usize = 10;

/// Resolves the wildcard domain selector to the global domain.
pub fn query_domain(domain: &str) -> &str {
    if domain == WILDCARD_DOMAIN {
        GLOBAL_DOMAIN
    } else {
        domain
    }
}

pub struct QueryEngine<T: Transport> {
    transport: Arc<T>,
    timeout: Duration,
}

impl<T: Transport> QueryEngine<T> {
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns one service per version of `name` seen before the deadline.
    pub async fn get_service(&self, name: &str, domain: &str) -> Result<Vec<Service>> {
        let domain = query_domain(domain);
        let suffix = format!(".{}.{}.", name, domain);
        let mut services: Vec<Service> = Vec::new();

        self.collect(name, domain, |event| {
            if event.service == SERVICES_RECORD || event.is_expired() {
                return;
            }

            let descriptor = match codec::decode(&event.text) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    trace!(record = %event.name, error = %e, "Skipping undecodable record");
                    return;
                }
            };
            if descriptor.service != name {
                return;
            }

            let host = if let Some(v4) = event.addrs_v4.first() {
                v4.to_string()
            } else if let Some(v6) = event.addrs_v6.first() {
                format!("[{}]", v6)
            } else {
                info!(record = %event.name, "Invalid endpoint received");
                return;
            };

            let id = event.name.strip_suffix(&suffix).unwrap_or(&event.name);
            let position = match services.iter().position(|s| s.version == descriptor.version) {
                Some(position) => position,
                None => {
                    services.push(Service {
                        name: descriptor.service.clone(),
                        version: descriptor.version.clone(),
                        endpoints: descriptor.endpoints.clone(),
                        ..Default::default()
                    });
                    services.len() - 1
                }
            };

            let service = &mut services[position];
            if service.node(id).is_some() {
                return;
            }
            service.nodes.push(Node {
                id: id.to_string(),
                address: format!("{}:{}", host, event.port),
                metadata: descriptor.metadata,
            });
        })
        .await?;

        debug!(service = name, domain = domain, versions = services.len(), "Service lookup finished");
        Ok(services)
    }

    /// Returns the names of the services listed in `domain`.
    pub async fn list_services(&self, domain: &str) -> Result<Vec<Service>> {
        let domain = query_domain(domain);
        let domain_suffix = format!("{}.", domain);
        let listing_suffix = format!(".{}.{}.", SERVICES_RECORD, domain);
        let mut seen = HashSet::new();
        let mut services = Vec::new();

        self.collect(SERVICES_RECORD, domain, |event| {
            if event.is_expired() || !event.name.ends_with(&domain_suffix) {
                return;
            }
            let name = event
                .name
                .strip_suffix(&listing_suffix)
                .unwrap_or(&event.name)
                .to_string();
            if seen.insert(name.clone()) {
                services.push(Service::named(name));
            }
        })
        .await?;

        debug!(domain = domain, services = services.len(), "Service listing finished");
        Ok(services)
    }

    /// Runs a browse and feeds every answer to `on_event` until the deadline.
    async fn collect<F>(&self, service: &str, domain: &str, mut on_event: F) -> Result<()>
    where
        F: FnMut(RawEvent) + Send,
    {
        let (tx, rx) = async_channel::bounded(BROWSE_CHANNEL_CAPACITY);
        let query = BrowseQuery {
            service: service.to_string(),
            domain: domain.to_string(),
            timeout: self.timeout,
        };

        let browse = self.transport.browse(query, tx);
        tokio::pin!(browse);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut browsing = true;
        loop {
            tokio::select! {
                result = &mut browse, if browsing => {
                    browsing = false;
                    result?;
                }
                Ok(event) = rx.recv() => on_event(event),
                _ = &mut deadline => break,
            }
        }
        Ok(())
    }
}
