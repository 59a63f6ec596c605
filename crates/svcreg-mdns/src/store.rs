//! In-memory record of what this process has advertised.
//!
//! `domains[domain][service]` holds one record per advertised node id plus the
//! listing record (id [`WILDCARD_ID`]) that exists exactly while at least one
//! node record does. Empty services and domains are pruned eagerly.
//!
//! The store itself is plain data; the registrar owns it behind a single
//! exclusive lock held across each whole register/deregister step.

use crate::transport::RecordHandle;
use std::collections::HashMap;

/// Id of the per-service listing record.
pub const WILDCARD_ID: &str = "*";

/// An advertised record owned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRecord {
    /// Node id, or [`WILDCARD_ID`] for the listing record
    pub id: String,
    pub handle: RecordHandle,
}

impl AdvertisedRecord {
    pub fn new(id: impl Into<String>, handle: RecordHandle) -> Self {
        Self {
            id: id.into(),
            handle,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.id == WILDCARD_ID
    }
}

type ServiceRecords = HashMap<String, Vec<AdvertisedRecord>>;

#[derive(Debug, Default)]
pub struct DomainStore {
    domains: HashMap<String, ServiceRecords>,
}

impl DomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records advertised for a service in a domain.
    pub fn records(&self, domain: &str, service: &str) -> Option<&[AdvertisedRecord]> {
        self.domains
            .get(domain)
            .and_then(|services| services.get(service))
            .map(Vec::as_slice)
    }

    /// True if a record with this id is stored for the service.
    pub fn contains(&self, domain: &str, service: &str, id: &str) -> bool {
        self.records(domain, service)
            .is_some_and(|records| records.iter().any(|r| r.id == id))
    }

    /// Replaces the record set of a service, creating the domain if needed.
    ///
    /// An empty set removes the service (and the domain once it is empty).
    pub fn set_records(&mut self, domain: &str, service: &str, records: Vec<AdvertisedRecord>) {
        if records.is_empty() {
            self.remove_service(domain, service);
            return;
        }
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(service.to_string(), records);
    }

    /// Takes a service's records out of the store, leaving it absent.
    pub fn take_records(&mut self, domain: &str, service: &str) -> Vec<AdvertisedRecord> {
        self.remove_service(domain, service).unwrap_or_default()
    }

    /// Removes a service, pruning its domain when that was the last one.
    pub fn remove_service(&mut self, domain: &str, service: &str) -> Option<Vec<AdvertisedRecord>> {
        let services = self.domains.get_mut(domain)?;
        let removed = services.remove(service);
        if services.is_empty() {
            self.domains.remove(domain);
        }
        removed
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    /// Names of the domains holding at least one service.
    pub fn domains(&self) -> Vec<String> {
        self.domains.keys().cloned().collect()
    }

    /// Names of the services stored for a domain.
    pub fn services(&self, domain: &str) -> Vec<String> {
        self.domains
            .get(domain)
            .map(|services| services.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of stored records, listing records included.
    pub fn record_count(&self) -> usize {
        self.domains
            .values()
            .flat_map(|services| services.values())
            .map(Vec::len)
            .sum()
    }
}
