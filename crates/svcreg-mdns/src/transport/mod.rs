//! The multicast transport boundary.
//!
//! The registry never builds packets itself. It consumes four capabilities:
//! advertise a named record, withdraw it again, browse for records of a name
//! within a deadline, and listen continuously for any record change until told
//! to stop.
//!
//! Record names follow `<instance>.<service>.<domain>.`: node records use the node
//! id as instance, listing records use the service name as instance and
//! [`SERVICES_RECORD`] as service.

use async_channel::Sender;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use svcreg_core::TransportError;
use tokio_util::sync::CancellationToken;

pub mod mdns;
pub mod memory;

pub use mdns::MdnsTransport;
pub use memory::MemoryTransport;

/// Service name of the per-service listing records.
pub const SERVICES_RECORD: &str = "_services";

/// Validity window reported for live records (seconds).
pub const DEFAULT_TTL: u32 = 120;

/// A record to advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    /// Instance label (node id, or service name for listing records)
    pub instance: String,
    /// Service the record is advertised under
    pub service: String,
    pub domain: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    /// Opaque text fields, in record order
    pub text: Vec<String>,
}

impl RecordSpec {
    /// Fully qualified record name.
    pub fn name(&self) -> String {
        record_name(&self.instance, &self.service, &self.domain)
    }
}

/// Handle to an advertised record, used to withdraw it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    /// Transport-assigned identifier
    pub id: String,
    /// Fully qualified record name
    pub name: String,
}

/// A bounded-deadline query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseQuery {
    pub service: String,
    pub domain: String,
    pub timeout: Duration,
}

/// A record observed on the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Fully qualified record name, `<instance>.<service>.<domain>.`
    pub name: String,
    /// Validity window in seconds; 0 means withdrawn
    pub ttl: u32,
    pub addrs_v4: Vec<Ipv4Addr>,
    pub addrs_v6: Vec<Ipv6Addr>,
    /// Source address of the answer, if known
    pub addr: Option<IpAddr>,
    pub port: u16,
    pub text: Vec<String>,
    /// Service the record was advertised under
    pub service: String,
    pub domain: String,
}

impl RawEvent {
    /// Builds the event describing an advertised record.
    pub fn from_spec(spec: &RecordSpec, ttl: u32) -> Self {
        let mut event = Self {
            name: spec.name(),
            ttl,
            port: spec.port,
            text: spec.text.clone(),
            service: spec.service.clone(),
            domain: spec.domain.clone(),
            addr: spec.addresses.first().copied(),
            ..Default::default()
        };
        for addr in &spec.addresses {
            match addr {
                IpAddr::V4(v4) => event.addrs_v4.push(*v4),
                IpAddr::V6(v6) => event.addrs_v6.push(*v6),
            }
        }
        event
    }

    /// True once the record has been withdrawn.
    pub fn is_expired(&self) -> bool {
        self.ttl == 0
    }
}

/// Formats a fully qualified record name.
pub fn record_name(instance: &str, service: &str, domain: &str) -> String {
    format!("{}.{}.{}.", instance, service, domain)
}

/// Splits `<instance>.<service>.<domain>.` given the known domain.
///
/// Returns `(instance, service)`; the instance may itself contain dots, the
/// service label may not.
pub fn split_record_name<'a>(name: &'a str, domain: &str) -> Option<(&'a str, &'a str)> {
    let rest = name.strip_suffix('.')?.strip_suffix(domain)?.strip_suffix('.')?;
    let (instance, service) = rest.rsplit_once('.')?;
    if instance.is_empty() || service.is_empty() {
        return None;
    }
    Some((instance, service))
}

/// Capabilities the registry consumes from a multicast transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Advertises a record until [`Transport::shutdown`] is called.
    async fn advertise(&self, record: RecordSpec) -> Result<RecordHandle, TransportError>;

    /// Withdraws a previously advertised record.
    async fn shutdown(&self, handle: &RecordHandle) -> Result<(), TransportError>;

    /// Queries for records of `query.service` in `query.domain`, pushing matches
    /// into `entries`. Returns no later than the query deadline.
    async fn browse(&self, query: BrowseQuery, entries: Sender<RawEvent>)
        -> Result<(), TransportError>;

    /// Pushes every record change into `events` until `exit` fires or the
    /// transport terminates the stream.
    async fn listen(
        &self,
        events: Sender<RawEvent>,
        exit: CancellationToken,
    ) -> Result<(), TransportError>;
}
