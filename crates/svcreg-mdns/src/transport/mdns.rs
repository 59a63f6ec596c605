//! Multicast DNS transport backed by `mdns-sd`.
//!
//! Every registry record shares one DNS-SD service type (by default
//! `_micro._tcp.local.`). The registry's `<instance>.<service>.<domain>` triple is
//! carried in the DNS-SD instance label, so the resolved full name is
//! `<instance>.<service>.<domain>.<service type>` and stripping the service type
//! yields the registry record name.
//!
//! TXT entries carry the record's service under `svc`, its domain under `dom`
//! and each opaque text field split into `<field>.<piece>` entries, so no entry
//! exceeds the 255-byte TXT string limit and dotted domains survive intact.
//! Each node record gets its own host label beneath the configured host so
//! address records of different nodes never merge. Records without a concrete
//! address are published on the host's own interfaces.
//!
//! A single long-lived browse feeds a cache of resolved records and a broadcast
//! channel. Queries replay the cache and then forward live answers until their
//! deadline; listeners forward every change until told to exit. Removals carry
//! the cached fields of the withdrawn record with a TTL of zero.

use super::{
    split_record_name, BrowseQuery, RawEvent, RecordHandle, RecordSpec, Transport, DEFAULT_TTL,
};
use async_channel::Sender;
use async_trait::async_trait;
use dashmap::DashMap;
use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use svcreg_core::{MdnsConfig, TransportError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum number of changes buffered for listeners
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How long to wait for the daemon to confirm an unregister
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// TXT key holding the record's service
const TXT_SERVICE: &str = "svc";

/// TXT key holding the record's domain
const TXT_DOMAIN: &str = "dom";

/// Maximum length of one encoded TXT string, `key=value`
const MAX_TXT_ENTRY: usize = 255;

/// Text fields are split into values of at most this many bytes
const TXT_PIECE_LEN: usize = 240;

/// Longest DNS label
const MAX_LABEL_LEN: usize = 63;

/// `mdns-sd` backed transport.
pub struct MdnsTransport {
    daemon: Arc<ServiceDaemon>,
    service_type: String,
    host_name: String,
    /// Resolved records keyed by registry record name
    cache: Arc<DashMap<String, RawEvent>>,
    events: broadcast::Sender<RawEvent>,
    browser: JoinHandle<()>,
}

impl MdnsTransport {
    /// Starts the daemon and the background browse.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &MdnsConfig) -> Result<Self, TransportError> {
        config.validate().map_err(|e| TransportError::Init {
            reason: e.to_string(),
        })?;

        let daemon = ServiceDaemon::new().map_err(|e| TransportError::Init {
            reason: format!("Failed to create mDNS daemon: {}", e),
        })?;

        let receiver = daemon
            .browse(&config.service_type)
            .map_err(|e| TransportError::browse(config.service_type.clone(), e))?;

        let host_name = match &config.host_name {
            Some(host) => host.clone(),
            None => default_host_name(),
        };

        let cache = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let browser = {
            let cache = cache.clone();
            let events = events.clone();
            let service_type = config.service_type.clone();
            tokio::spawn(async move {
                loop {
                    match receiver.recv_async().await {
                        Ok(event) => Self::handle_mdns_event(event, &service_type, &cache, &events),
                        Err(e) => {
                            debug!(error = %e, "mDNS browse channel closed");
                            break;
                        }
                    }
                }
                debug!(service_type = %service_type, "Browser task stopped");
            })
        };

        info!(
            service_type = %config.service_type,
            host = %host_name,
            "mDNS transport started"
        );

        Ok(Self {
            daemon: Arc::new(daemon),
            service_type: config.service_type.clone(),
            host_name,
            cache,
            events,
            browser,
        })
    }

    /// Records currently known to be live.
    pub fn cached_records(&self) -> Vec<RawEvent> {
        self.cache.iter().map(|entry| entry.value().clone()).collect()
    }

    fn handle_mdns_event(
        event: MdnsEvent,
        service_type: &str,
        cache: &DashMap<String, RawEvent>,
        events: &broadcast::Sender<RawEvent>,
    ) {
        match event {
            MdnsEvent::ServiceResolved(info) => {
                let Some(raw) = Self::convert_service_info(&info, service_type) else {
                    debug!(service = info.get_fullname(), "Ignoring foreign record");
                    return;
                };
                debug!(record = %raw.name, port = raw.port, "Record resolved");
                cache.insert(raw.name.clone(), raw.clone());
                let _ = events.send(raw);
            }

            MdnsEvent::ServiceRemoved(_, fullname) => {
                let Some(name) = registry_name(&fullname, service_type) else {
                    return;
                };
                if let Some((_, mut raw)) = cache.remove(&name) {
                    debug!(record = %name, "Record removed");
                    raw.ttl = 0;
                    let _ = events.send(raw);
                }
            }

            MdnsEvent::SearchStarted(typ) => {
                debug!(typ = typ, "Search started");
            }

            MdnsEvent::SearchStopped(typ) => {
                debug!(typ = typ, "Search stopped");
            }

            _ => {}
        }
    }

    /// Converts a resolved `ServiceInfo` into a registry event.
    fn convert_service_info(info: &ServiceInfo, service_type: &str) -> Option<RawEvent> {
        let name = registry_name(info.get_fullname(), service_type)?;
        let service = info.get_property_val_str(TXT_SERVICE)?;
        let domain = info.get_property_val_str(TXT_DOMAIN)?;

        // the instance label must agree with the advertised service and domain
        let (_, labelled) = split_record_name(&name, domain)?;
        if labelled != service {
            return None;
        }

        let mut raw = RawEvent {
            service: service.to_string(),
            domain: domain.to_string(),
            ttl: DEFAULT_TTL,
            port: info.get_port(),
            text: text_fields(
                info.get_properties()
                    .iter()
                    .map(|p| (p.key(), p.val_str())),
            ),
            ..Default::default()
        };
        for addr in info.get_addresses() {
            match addr {
                IpAddr::V4(v4) => raw.addrs_v4.push(*v4),
                IpAddr::V6(v6) => raw.addrs_v6.push(*v6),
            }
            raw.addr.get_or_insert(*addr);
        }
        raw.name = name;
        Some(raw)
    }
}

impl Drop for MdnsTransport {
    fn drop(&mut self) {
        self.browser.abort();
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "Failed to shut down mDNS daemon");
        }
    }
}

#[async_trait]
impl Transport for MdnsTransport {
    async fn advertise(&self, record: RecordSpec) -> Result<RecordHandle, TransportError> {
        let name = record.name();
        let info = service_info(&self.service_type, &self.host_name, &record)?;
        let fullname = info.get_fullname().to_string();
        let host = info.get_hostname().to_string();
        let auto = info.is_addr_auto();

        self.daemon
            .register(info)
            .map_err(|e| TransportError::advertise(name.clone(), e))?;

        debug!(record = %name, host = %host, auto, port = record.port, "Record advertised");
        Ok(RecordHandle { id: fullname, name })
    }

    async fn shutdown(&self, handle: &RecordHandle) -> Result<(), TransportError> {
        let status = self
            .daemon
            .unregister(&handle.id)
            .map_err(|e| TransportError::shutdown(handle.name.clone(), e))?;

        match tokio::time::timeout(UNREGISTER_TIMEOUT, status.recv_async()).await {
            Ok(Ok(_)) => debug!(record = %handle.name, "Record withdrawn"),
            Ok(Err(e)) => warn!(record = %handle.name, error = %e, "Unregister status lost"),
            Err(_) => warn!(record = %handle.name, "Unregister not confirmed in time"),
        }
        Ok(())
    }

    async fn browse(
        &self,
        query: BrowseQuery,
        entries: Sender<RawEvent>,
    ) -> Result<(), TransportError> {
        let matches = |raw: &RawEvent| raw.service == query.service && raw.domain == query.domain;

        // subscribe before the replay so nothing falls between the two
        let mut live = self.events.subscribe();

        for raw in self.cached_records().into_iter().filter(|r| matches(r)) {
            if entries.send(raw).await.is_err() {
                return Ok(());
            }
        }

        let deadline = tokio::time::sleep(query.timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                msg = live.recv() => match msg {
                    Ok(raw) if matches(&raw) => {
                        if entries.send(raw).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, service = %query.service, "Browse lagged behind record changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(TransportError::browse(query.service, "mDNS daemon stopped"));
                    }
                },
            }
        }
    }

    async fn listen(
        &self,
        events: Sender<RawEvent>,
        exit: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut live = self.events.subscribe();

        loop {
            tokio::select! {
                _ = exit.cancelled() => return Ok(()),
                msg = live.recv() => match msg {
                    Ok(raw) => {
                        if events.send(raw).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Listener lagged behind record changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("mDNS browse stopped, ending listen");
                        return Err(TransportError::listen("mDNS daemon stopped"));
                    }
                },
            }
        }
    }
}

/// Builds the DNS-SD registration for a record.
///
/// Unspecified addresses are dropped; a record left without any is published
/// on the host's own interfaces.
fn service_info(
    service_type: &str,
    host_name: &str,
    record: &RecordSpec,
) -> Result<ServiceInfo, TransportError> {
    let name = record.name();
    let instance = format!("{}.{}.{}", record.instance, record.service, record.domain);

    let entries = txt_entries(record);
    if let Some((key, _)) = entries
        .iter()
        .find(|(key, value)| key.len() + 1 + value.len() > MAX_TXT_ENTRY)
    {
        return Err(TransportError::advertise(
            name,
            format!("TXT entry {} exceeds {} bytes", key, MAX_TXT_ENTRY),
        ));
    }

    let addresses: Vec<IpAddr> = record
        .addresses
        .iter()
        .filter(|addr| !addr.is_unspecified())
        .copied()
        .collect();
    let host = if addresses.is_empty() {
        host_name.to_string()
    } else {
        record_host(record, host_name)
    };

    let info = ServiceInfo::new(
        service_type,
        &instance,
        &host,
        addresses.as_slice(),
        record.port,
        entries.as_slice(),
    )
    .map_err(|e| TransportError::advertise(name, e))?;

    Ok(if addresses.is_empty() {
        info.enable_addr_auto()
    } else {
        info
    })
}

/// TXT entries for a record: service, domain and the chunked text fields.
fn txt_entries(record: &RecordSpec) -> Vec<(String, String)> {
    let mut entries = vec![
        (TXT_SERVICE.to_string(), record.service.clone()),
        (TXT_DOMAIN.to_string(), record.domain.clone()),
    ];
    for (field, text) in record.text.iter().enumerate() {
        for (piece, value) in split_pieces(text, TXT_PIECE_LEN).into_iter().enumerate() {
            entries.push((format!("{}.{}", field, piece), value.to_string()));
        }
    }
    entries
}

/// Reassembles text fields from `<field>.<piece>` entries, ignoring other keys.
fn text_fields<'a>(properties: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<String> {
    let pieces: BTreeMap<(usize, usize), &str> = properties
        .filter_map(|(key, value)| {
            let (field, piece) = key.split_once('.')?;
            Some(((field.parse().ok()?, piece.parse().ok()?), value))
        })
        .collect();

    let mut fields: Vec<String> = Vec::new();
    let mut current = None;
    for ((field, _), value) in pieces {
        if current != Some(field) {
            fields.push(String::new());
            current = Some(field);
        }
        if let Some(text) = fields.last_mut() {
            text.push_str(value);
        }
    }
    fields
}

/// Splits `text` into pieces of at most `max` bytes on character boundaries.
/// An empty string yields one empty piece.
fn split_pieces(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    loop {
        if rest.len() <= max {
            pieces.push(rest);
            return pieces;
        }
        let mut end = max;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (piece, tail) = rest.split_at(end);
        pieces.push(piece);
        rest = tail;
    }
}

/// Host name owning a record's address records, one label per record.
fn record_host(record: &RecordSpec, host_name: &str) -> String {
    let label: String = format!("{}-{}-{}", record.instance, record.service, record.domain)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();
    format!("{}.{}", label.trim_matches('-'), host_name)
}

/// Strips the DNS-SD service type from a full name, giving the registry name.
fn registry_name(fullname: &str, service_type: &str) -> Option<String> {
    let instance = fullname.strip_suffix(service_type)?;
    if !instance.ends_with('.') {
        return None;
    }
    // record names must at least carry instance, service and domain
    let labels = instance.trim_end_matches('.').split('.');
    if labels.clone().count() < 3 || labels.clone().any(str::is_empty) {
        return None;
    }
    Some(instance.to_string())
}

fn default_host_name() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "svcreg".to_string());
    let host = host.trim_end_matches('.');
    if host.ends_with(".local") {
        format!("{}.", host)
    } else {
        format!("{}.local.", host)
    }
}
