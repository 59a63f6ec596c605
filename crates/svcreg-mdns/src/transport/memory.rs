//! In-process transport.
//!
//! Records live in a shared map and every change is published on a broadcast
//! channel, so several registries built on clones of one `MemoryTransport` see
//! each other exactly as processes on one multicast segment would. Used by the
//! test suites and by single-process deployments.

use super::{
    BrowseQuery, RawEvent, RecordHandle, RecordSpec, Transport, DEFAULT_TTL,
};
use async_channel::Sender;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use svcreg_core::TransportError;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the change broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Loopback transport shared by clones.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    /// Advertised records keyed by handle id
    records: DashMap<String, RecordSpec>,
    events: broadcast::Sender<RawEvent>,
    next_id: AtomicU64,
    active_listens: AtomicUsize,
    total_listens: AtomicUsize,
    /// Cancelled to end every running listen call
    terminate: Mutex<CancellationToken>,
    failing_instances: Mutex<HashSet<String>>,
    fail_browse: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                records: DashMap::new(),
                events,
                next_id: AtomicU64::new(1),
                active_listens: AtomicUsize::new(0),
                total_listens: AtomicUsize::new(0),
                terminate: Mutex::new(CancellationToken::new()),
                failing_instances: Mutex::new(HashSet::new()),
                fail_browse: AtomicBool::new(false),
            }),
        }
    }

    /// Snapshot of every advertised record.
    pub fn records(&self) -> Vec<RecordSpec> {
        self.inner
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Advertised records of one service in one domain.
    pub fn records_for(&self, service: &str, domain: &str) -> Vec<RecordSpec> {
        self.inner
            .records
            .iter()
            .filter(|entry| entry.service == service && entry.domain == domain)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.inner.records.len()
    }

    /// Number of listen calls currently running.
    pub fn active_listeners(&self) -> usize {
        self.inner.active_listens.load(Ordering::SeqCst)
    }

    /// Number of listen calls ever started.
    pub fn total_listens(&self) -> usize {
        self.inner.total_listens.load(Ordering::SeqCst)
    }

    /// Makes every later advertise of `instance` fail.
    pub fn fail_advertise(&self, instance: impl Into<String>) {
        self.inner.failing_instances.lock().insert(instance.into());
    }

    /// Makes browse calls fail while set.
    pub fn fail_browse(&self, fail: bool) {
        self.inner.fail_browse.store(fail, Ordering::SeqCst);
    }

    /// Ends every running listen call, as a transport restart would.
    pub fn terminate_listeners(&self) {
        let mut token = self.inner.terminate.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Publishes an arbitrary event to listeners.
    pub fn inject(&self, event: RawEvent) {
        // no receivers is fine
        let _ = self.inner.events.send(event);
    }
}

/// Keeps `active_listens` accurate however a listen call ends.
struct ListenGuard<'a>(&'a AtomicUsize);

impl Drop for ListenGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn advertise(&self, record: RecordSpec) -> Result<RecordHandle, TransportError> {
        let name = record.name();
        if self.inner.failing_instances.lock().contains(&record.instance) {
            return Err(TransportError::advertise(name, "advertise rejected"));
        }

        let id = format!("mem-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let event = RawEvent::from_spec(&record, DEFAULT_TTL);
        self.inner.records.insert(id.clone(), record);
        let _ = self.inner.events.send(event);

        debug!(record = %name, id = %id, "Record advertised");
        Ok(RecordHandle { id, name })
    }

    async fn shutdown(&self, handle: &RecordHandle) -> Result<(), TransportError> {
        let (_, record) = self
            .inner
            .records
            .remove(&handle.id)
            .ok_or_else(|| TransportError::shutdown(handle.name.clone(), "unknown record"))?;

        let _ = self.inner.events.send(RawEvent::from_spec(&record, 0));
        debug!(record = %handle.name, "Record withdrawn");
        Ok(())
    }

    async fn browse(
        &self,
        query: BrowseQuery,
        entries: Sender<RawEvent>,
    ) -> Result<(), TransportError> {
        if self.inner.fail_browse.load(Ordering::SeqCst) {
            return Err(TransportError::browse(query.service, "browse rejected"));
        }

        for record in self.records_for(&query.service, &query.domain) {
            if entries
                .send(RawEvent::from_spec(&record, DEFAULT_TTL))
                .await
                .is_err()
            {
                break;
            }
        }
        Ok(())
    }

    async fn listen(
        &self,
        events: Sender<RawEvent>,
        exit: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut rx = self.inner.events.subscribe();
        let terminate = self.inner.terminate.lock().clone();

        self.inner.total_listens.fetch_add(1, Ordering::SeqCst);
        self.inner.active_listens.fetch_add(1, Ordering::SeqCst);
        let _guard = ListenGuard(&self.inner.active_listens);

        loop {
            tokio::select! {
                _ = exit.cancelled() => break,
                _ = terminate.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Listener lagged behind record changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }
}
