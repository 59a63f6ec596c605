//! Watch subsystem: one shared listen stream fanned out to many watchers.
//!
//! The hub runs at most one transport `listen` call at a time, whatever the number
//! of watchers. The listener is a small state machine:
//!
//! ```text
//!   Idle --first watcher--> Running
//!   Running --listen returned, watchers remain--> Running (restart)
//!   Running --listen returned, no watchers--> Idle
//! ```
//!
//! Every raw event is offered to each watcher's bounded queue with a non-blocking
//! send; a watcher that falls behind loses events instead of stalling the rest.
//! Watchers decode and filter on their own side in `next()`.

use crate::codec;
use crate::transport::{RawEvent, Transport};
use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use svcreg_core::{Action, Node, RegistryError, Result, Service, WatchResult, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// State of the shared listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Running,
}

/// Watcher queues and listener state, behind one reader/writer lock.
struct Subscribers {
    state: RwLock<HubState>,
}

struct HubState {
    watchers: HashMap<String, Sender<RawEvent>>,
    listener: ListenerState,
    /// Exit signal of the listen call in flight
    exit: Option<CancellationToken>,
}

impl Subscribers {
    fn remove(&self, id: &str) {
        let mut state = self.state.write();
        state.watchers.remove(id);
        debug!(watcher = id, remaining = state.watchers.len(), "Watcher removed");

        // let the listener notice promptly that nobody is left
        if state.watchers.is_empty() {
            if let Some(exit) = &state.exit {
                exit.cancel();
            }
        }
    }
}

/// Capacities and timings of the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub watch_queue_capacity: usize,
    pub listener_queue_capacity: usize,
    pub restart_backoff: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            watch_queue_capacity: 32,
            listener_queue_capacity: 32,
            restart_backoff: Duration::from_millis(500),
        }
    }
}

pub struct WatchHub<T: Transport> {
    transport: Arc<T>,
    subscribers: Arc<Subscribers>,
    config: HubConfig,
}

impl<T: Transport> WatchHub<T> {
    pub fn new(transport: Arc<T>, config: HubConfig) -> Self {
        Self {
            transport,
            subscribers: Arc::new(Subscribers {
                state: RwLock::new(HubState {
                    watchers: HashMap::new(),
                    listener: ListenerState::Idle,
                    exit: None,
                }),
            }),
            config,
        }
    }

    /// Registers a watcher, starting the shared listener if it is idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch(&self, service: Option<String>, domain: impl Into<String>) -> MdnsWatcher {
        let (tx, rx) = async_channel::bounded(self.config.watch_queue_capacity);
        let id = Uuid::new_v4().to_string();

        let start = {
            let mut state = self.subscribers.state.write();
            state.watchers.insert(id.clone(), tx);
            match state.listener {
                ListenerState::Running => false,
                ListenerState::Idle => {
                    state.listener = ListenerState::Running;
                    true
                }
            }
        };

        let watcher = MdnsWatcher {
            id,
            service: service.filter(|s| !s.is_empty()),
            domain: domain.into(),
            queue: rx,
            stop: CancellationToken::new(),
            subscribers: self.subscribers.clone(),
        };
        debug!(watcher = %watcher.id, domain = %watcher.domain, service = ?watcher.service, "Watcher created");

        if start {
            self.spawn_listener();
        }
        watcher
    }

    pub fn listener_state(&self) -> ListenerState {
        self.subscribers.state.read().listener
    }

    pub fn watcher_count(&self) -> usize {
        self.subscribers.state.read().watchers.len()
    }

    fn spawn_listener(&self) {
        let transport = self.transport.clone();
        let subscribers = self.subscribers.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                let exit = CancellationToken::new();
                {
                    let mut state = subscribers.state.write();
                    if state.watchers.is_empty() {
                        state.listener = ListenerState::Idle;
                        state.exit = None;
                        debug!("No watchers left, listener idle");
                        return;
                    }
                    state.exit = Some(exit.clone());
                }

                let (tx, rx) = async_channel::bounded(config.listener_queue_capacity);
                let fan_out = tokio::spawn(fan_out(subscribers.clone(), rx, exit.clone()));

                debug!("Listener started");
                let result = transport.listen(tx, exit.clone()).await;
                exit.cancel();
                if let Err(e) = fan_out.await {
                    warn!(error = %e, "Fan-out task failed");
                }

                match result {
                    Ok(()) => debug!("Listener returned"),
                    Err(e) => {
                        warn!(error = %e, "Listener failed, restarting after backoff");
                        tokio::time::sleep(config.restart_backoff).await;
                    }
                }
            }
        });
    }
}

/// Offers every event on the shared channel to each watcher queue.
async fn fan_out(subscribers: Arc<Subscribers>, events: Receiver<RawEvent>, exit: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = exit.cancelled() => return,
            msg = events.recv() => match msg {
                Ok(event) => event,
                Err(_) => return,
            },
        };

        {
            let state = subscribers.state.read();
            for (id, queue) in &state.watchers {
                if let Err(TrySendError::Full(_)) = queue.try_send(event.clone()) {
                    trace!(watcher = %id, record = %event.name, "Watcher queue full, dropping event");
                }
            }
        }
    }
}

/// A subscription created by [`WatchHub::watch`].
///
/// Dropping the watcher stops it.
pub struct MdnsWatcher {
    id: String,
    /// Only report this service, if set
    service: Option<String>,
    domain: String,
    queue: Receiver<RawEvent>,
    stop: CancellationToken,
    subscribers: Arc<Subscribers>,
}

impl MdnsWatcher {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Waits for the next event that passes this watcher's filters.
    pub async fn next(&self) -> Result<WatchResult> {
        loop {
            if self.stop.is_cancelled() {
                return Err(RegistryError::WatcherStopped);
            }

            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(RegistryError::WatcherStopped),
                msg = self.queue.recv() => match msg {
                    Ok(event) => event,
                    Err(_) => return Err(RegistryError::WatcherStopped),
                },
            };

            if let Some(result) = self.accept(&event) {
                return Ok(result);
            }
        }
    }

    /// Stops the watcher; later calls are no-ops.
    pub fn stop(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        self.subscribers.remove(&self.id);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Decodes and filters a raw event.
    fn accept(&self, event: &RawEvent) -> Option<WatchResult> {
        let descriptor = match codec::decode(&event.text) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                trace!(watcher = %self.id, record = %event.name, error = %e, "Skipping undecodable record");
                return None;
            }
        };

        if descriptor.service.is_empty() || descriptor.version.is_empty() {
            return None;
        }

        if let Some(service) = &self.service {
            if &descriptor.service != service {
                return None;
            }
        }

        let action = if event.is_expired() {
            Action::Delete
        } else {
            Action::Create
        };

        // skip anything outside the watched domain
        let suffix = format!(".{}.{}.", descriptor.service, self.domain);
        let id = event.name.strip_suffix(&suffix)?;

        let host = if let Some(v4) = event.addrs_v4.first() {
            v4.to_string()
        } else if let Some(v6) = event.addrs_v6.first() {
            format!("[{}]", v6)
        } else {
            event.addr.map(|addr| addr.to_string()).unwrap_or_default()
        };

        let node = Node {
            id: id.to_string(),
            address: format!("{}:{}", host, event.port),
            metadata: descriptor.metadata.clone(),
        };

        Some(WatchResult::new(
            action,
            Service {
                name: descriptor.service,
                version: descriptor.version,
                metadata: descriptor.metadata,
                endpoints: descriptor.endpoints,
                nodes: vec![node],
            },
        ))
    }
}

impl Drop for MdnsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl Watcher for MdnsWatcher {
    async fn next(&self) -> Result<WatchResult> {
        MdnsWatcher::next(self).await
    }

    fn stop(&self) {
        MdnsWatcher::stop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Descriptor;
    use crate::transport::{MemoryTransport, DEFAULT_TTL};
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn hub(transport: &Arc<MemoryTransport>) -> WatchHub<MemoryTransport> {
        WatchHub::new(
            transport.clone(),
            HubConfig {
                restart_backoff: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }

    fn event(instance: &str, service: &str, domain: &str, ttl: u32) -> RawEvent {
        let mut metadata = HashMap::new();
        metadata.insert("zone".to_string(), "a".to_string());
        RawEvent {
            name: format!("{}.{}.{}.", instance, service, domain),
            ttl,
            addrs_v4: vec![Ipv4Addr::new(10, 0, 0, 1)],
            port: 8080,
            text: codec::encode(&Descriptor {
                service: service.to_string(),
                version: "1.0.0".to_string(),
                endpoints: Vec::new(),
                metadata,
            })
            .unwrap(),
            service: service.to_string(),
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    async fn wait_for_listeners(transport: &MemoryTransport, count: usize) {
        while transport.active_listeners() != count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_accept_create_and_delete() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = hub.watch(None, "micro");

        let result = watcher.accept(&event("n1", "greeter", "micro", DEFAULT_TTL)).unwrap();
        assert_eq!(result.action, Action::Create);
        assert_eq!(result.service.name, "greeter");
        assert_eq!(result.service.nodes[0].id, "n1");
        assert_eq!(result.service.nodes[0].address, "10.0.0.1:8080");
        assert_eq!(result.service.metadata["zone"], "a");
        assert_eq!(result.service.nodes[0].metadata["zone"], "a");

        let result = watcher.accept(&event("n1", "greeter", "micro", 0)).unwrap();
        assert_eq!(result.action, Action::Delete);
    }

    #[tokio::test]
    async fn test_accept_filters() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = hub.watch(Some("greeter".to_string()), "micro");

        assert!(watcher.accept(&event("n1", "billing", "micro", DEFAULT_TTL)).is_none());
        assert!(watcher.accept(&event("n1", "greeter", "global", DEFAULT_TTL)).is_none());

        let mut garbage = event("n1", "greeter", "micro", DEFAULT_TTL);
        garbage.text = vec!["zz".to_string()];
        assert!(watcher.accept(&garbage).is_none());

        let mut unversioned = event("n1", "greeter", "micro", DEFAULT_TTL);
        unversioned.text = codec::encode(&Descriptor {
            service: "greeter".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(watcher.accept(&unversioned).is_none());
    }

    #[tokio::test]
    async fn test_accept_address_fallbacks() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = hub.watch(None, "micro");

        let mut v6 = event("n1", "greeter", "micro", DEFAULT_TTL);
        v6.addrs_v4.clear();
        v6.addrs_v6 = vec![Ipv6Addr::LOCALHOST];
        assert_eq!(watcher.accept(&v6).unwrap().service.nodes[0].address, "[::1]:8080");

        let mut raw = event("n1", "greeter", "micro", DEFAULT_TTL);
        raw.addrs_v4.clear();
        raw.addr = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)));
        assert_eq!(watcher.accept(&raw).unwrap().service.nodes[0].address, "192.168.1.7:8080");
    }

    #[tokio::test]
    async fn test_next_delivers_injected_events() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = hub.watch(None, "micro");
        wait_for_listeners(&transport, 1).await;

        transport.inject(event("junk", "greeter", "elsewhere", DEFAULT_TTL));
        transport.inject(event("n1", "greeter", "micro", DEFAULT_TTL));

        let result = watcher.next().await.unwrap();
        assert_eq!(result.service.nodes[0].id, "n1");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = hub.watch(None, "micro");

        watcher.stop();
        watcher.stop();
        assert!(watcher.is_stopped());
        assert!(watcher.next().await.unwrap_err().is_stopped());
        assert!(watcher.next().await.unwrap_err().is_stopped());
        assert_eq!(hub.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_wakes_blocked_next() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = Arc::new(hub.watch(None, "micro"));

        let pending = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        watcher.stop();

        assert!(pending.await.unwrap().unwrap_err().is_stopped());
    }

    #[tokio::test]
    async fn test_single_listener_lifecycle() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);

        let watchers: Vec<_> = (0..5).map(|_| hub.watch(None, "micro")).collect();
        wait_for_listeners(&transport, 1).await;
        assert_eq!(hub.listener_state(), ListenerState::Running);
        assert_eq!(transport.total_listens(), 1);

        drop(watchers);
        wait_for_listeners(&transport, 0).await;
        while hub.listener_state() != ListenerState::Idle {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let _watcher = hub.watch(None, "micro");
        wait_for_listeners(&transport, 1).await;
        assert_eq!(transport.total_listens(), 2);
    }

    #[tokio::test]
    async fn test_listener_restarts_when_transport_ends_stream() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = hub(&transport);
        let watcher = hub.watch(None, "micro");
        wait_for_listeners(&transport, 1).await;

        transport.terminate_listeners();
        while transport.total_listens() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        wait_for_listeners(&transport, 1).await;
        assert_eq!(hub.listener_state(), ListenerState::Running);

        transport.inject(event("n1", "greeter", "micro", DEFAULT_TTL));
        assert_eq!(watcher.next().await.unwrap().action, Action::Create);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking_others() {
        let transport = Arc::new(MemoryTransport::new());
        let hub = WatchHub::new(
            transport.clone(),
            HubConfig {
                watch_queue_capacity: 2,
                ..Default::default()
            },
        );
        let slow = hub.watch(None, "micro");
        let fast = hub.watch(None, "micro");
        wait_for_listeners(&transport, 1).await;

        for i in 0..10 {
            transport.inject(event(&format!("n{i}"), "greeter", "micro", DEFAULT_TTL));
            let result = fast.next().await.unwrap();
            assert_eq!(result.service.nodes[0].id, format!("n{i}"));
        }

        // the slow watcher kept only what fit in its queue
        assert_eq!(slow.next().await.unwrap().service.nodes[0].id, "n0");
        assert_eq!(slow.next().await.unwrap().service.nodes[0].id, "n1");
        slow.stop();
        assert!(slow.next().await.is_err());
    }
}
