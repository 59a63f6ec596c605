//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use svcreg::{MdnsRegistry, MemoryTransport, Node, RegistryConfig, Service};

/// Upper bound for anything a test waits on
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Installs a fmt subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Registry on a fresh in-process transport, with a short query window.
pub fn registry() -> (Arc<MemoryTransport>, MdnsRegistry<MemoryTransport>) {
    registry_with(RegistryConfig {
        timeout_ms: 50,
        listener_restart_backoff_ms: 10,
        ..Default::default()
    })
}

pub fn registry_with(config: RegistryConfig) -> (Arc<MemoryTransport>, MdnsRegistry<MemoryTransport>) {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let registry = MdnsRegistry::with_transport(config, transport.clone())
        .expect("Failed to create registry");
    (transport, registry)
}

/// A service with one node per `(id, address)` pair.
pub fn service(name: &str, version: &str, nodes: &[(&str, &str)]) -> Service {
    nodes
        .iter()
        .fold(Service::new(name, version), |service, (id, address)| {
            service.with_node(Node::new(*id, *address))
        })
}

/// Polls `condition` until it holds, failing the test after [`WAIT_LIMIT`].
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let polled = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, polled)
        .await
        .expect("Condition not met in time");
}

/// Awaits `future`, failing the test after [`WAIT_LIMIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("Timed out")
}
