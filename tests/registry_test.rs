//! Register, deregister and query through the public registry surface

mod common;

use common::{registry, service};
use svcreg::mdns::transport::SERVICES_RECORD;
use svcreg::{
    DeregisterOptions, GetOptions, ListOptions, RegisterOptions, Registry, RegistryError,
    GLOBAL_DOMAIN,
};

#[tokio::test]
async fn test_register_is_idempotent() {
    let (transport, registry) = registry();
    let greeter = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080"), ("n2", "10.0.0.2:8080")]);

    registry.register(&greeter, RegisterOptions::default()).await.unwrap();
    let advertised = transport.record_count();

    registry.register(&greeter, RegisterOptions::default()).await.unwrap();
    assert_eq!(transport.record_count(), advertised);

    // two nodes plus one listing record, in the default and the global domain
    assert_eq!(advertised, 6);
    assert_eq!(transport.records_for("greeter", "micro").len(), 2);
    assert_eq!(transport.records_for(SERVICES_RECORD, "micro").len(), 1);
}

#[tokio::test]
async fn test_listing_record_lifecycle() {
    let (transport, registry) = registry();
    let greeter = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080")]);
    let opts = RegisterOptions::domain("teamA");

    registry.register(&greeter, opts).await.unwrap();
    let listing = transport.records_for(SERVICES_RECORD, "teamA");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].instance, "greeter");
    assert_eq!(listing[0].port, 0);

    let mut ids = registry.advertised_ids("teamA", "greeter").await;
    ids.sort();
    assert_eq!(ids, vec!["*", "n1"]);

    registry
        .deregister(&greeter, DeregisterOptions::domain("teamA"))
        .await
        .unwrap();
    assert_eq!(transport.record_count(), 0);
    assert!(registry.local_domains().await.is_empty());
}

#[tokio::test]
async fn test_partial_deregister_keeps_remaining_node() {
    let (transport, registry) = registry();
    let both = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080"), ("n2", "10.0.0.2:8080")]);
    registry.register(&both, RegisterOptions::default()).await.unwrap();

    let first = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080")]);
    registry.deregister(&first, DeregisterOptions::default()).await.unwrap();

    let mut ids = registry.advertised_ids("micro", "greeter").await;
    ids.sort();
    assert_eq!(ids, vec!["*", "n2"]);
    assert_eq!(transport.records_for(SERVICES_RECORD, "micro").len(), 1);
    assert_eq!(transport.records_for("greeter", GLOBAL_DOMAIN).len(), 1);

    let second = service("greeter", "1.0.0", &[("n2", "10.0.0.2:8080")]);
    registry.deregister(&second, DeregisterOptions::default()).await.unwrap();

    assert!(registry.advertised_ids("micro", "greeter").await.is_empty());
    assert_eq!(transport.record_count(), 0);
}

#[tokio::test]
async fn test_global_mirror_carries_origin_domain() {
    let (_transport, registry) = registry();
    let greeter = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080")]);
    registry.register(&greeter, RegisterOptions::domain("teamA")).await.unwrap();

    let found = registry.get_service("greeter", GetOptions::domain("*")).await.unwrap();
    assert_eq!(found.len(), 1);
    let node = found[0].node("n1").expect("node mirrored into global");
    assert_eq!(node.address, "10.0.0.1:8080");
    assert_eq!(node.metadata.get("domain").map(String::as_str), Some("teamA"));

    // the origin domain itself carries no origin marker
    let local = registry.get_service("greeter", GetOptions::domain("teamA")).await.unwrap();
    assert!(local[0].nodes[0].metadata.get("domain").is_none());
}

#[tokio::test]
async fn test_get_service_groups_versions() {
    let (_transport, registry) = registry();
    registry
        .register(&service("greeter", "1.0.0", &[("a", "10.0.0.1:8080")]), RegisterOptions::default())
        .await
        .unwrap();
    registry
        .register(&service("greeter", "2.0.0", &[("b", "[::1]:9090")]), RegisterOptions::default())
        .await
        .unwrap();

    let mut found = registry.get_service("greeter", GetOptions::default()).await.unwrap();
    found.sort_by(|a, b| a.version.cmp(&b.version));

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].nodes[0].address, "10.0.0.1:8080");
    assert_eq!(found[1].nodes[0].address, "[::1]:9090");
    assert!(registry
        .get_service("missing", GetOptions::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_list_services_per_domain() {
    let (_transport, registry) = registry();
    registry
        .register(&service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080")]), RegisterOptions::domain("teamA"))
        .await
        .unwrap();
    registry
        .register(&service("billing", "1.0.0", &[("n1", "10.0.0.2:8080")]), RegisterOptions::domain("teamB"))
        .await
        .unwrap();

    let team_a = registry.list_services(ListOptions::domain("teamA")).await.unwrap();
    assert_eq!(team_a.len(), 1);
    assert_eq!(team_a[0].name, "greeter");
    assert!(team_a[0].nodes.is_empty());

    let mut everywhere: Vec<String> = registry
        .list_services(ListOptions::domain("*"))
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    everywhere.sort();
    assert_eq!(everywhere, vec!["billing", "greeter"]);
}

#[tokio::test]
async fn test_bad_address_does_not_block_other_nodes() {
    let (transport, registry) = registry();
    let mixed = service("greeter", "1.0.0", &[("bad", "not-an-address"), ("good", "10.0.0.1:8080")]);

    let err = registry.register(&mixed, RegisterOptions::default()).await.unwrap_err();
    assert!(matches!(err, RegistryError::AddressParse { .. }));
    assert!(err.is_recoverable());

    let mut ids = registry.advertised_ids("micro", "greeter").await;
    ids.sort();
    assert_eq!(ids, vec!["*", "good"]);
    assert_eq!(transport.records_for("greeter", GLOBAL_DOMAIN).len(), 1);
}

#[tokio::test]
async fn test_transport_failure_returns_first_error() {
    let (transport, registry) = registry();
    transport.fail_advertise("n1");
    let greeter = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080"), ("n2", "10.0.0.2:8080")]);

    let err = registry.register(&greeter, RegisterOptions::default()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Transport(_)));

    let mut ids = registry.advertised_ids("micro", "greeter").await;
    ids.sort();
    assert_eq!(ids, vec!["*", "n2"]);
}

#[tokio::test]
async fn test_no_listing_record_without_nodes() {
    let (transport, registry) = registry();
    transport.fail_advertise("n1");
    let greeter = service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080")]);

    assert!(registry.register(&greeter, RegisterOptions::default()).await.is_err());
    assert_eq!(transport.record_count(), 0);
    assert!(registry.local_domains().await.is_empty());
}

#[tokio::test]
async fn test_browse_failure_is_hard_error() {
    let (transport, registry) = registry();
    transport.fail_browse(true);

    let err = registry.get_service("greeter", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Transport(_)));
    assert!(registry.list_services(ListOptions::default()).await.is_err());
}

#[tokio::test]
async fn test_registries_share_a_network() {
    let (transport, left) = registry();
    let right = svcreg::MdnsRegistry::with_transport(left.config().clone(), transport.clone()).unwrap();

    left.register(&service("greeter", "1.0.0", &[("n1", "10.0.0.1:8080")]), RegisterOptions::default())
        .await
        .unwrap();

    let found = right.get_service("greeter", GetOptions::default()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(right.advertised_ids("micro", "greeter").await.is_empty());
}
