use crate::{ServiceCache, ServiceOwner};
use acl_controller_k8s_api::{store::MemoryStore, ObjectMeta, Service};
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus,
};
use maplit::btreemap;
use std::{net::IpAddr, time::Duration};
use tokio::time;

const TTL: Duration = Duration::from_secs(60);

fn mk_service(ns: &str, name: &str, selector: Option<(&str, &str)>, cluster_ip: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: selector.map(|(k, v)| btreemap! { k.to_string() => v.to_string() }),
            cluster_ip: Some(cluster_ip.to_string()),
            cluster_ips: Some(vec![cluster_ip.to_string()]),
            ..Default::default()
        }),
        status: None,
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn indexes_every_stable_address() {
    let store = MemoryStore::default();
    let mut svc = mk_service("data", "db", Some(("role", "db")), "10.96.0.9");
    if let Some(spec) = svc.spec.as_mut() {
        spec.cluster_ips = Some(vec!["10.96.0.9".to_string(), "fd00::9".to_string()]);
        spec.external_ips = Some(vec!["192.0.2.9".to_string()]);
    }
    svc.status = Some(ServiceStatus {
        load_balancer: Some(LoadBalancerStatus {
            ingress: Some(vec![
                LoadBalancerIngress {
                    ip: Some("198.51.100.9".to_string()),
                    ..Default::default()
                },
                LoadBalancerIngress {
                    hostname: Some("lb.example.com".to_string()),
                    ..Default::default()
                },
            ]),
        }),
        ..Default::default()
    });
    store.seed(&svc);

    let cache = ServiceCache::new(store, TTL);
    let owner = ServiceOwner {
        name: "db".to_string(),
        namespace: "data".to_string(),
        selector: btreemap! { "role".to_string() => "db".to_string() },
    };
    for addr in ["10.96.0.9", "fd00::9", "192.0.2.9", "198.51.100.9"] {
        assert_eq!(
            cache.by_ip(ip(addr)).await.unwrap(),
            Some(owner.clone()),
            "{addr}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn skips_services_without_selectors() {
    let store = MemoryStore::default();
    store.seed(&mk_service("ns", "headless", Some(("app", "x")), "None"));
    store.seed(&mk_service("ns", "external", None, "10.96.0.2"));
    let mut empty = mk_service("ns", "empty", Some(("app", "y")), "10.96.0.3");
    if let Some(spec) = empty.spec.as_mut() {
        spec.selector = Some(Default::default());
    }
    store.seed(&empty);

    let cache = ServiceCache::new(store, TTL);
    assert_eq!(cache.by_ip(ip("10.96.0.2")).await.unwrap(), None);
    assert_eq!(cache.by_ip(ip("10.96.0.3")).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn rebuilds_after_ttl() {
    let store = MemoryStore::default();
    let cache = ServiceCache::new(store.clone(), TTL);
    assert_eq!(cache.by_ip(ip("10.96.0.7")).await.unwrap(), None);

    store.seed(&mk_service("ns", "web", Some(("app", "web")), "10.96.0.7"));
    assert_eq!(
        cache.by_ip(ip("10.96.0.7")).await.unwrap(),
        None,
        "snapshot must be reused within the TTL"
    );

    time::advance(TTL).await;
    let owner = cache.by_ip(ip("10.96.0.7")).await.unwrap().expect("owner");
    assert_eq!(owner.name, "web");
    assert_eq!(owner.namespace, "ns");
}

#[tokio::test(start_paused = true)]
async fn listing_failures_propagate() {
    let store = MemoryStore::default();
    store.set_unavailable(true);
    let cache = ServiceCache::new(store.clone(), TTL);
    cache
        .by_ip(ip("10.96.0.7"))
        .await
        .expect_err("listing must fail");

    store.set_unavailable(false);
    assert_eq!(cache.by_ip(ip("10.96.0.7")).await.unwrap(), None);
}
