use acl_controller_k8s_api::{labels, store, ResourceExt, Service, Store};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug, thiserror::Error)]
#[error("failed to list services: {0}")]
pub struct Error(#[source] store::Error);

/// The service owning an address, along with the pods it selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceOwner {
    pub name: String,
    pub namespace: String,
    pub selector: labels::Map,
}

#[derive(Debug)]
pub struct ServiceCache<S> {
    store: S,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,

    /// Serializes rebuilds.
    rebuild: Mutex<()>,
}

#[derive(Debug)]
struct Snapshot {
    built_at: Instant,
    by_ip: HashMap<IpAddr, ServiceOwner>,
}

// === impl ServiceCache ===

impl<S: Store> ServiceCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            snapshot: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    /// Finds the service owning `ip`, building or refreshing the index first
    /// if needed.
    pub async fn by_ip(&self, ip: IpAddr) -> Result<Option<ServiceOwner>, Error> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.by_ip.get(&ip).cloned())
    }

    async fn snapshot(&self) -> Result<Arc<Snapshot>, Error> {
        let current = self.snapshot.read().clone();
        match current {
            Some(snapshot) if snapshot.is_fresh(self.ttl) => Ok(snapshot),

            Some(stale) => {
                let Ok(_rebuilding) = self.rebuild.try_lock() else {
                    tracing::trace!("Service index rebuild in progress");
                    return Ok(stale);
                };
                self.rebuild().await
            }

            None => {
                let _rebuilding = self.rebuild.lock().await;
                let built = self.snapshot.read().clone();
                if let Some(snapshot) = built.filter(|s| s.is_fresh(self.ttl)) {
                    return Ok(snapshot);
                }
                self.rebuild().await
            }
        }
    }

    async fn rebuild(&self) -> Result<Arc<Snapshot>, Error> {
        let services = self.store.list::<Service>().await.map_err(Error)?;
        let snapshot = Arc::new(Snapshot::index(services));
        tracing::debug!(addresses = snapshot.by_ip.len(), "Rebuilt service index");
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }
}

// === impl Snapshot ===

impl Snapshot {
    fn index(services: Vec<Service>) -> Self {
        let mut by_ip = HashMap::default();
        for svc in services {
            let selector = svc
                .spec
                .as_ref()
                .and_then(|spec| spec.selector.clone())
                .unwrap_or_default();
            if selector.is_empty() {
                continue;
            }
            let Some(namespace) = svc.namespace() else {
                continue;
            };
            let owner = ServiceOwner {
                name: svc.name_any(),
                namespace,
                selector,
            };

            for addr in addresses(&svc) {
                match addr.parse::<IpAddr>() {
                    Ok(ip) => {
                        by_ip.entry(ip).or_insert_with(|| owner.clone());
                    }
                    Err(error) => tracing::warn!(
                        %error,
                        service = %owner.name,
                        namespace = %owner.namespace,
                        addr,
                        "Ignoring invalid service address",
                    ),
                }
            }
        }

        Self {
            built_at: Instant::now(),
            by_ip,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.built_at.elapsed() < ttl
    }
}

/// Every stable virtual address of a service.
fn addresses(svc: &Service) -> Vec<&str> {
    let mut addrs = Vec::new();
    if let Some(spec) = svc.spec.as_ref() {
        addrs.extend(spec.cluster_ip.as_deref());
        addrs.extend(spec.cluster_ips.iter().flatten().map(String::as_str));
        addrs.extend(spec.external_ips.iter().flatten().map(String::as_str));
    }
    if let Some(lb) = svc.status.as_ref().and_then(|s| s.load_balancer.as_ref()) {
        addrs.extend(
            lb.ingress
                .iter()
                .flatten()
                .filter_map(|ingress| ingress.ip.as_deref()),
        );
    }
    addrs.retain(|addr| !addr.is_empty() && *addr != "None");
    addrs
}
