use crate::{Error, Source};
use acl_controller_core::{
    dns::{self, Resolve},
    tsuru::TsuruApi,
};
use acl_controller_k8s_api::{address::TsuruAppAddressSpec, TsuruAppAddress};
use std::{collections::BTreeSet, sync::Arc};

/// Resolves a tsuru app into the addresses of its routers.
#[derive(Clone)]
pub struct AppSource {
    tsuru: Arc<dyn TsuruApi>,
    resolver: Arc<dyn Resolve>,
}

impl AppSource {
    pub fn new(tsuru: Arc<dyn TsuruApi>, resolver: Arc<dyn Resolve>) -> Self {
        Self { tsuru, resolver }
    }
}

#[async_trait::async_trait]
impl Source for AppSource {
    type Record = TsuruAppAddress;
    type Key = str;

    fn key(app: &str) -> String {
        app.to_string()
    }

    fn record(name: &str, app: &str) -> TsuruAppAddress {
        TsuruAppAddress::new(
            name,
            TsuruAppAddressSpec {
                name: app.to_string(),
            },
        )
    }

    async fn resolve(&self, record: &TsuruAppAddress) -> Result<Option<BTreeSet<String>>, Error> {
        let info = self.tsuru.app_info(&record.spec.name).await?;
        let hosts = info.router_hosts();
        let (ips, errors) = dns::lookup_all(&*self.resolver, &hosts).await;
        if !errors.is_empty() {
            tracing::info!(
                app = %record.spec.name,
                failed = errors.len(),
                hosts = hosts.len(),
                "Some router hosts could not be resolved",
            );
        }
        Ok(Some(ips))
    }
}
