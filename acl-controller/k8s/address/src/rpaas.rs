use crate::{Error, Source};
use acl_controller_core::{
    dns::{self, Resolve},
    tsuru::TsuruApi,
};
use acl_controller_k8s_api::{
    address::RpaasInstanceAddressSpec, RpaasInstanceAddress, RpaasInstanceRef,
};
use std::{collections::BTreeSet, sync::Arc};

/// Resolves an rpaas instance into the addresses it is exposed on.
#[derive(Clone)]
pub struct RpaasSource {
    tsuru: Arc<dyn TsuruApi>,
    resolver: Arc<dyn Resolve>,
}

impl RpaasSource {
    pub fn new(tsuru: Arc<dyn TsuruApi>, resolver: Arc<dyn Resolve>) -> Self {
        Self { tsuru, resolver }
    }
}

#[async_trait::async_trait]
impl Source for RpaasSource {
    type Record = RpaasInstanceAddress;
    type Key = RpaasInstanceRef;

    fn key(instance: &RpaasInstanceRef) -> String {
        instance.key()
    }

    fn record(name: &str, instance: &RpaasInstanceRef) -> RpaasInstanceAddress {
        RpaasInstanceAddress::new(
            name,
            RpaasInstanceAddressSpec {
                service_name: instance.service_name.clone(),
                instance: instance.instance.clone(),
            },
        )
    }

    async fn resolve(
        &self,
        record: &RpaasInstanceAddress,
    ) -> Result<Option<BTreeSet<String>>, Error> {
        let spec = &record.spec;
        let info = self
            .tsuru
            .rpaas_instance_info(&spec.service_name, &spec.instance)
            .await?;

        // Prefer the reported IP; fall back to resolving the hostname.
        let hosts = info
            .addresses
            .iter()
            .filter_map(|addr| {
                [&addr.ip, &addr.hostname]
                    .into_iter()
                    .find(|s| !s.is_empty())
            })
            .collect::<Vec<_>>();
        let (ips, _) = dns::lookup_all(&*self.resolver, hosts).await;
        Ok(Some(ips))
    }
}
