use crate::{Error, Source};
use acl_controller_core::dns::{self, Resolve};
use acl_controller_k8s_api::{address::AclDnsEntrySpec, AclDnsEntry};
use std::{collections::BTreeSet, sync::Arc};

/// Resolves an external hostname.
#[derive(Clone)]
pub struct DnsSource {
    resolver: Arc<dyn Resolve>,
}

impl DnsSource {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl Source for DnsSource {
    type Record = AclDnsEntry;
    type Key = str;

    fn key(host: &str) -> String {
        host.to_string()
    }

    fn record(name: &str, host: &str) -> AclDnsEntry {
        AclDnsEntry::new(
            name,
            AclDnsEntrySpec {
                host: host.to_string(),
            },
        )
    }

    async fn resolve(&self, entry: &AclDnsEntry) -> Result<Option<BTreeSet<String>>, Error> {
        let host = entry.spec.host.as_str();
        if host.starts_with('.') {
            tracing::debug!(host, "Wildcard hosts are not resolved");
            return Ok(None);
        }

        match dns::lookup(&*self.resolver, host).await {
            Ok(addrs) => Ok(Some(addrs.into_iter().map(|ip| ip.to_string()).collect())),
            Err(error) => {
                tracing::warn!(%error, host, "Failed to resolve host");
                Ok(None)
            }
        }
    }
}
