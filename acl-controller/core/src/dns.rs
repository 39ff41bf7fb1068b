use hickory_resolver::TokioResolver;
use std::{collections::BTreeSet, net::IpAddr, time::Duration};
use tokio::time;

/// Bounds every individual lookup so one stalled hostname cannot stall a
/// whole reconciliation.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lookup of {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("lookup of {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("{host} has no addresses")]
    NoAddresses { host: String },
}

/// Resolves hostnames into IP addresses.
#[async_trait::async_trait]
pub trait Resolve: Send + Sync + 'static {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Error>;
}

/// Resolves with the system's resolver configuration.
#[derive(Clone)]
pub struct SystemResolver(TokioResolver);

// === impl SystemResolver ===

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, hickory_resolver::ResolveError> {
        Ok(Self(TokioResolver::builder_tokio()?.build()))
    }
}

#[async_trait::async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Error> {
        let lookup = self.0.lookup_ip(host).await.map_err(|error| Error::Lookup {
            host: host.to_string(),
            source: error.into(),
        })?;
        Ok(lookup.iter().collect())
    }
}

impl std::fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

/// Resolves `host` under [`LOOKUP_TIMEOUT`].
///
/// IP literals resolve to themselves without consulting the resolver.
pub async fn lookup<R: Resolve + ?Sized>(resolver: &R, host: &str) -> Result<Vec<IpAddr>, Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let addrs = time::timeout(LOOKUP_TIMEOUT, resolver.lookup(host))
        .await
        .map_err(|_| Error::Timeout {
            host: host.to_string(),
            timeout: LOOKUP_TIMEOUT,
        })??;
    if addrs.is_empty() {
        return Err(Error::NoAddresses {
            host: host.to_string(),
        });
    }
    Ok(addrs)
}

/// Resolves every host, collecting the union of their addresses alongside the
/// failures. A failing host never prevents the others from resolving.
pub async fn lookup_all<R, I>(resolver: &R, hosts: I) -> (BTreeSet<String>, Vec<Error>)
where
    R: Resolve + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut ips = BTreeSet::new();
    let mut errors = Vec::new();
    for host in hosts {
        match lookup(resolver, host.as_ref()).await {
            Ok(addrs) => ips.extend(addrs.into_iter().map(|ip| ip.to_string())),
            Err(error) => {
                tracing::warn!(%error, host = host.as_ref(), "Skipping unresolvable host");
                errors.push(error);
            }
        }
    }
    (ips, errors)
}

#[cfg(any(test, feature = "test-util"))]
pub use self::fixed::FixedResolver;

#[cfg(any(test, feature = "test-util"))]
mod fixed {
    use super::*;
    use parking_lot::Mutex;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    /// Resolves from a static table; unknown hosts fail.
    #[derive(Clone, Debug, Default)]
    pub struct FixedResolver {
        hosts: Arc<Mutex<HashMap<String, Vec<IpAddr>>>>,
        lookups: Arc<AtomicUsize>,
    }

    impl FixedResolver {
        pub fn with(self, host: &str, ips: &[&str]) -> Self {
            self.set(host, ips);
            self
        }

        pub fn set(&self, host: &str, ips: &[&str]) {
            let ips = ips
                .iter()
                .map(|ip| ip.parse().expect("test IPs must be valid"))
                .collect();
            self.hosts.lock().insert(host.to_string(), ips);
        }

        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Resolve for FixedResolver {
        async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.hosts
                .lock()
                .get(host)
                .cloned()
                .ok_or_else(|| Error::Lookup {
                    host: host.to_string(),
                    source: "NXDOMAIN".into(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait::async_trait]
    impl Resolve for Stalled {
        async fn lookup(&self, _: &str) -> Result<Vec<IpAddr>, Error> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn literals_bypass_the_resolver() {
        let resolver = FixedResolver::default();
        let ips = lookup(&resolver, "10.1.2.3").await.unwrap();
        assert_eq!(ips, vec!["10.1.2.3".parse::<IpAddr>().unwrap()]);
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_time_out() {
        let error = lookup(&Stalled, "slow.example.com").await.unwrap_err();
        assert!(matches!(error, Error::Timeout { .. }), "{error}");
    }

    #[tokio::test]
    async fn partial_failures_are_collected() {
        let resolver = FixedResolver::default()
            .with("a.example.com", &["10.0.0.2", "10.0.0.1"])
            .with("b.example.com", &["10.0.0.1"]);
        let (ips, errors) =
            lookup_all(&resolver, ["a.example.com", "missing.example.com", "b.example.com"]).await;
        assert_eq!(
            ips.into_iter().collect::<Vec<_>>(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_answers_are_errors() {
        let resolver = FixedResolver::default().with("empty.example.com", &[]);
        let error = lookup(&resolver, "empty.example.com").await.unwrap_err();
        assert!(matches!(error, Error::NoAddresses { .. }), "{error}");
    }
}
