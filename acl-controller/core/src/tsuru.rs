//! The subset of the tsuru platform API consumed by address resolution.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name} not found in tsuru")]
    NotFound { kind: &'static str, name: String },

    #[error("tsuru API responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("tsuru API request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub routers: Vec<AppRouter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppRouter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RpaasInstanceInfo {
    #[serde(default)]
    pub addresses: Vec<RpaasInstanceAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RpaasInstanceAddress {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
}

#[async_trait::async_trait]
pub trait TsuruApi: Send + Sync + 'static {
    async fn app_info(&self, app: &str) -> Result<AppInfo, Error>;

    async fn rpaas_instance_info(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<RpaasInstanceInfo, Error>;
}

// === impl AppInfo ===

impl AppInfo {
    /// Returns the distinct hosts the app's routers are reachable at.
    ///
    /// A router reporting several addresses contributes all of them; otherwise
    /// its single `address` is used.
    pub fn router_hosts(&self) -> std::collections::BTreeSet<String> {
        self.routers
            .iter()
            .flat_map(|router| {
                if router.addresses.is_empty() {
                    vec![router.address.as_str()]
                } else {
                    router.addresses.iter().map(String::as_str).collect()
                }
            })
            .filter_map(crate::net::url_to_host)
            .collect()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use self::fixed::FixedTsuruApi;

#[cfg(any(test, feature = "test-util"))]
mod fixed {
    use super::*;
    use parking_lot::Mutex;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    /// Serves apps and instances from memory.
    #[derive(Clone, Debug, Default)]
    pub struct FixedTsuruApi {
        apps: Arc<Mutex<HashMap<String, AppInfo>>>,
        instances: Arc<Mutex<HashMap<(String, String), RpaasInstanceInfo>>>,
        unavailable: Arc<AtomicBool>,
    }

    impl FixedTsuruApi {
        pub fn with_app(self, name: &str, routers: &[&str]) -> Self {
            self.set_app(name, routers);
            self
        }

        pub fn set_app(&self, name: &str, routers: &[&str]) {
            let info = AppInfo {
                name: name.to_string(),
                routers: routers
                    .iter()
                    .map(|address| AppRouter {
                        name: "default".to_string(),
                        address: address.to_string(),
                        addresses: vec![],
                    })
                    .collect(),
            };
            self.apps.lock().insert(name.to_string(), info);
        }

        pub fn with_instance(self, service: &str, instance: &str, ips: &[&str]) -> Self {
            let info = RpaasInstanceInfo {
                addresses: ips
                    .iter()
                    .map(|ip| RpaasInstanceAddress {
                        kind: "cluster-external".to_string(),
                        hostname: String::new(),
                        ip: ip.to_string(),
                    })
                    .collect(),
            };
            self.instances.lock().insert((service.to_string(), instance.to_string()), info);
            self
        }

        /// Makes every request fail as if tsuru could not be reached.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check_available(&self) -> Result<(), Error> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(Error::Request("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl TsuruApi for FixedTsuruApi {
        async fn app_info(&self, app: &str) -> Result<AppInfo, Error> {
            self.check_available()?;
            self.apps
                .lock()
                .get(app)
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    kind: "app",
                    name: app.to_string(),
                })
        }

        async fn rpaas_instance_info(
            &self,
            service: &str,
            instance: &str,
        ) -> Result<RpaasInstanceInfo, Error> {
            self.check_available()?;
            self.instances
                .lock()
                .get(&(service.to_string(), instance.to_string()))
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    kind: "rpaas instance",
                    name: format!("{service}/{instance}"),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_hosts_prefer_multiple_addresses() {
        let info: AppInfo = serde_json::from_str(
            r#"{
                "name": "myapp",
                "routers": [
                    {"name": "ingress", "address": "ignored.example.com",
                     "addresses": ["http://a.example.com", "b.example.com:8080"]},
                    {"name": "legacy", "address": "a.example.com"},
                    {"name": "broken", "address": ""}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            info.router_hosts().into_iter().collect::<Vec<_>>(),
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
    }

    #[test]
    fn decodes_rpaas_instance_info() {
        let info: RpaasInstanceInfo = serde_json::from_str(
            r#"{"addresses": [{"type": "cluster-external", "hostname": "x.example.com", "ip": "192.0.2.10", "status": "ready"}], "plan": "small"}"#,
        )
        .unwrap();
        assert_eq!(info.addresses[0].ip, "192.0.2.10");
        assert_eq!(info.addresses[0].kind, "cluster-external");
    }
}
