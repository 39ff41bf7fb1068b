//! An HTTP client for the tsuru API.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use acl_controller_core::tsuru::{AppInfo, Error, RpaasInstanceInfo, TsuruApi};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub use reqwest::Url;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("tsuru host {0} is not a base URL")]
    InvalidHost(Url),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    host: Url,
    token: String,
}

// === impl Client ===

impl Client {
    pub fn new(host: Url, token: String, timeout: Duration) -> Result<Self, BuildError> {
        if host.cannot_be_a_base() {
            return Err(BuildError::InvalidHost(host));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, host, token })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.host.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn app_url(&self, app: &str) -> Url {
        self.url(&["1.0", "apps", app])
    }

    fn rpaas_info_url(&self, service: &str, instance: &str) -> Url {
        let mut url = self.url(&["1.0", "services", service, "proxy", instance]);
        url.set_query(Some(&format!("callback=/resources/{instance}/info")));
        url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        kind: &'static str,
        name: String,
    ) -> Result<T, Error> {
        tracing::debug!(%url, "Requesting tsuru");
        let rsp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(request_error)?;

        let status = rsp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound { kind, name });
        }
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        rsp.json().await.map_err(request_error)
    }
}

#[async_trait::async_trait]
impl TsuruApi for Client {
    async fn app_info(&self, app: &str) -> Result<AppInfo, Error> {
        self.get(self.app_url(app), "app", app.to_string()).await
    }

    async fn rpaas_instance_info(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<RpaasInstanceInfo, Error> {
        self.get(
            self.rpaas_info_url(service, instance),
            "rpaas instance",
            format!("{service}/{instance}"),
        )
        .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host.as_str())
            .finish_non_exhaustive()
    }
}

fn request_error(error: reqwest::Error) -> Error {
    Error::Request(Box::new(error))
}
