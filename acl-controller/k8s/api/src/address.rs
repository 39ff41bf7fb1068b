//! Cluster-scoped records caching the IPs a destination resolves to.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status shared by every address record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAddressStatus {
    #[serde(default)]
    pub ready: bool,
    /// Sorted, distinct textual IP addresses.
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "ACLDNSEntry",
    root = "AclDnsEntry",
    plural = "acldnsentries",
    status = "ResourceAddressStatus",
    printcolumn = r#"{"name":"Host", "type":"string", "jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AclDnsEntrySpec {
    pub host: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "TsuruAppAddress",
    plural = "tsuruappaddresses",
    status = "ResourceAddressStatus",
    printcolumn = r#"{"name":"App", "type":"string", "jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TsuruAppAddressSpec {
    /// The tsuru app's name.
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "RpaasInstanceAddress",
    plural = "rpaasinstanceaddresses",
    status = "ResourceAddressStatus",
    printcolumn = r#"{"name":"Service", "type":"string", "jsonPath":".spec.serviceName"}"#,
    printcolumn = r#"{"name":"Instance", "type":"string", "jsonPath":".spec.instance"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceAddressSpec {
    pub service_name: String,
    pub instance: String,
}

/// Access to the status every address record carries.
pub trait AddressRecord: crate::Object {
    fn address_status(&self) -> Option<&ResourceAddressStatus>;

    /// The resolved IPs, or `None` while the record has never resolved.
    fn ready_ips(&self) -> Option<&[String]> {
        self.address_status()
            .filter(|status| status.ready)
            .map(|status| status.ips.as_slice())
    }
}

macro_rules! impl_address_record {
    ($($ty:ty),+) => {
        $(
            impl AddressRecord for $ty {
                fn address_status(&self) -> Option<&ResourceAddressStatus> {
                    self.status.as_ref()
                }
            }
        )+
    };
}

impl_address_record!(AclDnsEntry, TsuruAppAddress, RpaasInstanceAddress);

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn records_are_cluster_scoped() {
        for crd in [
            AclDnsEntry::crd(),
            TsuruAppAddress::crd(),
            RpaasInstanceAddress::crd(),
        ] {
            assert_eq!(crd.spec.scope, "Cluster", "{}", crd.spec.names.kind);
            assert_eq!(crd.spec.group, crate::API_GROUP);
        }
        assert_eq!(AclDnsEntry::kind(&()), "ACLDNSEntry");
    }

    #[test]
    fn unresolved_records_have_no_ips() {
        let mut entry = AclDnsEntry::new(
            "example.com",
            AclDnsEntrySpec {
                host: "example.com".to_string(),
            },
        );
        assert_eq!(entry.ready_ips(), None);

        entry.status = Some(ResourceAddressStatus {
            ready: false,
            ips: vec!["192.0.2.1".to_string()],
            updated_at: None,
        });
        assert_eq!(entry.ready_ips(), None);

        entry.status = Some(ResourceAddressStatus {
            ready: true,
            ips: vec!["192.0.2.1".to_string()],
            updated_at: Some("2024-01-01T00:00:00Z".to_string()),
        });
        assert_eq!(entry.ready_ips(), Some(&["192.0.2.1".to_string()][..]));
    }

    #[test]
    fn status_encodes_camel_case() {
        let status = ResourceAddressStatus {
            ready: true,
            ips: vec!["192.0.2.1".to_string()],
            updated_at: Some("2024-01-01T00:00:00Z".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "ready": true,
                "ips": ["192.0.2.1"],
                "updatedAt": "2024-01-01T00:00:00Z",
            })
        );
    }
}
