use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares which destinations the workload selected by `source` may reach.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "ACL",
    root = "Acl",
    plural = "acls",
    status = "AclStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"NetworkPolicy", "type":"string", "jsonPath":".status.networkPolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AclSpec {
    pub source: AclSource,
    #[serde(default)]
    pub destinations: Vec<AclDestination>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AclSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsuru_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpaas_instance: Option<RpaasInstanceRef>,
}

/// Exactly one field is expected to be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AclDestination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsuru_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsuru_app_pool: Option<String>,
    #[serde(
        default,
        rename = "externalDNS",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_dns: Option<ExternalDns>,
    #[serde(default, rename = "externalIP", skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<ExternalIp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpaas_instance: Option<RpaasInstanceRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceRef {
    pub service_name: String,
    pub instance: String,
}

/// A hostname; a leading `.` denotes every subdomain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDns {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ProtoPort>,
}

/// An IP address or a CIDR.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIp {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ProtoPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtoPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub number: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AclStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub network_policy: String,
}

/// A borrowed view of the field set on an [`AclDestination`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Destination<'a> {
    TsuruApp(&'a str),
    TsuruAppPool(&'a str),
    ExternalDns(&'a ExternalDns),
    ExternalIp(&'a ExternalIp),
    RpaasInstance(&'a RpaasInstanceRef),
}

// === impl AclSource ===

impl AclSource {
    pub fn tsuru_app(&self) -> Option<&str> {
        non_empty(&self.tsuru_app)
    }
}

// === impl AclDestination ===

impl AclDestination {
    /// Returns the destination's target. When several fields are set, the
    /// first one in declaration order wins.
    pub fn target(&self) -> Option<Destination<'_>> {
        if let Some(app) = non_empty(&self.tsuru_app) {
            return Some(Destination::TsuruApp(app));
        }
        if let Some(pool) = non_empty(&self.tsuru_app_pool) {
            return Some(Destination::TsuruAppPool(pool));
        }
        if let Some(dns) = self.external_dns.as_ref() {
            return Some(Destination::ExternalDns(dns));
        }
        if let Some(ip) = self.external_ip.as_ref() {
            return Some(Destination::ExternalIp(ip));
        }
        self.rpaas_instance.as_ref().map(Destination::RpaasInstance)
    }
}

// === impl ExternalDns ===

impl ExternalDns {
    pub fn is_wildcard(&self) -> bool {
        self.name.starts_with('.')
    }
}

// === impl RpaasInstanceRef ===

impl RpaasInstanceRef {
    /// The key identifying the instance's address record.
    pub fn key(&self) -> String {
        format!("{}-{}", self.service_name, self.instance)
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn decodes_destinations() {
        let spec: AclSpec = serde_json::from_value(serde_json::json!({
            "source": {"tsuruApp": "web"},
            "destinations": [
                {"tsuruApp": "db"},
                {"tsuruAppPool": "prod"},
                {"externalDNS": {"name": ".example.com", "ports": [{"protocol": "tcp", "number": 443}]}},
                {"externalIP": {"ip": "10.0.0.5"}},
                {"rpaasInstance": {"serviceName": "rpaasv2", "instance": "edge"}},
                {},
            ],
        }))
        .unwrap();

        assert_eq!(spec.source.tsuru_app(), Some("web"));
        let targets = spec
            .destinations
            .iter()
            .map(AclDestination::target)
            .collect::<Vec<_>>();
        assert!(matches!(targets[0], Some(Destination::TsuruApp("db"))));
        assert!(matches!(targets[1], Some(Destination::TsuruAppPool("prod"))));
        assert!(matches!(targets[2], Some(Destination::ExternalDns(dns)) if dns.is_wildcard()));
        assert!(matches!(targets[3], Some(Destination::ExternalIp(ip)) if ip.ip == "10.0.0.5"));
        assert!(
            matches!(targets[4], Some(Destination::RpaasInstance(r)) if r.key() == "rpaasv2-edge")
        );
        assert_eq!(targets[5], None);
    }

    #[test]
    fn empty_names_are_unset() {
        let dst = AclDestination {
            tsuru_app: Some(String::new()),
            tsuru_app_pool: Some("pool".to_string()),
            ..Default::default()
        };
        assert_eq!(dst.target(), Some(Destination::TsuruAppPool("pool")));
    }

    #[test]
    fn resource_identity() {
        assert_eq!(Acl::group(&()), crate::API_GROUP);
        assert_eq!(Acl::kind(&()), "ACL");
        assert_eq!(Acl::plural(&()), "acls");
    }

    #[test]
    fn destinations_encode_acronyms_in_upper_case() {
        let dst = AclDestination {
            external_ip: Some(ExternalIp {
                ip: "10.0.0.5".to_string(),
                ports: vec![],
            }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&dst).unwrap(),
            r#"{"externalIP":{"ip":"10.0.0.5"}}"#
        );
    }
}
