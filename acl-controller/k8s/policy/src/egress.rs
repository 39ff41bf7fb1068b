use acl_controller_core::{
    net::{self, InvalidAddress},
    IpNet,
};
use acl_controller_k8s_api::{
    labels, IPBlock, IntOrString, NetworkPolicyEgressRule as Rule, NetworkPolicyPeer as Peer,
    NetworkPolicyPort, ProtoPort,
};

/// Protocol the API server assumes when a port omits one.
const DEFAULT_PROTOCOL: &str = "TCP";

#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error(transparent)]
    Address(#[from] acl_controller_k8s_address::Error),

    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),

    #[error("could not generate egress rule for: {ip:?}: {source}")]
    ResolvedAddress {
        ip: String,
        #[source]
        source: InvalidAddress,
    },

    #[error("{}", join(.0))]
    Multiple(Vec<DestinationError>),
}

/// A rule allowing traffic to the pods matching `selector`, on any port.
pub fn to_pods(selector: labels::Map) -> Rule {
    Rule {
        to: Some(vec![Peer {
            pod_selector: Some(labels::selector(selector)),
            ..Default::default()
        }]),
        ports: None,
    }
}

/// A rule allowing traffic to an IP or CIDR literal.
pub fn to_network(literal: &str, ports: &[ProtoPort]) -> Result<Rule, InvalidAddress> {
    let net = net::parse_network(literal)?;
    Ok(Rule {
        to: Some(vec![ip_block(net)]),
        ports: self::ports(ports),
    })
}

/// One single-host rule per resolved IP. Unparseable IPs are collected as
/// errors next to the rules built from the valid ones.
pub fn to_resolved(ips: &[String]) -> (Vec<Rule>, Vec<DestinationError>) {
    let mut rules = Vec::with_capacity(ips.len());
    let mut errors = Vec::new();
    for ip in ips {
        match to_network(ip, &[]) {
            Ok(rule) => rules.push(rule),
            Err(source) => errors.push(DestinationError::ResolvedAddress {
                ip: ip.clone(),
                source,
            }),
        }
    }
    (rules, errors)
}

/// A single rule allowing traffic to every host IP, or `None` when there are
/// no valid IPs, since a rule without peers would allow any destination.
pub fn to_hosts(ips: &[String], ports: &[ProtoPort]) -> Option<Rule> {
    let peers = ips
        .iter()
        .filter_map(|ip| match ip.parse::<std::net::IpAddr>() {
            Ok(ip) => Some(ip_block(ip.into())),
            Err(error) => {
                tracing::warn!(%error, %ip, "Ignoring invalid resolved address");
                None
            }
        })
        .collect::<Vec<_>>();
    if peers.is_empty() {
        return None;
    }
    Some(Rule {
        to: Some(peers),
        ports: self::ports(ports),
    })
}

/// The single host an IP-block peer targets, if any.
pub fn peer_host(peer: &Peer) -> Option<std::net::IpAddr> {
    let block = peer.ip_block.as_ref()?;
    let net = net::parse_network(&block.cidr).ok()?;
    net::single_host(&net)
}

/// A peer matching the pods selected by a service in `namespace`.
pub fn to_service_pods(selector: labels::Map, namespace: &str) -> Peer {
    Peer {
        pod_selector: Some(labels::selector(selector)),
        namespace_selector: Some(labels::selector(labels::namespace(namespace))),
        ip_block: None,
    }
}

fn ip_block(net: IpNet) -> Peer {
    Peer {
        ip_block: Some(IPBlock {
            cidr: net.to_string(),
            except: None,
        }),
        ..Default::default()
    }
}

fn ports(ports: &[ProtoPort]) -> Option<Vec<NetworkPolicyPort>> {
    if ports.is_empty() {
        return None;
    }
    let ports = ports
        .iter()
        .map(|port| NetworkPolicyPort {
            protocol: Some(
                port.protocol
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(str::to_uppercase)
                    .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            ),
            port: Some(IntOrString::Int(port.number.into())),
            end_port: None,
        })
        .collect();
    Some(ports)
}

fn join(errors: &[DestinationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn port(protocol: Option<&str>, number: u16) -> ProtoPort {
        ProtoPort {
            protocol: protocol.map(Into::into),
            number,
        }
    }

    #[test]
    fn networks_get_host_prefixes() {
        let rule = to_network("10.0.0.5", &[]).unwrap();
        assert_eq!(rule.ports, None);
        let peer = &rule.to.as_ref().unwrap()[0];
        assert_eq!(peer.ip_block.as_ref().unwrap().cidr, "10.0.0.5/32");
        assert_eq!(peer_host(peer), Some("10.0.0.5".parse().unwrap()));

        let rule = to_network("2001:db8::1", &[]).unwrap();
        assert_eq!(rule.to.unwrap()[0].ip_block.as_ref().unwrap().cidr, "2001:db8::1/128");

        let rule = to_network("10.0.0.0/8", &[]).unwrap();
        let peer = &rule.to.as_ref().unwrap()[0];
        assert_eq!(peer.ip_block.as_ref().unwrap().cidr, "10.0.0.0/8");
        assert_eq!(peer_host(peer), None);

        assert!(to_network("example.com", &[]).is_err());
    }

    #[test]
    fn ports_are_normalized() {
        let rule = to_network(
            "10.0.0.5",
            &[port(Some("udp"), 53), port(None, 443), port(Some(""), 80)],
        )
        .unwrap();
        let ports = rule.ports.unwrap();
        assert_eq!(
            ports
                .iter()
                .map(|p| (p.protocol.as_deref().unwrap(), p.port.clone().unwrap()))
                .collect::<Vec<_>>(),
            vec![
                ("UDP", IntOrString::Int(53)),
                ("TCP", IntOrString::Int(443)),
                ("TCP", IntOrString::Int(80)),
            ]
        );
    }

    #[test]
    fn resolved_ips_collect_failures() {
        let ips = vec!["10.0.0.1".to_string(), "bogus".to_string()];
        let (rules, errors) = to_resolved(&ips);
        assert_eq!(rules.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            DestinationError::Multiple(errors).to_string(),
            r#"could not generate egress rule for: "bogus": invalid IP address or CIDR "bogus""#
        );
    }

    #[test]
    fn hosts_without_ips_produce_no_rule() {
        assert!(to_hosts(&[], &[port(None, 443)]).is_none());

        let rule = to_hosts(
            &["198.51.100.7".to_string(), "2001:db8::7".to_string()],
            &[],
        )
        .unwrap();
        let cidrs = rule
            .to
            .unwrap()
            .into_iter()
            .map(|p| p.ip_block.unwrap().cidr)
            .collect::<Vec<_>>();
        assert_eq!(cidrs, vec!["198.51.100.7/32", "2001:db8::7/128"]);
    }

    #[test]
    fn service_peers_select_by_namespace_name() {
        let peer = to_service_pods(btreemap! { "role".to_string() => "db".to_string() }, "data");
        assert_eq!(
            peer.namespace_selector.unwrap().match_labels,
            Some(btreemap! { "name".to_string() => "data".to_string() })
        );
    }
}
