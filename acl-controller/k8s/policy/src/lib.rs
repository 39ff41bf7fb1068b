//! Materializes ACLs into egress NetworkPolicies.
//!
//! Each pass reads an ACL, turns every destination into egress rules
//! (resolving dynamic destinations through their address records), widens
//! rules targeting service IPs with the selector of the pods behind the
//! service, and then creates or updates the ACL's NetworkPolicy only if one of
//! its computed fields differs. The outcome is reflected in the ACL's status.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod egress;
mod reconciler;


pub use self::{
    egress::DestinationError,
    reconciler::{policy_name, Error, Outcome, Reconciler},
};
use acl_controller_core::name;
use acl_controller_k8s_api::{Acl, Destination};

/// An address record an ACL depends on, by record name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressRef {
    TsuruApp(String),
    RpaasInstance(String),
    DnsEntry(String),
}

/// Lists the address records whose changes affect `acl`'s policy.
pub fn referenced_addresses(acl: &Acl) -> Vec<AddressRef> {
    acl.spec
        .destinations
        .iter()
        .filter_map(|dst| match dst.target()? {
            Destination::TsuruApp(app) => Some(AddressRef::TsuruApp(name(app))),
            Destination::RpaasInstance(instance) => {
                Some(AddressRef::RpaasInstance(name(&instance.key())))
            }
            Destination::ExternalDns(dns) if !dns.is_wildcard() => {
                Some(AddressRef::DnsEntry(name(&dns.name)))
            }
            Destination::ExternalDns(_)
            | Destination::ExternalIp(_)
            | Destination::TsuruAppPool(_) => None,
        })
        .collect()
}
