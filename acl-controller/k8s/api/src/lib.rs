#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod acl;
pub mod address;
pub mod labels;
mod resource_id;
pub mod store;

pub use self::{
    acl::{
        Acl, AclDestination, AclSource, AclSpec, AclStatus, Destination, ExternalDns, ExternalIp,
        ProtoPort, RpaasInstanceRef,
    },
    address::{
        AclDnsEntry, AddressRecord, ResourceAddressStatus, RpaasInstanceAddress, TsuruAppAddress,
    },
    resource_id::ResourceId,
    store::{KubeStore, Object, Store},
};
pub use k8s_openapi::{
    api::{
        core::v1::Service,
        networking::v1::{
            IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyPeer,
            NetworkPolicyPort, NetworkPolicySpec,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, OwnerReference},
        util::intstr::IntOrString,
    },
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    runtime::reflector::ObjectRef,
    Client, CustomResourceExt, Error, Resource, ResourceExt,
};

/// API group of every custom resource served by the controller.
pub const API_GROUP: &str = "extensions.tsuru.io";
