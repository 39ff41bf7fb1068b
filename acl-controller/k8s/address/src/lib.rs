//! Resolvers converting ACL destinations into IP sets.
//!
//! Each destination class is backed by a cluster-scoped record named after
//! the destination's key. The record's status caches the sorted set of IPs
//! the destination resolved to, so that many ACLs referencing the same
//! destination share a single resolution. Records are created on first
//! reference and resolved immediately, then kept fresh by their own
//! controller loop.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod app;
mod dns;
mod resolver;
mod rpaas;


pub use self::{
    app::AppSource,
    dns::DnsSource,
    resolver::{Resolver, Source},
    rpaas::RpaasSource,
};
use acl_controller_core::{dns::Resolve, tsuru::TsuruApi};
use acl_controller_k8s_api::{store, Store};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),

    #[error(transparent)]
    Tsuru(#[from] acl_controller_core::tsuru::Error),
}

/// One resolver per destination class, sharing a store.
#[derive(Clone)]
pub struct Resolvers<S> {
    pub apps: Resolver<S, AppSource>,
    pub rpaas: Resolver<S, RpaasSource>,
    pub dns: Resolver<S, DnsSource>,
}

// === impl Resolvers ===

impl<S: Store> Resolvers<S> {
    pub fn new(store: S, tsuru: Arc<dyn TsuruApi>, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            apps: Resolver::new(
                store.clone(),
                AppSource::new(tsuru.clone(), resolver.clone()),
            ),
            rpaas: Resolver::new(store.clone(), RpaasSource::new(tsuru, resolver.clone())),
            dns: Resolver::new(store, DnsSource::new(resolver)),
        }
    }
}
