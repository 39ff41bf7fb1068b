//! Reverse index from literal IP addresses to the `Service` that owns them.
//!
//! Egress rules targeting an IP block only match traffic that actually leaves
//! the pod with that destination address. When the address belongs to a
//! cluster `Service`, kube-proxy rewrites it to a pod address before policy is
//! enforced, so the rule must also name the pods behind the service. The
//! [`ServiceCache`] answers "which selector owns this IP?" for that purpose.
//!
//! The index is rebuilt wholesale from a listing of every `Service` once the
//! current snapshot is older than the configured TTL. Readers never block on a
//! rebuild while a snapshot exists; they keep reading the previous snapshot
//! until the new one is swapped in.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod services;

#[cfg(test)]
mod tests;

pub use self::services::{Error, ServiceCache, ServiceOwner};
