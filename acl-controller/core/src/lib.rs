#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod dns;
pub mod name;
pub mod net;
pub mod tsuru;

pub use self::name::name;
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// Used as the field manager for every write issued by the controller.
pub const ACL_CONTROLLER_NAME: &str = "acl-controller.extensions.tsuru.io";
