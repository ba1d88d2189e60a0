//! Network teardown for VNET jails
//!
//! Provides:
//! - Interface enumeration with driver names
//! - Iterative destruction of a jail's epair interfaces

pub mod epair;
pub mod netif;

pub use epair::destroy_vnet_interfaces;
pub use netif::NetifInfo;
