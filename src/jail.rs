//! Jail access
//!
//! This module provides:
//! - FFI bindings to the FreeBSD jail, mount and sysctl syscalls
//! - Jail identities parsed from the live jail listing

pub mod ffi;
pub mod types;

// Re-exports
pub use ffi::{jail_attach, jail_remove};
pub use types::{JailIdentity, list_jails};
