//! Scuttle - FreeBSD jail teardown
//!
//! Reclaims the kernel resources a jail may still hold: processes, nested
//! jails, VNET epairs, filesystem mounts and bhyve VMM devices.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod host;
pub mod jail;
pub mod mount;
pub mod network;
pub mod reaper;
pub mod sys;
pub mod trace;
pub mod vmm;

pub use cleanup::{Cleanup, CleanupOptions, CleanupOutcome, CleanupPlan, cleanup_jail};
pub use error::{Error, Result};
pub use host::{FreeBsdHost, Host};
pub use jail::JailIdentity;
pub use trace::{Disposition, TraceEvent, TraceLevel, TraceSink, Tracer};
