//! Mount table data model and enumeration
//!
//! This module provides:
//! - Filesystem ID decoding for `MNT_BYFSID` unmounts
//! - System-wide and jail-scoped mount table readers
//! - Selection of the mounts a teardown may touch

pub mod fsid;
pub mod table;

// Re-exports
pub use fsid::FsId;
pub use table::{
    MountEntry, UnmountTarget, is_under, read_jail_scoped_mount_info, read_mount_info,
    relative_node, unmount_candidates,
};
