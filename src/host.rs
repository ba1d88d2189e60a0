//! Host capabilities the teardown runs against
//!
//! [`Host`] is the unattached view from outside the jail. Attaching consumes
//! it and yields the [`AttachedHost`] view from inside; there is no way back,
//! mirroring jail_attach(2) which permanently jails the calling process.

use crate::error::{Result, SyscallError};
use crate::jail::{JailIdentity, ffi, types};
use crate::mount::{self, MountEntry, UnmountTarget};
use crate::network::{NetifInfo, netif};
use crate::sys;
use crate::vmm;
use nix::sys::signal::Signal;
use std::path::{Path, PathBuf};

#[cfg(test)]
pub mod fake;

/// Mount table access shared by both sides of the attach boundary
pub trait MountView {
    /// Jail-scoped mount table, `None` when the facility is absent
    fn jail_scoped_mount_info(&self) -> Result<Option<Vec<MountEntry>>>;

    fn unmount(&self, target: &UnmountTarget, flags: ffi::MountFlags)
    -> std::result::Result<(), SyscallError>;
}

/// Operations available from outside the jail
pub trait Host: MountView {
    type Attached: AttachedHost;

    /// System-wide mount table
    fn mount_info(&self) -> Result<Vec<MountEntry>>;

    fn list_jails(&self) -> Result<Vec<JailIdentity>>;

    /// Whether any process still runs in the jail
    fn has_processes(&self, jid: i32) -> Result<bool>;

    fn signal_processes(&self, jid: i32, signal: Signal) -> Result<()>;

    fn remove_jail(&self, jid: i32) -> Result<()>;

    /// Interfaces on the host (`None`) or inside a jail's VNET
    fn list_interfaces(&self, jid: Option<i32>) -> Result<Vec<NetifInfo>>;

    fn destroy_interface(&self, jid: i32, name: &str) -> Result<()>;

    fn list_vmm_devices(&self) -> Result<Vec<String>>;

    fn is_jailed(&self) -> Result<bool>;

    /// Attach to the jail, giving up the unattached view for good
    fn attach(self, jid: i32) -> std::result::Result<Self::Attached, SyscallError>;
}

/// Operations available after attaching to the jail
pub trait AttachedHost: MountView {
    fn destroy_vmm(&self, name: &str) -> std::result::Result<(), SyscallError>;
}

/// The live FreeBSD host
#[derive(Debug, Clone)]
pub struct FreeBsdHost {
    vmm_dir: PathBuf,
}

impl FreeBsdHost {
    pub fn new(vmm_dir: impl Into<PathBuf>) -> Self {
        Self {
            vmm_dir: vmm_dir.into(),
        }
    }

    /// Directory listed for VMM devices
    pub fn vmm_dir(&self) -> &Path {
        &self.vmm_dir
    }
}

impl Default for FreeBsdHost {
    fn default() -> Self {
        Self::new(vmm::VMM_DIR)
    }
}

fn native_unmount(
    target: &UnmountTarget,
    flags: ffi::MountFlags,
) -> std::result::Result<(), SyscallError> {
    ffi::unmount(&target.to_string(), flags)
}

impl MountView for FreeBsdHost {
    fn jail_scoped_mount_info(&self) -> Result<Option<Vec<MountEntry>>> {
        mount::read_jail_scoped_mount_info()
    }

    fn unmount(
        &self,
        target: &UnmountTarget,
        flags: ffi::MountFlags,
    ) -> std::result::Result<(), SyscallError> {
        native_unmount(target, flags)
    }
}

impl Host for FreeBsdHost {
    type Attached = FreeBsdAttached;

    fn mount_info(&self) -> Result<Vec<MountEntry>> {
        mount::read_mount_info()
    }

    fn list_jails(&self) -> Result<Vec<JailIdentity>> {
        types::list_jails()
    }

    fn has_processes(&self, jid: i32) -> Result<bool> {
        // pgrep: 0 = matched, 1 = nothing matched, anything else is an error
        let jid = jid.to_string();
        match sys::run_tool_status("pgrep", &["-j", &jid])? {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(crate::error::Error::CommandFailed {
                command: format!("pgrep -j {}", jid),
                message: format!("exit status {}", code),
            }),
        }
    }

    fn signal_processes(&self, jid: i32, signal: Signal) -> Result<()> {
        let jid = jid.to_string();
        let signal = format!("-{}", signal as i32);
        // Exit status 1 means everything already exited
        match sys::run_tool_status("pkill", &[&signal, "-j", &jid])? {
            0 | 1 => Ok(()),
            code => Err(crate::error::Error::CommandFailed {
                command: format!("pkill {} -j {}", signal, jid),
                message: format!("exit status {}", code),
            }),
        }
    }

    fn remove_jail(&self, jid: i32) -> Result<()> {
        ffi::jail_remove(jid).map_err(Into::into)
    }

    fn list_interfaces(&self, jid: Option<i32>) -> Result<Vec<NetifInfo>> {
        netif::list_network_interfaces(jid)
    }

    fn destroy_interface(&self, jid: i32, name: &str) -> Result<()> {
        netif::destroy_interface(jid, name)
    }

    fn list_vmm_devices(&self) -> Result<Vec<String>> {
        vmm::list_vmm_devices(&self.vmm_dir)
    }

    fn is_jailed(&self) -> Result<bool> {
        sys::is_jailed()
    }

    fn attach(self, jid: i32) -> std::result::Result<FreeBsdAttached, SyscallError> {
        ffi::jail_attach(jid)?;
        Ok(FreeBsdAttached { _attached: () })
    }
}

/// The live FreeBSD host as seen from inside a jail
///
/// Only obtainable through [`Host::attach`].
#[derive(Debug)]
pub struct FreeBsdAttached {
    _attached: (),
}

impl MountView for FreeBsdAttached {
    fn jail_scoped_mount_info(&self) -> Result<Option<Vec<MountEntry>>> {
        mount::read_jail_scoped_mount_info()
    }

    fn unmount(
        &self,
        target: &UnmountTarget,
        flags: ffi::MountFlags,
    ) -> std::result::Result<(), SyscallError> {
        native_unmount(target, flags)
    }
}

impl AttachedHost for FreeBsdAttached {
    fn destroy_vmm(&self, name: &str) -> std::result::Result<(), SyscallError> {
        vmm::destroy_vmm(name)
    }
}
