//! Scriptable in-memory host for teardown tests

use super::{AttachedHost, Host, MountView};
use crate::error::{Error, Result, SyscallError};
use crate::jail::JailIdentity;
use crate::jail::ffi::MountFlags;
use crate::mount::{MountEntry, UnmountTarget};
use crate::network::NetifInfo;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the fake host reports and records
#[derive(Debug, Default)]
pub struct FakeState {
    pub jails: Vec<JailIdentity>,

    /// Processes keep running until a signal arrives
    pub processes_alive: bool,
    /// Ignore signals (simulates unkillable processes)
    pub processes_ignore_signals: bool,
    pub process_probes: usize,
    pub signals: Vec<(i32, Signal)>,

    pub removed_jails: Vec<i32>,
    pub remove_failures: HashSet<i32>,

    pub interfaces: Vec<NetifInfo>,
    /// Destroying an interface leaves it in the listing
    pub interfaces_stuck: bool,
    pub interface_listings: usize,
    pub destroyed_interfaces: Vec<String>,

    pub vmm_devices: Vec<String>,
    pub jailed: bool,

    pub mounts: Vec<MountEntry>,
    pub scoped_mounts: Option<Vec<MountEntry>>,
    /// Errno returned for a given unmount target from outside
    pub unmount_errors: HashMap<String, Errno>,
    pub unmounted: Vec<(String, MountFlags)>,

    pub attach_error: Option<Errno>,
    pub attached_to: Option<i32>,

    pub inside_scoped_mounts: Option<Vec<MountEntry>>,
    pub inside_unmount_errors: HashMap<String, Errno>,
    pub inside_unmounted: Vec<(String, MountFlags)>,

    pub vmm_errors: HashMap<String, Errno>,
    pub destroyed_vmms: Vec<String>,
}

/// Outside view; clone it before handing it to the teardown to keep
/// inspecting the state afterwards
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

fn unmount_from(
    errors: &HashMap<String, Errno>,
    log: &mut Vec<(String, MountFlags)>,
    target: &UnmountTarget,
    flags: MountFlags,
) -> std::result::Result<(), SyscallError> {
    let target = target.to_string();
    log.push((target.clone(), flags));
    match errors.get(&target) {
        Some(errno) => Err(SyscallError::new(format!("unmount({})", target), *errno)),
        None => Ok(()),
    }
}

impl MountView for FakeHost {
    fn jail_scoped_mount_info(&self) -> Result<Option<Vec<MountEntry>>> {
        Ok(self.state().scoped_mounts.clone())
    }

    fn unmount(
        &self,
        target: &UnmountTarget,
        flags: MountFlags,
    ) -> std::result::Result<(), SyscallError> {
        let mut state = self.state();
        let state = &mut *state;
        unmount_from(&state.unmount_errors, &mut state.unmounted, target, flags)
    }
}

impl Host for FakeHost {
    type Attached = FakeAttached;

    fn mount_info(&self) -> Result<Vec<MountEntry>> {
        Ok(self.state().mounts.clone())
    }

    fn list_jails(&self) -> Result<Vec<JailIdentity>> {
        Ok(self.state().jails.clone())
    }

    fn has_processes(&self, _jid: i32) -> Result<bool> {
        let mut state = self.state();
        state.process_probes += 1;
        Ok(state.processes_alive)
    }

    fn signal_processes(&self, jid: i32, signal: Signal) -> Result<()> {
        let mut state = self.state();
        state.signals.push((jid, signal));
        if !state.processes_ignore_signals {
            state.processes_alive = false;
        }
        Ok(())
    }

    fn remove_jail(&self, jid: i32) -> Result<()> {
        let mut state = self.state();
        state.removed_jails.push(jid);
        if state.remove_failures.contains(&jid) {
            return Err(Error::Syscall(SyscallError::new(
                format!("jail_remove({})", jid),
                Errno::EINVAL,
            )));
        }
        Ok(())
    }

    fn list_interfaces(&self, _jid: Option<i32>) -> Result<Vec<NetifInfo>> {
        let mut state = self.state();
        state.interface_listings += 1;
        Ok(state.interfaces.clone())
    }

    fn destroy_interface(&self, _jid: i32, name: &str) -> Result<()> {
        let mut state = self.state();
        state.destroyed_interfaces.push(name.to_string());
        if !state.interfaces_stuck {
            state.interfaces.retain(|i| i.name != name);
        }
        Ok(())
    }

    fn list_vmm_devices(&self) -> Result<Vec<String>> {
        Ok(self.state().vmm_devices.clone())
    }

    fn is_jailed(&self) -> Result<bool> {
        Ok(self.state().jailed)
    }

    fn attach(self, jid: i32) -> std::result::Result<FakeAttached, SyscallError> {
        let mut state = self.state();
        if let Some(errno) = state.attach_error {
            return Err(SyscallError::new(format!("jail_attach({})", jid), errno));
        }
        state.attached_to = Some(jid);
        drop(state);
        Ok(FakeAttached {
            state: Arc::clone(&self.state),
        })
    }
}

/// Inside view handed out by [`FakeHost::attach`]
#[derive(Debug)]
pub struct FakeAttached {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAttached {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl MountView for FakeAttached {
    fn jail_scoped_mount_info(&self) -> Result<Option<Vec<MountEntry>>> {
        Ok(self.state().inside_scoped_mounts.clone())
    }

    fn unmount(
        &self,
        target: &UnmountTarget,
        flags: MountFlags,
    ) -> std::result::Result<(), SyscallError> {
        let mut state = self.state();
        let state = &mut *state;
        unmount_from(
            &state.inside_unmount_errors,
            &mut state.inside_unmounted,
            target,
            flags,
        )
    }
}

impl AttachedHost for FakeAttached {
    fn destroy_vmm(&self, name: &str) -> std::result::Result<(), SyscallError> {
        let mut state = self.state();
        match state.vmm_errors.get(name) {
            Some(errno) => Err(SyscallError::new(
                format!("sysctlbyname(hw.vmm.destroy={})", name),
                *errno,
            )),
            None => {
                state.destroyed_vmms.push(name.to_string());
                Ok(())
            }
        }
    }
}
