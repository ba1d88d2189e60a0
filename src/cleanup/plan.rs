//! Read-only preview of what a teardown would touch

use crate::error::Result;
use crate::host::Host;
use crate::jail::JailIdentity;
use crate::mount::{self, MountEntry};
use crate::network::NetifInfo;
use serde::Serialize;
use std::fmt;

/// Everything a teardown of one jail would act on, as seen right now
#[derive(Debug, Clone, Serialize)]
pub struct CleanupPlan {
    pub jail: JailIdentity,
    pub has_processes: bool,
    pub nested_jails: Vec<JailIdentity>,
    /// Only filled for VNET jails
    pub epairs: Vec<NetifInfo>,
    /// In unmount order
    pub unmounts: Vec<MountEntry>,
    pub vmm_devices: Vec<String>,
    pub jail_scoped_mounts: bool,
}

impl CleanupPlan {
    /// Collect the plan without changing anything
    pub fn collect<H: Host>(host: &H, jail: &JailIdentity, skip_first_devfs: bool) -> Result<Self> {
        let nested_jails = host
            .list_jails()?
            .into_iter()
            .filter(|j| j.parent() == Some(jail.jid))
            .collect();

        let epairs = if jail.is_vnet() {
            host.list_interfaces(Some(jail.jid))?
                .into_iter()
                .filter(|iface| iface.is_epair())
                .collect()
        } else {
            Vec::new()
        };

        let scoped = if host.is_jailed().unwrap_or(false) {
            host.jail_scoped_mount_info()?
        } else {
            None
        };
        let jail_scoped_mounts = scoped.is_some();
        let mounts = match scoped {
            Some(entries) => entries,
            None => host.mount_info()?,
        };
        let unmounts = mount::unmount_candidates(&mounts, &jail.path, skip_first_devfs)
            .into_iter()
            .cloned()
            .collect();

        Ok(Self {
            jail: jail.clone(),
            has_processes: host.has_processes(jail.jid)?,
            nested_jails,
            epairs,
            unmounts,
            vmm_devices: host.list_vmm_devices()?,
            jail_scoped_mounts,
        })
    }

    /// Whether the teardown would need to attach for a second pass
    ///
    /// Unmount failures are only known at run time, so this only reflects
    /// the VMM devices and the nullfs mounts that might fail.
    pub fn may_attach(&self) -> bool {
        !self.vmm_devices.is_empty() || self.unmounts.iter().any(|m| m.is_nullfs())
    }
}

impl fmt::Display for CleanupPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Jail '{}' (JID {}) at {}",
            self.jail.name,
            self.jail.jid,
            self.jail.path.display()
        )?;
        writeln!(
            f,
            "  Processes:    {}",
            if self.has_processes { "running" } else { "none" }
        )?;

        writeln!(f, "  Nested jails: {}", self.nested_jails.len())?;
        for child in &self.nested_jails {
            writeln!(f, "    {} (JID {})", child.name, child.jid)?;
        }

        if self.jail.is_vnet() {
            writeln!(f, "  Epairs:       {}", self.epairs.len())?;
            for iface in &self.epairs {
                writeln!(f, "    {} ({})", iface.name, iface.driver_name)?;
            }
        }

        writeln!(
            f,
            "  Unmounts:     {} ({} table)",
            self.unmounts.len(),
            if self.jail_scoped_mounts { "jail-scoped" } else { "system" }
        )?;
        for entry in &self.unmounts {
            writeln!(
                f,
                "    {:<8} {} -> {}",
                entry.fs_type,
                entry.node.display(),
                entry.unmount_target()
            )?;
        }

        writeln!(f, "  VMM devices:  {}", self.vmm_devices.len())?;
        for name in &self.vmm_devices {
            writeln!(f, "    {}", name)?;
        }

        write!(
            f,
            "  Second pass:  {}",
            if self.may_attach() { "possible" } else { "not needed" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn test_collect_changes_nothing() {
        let host = FakeHost::new();
        {
            let mut state = host.state();
            state.processes_alive = true;
            state.jails = vec![
                JailIdentity::new(43, "web.child", "/jails/web/child").with_param("parent", "42"),
            ];
            state.interfaces = vec![NetifInfo::new("epair0b", "epair0"), NetifInfo::new("lo0", "lo0")];
            state.mounts = vec![
                MountEntry::new("devfs", "devfs", "/jails/web/dev"),
                MountEntry::new("nullfs", "/pkg", "/jails/web/pkg"),
                MountEntry::new("devfs", "devfs", "/dev"),
            ];
        }
        let jail = JailIdentity::new(42, "web", "/jails/web").with_param("vnet", "new");

        let plan = CleanupPlan::collect(&host, &jail, false).unwrap();

        assert!(plan.has_processes);
        assert_eq!(plan.nested_jails.len(), 1);
        assert_eq!(plan.epairs.len(), 1);
        assert_eq!(plan.unmounts.len(), 2);
        assert_eq!(plan.unmounts[0].fs_type, "nullfs");
        assert!(plan.may_attach());
        assert!(!plan.jail_scoped_mounts);

        let state = host.state();
        assert!(state.signals.is_empty());
        assert!(state.unmounted.is_empty());
        assert!(state.destroyed_interfaces.is_empty());
    }

    #[test]
    fn test_display_lists_unmount_targets() {
        let host = FakeHost::new();
        host.state().mounts = vec![MountEntry::new("tmpfs", "tmpfs", "/jails/web/tmp")];
        let jail = JailIdentity::new(42, "web", "/jails/web");

        let text = CleanupPlan::collect(&host, &jail, false).unwrap().to_string();

        assert!(text.contains("/jails/web/tmp -> /jails/web/tmp"));
        assert!(text.contains("not needed"));
        assert!(!text.contains("Epairs"));
    }
}
