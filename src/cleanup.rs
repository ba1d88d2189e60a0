//! Jail teardown orchestrator
//!
//! Reclaims everything a jail may hold, in an order that keeps the host safe:
//!
//! 1. kill processes (bounded by a timeout)
//! 2. remove nested jails
//! 3. destroy VNET epairs
//! 4. snapshot VMM devices while they are still attributable to the jail
//! 5. unmount filesystems below the jail root, deepest first
//! 6. if nullfs mounts or VMM devices are left, attach to the jail and
//!    finish from inside (FreeBSD bug #282041 hides some mounts from the host)
//!
//! Ordinary failures are traced, counted and skipped. Only a failed attach and
//! a non-decreasing epair count abort the teardown.

pub mod isolate;
pub mod plan;
pub mod state;

pub use plan::CleanupPlan;
pub use state::{Phase, TeardownMachineEvent, TeardownPhase};

use crate::error::{Error, Result};
use crate::host::{AttachedHost, FreeBsdHost, Host};
use crate::jail::JailIdentity;
use crate::jail::ffi::MountFlags;
use crate::mount::{self, MountEntry, UnmountTarget};
use crate::network;
use crate::reaper;
use crate::trace::Tracer;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for a teardown
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Upper bound for the kill phase
    pub kill_timeout: Duration,
    pub signal: Signal,
    pub poll_interval: Duration,
    /// Leave the first devfs mount below the jail root in place
    pub skip_first_devfs: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            kill_timeout: Duration::from_secs(30),
            signal: Signal::SIGKILL,
            poll_interval: reaper::POLL_INTERVAL,
            skip_first_devfs: false,
        }
    }
}

/// How the attached second pass found leftover mounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondPass {
    /// The jail-scoped mount table was available inside the jail
    JailScoped,
    /// Blind force-unmount of the nullfs leftovers
    Probe,
}

/// Aggregated result of a teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    /// Number of failed sub-steps
    pub failures: usize,
    /// Last phase reached
    pub phase: Phase,
    pub second_pass: Option<SecondPass>,
}

impl Default for CleanupOutcome {
    fn default() -> Self {
        Self {
            failures: 0,
            phase: Phase::Start,
            second_pass: None,
        }
    }
}

impl CleanupOutcome {
    fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn is_success(&self) -> bool {
        self.failures == 0
    }

    /// 0 on full success, 1 if anything failed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// The teardown engine
pub struct Cleanup {
    tracer: Tracer,
    options: CleanupOptions,
}

impl Cleanup {
    pub fn new(tracer: Tracer, options: CleanupOptions) -> Self {
        Self { tracer, options }
    }

    /// Tear down `jail`
    ///
    /// Consumes `host`: if a second pass is needed the host is exchanged for
    /// its attached view. Run this in a disposable process (see
    /// [`cleanup_jail`]) unless the caller is about to exit anyway.
    pub async fn run<H: Host>(&self, host: H, jail: &JailIdentity) -> Result<CleanupOutcome> {
        let mut phase = TeardownPhase::new();
        let mut outcome = CleanupOutcome::default();

        self.tracer.info(format!(
            "Cleaning up jail '{}' (JID {}, path {})",
            jail.name,
            jail.jid,
            jail.path.display()
        ));

        phase.advance(TeardownMachineEvent::Kill)?;
        self.kill_processes(&host, jail, &mut outcome).await;

        phase.advance(TeardownMachineEvent::Reap)?;
        match reaper::destroy_nested_jails(&host, jail, &self.tracer) {
            Ok(failures) => outcome.failures += failures,
            Err(e) => {
                self.tracer.warn(format!(
                    "Failed to list nested jails of '{}': {}",
                    jail.name, e
                ));
                outcome.record_failure();
            }
        }

        if jail.is_vnet() {
            phase.advance(TeardownMachineEvent::Detach)?;
            match network::destroy_vnet_interfaces(&host, jail, &self.tracer) {
                Ok(count) => self.tracer.debug(format!(
                    "Destroyed {} epair interface(s) of jail '{}'",
                    count, jail.name
                )),
                Err(e) if e.is_fatal() => {
                    self.tracer.error(e.to_string());
                    return Err(e);
                }
                Err(e) => {
                    self.tracer.warn(format!(
                        "Failed to destroy VNET interfaces of jail '{}': {}",
                        jail.name, e
                    ));
                    outcome.record_failure();
                }
            }
        }

        phase.advance(TeardownMachineEvent::Enumerate)?;
        let vmm_devices = match host.list_vmm_devices() {
            Ok(devices) => devices,
            Err(e) => {
                self.tracer.warn(format!("Failed to list VMM devices: {}", e));
                outcome.record_failure();
                Vec::new()
            }
        };
        let mounts = self.read_outside_mounts(&host, &mut outcome);

        phase.advance(TeardownMachineEvent::Unmount)?;
        let probe_set = self.unmount_outside(&host, jail, &mounts, &mut outcome);

        if probe_set.is_empty() && vmm_devices.is_empty() {
            outcome.phase = phase.advance(TeardownMachineEvent::Finish)?;
            self.report(jail, &outcome);
            return Ok(outcome);
        }

        phase.advance(TeardownMachineEvent::Attach)?;
        self.tracer.info(format!(
            "Attaching to jail '{}' for a second pass ({} probe mount(s), {} VMM device(s))",
            jail.name,
            probe_set.len(),
            vmm_devices.len()
        ));
        let attached = match host.attach(jail.jid) {
            Ok(attached) => attached,
            Err(source) => {
                let err = Error::JailAttach {
                    jid: jail.jid,
                    source,
                };
                self.tracer.error(err.to_string());
                return Err(err);
            }
        };

        phase.advance(TeardownMachineEvent::Probe)?;
        outcome.second_pass = Some(self.second_pass(&attached, &probe_set, &mut outcome));

        if !vmm_devices.is_empty() {
            phase.advance(TeardownMachineEvent::Scrub)?;
            self.destroy_vmm_devices(&attached, &vmm_devices, &mut outcome);
        }

        outcome.phase = phase.advance(TeardownMachineEvent::Finish)?;
        self.report(jail, &outcome);
        Ok(outcome)
    }

    async fn kill_processes<H: Host>(
        &self,
        host: &H,
        jail: &JailIdentity,
        outcome: &mut CleanupOutcome,
    ) {
        let kill = reaper::kill_jail_processes(
            host,
            jail,
            self.options.signal,
            self.options.poll_interval,
            &self.tracer,
        );

        match tokio::time::timeout(self.options.kill_timeout, kill).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.tracer.warn(format!(
                    "Failed to kill processes in jail '{}': {}",
                    jail.name, e
                ));
                outcome.record_failure();
            }
            Err(_) => {
                let err = Error::KillTimeout {
                    jail: jail.name.clone(),
                    timeout: self.options.kill_timeout,
                };
                self.tracer.warn(err.to_string());
                outcome.record_failure();
            }
        }
    }

    /// Prefer the jail-scoped table (it carries fsids), else the system table
    fn read_outside_mounts<H: Host>(&self, host: &H, outcome: &mut CleanupOutcome) -> Vec<MountEntry> {
        let jailed = host.is_jailed().unwrap_or_else(|e| {
            self.tracer
                .warn(format!("Cannot tell whether we are jailed, assuming not: {}", e));
            false
        });

        if jailed {
            match host.jail_scoped_mount_info() {
                Ok(Some(entries)) => {
                    self.tracer.debug("Using jail-scoped mount table");
                    return entries;
                }
                Ok(None) => self
                    .tracer
                    .debug("Jail-scoped mount table unavailable, using system table"),
                Err(e) => self.tracer.warn(format!(
                    "Failed to read jail-scoped mount table, using system table: {}",
                    e
                )),
            }
        }

        match host.mount_info() {
            Ok(entries) => entries,
            Err(e) => {
                self.tracer.warn(format!("Failed to read mount table: {}", e));
                outcome.record_failure();
                Vec::new()
            }
        }
    }

    /// Unmount everything below the jail root from outside
    ///
    /// Returns the probe set: nullfs mounts that would not go away, rewritten
    /// relative to the jail root.
    fn unmount_outside<H: Host>(
        &self,
        host: &H,
        jail: &JailIdentity,
        mounts: &[MountEntry],
        outcome: &mut CleanupOutcome,
    ) -> Vec<PathBuf> {
        if !jail.path.is_absolute() || jail.path.parent().is_none() {
            self.tracer.warn(format!(
                "Jail '{}' is rooted at '{}', not unmounting anything",
                jail.name,
                jail.path.display()
            ));
            return Vec::new();
        }

        let mut probe_set = Vec::new();
        for entry in mount::unmount_candidates(mounts, &jail.path, self.options.skip_first_devfs) {
            let target = entry.unmount_target();
            match host.unmount(&target, MountFlags::FORCE) {
                Ok(()) => self.tracer.info(format!(
                    "Unmounted {} ({}, {})",
                    entry.node.display(),
                    entry.fs_type,
                    target
                )),
                Err(e) if entry.is_nullfs() => {
                    self.tracer.info(format!(
                        "Deferring nullfs {} to the second pass: {}",
                        entry.node.display(),
                        e
                    ));
                    if let Some(node) = mount::relative_node(&entry.node, &jail.path) {
                        probe_set.push(node);
                    }
                }
                Err(e) => {
                    self.tracer.warn(format!(
                        "Failed to unmount {} ({}): {}",
                        entry.node.display(),
                        entry.fs_type,
                        e
                    ));
                    outcome.record_failure();
                }
            }
        }

        probe_set
    }

    fn second_pass<A: AttachedHost>(
        &self,
        attached: &A,
        probe_set: &[PathBuf],
        outcome: &mut CleanupOutcome,
    ) -> SecondPass {
        match attached.jail_scoped_mount_info() {
            Ok(Some(entries)) => {
                // Correctly scoped now, so every error is genuine
                for entry in entries.iter().rev() {
                    if entry.node == Path::new("/") {
                        continue;
                    }
                    let target = entry.unmount_target();
                    match attached.unmount(&target, MountFlags::FORCE) {
                        Ok(()) => self.tracer.info(format!(
                            "Unmounted {} from inside the jail",
                            entry.node.display()
                        )),
                        Err(e) => {
                            self.tracer.warn(format!(
                                "Failed to unmount {} from inside the jail: {}",
                                entry.node.display(),
                                e
                            ));
                            outcome.record_failure();
                        }
                    }
                }
                SecondPass::JailScoped
            }
            Ok(None) => {
                self.probe_unmount(attached, probe_set, outcome);
                SecondPass::Probe
            }
            Err(e) => {
                self.tracer.warn(format!(
                    "Failed to read jail-scoped mount table inside the jail, probing: {}",
                    e
                ));
                self.probe_unmount(attached, probe_set, outcome);
                SecondPass::Probe
            }
        }
    }

    /// Force-unmount each probe entry; EPERM means it was never ours
    fn probe_unmount<A: AttachedHost>(
        &self,
        attached: &A,
        probe_set: &[PathBuf],
        outcome: &mut CleanupOutcome,
    ) {
        for node in probe_set {
            let target = UnmountTarget::Path(node.clone());
            match attached.unmount(&target, MountFlags::FORCE) {
                Ok(()) => self
                    .tracer
                    .info(format!("Probe unmount of {} succeeded", node.display())),
                Err(e) if e.errno == Errno::EPERM => self.tracer.info(format!(
                    "Probe unmount of {} not permitted, not mounted in this jail",
                    node.display()
                )),
                Err(e) => {
                    self.tracer.warn(format!(
                        "Probe unmount of {} failed: {}",
                        node.display(),
                        e
                    ));
                    outcome.record_failure();
                }
            }
        }
    }

    fn destroy_vmm_devices<A: AttachedHost>(
        &self,
        attached: &A,
        devices: &[String],
        outcome: &mut CleanupOutcome,
    ) {
        for name in devices {
            match attached.destroy_vmm(name) {
                Ok(()) => self.tracer.info(format!("Destroyed VMM device {}", name)),
                // Belongs to someone else
                Err(e) if e.errno == Errno::EPERM => {}
                Err(e) if e.errno == Errno::ENOENT => self.tracer.warn(format!(
                    "VMM device {} was destroyed by someone else first",
                    name
                )),
                Err(e) => {
                    self.tracer
                        .warn(format!("Failed to destroy VMM device {}: {}", name, e));
                    outcome.record_failure();
                }
            }
        }
    }

    fn report(&self, jail: &JailIdentity, outcome: &CleanupOutcome) {
        if outcome.is_success() {
            self.tracer
                .info(format!("Cleanup complete for jail '{}'", jail.name));
        } else {
            self.tracer.warn(format!(
                "Cleanup of jail '{}' finished with {} failure(s)",
                jail.name, outcome.failures
            ));
        }
    }
}

fn run_on_current_thread(
    host: FreeBsdHost,
    jail: &JailIdentity,
    options: &CleanupOptions,
    tracer: &Tracer,
) -> Result<CleanupOutcome> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(Cleanup::new(tracer.clone(), options.clone()).run(host, jail))
}

/// Tear down a jail on the live host from a disposable child process
///
/// Re-executes the running binary, which must route
/// [`isolate::ISOLATED_COMMAND`] to [`isolate::serve_isolated`]. The child
/// may attach to the jail; the caller never does. Events traced by the child
/// are replayed on `tracer` once it has finished.
pub fn cleanup_jail(
    host: &FreeBsdHost,
    jail: &JailIdentity,
    options: &CleanupOptions,
    tracer: &Tracer,
) -> Result<CleanupOutcome> {
    isolate::IsolatedCleanup::current_exe()?.run(host, jail, options, tracer)
}

/// Tear down a jail from the calling process
///
/// The calling process may end up attached to the jail; only use this as the
/// last thing a process does.
pub fn cleanup_jail_in_process(
    host: FreeBsdHost,
    jail: &JailIdentity,
    options: &CleanupOptions,
    tracer: &Tracer,
) -> Result<CleanupOutcome> {
    run_on_current_thread(host, jail, options, tracer)
}
