//! Process and nested-jail reapers

use crate::error::Result;
use crate::host::Host;
use crate::jail::JailIdentity;
use crate::trace::Tracer;
use nix::sys::signal::Signal;
use std::time::Duration;

/// Interval between process probes after signalling
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Signal every process in the jail and wait until none are left
///
/// A jail with no processes is left alone, no signal is sent. Otherwise the
/// signal goes out once and the probe is repeated every `poll_interval`,
/// suspending only the calling task. There is no timeout here; wrap the
/// future in `tokio::time::timeout` to bound it.
pub async fn kill_jail_processes<H: Host>(
    host: &H,
    jail: &JailIdentity,
    signal: Signal,
    poll_interval: Duration,
    tracer: &Tracer,
) -> Result<()> {
    if !host.has_processes(jail.jid)? {
        tracer.debug(format!("No processes left in jail '{}'", jail.name));
        return Ok(());
    }

    tracer.info(format!(
        "Sending {} to processes in jail '{}' (JID {})",
        signal, jail.name, jail.jid
    ));
    host.signal_processes(jail.jid, signal)?;

    while host.has_processes(jail.jid)? {
        tokio::time::sleep(poll_interval).await;
    }

    tracer.debug(format!("All processes in jail '{}' exited", jail.name));
    Ok(())
}

/// Remove every jail whose parent is `jail`
///
/// Each removal is independent: a failure is traced and counted, and the
/// remaining children are still removed. Returns the number of failures.
pub fn destroy_nested_jails<H: Host>(
    host: &H,
    jail: &JailIdentity,
    tracer: &Tracer,
) -> Result<usize> {
    let children: Vec<JailIdentity> = host
        .list_jails()?
        .into_iter()
        .filter(|j| j.parent() == Some(jail.jid))
        .collect();

    let mut failures = 0;
    for child in &children {
        tracer.info(format!(
            "Removing nested jail '{}' (JID {})",
            child.name, child.jid
        ));
        if let Err(e) = host.remove_jail(child.jid) {
            tracer.warn(format!(
                "Failed to remove nested jail '{}' (JID {}): {}",
                child.name, child.jid, e
            ));
            failures += 1;
        }
    }

    Ok(failures)
}
