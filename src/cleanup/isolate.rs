//! Run a teardown in a disposable child process
//!
//! jail_attach(2) cannot be undone, so the attached second pass must never
//! happen in a long-lived caller. The caller re-executes its own binary with
//! [`ISOLATED_COMMAND`], writes a JSON [`ChildRequest`] to its stdin and reads
//! a JSON [`ChildReport`] back from its stdout. The child records every trace
//! event; the parent replays them, in order, into its own tracer.

use super::{CleanupOptions, CleanupOutcome, cleanup_jail_in_process};
use crate::error::{Error, Result, SyscallError};
use crate::host::FreeBsdHost;
use crate::jail::JailIdentity;
use crate::trace::{MemorySink, TraceEvent, Tracer};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Duration;

/// Hidden subcommand a binary must route to [`serve_isolated`]
pub const ISOLATED_COMMAND: &str = "isolated-cleanup";

/// What the parent asks the child to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRequest {
    pub jail: JailIdentity,
    pub kill_timeout_ms: u64,
    /// Signal name, e.g. "SIGKILL"
    pub signal: String,
    pub poll_interval_ms: u64,
    pub skip_first_devfs: bool,
    pub vmm_dir: PathBuf,
}

impl ChildRequest {
    pub fn new(jail: &JailIdentity, options: &CleanupOptions, vmm_dir: impl Into<PathBuf>) -> Self {
        Self {
            jail: jail.clone(),
            kill_timeout_ms: options.kill_timeout.as_millis() as u64,
            signal: options.signal.as_str().to_string(),
            poll_interval_ms: options.poll_interval.as_millis() as u64,
            skip_first_devfs: options.skip_first_devfs,
            vmm_dir: vmm_dir.into(),
        }
    }

    pub fn options(&self) -> Result<CleanupOptions> {
        let signal = Signal::from_str(&self.signal)
            .map_err(|_| Error::Isolation(format!("Unknown signal in request: {}", self.signal)))?;

        Ok(CleanupOptions {
            kill_timeout: Duration::from_millis(self.kill_timeout_ms),
            signal,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            skip_first_devfs: self.skip_first_devfs,
        })
    }
}

/// How the child's teardown ended
#[derive(Debug, Serialize, Deserialize)]
enum ChildResult {
    Finished(CleanupOutcome),
    AttachFailed {
        jid: i32,
        operation: String,
        errno: i32,
    },
    InterfacesStuck {
        jail: String,
        before: usize,
        after: usize,
    },
    Failed(String),
}

impl ChildResult {
    fn from_result(result: Result<CleanupOutcome>) -> Self {
        match result {
            Ok(outcome) => ChildResult::Finished(outcome),
            Err(Error::JailAttach { jid, source }) => ChildResult::AttachFailed {
                jid,
                operation: source.operation,
                errno: source.errno as i32,
            },
            Err(Error::InterfaceCountNotDecreasing {
                jail,
                before,
                after,
            }) => ChildResult::InterfacesStuck {
                jail,
                before,
                after,
            },
            Err(e) => ChildResult::Failed(e.to_string()),
        }
    }

    fn into_result(self) -> Result<CleanupOutcome> {
        match self {
            ChildResult::Finished(outcome) => Ok(outcome),
            ChildResult::AttachFailed {
                jid,
                operation,
                errno,
            } => Err(Error::JailAttach {
                jid,
                source: SyscallError::new(operation, Errno::from_raw(errno)),
            }),
            ChildResult::InterfacesStuck {
                jail,
                before,
                after,
            } => Err(Error::InterfaceCountNotDecreasing {
                jail,
                before,
                after,
            }),
            ChildResult::Failed(message) => Err(Error::Isolation(message)),
        }
    }
}

/// What the child sends back: the trace it produced and how it ended
#[derive(Debug, Serialize, Deserialize)]
pub struct ChildReport {
    events: Vec<TraceEvent>,
    result: ChildResult,
}

impl ChildReport {
    /// Run `teardown` against a recording tracer
    pub fn capture<F>(teardown: F) -> Self
    where
        F: FnOnce(&Tracer) -> Result<CleanupOutcome>,
    {
        let tracer = Tracer::new();
        let memory = MemorySink::new();
        tracer.register(memory.clone());

        let result = ChildResult::from_result(teardown(&tracer));
        Self {
            events: memory.events(),
            result,
        }
    }

    /// Re-emit the recorded events on `tracer`, then hand back the result
    pub fn replay(self, tracer: &Tracer) -> Result<CleanupOutcome> {
        for event in self.events {
            tracer.emit(event.level, event.message);
        }
        self.result.into_result()
    }
}

/// Launches the isolated teardown child
#[derive(Debug, Clone)]
pub struct IsolatedCleanup {
    program: PathBuf,
}

impl IsolatedCleanup {
    /// `program` must dispatch [`ISOLATED_COMMAND`] to [`serve_isolated`]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Re-execute the running binary
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn run(
        &self,
        host: &FreeBsdHost,
        jail: &JailIdentity,
        options: &CleanupOptions,
        tracer: &Tracer,
    ) -> Result<CleanupOutcome> {
        let request = ChildRequest::new(jail, options, host.vmm_dir());
        let mut command = Command::new(&self.program);
        command.arg(ISOLATED_COMMAND);
        run_child(command, &request, tracer)
    }
}

/// Spawn `command`, feed it `request` and replay its report into `tracer`
fn run_child(mut command: Command, request: &ChildRequest, tracer: &Tracer) -> Result<CleanupOutcome> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::Isolation(format!("Failed to start {}: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        let body = serde_json::to_vec(request)?;
        // A child that died early is reported through its exit status
        match stdin.write_all(&body) {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(Error::Isolation(format!(
            "cleanup process ended unexpectedly: {}",
            output.status
        )));
    }

    let report: ChildReport = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::Isolation(format!("Unreadable cleanup report: {}", e)))?;
    report.replay(tracer)
}

/// Child side: read a request on stdin, tear down, write the report on stdout
///
/// Teardown errors travel in the report; an `Err` here means the request
/// could not be read or the report could not be written.
pub fn serve_isolated() -> Result<()> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;
    let request: ChildRequest = serde_json::from_slice(&input)?;
    let options = request.options()?;

    let report = ChildReport::capture(|tracer| {
        cleanup_jail_in_process(
            FreeBsdHost::new(&request.vmm_dir),
            &request.jail,
            &options,
            tracer,
        )
    });

    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &report)?;
    stdout.flush()?;
    Ok(())
}
